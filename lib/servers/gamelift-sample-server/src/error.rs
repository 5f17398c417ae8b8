//! Error types shared across the game server.
//!
//! Two seams carry typed errors: the hosting SDK client (`GameLiftError`) and
//! the log backend (`ShipError`). Everything above them uses `anyhow`.

use thiserror::Error;

/// Failures reported by the hosting SDK client.
#[derive(Debug, Error)]
pub enum GameLiftError {
    #[error("missing environment variable {0}")]
    MissingEnvironment(&'static str),

    #[error("invalid websocket url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("failed to connect to GameLift: {0}")]
    Connection(String),

    #[error("SDK is not initialized")]
    NotInitialized,

    #[error("no game session has been assigned to this process")]
    NoActiveGameSession,

    #[error("{action} rejected with status {status}: {message}")]
    Rejected {
        action: String,
        status: u16,
        message: String,
    },

    #[error("timed out waiting for {action} response")]
    Timeout { action: &'static str },

    #[error("connection to GameLift closed")]
    ConnectionClosed,

    #[error("failed to encode message: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure kinds of a single call against the log backend.
///
/// Only the first two are recoverable; the shipper treats everything else as
/// terminal for the entry being shipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShipError {
    #[error("log group or log stream does not exist")]
    ResourceNotFound,

    #[error("invalid sequence token, expected {expected:?}")]
    InvalidSequenceToken { expected: Option<String> },

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_display() {
        let err = GameLiftError::Rejected {
            action: "ActivateServerProcess".to_string(),
            status: 400,
            message: "bad port".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "ActivateServerProcess rejected with status 400: bad port"
        );
    }

    #[test]
    fn test_ship_error_display() {
        let err = ShipError::InvalidSequenceToken {
            expected: Some("T2".to_string()),
        };
        assert!(err.to_string().contains("T2"));
        assert_eq!(ShipError::Other("boom".to_string()).to_string(), "boom");
    }
}
