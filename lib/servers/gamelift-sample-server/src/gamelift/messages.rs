//! JSON messages exchanged with GameLift over the WebSocket connection.

use serde::{Deserialize, Serialize};

use crate::error::GameLiftError;

pub const SDK_VERSION: &str = "5.1.2";
pub const SDK_LANGUAGE: &str = "Rust";

pub const CREATE_GAME_SESSION: &str = "CreateGameSession";
pub const TERMINATE_PROCESS: &str = "TerminateProcess";

const STATUS_OK: u16 = 200;

/// Requests sent by the server process. Every request expects a response
/// carrying the same `RequestId`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "Action", rename_all_fields = "PascalCase")]
pub enum OutboundMessage {
    ActivateServerProcess {
        request_id: String,
        sdk_version: String,
        sdk_language: String,
        port: u16,
        log_paths: Vec<String>,
    },
    ActivateGameSession {
        request_id: String,
        game_session_id: String,
    },
    TerminateServerProcess {
        request_id: String,
    },
    HeartbeatServerProcess {
        request_id: String,
        health_status: bool,
    },
}

impl OutboundMessage {
    pub fn activate_server_process(port: u16, log_paths: Vec<String>) -> Self {
        Self::ActivateServerProcess {
            request_id: new_request_id(),
            sdk_version: SDK_VERSION.to_string(),
            sdk_language: SDK_LANGUAGE.to_string(),
            port,
            log_paths,
        }
    }

    pub fn activate_game_session(game_session_id: String) -> Self {
        Self::ActivateGameSession {
            request_id: new_request_id(),
            game_session_id,
        }
    }

    pub fn terminate_server_process() -> Self {
        Self::TerminateServerProcess {
            request_id: new_request_id(),
        }
    }

    pub fn heartbeat(health_status: bool) -> Self {
        Self::HeartbeatServerProcess {
            request_id: new_request_id(),
            health_status,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Self::ActivateServerProcess { .. } => "ActivateServerProcess",
            Self::ActivateGameSession { .. } => "ActivateGameSession",
            Self::TerminateServerProcess { .. } => "TerminateServerProcess",
            Self::HeartbeatServerProcess { .. } => "HeartbeatServerProcess",
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            Self::ActivateServerProcess { request_id, .. }
            | Self::ActivateGameSession { request_id, .. }
            | Self::TerminateServerProcess { request_id }
            | Self::HeartbeatServerProcess { request_id, .. } => request_id,
        }
    }
}

fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Fields common to every inbound message. Responses to our requests carry a
/// `RequestId` and a `StatusCode`; notifications from GameLift are told apart
/// by `Action`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope {
    pub action: String,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Present on `CreateGameSession`
    #[serde(default)]
    pub game_session_id: Option<String>,
}

impl Envelope {
    /// Interpret the envelope as the response to a request.
    pub fn into_result(self) -> Result<(), GameLiftError> {
        match self.status_code {
            None | Some(STATUS_OK) => Ok(()),
            Some(status) => Err(GameLiftError::Rejected {
                action: self.action,
                status,
                message: self.error_message.unwrap_or_default(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TerminateProcess {
    /// Epoch milliseconds after which GameLift stops the process forcibly
    pub termination_time: Option<i64>,
}
