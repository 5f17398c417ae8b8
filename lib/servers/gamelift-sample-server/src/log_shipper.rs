//! Delivery of single log entries to a CloudWatch Logs stream.
//!
//! A send can fail because the group or stream does not exist yet, or because
//! the sequence token we hold is stale. Both are healed in place and the send
//! is retried, up to [`MAX_SHIP_ATTEMPTS`] sends per entry. Any other failure
//! drops the entry.

use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tracing::instrument;

use crate::error::ShipError;

/// Upper bound on `PutLogEvents` calls for one entry.
pub const MAX_SHIP_ATTEMPTS: u32 = 3;

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// One log line with its timestamp in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub timestamp_ms: i64,
    pub message: String,
}

impl LogEvent {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            message: message.into(),
        }
    }
}

/// Log ingestion backend.
#[async_trait]
pub trait LogBackend: Send + Sync {
    async fn create_log_group(&self, log_group: &str) -> Result<(), ShipError>;

    async fn create_log_stream(&self, log_group: &str, log_stream: &str) -> Result<(), ShipError>;

    /// Returns the token to use for the next batch, if the backend issued one.
    async fn put_log_events(
        &self,
        log_group: &str,
        log_stream: &str,
        events: Vec<LogEvent>,
        sequence_token: Option<&str>,
    ) -> Result<Option<String>, ShipError>;
}

/// What happened to a shipped entry. Callers are free to ignore it; every
/// outcome is already logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShipOutcome {
    Delivered { attempts: u32 },
    /// Unrecoverable error, the entry was dropped without retrying.
    Dropped { attempts: u32 },
    /// Every attempt hit a recoverable error.
    Exhausted,
}

/// Ships entries to one log group/stream and owns the sequence token.
///
/// `ship` takes `&mut self`: the token is read, sent, and replaced within one
/// call. Sharing a shipper between tasks requires wrapping it in a mutex,
/// otherwise concurrent ships race on the token and keep tripping
/// invalid-token errors.
pub struct LogShipper<B> {
    backend: B,
    log_group: String,
    log_stream: String,
    sequence_token: Option<String>,
    retry_delay: Duration,
}

impl<B: LogBackend> LogShipper<B> {
    pub fn new(
        backend: B,
        log_group: impl Into<String>,
        log_stream: impl Into<String>,
        initial_sequence_token: impl Into<String>,
    ) -> Result<Self> {
        let initial_sequence_token = initial_sequence_token.into();
        if initial_sequence_token.is_empty() {
            bail!("Initial sequence token must not be empty");
        }

        Ok(Self {
            backend,
            log_group: log_group.into(),
            log_stream: log_stream.into(),
            sequence_token: Some(initial_sequence_token),
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn sequence_token(&self) -> Option<&str> {
        self.sequence_token.as_deref()
    }

    /// Deliver one entry, healing a missing group/stream or a stale token.
    #[instrument(skip_all, fields(log_group = %self.log_group, log_stream = %self.log_stream))]
    pub async fn ship(&mut self, message: &str) -> ShipOutcome {
        for attempt in 1..=MAX_SHIP_ATTEMPTS {
            let result = self
                .backend
                .put_log_events(
                    &self.log_group,
                    &self.log_stream,
                    vec![LogEvent::now(message)],
                    self.sequence_token.as_deref(),
                )
                .await;

            match result {
                Ok(next_token) => {
                    tracing::debug!(attempt, next_token = ?next_token, "Log event delivered");
                    self.sequence_token = next_token;
                    return ShipOutcome::Delivered { attempts: attempt };
                }
                Err(ShipError::ResourceNotFound) => {
                    tracing::warn!(attempt, "Log group or stream missing, creating them");
                    let group_created = self.create_log_group().await;
                    let stream_created = self.create_log_stream().await;
                    tracing::debug!(group_created, stream_created, "Log destination setup done");
                }
                Err(ShipError::InvalidSequenceToken { expected }) => {
                    tracing::warn!(
                        attempt,
                        expected = ?expected,
                        "Sequence token rejected, switching to the expected token"
                    );
                    self.sequence_token = expected;
                }
                Err(e) => {
                    tracing::error!(attempt, "Failed to ship log event: {}", e);
                    return ShipOutcome::Dropped { attempts: attempt };
                }
            }

            if attempt < MAX_SHIP_ATTEMPTS {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        tracing::error!(
            attempts = MAX_SHIP_ATTEMPTS,
            "Giving up on log event after exhausting retries"
        );
        ShipOutcome::Exhausted
    }

    /// Best-effort; failures are logged and reported as `false`.
    pub async fn create_log_group(&self) -> bool {
        match self.backend.create_log_group(&self.log_group).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to create log group {}: {}", self.log_group, e);
                false
            }
        }
    }

    /// Best-effort; failures are logged and reported as `false`.
    pub async fn create_log_stream(&self) -> bool {
        match self
            .backend
            .create_log_stream(&self.log_group, &self.log_stream)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to create log stream {}: {}", self.log_stream, e);
                false
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::{BackendCall, FakeLogBackend};
    use super::*;
    use tokio::time::Instant;

    fn shipper(backend: FakeLogBackend) -> LogShipper<FakeLogBackend> {
        LogShipper::new(backend, "/gamelift/test", "process-1", "T0").unwrap()
    }

    fn put(message: &str, token: Option<&str>) -> BackendCall {
        BackendCall::Put {
            message: message.to_string(),
            token: token.map(String::from),
        }
    }

    #[test]
    fn test_empty_initial_token_rejected() {
        let result = LogShipper::new(FakeLogBackend::default(), "g", "s", "");
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_stores_returned_token() {
        let backend = FakeLogBackend::scripted(vec![Ok(Some("T1".to_string()))]);
        let mut shipper = shipper(backend.clone());

        let outcome = shipper.ship("hello").await;

        assert_eq!(outcome, ShipOutcome::Delivered { attempts: 1 });
        assert_eq!(shipper.sequence_token(), Some("T1"));
        assert_eq!(backend.calls(), vec![put("hello", Some("T0"))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_stream_is_created_then_retried() {
        let backend = FakeLogBackend::scripted(vec![
            Err(ShipError::ResourceNotFound),
            Ok(Some("T1".to_string())),
        ]);
        let mut shipper = shipper(backend.clone());
        let start = Instant::now();

        let outcome = shipper.ship("first").await;

        assert_eq!(outcome, ShipOutcome::Delivered { attempts: 2 });
        assert_eq!(shipper.sequence_token(), Some("T1"));
        assert_eq!(
            backend.calls(),
            vec![
                put("first", Some("T0")),
                BackendCall::CreateGroup("/gamelift/test".to_string()),
                BackendCall::CreateStream("/gamelift/test".to_string(), "process-1".to_string()),
                put("first", Some("T0")),
            ]
        );
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_creation_failures_do_not_abort_retry() {
        let mut backend = FakeLogBackend::scripted(vec![
            Err(ShipError::ResourceNotFound),
            Ok(Some("T1".to_string())),
        ]);
        backend.fail_create = true;
        let mut shipper = shipper(backend.clone());

        let outcome = shipper.ship("first").await;

        assert_eq!(outcome, ShipOutcome::Delivered { attempts: 2 });
        assert_eq!(backend.put_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_token_replaced_with_expected() {
        let backend = FakeLogBackend::scripted(vec![
            Err(ShipError::InvalidSequenceToken {
                expected: Some("T2".to_string()),
            }),
            Ok(Some("T3".to_string())),
        ]);
        let mut shipper = shipper(backend.clone());

        let outcome = shipper.ship("stale").await;

        assert_eq!(outcome, ShipOutcome::Delivered { attempts: 2 });
        assert_eq!(
            backend.calls(),
            vec![put("stale", Some("T0")), put("stale", Some("T2"))]
        );
        assert_eq!(shipper.sequence_token(), Some("T3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_token_without_expected_clears_token() {
        let backend = FakeLogBackend::scripted(vec![
            Err(ShipError::InvalidSequenceToken { expected: None }),
            Ok(None),
        ]);
        let mut shipper = shipper(backend.clone());

        shipper.ship("fresh stream").await;

        assert_eq!(
            backend.calls(),
            vec![put("fresh stream", Some("T0")), put("fresh stream", None)]
        );
        assert_eq!(shipper.sequence_token(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recoverable_errors_exhaust_after_three_attempts() {
        let backend = FakeLogBackend::scripted(vec![
            Err(ShipError::ResourceNotFound),
            Err(ShipError::ResourceNotFound),
            Err(ShipError::ResourceNotFound),
            Ok(Some("never".to_string())),
        ]);
        let mut shipper = shipper(backend.clone());

        let outcome = shipper.ship("doomed").await;

        assert_eq!(outcome, ShipOutcome::Exhausted);
        assert_eq!(backend.put_count(), MAX_SHIP_ATTEMPTS as usize);
        assert_eq!(shipper.sequence_token(), Some("T0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_stale_tokens_exhaust_with_last_expected_token() {
        let backend = FakeLogBackend::scripted(vec![
            Err(ShipError::InvalidSequenceToken {
                expected: Some("T1".to_string()),
            }),
            Err(ShipError::InvalidSequenceToken {
                expected: Some("T2".to_string()),
            }),
            Err(ShipError::InvalidSequenceToken {
                expected: Some("T3".to_string()),
            }),
        ]);
        let mut shipper = shipper(backend.clone());

        let outcome = shipper.ship("contended").await;

        assert_eq!(outcome, ShipOutcome::Exhausted);
        assert_eq!(
            backend.calls(),
            vec![
                put("contended", Some("T0")),
                put("contended", Some("T1")),
                put("contended", Some("T2")),
            ]
        );
        assert_eq!(shipper.sequence_token(), Some("T3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecoverable_error_stops_immediately() {
        let backend = FakeLogBackend::scripted(vec![Err(ShipError::Other(
            "ThrottlingException".to_string(),
        ))]);
        let mut shipper = shipper(backend.clone());
        let start = Instant::now();

        let outcome = shipper.ship("dropped").await;

        assert_eq!(outcome, ShipOutcome::Dropped { attempts: 1 });
        assert_eq!(backend.put_count(), 1);
        assert_eq!(shipper.sequence_token(), Some("T0"));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_carries_across_ships() {
        let backend = FakeLogBackend::scripted(vec![
            Ok(Some("T1".to_string())),
            Ok(Some("T2".to_string())),
        ]);
        let mut shipper = shipper(backend.clone());

        shipper.ship("one").await;
        shipper.ship("two").await;

        assert_eq!(
            backend.calls(),
            vec![put("one", Some("T0")), put("two", Some("T1"))]
        );
        assert_eq!(shipper.sequence_token(), Some("T2"));
    }
}
