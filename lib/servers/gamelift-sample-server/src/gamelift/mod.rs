//! Boundary with the GameLift hosting control plane.
//!
//! The rest of the crate talks to GameLift only through [`ServerApi`] and
//! receives notifications through [`ProcessCallbacks`]. [`GameLiftServerApi`]
//! is the WebSocket implementation used in production.

mod client;
pub mod messages;

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use url::Url;

use crate::error::GameLiftError;
use messages::{SDK_LANGUAGE, SDK_VERSION};

pub use client::GameLiftServerApi;

/// Outbound half of the server-process contract.
#[async_trait]
pub trait ServerApi: Send + Sync {
    /// Open the connection to the control plane.
    async fn init_sdk(&self) -> Result<(), GameLiftError>;

    /// Register the callbacks and tell GameLift the process can host sessions.
    async fn process_ready(&self, parameters: ProcessParameters) -> Result<(), GameLiftError>;

    /// Acknowledge the game session most recently assigned to this process.
    async fn activate_game_session(&self) -> Result<(), GameLiftError>;

    /// Tell GameLift the process is shutting down.
    async fn process_ending(&self) -> Result<(), GameLiftError>;
}

/// Inbound half of the contract, invoked by the SDK client.
///
/// Implementations must not block: GameLift gives each callback a bounded
/// amount of time and may invoke them concurrently with anything else the
/// process is doing.
#[async_trait]
pub trait ProcessCallbacks: Send + Sync {
    async fn on_start_game_session(&self, game_session: GameSession);

    async fn on_process_terminate(&self);

    async fn on_health_check(&self) -> bool;
}

/// Files GameLift uploads once the game session ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogParameters {
    pub log_paths: Vec<String>,
}

impl LogParameters {
    pub fn new(log_paths: Vec<String>) -> Self {
        Self { log_paths }
    }
}

/// Registration record handed to [`ServerApi::process_ready`].
#[derive(Clone)]
pub struct ProcessParameters {
    pub callbacks: Arc<dyn ProcessCallbacks>,
    pub port: u16,
    pub log_parameters: LogParameters,
}

impl ProcessParameters {
    pub fn new(
        callbacks: Arc<dyn ProcessCallbacks>,
        port: u16,
        log_parameters: LogParameters,
    ) -> Self {
        Self {
            callbacks,
            port,
            log_parameters,
        }
    }
}

impl fmt::Debug for ProcessParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessParameters")
            .field("port", &self.port)
            .field("log_parameters", &self.log_parameters)
            .finish_non_exhaustive()
    }
}

/// Game session assigned by GameLift. Read-only to the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct GameSession {
    /// ARN-style id, echoed back in `ActivateGameSession`
    #[serde(deserialize_with = "null_as_default")]
    pub game_session_id: String,
    /// Optional name chosen by whoever created the session
    #[serde(rename = "GameSessionName")]
    pub name: Option<String>,
    /// Fleet the session was placed on
    pub fleet_id: Option<String>,
    /// Player slots GameLift will fill
    pub maximum_player_session_count: Option<u32>,
    /// Public address players connect to
    pub ip_address: Option<String>,
    /// Public DNS name players connect to
    pub dns_name: Option<String>,
    /// Port players connect to
    pub port: Option<u16>,
    /// Free-form key/value pairs set at session creation
    #[serde(deserialize_with = "null_as_default")]
    pub game_properties: HashMap<String, String>,
    /// Opaque game data set at session creation
    pub game_session_data: Option<String>,
    /// FlexMatch ticket data, when the session came from matchmaking
    pub matchmaker_data: Option<String>,
}

/// GameLift sends `null` for fields it has no value for.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Connection settings for the GameLift WebSocket endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerParameters {
    /// `ws://` or `wss://` endpoint of the GameLift service or local agent
    pub websocket_url: String,
    /// Unique id of this server process
    pub process_id: String,
    /// Compute (host) the process runs on
    pub host_id: String,
    /// Fleet the compute belongs to
    pub fleet_id: String,
    /// Token for fleets that authenticate server processes
    pub auth_token: Option<String>,
}

impl ServerParameters {
    /// Read the `GAMELIFT_SDK_*` variables the GameLift agent sets for every
    /// server process it launches.
    pub fn from_env() -> Result<Self, GameLiftError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, GameLiftError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or(GameLiftError::MissingEnvironment(key))
        };

        Ok(Self {
            websocket_url: required("GAMELIFT_SDK_WEBSOCKET_URL")?,
            // GameLift accepts any unique id when the agent did not assign one
            process_id: lookup("GAMELIFT_SDK_PROCESS_ID")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            host_id: required("GAMELIFT_SDK_HOST_ID")?,
            fleet_id: required("GAMELIFT_SDK_FLEET_ID")?,
            auth_token: lookup("GAMELIFT_SDK_AUTH_TOKEN").filter(|v| !v.is_empty()),
        })
    }

    /// WebSocket URL carrying the process identity as query parameters.
    pub fn connection_url(&self) -> Result<Url, GameLiftError> {
        let mut url = Url::parse(&self.websocket_url)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("pID", &self.process_id)
                .append_pair("sdkVersion", SDK_VERSION)
                .append_pair("sdkLanguage", SDK_LANGUAGE);
            if let Some(token) = &self.auth_token {
                query.append_pair("Authorization", token);
            }
            query
                .append_pair("ComputeId", &self.host_id)
                .append_pair("FleetId", &self.fleet_id);
        }
        Ok(url)
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;

    /// Records every call and fails the ones it was told to fail.
    #[derive(Default)]
    pub struct FakeServerApi {
        pub calls: Mutex<Vec<&'static str>>,
        pub registered: Mutex<Option<ProcessParameters>>,
        pub fail_init: AtomicBool,
        pub fail_ready: AtomicBool,
        pub fail_activate: AtomicBool,
    }

    impl FakeServerApi {
        pub async fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().await.clone()
        }

        fn rejected(action: &str) -> GameLiftError {
            GameLiftError::Rejected {
                action: action.to_string(),
                status: 500,
                message: "injected failure".to_string(),
            }
        }
    }

    #[async_trait]
    impl ServerApi for FakeServerApi {
        async fn init_sdk(&self) -> Result<(), GameLiftError> {
            self.calls.lock().await.push("init_sdk");
            if self.fail_init.load(Ordering::SeqCst) {
                return Err(GameLiftError::MissingEnvironment("GAMELIFT_SDK_WEBSOCKET_URL"));
            }
            Ok(())
        }

        async fn process_ready(&self, parameters: ProcessParameters) -> Result<(), GameLiftError> {
            self.calls.lock().await.push("process_ready");
            *self.registered.lock().await = Some(parameters);
            if self.fail_ready.load(Ordering::SeqCst) {
                return Err(Self::rejected("ActivateServerProcess"));
            }
            Ok(())
        }

        async fn activate_game_session(&self) -> Result<(), GameLiftError> {
            self.calls.lock().await.push("activate_game_session");
            if self.fail_activate.load(Ordering::SeqCst) {
                return Err(Self::rejected("ActivateGameSession"));
            }
            Ok(())
        }

        async fn process_ending(&self) -> Result<(), GameLiftError> {
            self.calls.lock().await.push("process_ending");
            Ok(())
        }
    }
}
