//! Runtime configuration for the game server process.
//!
//! All values have hard-coded defaults. Each one can be overridden through an
//! environment variable, which is handy when running the server outside a
//! GameLift fleet.

use std::env;
use std::time::Duration;

pub const DEFAULT_LISTENING_PORT: u16 = 8080;
pub const DEFAULT_LOG_PATH: &str = "/local/game/logs/myserver.log";
pub const DEFAULT_METRIC_NAMESPACE: &str = "GameLiftSample/Development";
pub const DEFAULT_METRIC_NAME: &str = "ConcurrentPlayers";
pub const FLEET_DIMENSION_NAME: &str = "FleetId";
pub const DEFAULT_FLEET_ID: &str = "local-fleet";
pub const DEFAULT_LOG_GROUP: &str = "/gamelift/sample-server";
pub const DEFAULT_SEQUENCE_TOKEN: &str = "0";
pub const DEFAULT_REGION: &str = "us-west-2";

const DEFAULT_TELEMETRY_INTERVAL_SECS: u64 = 60;
const DEFAULT_SHIP_RETRY_DELAY_MS: u64 = 1000;
const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 60;

/// Settings for the whole process, resolved once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port reported to GameLift for players to connect to
    pub listening_port: u16,
    /// Files GameLift uploads when the game session ends
    pub log_paths: Vec<String>,
    /// CloudWatch namespace for the player-count metric
    pub metric_namespace: String,
    /// Name of the player-count metric
    pub metric_name: String,
    /// Value of the fleet dimension on every metric
    pub fleet_id: String,
    /// CloudWatch Logs group for telemetry lines
    pub log_group: String,
    /// CloudWatch Logs stream for telemetry lines
    pub log_stream: String,
    /// Token sent with the first `PutLogEvents` call
    pub initial_sequence_token: String,
    /// Time between telemetry ticks
    pub telemetry_interval: Duration,
    /// Pause between log delivery attempts
    pub ship_retry_delay: Duration,
    /// Time between heartbeats to GameLift
    pub health_check_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listening_port: DEFAULT_LISTENING_PORT,
            log_paths: vec![DEFAULT_LOG_PATH.to_string()],
            metric_namespace: DEFAULT_METRIC_NAMESPACE.to_string(),
            metric_name: DEFAULT_METRIC_NAME.to_string(),
            fleet_id: DEFAULT_FLEET_ID.to_string(),
            log_group: DEFAULT_LOG_GROUP.to_string(),
            log_stream: default_log_stream(),
            initial_sequence_token: DEFAULT_SEQUENCE_TOKEN.to_string(),
            telemetry_interval: Duration::from_secs(DEFAULT_TELEMETRY_INTERVAL_SECS),
            ship_retry_delay: Duration::from_millis(DEFAULT_SHIP_RETRY_DELAY_MS),
            health_check_interval: Duration::from_secs(DEFAULT_HEALTH_CHECK_INTERVAL_SECS),
        }
    }
}

impl ServerConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let listening_port = lookup("GAME_SERVER_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.listening_port);

        let log_paths = lookup("GAME_SERVER_LOG_PATHS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect::<Vec<_>>()
            })
            .filter(|paths| !paths.is_empty())
            .unwrap_or(defaults.log_paths);

        let telemetry_interval = lookup("GAME_SERVER_TELEMETRY_INTERVAL_SECONDS")
            .and_then(|v| v.parse().ok())
            .filter(|secs: &u64| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.telemetry_interval);

        let ship_retry_delay = lookup("GAME_SERVER_SHIP_RETRY_DELAY_MS")
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.ship_retry_delay);

        let config = Self {
            listening_port,
            log_paths,
            metric_namespace: non_empty(lookup("GAME_SERVER_METRIC_NAMESPACE"))
                .unwrap_or(defaults.metric_namespace),
            metric_name: defaults.metric_name,
            fleet_id: non_empty(lookup("GAMELIFT_SDK_FLEET_ID")).unwrap_or(defaults.fleet_id),
            log_group: non_empty(lookup("GAME_SERVER_LOG_GROUP")).unwrap_or(defaults.log_group),
            log_stream: non_empty(lookup("GAME_SERVER_LOG_STREAM"))
                .unwrap_or(defaults.log_stream),
            initial_sequence_token: defaults.initial_sequence_token,
            telemetry_interval,
            ship_retry_delay,
            health_check_interval: defaults.health_check_interval,
        };

        tracing::debug!(?config, "Resolved server configuration");
        config
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// One stream per server process, keyed by the OS process id.
fn default_log_stream() -> String {
    format!("process-{}", std::process::id())
}
