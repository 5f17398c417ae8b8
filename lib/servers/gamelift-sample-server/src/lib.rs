pub mod app_state;
pub mod bootstrap;
pub mod cloudwatch;
pub mod config;
pub mod emitter;
pub mod error;
pub mod gamelift;
pub mod lifecycle;
pub mod log_shipper;
pub mod logging;
pub mod metrics;

// Re-export commonly used types
pub use app_state::AppState;
pub use bootstrap::{Bootstrap, BootstrapState};
pub use cloudwatch::{CloudWatchLogs, CloudWatchMetrics};
pub use config::ServerConfig;
pub use emitter::TelemetryEmitter;
pub use error::{GameLiftError, ShipError};
pub use gamelift::{GameLiftServerApi, ProcessCallbacks, ProcessParameters, ServerApi};
pub use lifecycle::LifecycleHandler;
pub use log_shipper::{LogBackend, LogShipper, ShipOutcome};
pub use metrics::{MetricSample, MetricsSink};
