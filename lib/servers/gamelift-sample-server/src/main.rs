//! Sample game server process for an Amazon GameLift fleet.
//!
//! On startup the process:
//! 1. Connects to GameLift and registers its lifecycle callbacks
//! 2. Reports ready on the listening port, with the log files to upload
//! 3. Publishes a player-count metric and log line to CloudWatch every minute
//! 4. Idles in place of a game loop until interrupted
//!
//! GameLift drives everything else: session activation, health checks, and
//! termination arrive as callbacks over the SDK connection.

use std::sync::Arc;

use anyhow::Result;
use gamelift_sample_server::{
    AppState, Bootstrap, CloudWatchLogs, CloudWatchMetrics, GameLiftServerApi, LogShipper,
    ServerApi, ServerConfig, TelemetryEmitter, logging,
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging()?;

    let config = ServerConfig::from_env();
    let state = AppState::new().await;
    tracing::info!(region = %state.region, "Loaded AWS configuration");

    let cancel = CancellationToken::new();
    let api: Arc<dyn ServerApi> = Arc::new(
        GameLiftServerApi::new(cancel.child_token())
            .with_health_check_interval(config.health_check_interval),
    );

    let shipper = LogShipper::new(
        CloudWatchLogs::new(&state.aws_config),
        &config.log_group,
        &config.log_stream,
        &config.initial_sequence_token,
    )?
    .with_retry_delay(config.ship_retry_delay);
    let emitter = TelemetryEmitter::new(CloudWatchMetrics::new(&state.aws_config), shipper, &config);

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Interrupt received, stopping");
                    cancel.cancel();
                }
                Err(e) => tracing::warn!("Failed to listen for interrupt: {}", e),
            }
        }
    });

    let mut bootstrap = Bootstrap::new(api, config);
    let final_state = bootstrap.run(emitter, cancel).await?;
    tracing::info!(state = ?final_state, "Game server stopped");

    Ok(())
}
