//! Periodic player-count telemetry.
//!
//! Each tick publishes one `ConcurrentPlayers` sample and ships one log line
//! describing it. Real player tracking does not exist in this sample server,
//! so the count is random.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::{FLEET_DIMENSION_NAME, ServerConfig};
use crate::log_shipper::{LogBackend, LogShipper};
use crate::metrics::{MetricSample, MetricsSink};

/// Synthetic player counts are drawn from `0..MAX_SYNTHETIC_PLAYERS`.
pub const MAX_SYNTHETIC_PLAYERS: u32 = 8;

pub struct TelemetryEmitter<M, B> {
    metrics: M,
    shipper: LogShipper<B>,
    namespace: String,
    metric_name: String,
    fleet_id: String,
    interval: Duration,
    rng: StdRng,
}

impl<M, B> TelemetryEmitter<M, B>
where
    M: MetricsSink,
    B: LogBackend,
{
    pub fn new(metrics: M, shipper: LogShipper<B>, config: &ServerConfig) -> Self {
        Self {
            metrics,
            shipper,
            namespace: config.metric_namespace.clone(),
            metric_name: config.metric_name.clone(),
            fleet_id: config.fleet_id.clone(),
            interval: config.telemetry_interval,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn shipper(&self) -> &LogShipper<B> {
        &self.shipper
    }

    fn sample(&mut self) -> (u32, MetricSample) {
        let players = self.rng.gen_range(0..MAX_SYNTHETIC_PLAYERS);
        let sample = MetricSample::count(
            &self.metric_name,
            FLEET_DIMENSION_NAME,
            &self.fleet_id,
            players,
        );
        (players, sample)
    }

    /// Publish one sample and ship one log line. Failures are logged and
    /// otherwise ignored.
    #[instrument(skip_all)]
    pub async fn tick(&mut self) {
        let (players, sample) = self.sample();

        if let Err(e) = self.metrics.put_metric(&self.namespace, &sample).await {
            tracing::error!("Failed to publish {} metric: {:#}", self.metric_name, e);
        }

        let message = format!(
            "{} on fleet {}: {}",
            self.metric_name, self.fleet_id, players
        );
        self.shipper.ship(&message).await;
    }

    /// Tick immediately and then once per interval until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            namespace = %self.namespace,
            "Telemetry emitter started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }

        tracing::info!("Telemetry emitter stopped");
    }
}
