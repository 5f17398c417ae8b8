//! Process startup: SDK init, registration, telemetry, then the game loop.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::emitter::TelemetryEmitter;
use crate::gamelift::{LogParameters, ProcessCallbacks, ProcessParameters, ServerApi};
use crate::lifecycle::LifecycleHandler;
use crate::log_shipper::LogBackend;
use crate::metrics::MetricsSink;

/// Startup progress. Moves forward only; `Failed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Uninitialized,
    SdkInitialized,
    Ready,
    Running,
    Failed,
}

pub struct Bootstrap {
    api: Arc<dyn ServerApi>,
    config: ServerConfig,
    state: BootstrapState,
}

impl Bootstrap {
    pub fn new(api: Arc<dyn ServerApi>, config: ServerConfig) -> Self {
        Self {
            api,
            config,
            state: BootstrapState::Uninitialized,
        }
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    /// Bring the process up and wait until `cancel` fires.
    ///
    /// Only an SDK init failure is fatal. A rejected `ProcessReady` is logged
    /// and the process keeps running, as GameLift will eventually recycle a
    /// process that never reported ready.
    pub async fn run<M, B>(
        &mut self,
        emitter: TelemetryEmitter<M, B>,
        cancel: CancellationToken,
    ) -> Result<BootstrapState>
    where
        M: MetricsSink + 'static,
        B: LogBackend + 'static,
    {
        if let Err(e) = self.api.init_sdk().await {
            tracing::error!("InitSDK failure: {}", e);
            self.state = BootstrapState::Failed;
            return Err(e).context("Did not initialize the GameLift SDK");
        }
        self.state = BootstrapState::SdkInitialized;

        let callbacks: Arc<dyn ProcessCallbacks> =
            Arc::new(LifecycleHandler::new(Arc::clone(&self.api)));
        let parameters = ProcessParameters::new(
            callbacks,
            self.config.listening_port,
            LogParameters::new(self.config.log_paths.clone()),
        );

        match self.api.process_ready(parameters).await {
            Ok(()) => tracing::info!(port = self.config.listening_port, "ProcessReady success"),
            Err(e) => tracing::error!("ProcessReady failure: {}", e),
        }
        self.state = BootstrapState::Ready;

        let telemetry = tokio::spawn(emitter.run(cancel.child_token()));
        self.state = BootstrapState::Running;

        // Stand-in for the game loop
        tracing::info!("SDK initialized, sitting in game loop");
        cancel.cancelled().await;
        tracing::info!("Shutting down game loop");

        if let Err(e) = telemetry.await {
            tracing::warn!("Telemetry task ended abnormally: {}", e);
        }

        Ok(self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gamelift::test_utils::FakeServerApi;
    use crate::log_shipper::LogShipper;
    use crate::log_shipper::test_utils::FakeLogBackend;
    use crate::metrics::test_utils::FakeMetricsSink;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn emitter(
        metrics: &FakeMetricsSink,
        config: &ServerConfig,
    ) -> TelemetryEmitter<FakeMetricsSink, FakeLogBackend> {
        let shipper = LogShipper::new(
            FakeLogBackend::default(),
            &config.log_group,
            &config.log_stream,
            &config.initial_sequence_token,
        )
        .unwrap();
        TelemetryEmitter::new(metrics.clone(), shipper, config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_failure_is_fatal() {
        let api = Arc::new(FakeServerApi::default());
        api.fail_init.store(true, Ordering::SeqCst);
        let metrics = FakeMetricsSink::default();
        let config = ServerConfig::default();
        let mut bootstrap = Bootstrap::new(api.clone(), config.clone());

        let result = bootstrap
            .run(emitter(&metrics, &config), CancellationToken::new())
            .await;

        assert!(result.is_err());
        assert_eq!(bootstrap.state(), BootstrapState::Failed);
        assert_eq!(api.calls().await, vec!["init_sdk"]);
        assert!(metrics.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_registers_port_and_log_paths() {
        let api = Arc::new(FakeServerApi::default());
        let metrics = FakeMetricsSink::default();
        let config = ServerConfig::default();
        let mut bootstrap = Bootstrap::new(api.clone(), config.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let state = bootstrap.run(emitter(&metrics, &config), cancel).await.unwrap();

        assert_eq!(state, BootstrapState::Running);
        assert_eq!(api.calls().await, vec!["init_sdk", "process_ready"]);

        let registered = api.registered.lock().await;
        let parameters = registered.as_ref().unwrap();
        assert_eq!(parameters.port, 8080);
        assert_eq!(
            parameters.log_parameters.log_paths,
            vec!["/local/game/logs/myserver.log"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_ready_failure_keeps_running() {
        let api = Arc::new(FakeServerApi::default());
        api.fail_ready.store(true, Ordering::SeqCst);
        let metrics = FakeMetricsSink::default();
        let config = ServerConfig::default();
        let mut bootstrap = Bootstrap::new(api.clone(), config.clone());
        let cancel = CancellationToken::new();

        let stopper = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(90)).await;
                cancel.cancel();
            })
        };

        let state = bootstrap.run(emitter(&metrics, &config), cancel).await.unwrap();
        stopper.await.unwrap();

        assert_eq!(state, BootstrapState::Running);
        // Ticks at 0s and 60s
        assert_eq!(metrics.published().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registered_callbacks_reach_the_api() {
        let api = Arc::new(FakeServerApi::default());
        let metrics = FakeMetricsSink::default();
        let config = ServerConfig::default();
        let mut bootstrap = Bootstrap::new(api.clone(), config.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        bootstrap.run(emitter(&metrics, &config), cancel).await.unwrap();

        let callbacks = api.registered.lock().await.as_ref().unwrap().callbacks.clone();
        callbacks.on_process_terminate().await;
        assert!(callbacks.on_health_check().await);
        assert_eq!(
            api.calls().await,
            vec!["init_sdk", "process_ready", "process_ending"]
        );
    }
}
