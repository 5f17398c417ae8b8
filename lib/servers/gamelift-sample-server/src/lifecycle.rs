//! Callbacks GameLift invokes over the lifetime of the server process.

use std::sync::Arc;

use async_trait::async_trait;

use crate::gamelift::{GameSession, ProcessCallbacks, ServerApi};

/// Acknowledges sessions and terminations back to GameLift.
pub struct LifecycleHandler {
    api: Arc<dyn ServerApi>,
}

impl LifecycleHandler {
    pub fn new(api: Arc<dyn ServerApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ProcessCallbacks for LifecycleHandler {
    async fn on_start_game_session(&self, game_session: GameSession) {
        tracing::info!(
            game_session_id = %game_session.game_session_id,
            max_players = ?game_session.maximum_player_session_count,
            "OnStartGameSession called"
        );

        // Without the acknowledgement GameLift never routes players here
        if let Err(e) = self.api.activate_game_session().await {
            tracing::error!("ActivateGameSession failure: {}", e);
        }
    }

    async fn on_process_terminate(&self) {
        tracing::info!("OnProcessTerminate called");

        if let Err(e) = self.api.process_ending().await {
            tracing::error!("ProcessEnding failure: {}", e);
        }
    }

    async fn on_health_check(&self) -> bool {
        tracing::debug!("Received health check request");
        true
    }
}
