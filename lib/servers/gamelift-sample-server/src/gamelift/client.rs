//! WebSocket client for the GameLift server-process protocol.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, instrument};

use super::messages::{
    CREATE_GAME_SESSION, Envelope, OutboundMessage, TERMINATE_PROCESS, TerminateProcess,
};
use super::{GameSession, ProcessCallbacks, ProcessParameters, ServerApi, ServerParameters};
use crate::error::GameLiftError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingRequests = HashMap<String, oneshot::Sender<Result<(), GameLiftError>>>;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(60);

/// Production [`ServerApi`] backed by a WebSocket connection to GameLift.
///
/// `init_sdk` opens the connection and spawns a reader and a writer task.
/// `process_ready` additionally starts the heartbeat task. All of them stop
/// when the cancellation token passed at construction fires. Once the reader
/// stops, requests fail with [`GameLiftError::ConnectionClosed`] and the
/// registered callbacks are released.
pub struct GameLiftServerApi {
    parameters: Option<ServerParameters>,
    request_timeout: Duration,
    health_check_interval: Duration,
    health_check_timeout: Duration,
    shared: Arc<Shared>,
}

/// State reachable from the background tasks.
struct Shared {
    outbound: OnceLock<mpsc::UnboundedSender<String>>,
    pending: Mutex<PendingRequests>,
    callbacks: RwLock<Option<Arc<dyn ProcessCallbacks>>>,
    game_session_id: Mutex<Option<String>>,
    heartbeat_started: AtomicBool,
    /// Set when the reader stops; nothing will answer a request after that.
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl GameLiftServerApi {
    /// Client that reads its connection settings from the environment when
    /// `init_sdk` is called.
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            parameters: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            health_check_timeout: HEALTH_CHECK_TIMEOUT,
            shared: Arc::new(Shared {
                outbound: OnceLock::new(),
                pending: Mutex::new(HashMap::new()),
                callbacks: RwLock::new(None),
                game_session_id: Mutex::new(None),
                heartbeat_started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                cancel,
            }),
        }
    }

    pub fn with_parameters(parameters: ServerParameters, cancel: CancellationToken) -> Self {
        Self {
            parameters: Some(parameters),
            ..Self::new(cancel)
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// How long the health-check callback may run before it counts as unhealthy.
    pub fn with_health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check_timeout = timeout;
        self
    }

    fn start_heartbeat(&self) {
        if self.shared.heartbeat_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let interval = self.health_check_interval;
        let health_check_timeout = self.health_check_timeout;
        let request_timeout = self.request_timeout;
        tokio::spawn(async move {
            shared
                .heartbeat_loop(interval, health_check_timeout, request_timeout)
                .await
        });
    }
}

#[async_trait]
impl ServerApi for GameLiftServerApi {
    #[instrument(skip_all)]
    async fn init_sdk(&self) -> Result<(), GameLiftError> {
        if self.shared.outbound.get().is_some() {
            tracing::debug!("SDK already initialized");
            return Ok(());
        }

        let parameters = match &self.parameters {
            Some(parameters) => parameters.clone(),
            None => ServerParameters::from_env()?,
        };
        let url = parameters.connection_url()?;

        tracing::info!(
            process_id = %parameters.process_id,
            fleet_id = %parameters.fleet_id,
            host_id = %parameters.host_id,
            "Connecting to GameLift"
        );

        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| GameLiftError::Connection(e.to_string()))?;
        let (sink, stream) = socket.split();

        let (tx, rx) = mpsc::unbounded_channel();
        self.shared
            .outbound
            .set(tx)
            .map_err(|_| GameLiftError::Connection("SDK initialized concurrently".to_string()))?;

        tokio::spawn(write_loop(sink, rx, self.shared.cancel.clone()));
        tokio::spawn(Arc::clone(&self.shared).read_loop(stream).in_current_span());

        tracing::info!("Connected to GameLift");
        Ok(())
    }

    #[instrument(skip_all, fields(port = parameters.port))]
    async fn process_ready(&self, parameters: ProcessParameters) -> Result<(), GameLiftError> {
        if self.shared.outbound.get().is_none() {
            return Err(GameLiftError::NotInitialized);
        }
        *self.shared.callbacks.write().await = Some(Arc::clone(&parameters.callbacks));
        // The reader may have stopped before the store and will not clear them again
        if self.shared.is_closed() {
            self.shared.callbacks.write().await.take();
            return Err(GameLiftError::ConnectionClosed);
        }

        let message = OutboundMessage::activate_server_process(
            parameters.port,
            parameters.log_parameters.log_paths,
        );
        self.shared.request(message, self.request_timeout).await?;

        self.start_heartbeat();
        Ok(())
    }

    async fn activate_game_session(&self) -> Result<(), GameLiftError> {
        let game_session_id = self
            .shared
            .game_session_id
            .lock()
            .await
            .clone()
            .ok_or(GameLiftError::NoActiveGameSession)?;

        tracing::info!(%game_session_id, "Activating game session");
        self.shared
            .request(
                OutboundMessage::activate_game_session(game_session_id),
                self.request_timeout,
            )
            .await
    }

    async fn process_ending(&self) -> Result<(), GameLiftError> {
        tracing::info!("Notifying GameLift that the process is ending");
        self.shared
            .request(
                OutboundMessage::terminate_server_process(),
                self.request_timeout,
            )
            .await
    }
}

impl Shared {
    /// Send a request and wait for the response with the same request id.
    async fn request(
        &self,
        message: OutboundMessage,
        timeout: Duration,
    ) -> Result<(), GameLiftError> {
        let outbound = self.outbound.get().ok_or(GameLiftError::NotInitialized)?;
        if self.is_closed() {
            return Err(GameLiftError::ConnectionClosed);
        }
        let action = message.action();
        let request_id = message.request_id().to_string();
        let payload = serde_json::to_string(&message)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);
        // The reader drains `pending` only once, after setting `closed`
        if self.is_closed() {
            self.pending.lock().await.remove(&request_id);
            return Err(GameLiftError::ConnectionClosed);
        }

        tracing::debug!(action, %request_id, "Sending request to GameLift");
        if outbound.send(payload).is_err() {
            self.pending.lock().await.remove(&request_id);
            return Err(GameLiftError::ConnectionClosed);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(GameLiftError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(GameLiftError::Timeout { action })
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn read_loop(self: Arc<Self>, mut stream: SplitStream<WsStream>) {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(Message::Text(text))) => self.handle_inbound(text.as_str()).await,
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(?frame, "GameLift closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("Error reading from GameLift connection: {}", e);
                    break;
                }
                None => break,
            }
        }

        self.closed.store(true, Ordering::SeqCst);
        // The callbacks hold the API, which holds this state
        self.callbacks.write().await.take();

        // Waiters would otherwise sit out their full timeout
        for (_, waiter) in self.pending.lock().await.drain() {
            let _ = waiter.send(Err(GameLiftError::ConnectionClosed));
        }
        tracing::debug!("GameLift reader stopped");
    }

    async fn handle_inbound(&self, text: &str) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Failed to parse message from GameLift: {} - {}", text, e);
                return;
            }
        };

        if let Some(request_id) = envelope.request_id.as_deref() {
            let waiter = self.pending.lock().await.remove(request_id);
            if let Some(waiter) = waiter {
                let _ = waiter.send(envelope.into_result());
                return;
            }
        }

        match envelope.action.as_str() {
            CREATE_GAME_SESSION => {
                let Some(game_session_id) = envelope.game_session_id.filter(|id| !id.is_empty())
                else {
                    tracing::warn!("CreateGameSession message without a GameSessionId: {}", text);
                    return;
                };
                tracing::info!(%game_session_id, "GameLift assigned a game session");
                *self.game_session_id.lock().await = Some(game_session_id.clone());

                // A malformed optional field must not cost us the session
                let game_session = serde_json::from_str::<GameSession>(text).unwrap_or_else(|e| {
                    tracing::warn!("Failed to parse CreateGameSession details: {}", e);
                    GameSession {
                        game_session_id,
                        ..Default::default()
                    }
                });

                if let Some(callbacks) = self.callbacks.read().await.clone() {
                    // Callbacks call back into the client, so they cannot run on the reader
                    tokio::spawn(async move { callbacks.on_start_game_session(game_session).await });
                } else {
                    tracing::warn!("Game session received before ProcessReady");
                }
            }
            TERMINATE_PROCESS => {
                let terminate: TerminateProcess = serde_json::from_str(text).unwrap_or_default();
                tracing::info!(
                    termination_time = ?terminate.termination_time,
                    "GameLift requested process termination"
                );
                if let Some(callbacks) = self.callbacks.read().await.clone() {
                    tokio::spawn(async move { callbacks.on_process_terminate().await });
                }
            }
            other => {
                tracing::debug!(action = other, "Ignoring message from GameLift");
            }
        }
    }

    async fn heartbeat_loop(
        &self,
        interval: Duration,
        health_check_timeout: Duration,
        request_timeout: Duration,
    ) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            if self.is_closed() {
                break;
            }

            let Some(callbacks) = self.callbacks.read().await.clone() else {
                continue;
            };

            let healthy = match tokio::time::timeout(health_check_timeout, callbacks.on_health_check())
                .await
            {
                Ok(healthy) => healthy,
                Err(_) => {
                    tracing::warn!("Health check callback timed out, reporting unhealthy");
                    false
                }
            };

            if let Err(e) = self
                .request(OutboundMessage::heartbeat(healthy), request_timeout)
                .await
            {
                tracing::warn!("Failed to send heartbeat: {}", e);
            }
        }
        tracing::debug!("Heartbeat stopped");
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => None,
            next = rx.recv() => next,
        };

        let Some(payload) = next else {
            let _ = sink.close().await;
            break;
        };

        if let Err(e) = sink.send(Message::text(payload)).await {
            tracing::warn!("Failed to write to GameLift connection: {}", e);
            break;
        }
    }
}
