use crate::core::config::ClientConfig;
use crate::core::state::{AtomicConnectionState, AtomicMetrics, ConnectionState};
use crate::traits::*;
use crate::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Internal command messages for client control
#[derive(Debug)]
enum ClientCommand {
    /// Send a message to the WebSocket
    Send(WsMessage),
    /// Shutdown the client
    Shutdown,
}

/// Events surfaced to the owner of the client
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Connected to the server
    Connected,
    /// Disconnected from the server
    Disconnected,
    /// Reconnecting (attempt number)
    Reconnecting(usize),
    /// Session lifetime reached, connection recycled
    SessionRecycled,
    /// Error occurred
    Error(String),
}

/// Client metrics snapshot
#[derive(Debug, Clone)]
pub struct Metrics {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub reconnect_count: u64,
    pub connection_state: ConnectionState,
}

/// How a message loop ended
enum LoopExit {
    /// Shutdown was requested
    Shutdown,
    /// Session lifetime reached; reconnect immediately
    Recycle,
}

/// Reconnecting WebSocket client with message routing
///
/// The connection runs in a background tokio task; handlers run on
/// dedicated OS threads fed by per-route channels. The owning component
/// polls [`WebSocketClient::try_recv_event`] for connection events.
///
/// # Type Parameters
/// - `R`: MessageRouter implementation
/// - `M`: Message type (determined by router)
pub struct WebSocketClient<R, M>
where
    R: MessageRouter<Message = M>,
    M: Send + std::fmt::Debug + 'static,
{
    /// Atomic connection state
    state: Arc<AtomicConnectionState>,
    /// Atomic metrics
    metrics: Arc<AtomicMetrics>,
    /// Command channel sender
    command_tx: mpsc::UnboundedSender<ClientCommand>,
    /// Event channel receiver
    event_rx: Receiver<ClientEvent>,
    /// Main task handle (tokio task for async I/O)
    task_handle: Option<tokio::task::JoinHandle<()>>,
    /// Handler thread handles (dedicated OS threads for message processing)
    pub(crate) handler_handles: Vec<std::thread::JoinHandle<()>>,
    /// Shutdown flag reference (for external access if needed)
    shutdown_flag: Arc<AtomicBool>,
    /// Marker for the router/message type parameters
    _marker: std::marker::PhantomData<(R, M)>,
}

impl<R, M> WebSocketClient<R, M>
where
    R: MessageRouter<Message = M>,
    M: Send + std::fmt::Debug + 'static,
{
    /// Create a new WebSocket client from configuration
    ///
    /// Called by the builder's `build()` method.
    pub(crate) async fn new(config: ClientConfig<R, M>) -> Result<Self> {
        let state = Arc::new(AtomicConnectionState::new(ConnectionState::Disconnected));
        let metrics = Arc::new(AtomicMetrics::new());
        let shutdown_flag = Arc::clone(&config.shutdown_flag);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = unbounded();

        let task_handle = {
            let state = Arc::clone(&state);
            let metrics = Arc::clone(&metrics);

            tokio::spawn(async move {
                run_client(config, state, metrics, command_rx, event_tx).await;
            })
        };

        Ok(Self {
            state,
            metrics,
            command_tx,
            event_rx,
            task_handle: Some(task_handle),
            handler_handles: Vec::new(), // Builder populates this
            shutdown_flag,
            _marker: std::marker::PhantomData,
        })
    }

    /// Send a message through the WebSocket
    pub fn send(&self, message: WsMessage) -> Result<()> {
        self.command_tx
            .send(ClientCommand::Send(message))
            .map_err(|e| FlowSocketError::ChannelSend(e.to_string()))
    }

    /// Get current connection state
    #[inline]
    pub fn connection_state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Check if connected
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Get current metrics
    pub fn metrics(&self) -> Metrics {
        Metrics {
            messages_sent: self.metrics.messages_sent(),
            messages_received: self.metrics.messages_received(),
            reconnect_count: self.metrics.reconnect_count(),
            connection_state: self.state.get(),
        }
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv_event(&self) -> Option<ClientEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Get a reference to the shutdown flag
    ///
    /// External code can trigger graceful shutdown by storing `false`.
    pub fn shutdown_flag(&self) -> &Arc<AtomicBool> {
        &self.shutdown_flag
    }

    /// Shutdown the client
    pub async fn shutdown(mut self) -> Result<()> {
        info!("Shutting down WebSocket client");

        // Prevent reconnection, then stop the active connection
        self.shutdown_flag.store(false, Ordering::Release);
        self.state.set(ConnectionState::ShuttingDown);
        let _ = self.command_tx.send(ClientCommand::Shutdown);

        // Wait for the I/O task; dropping its config closes the route
        // channels which lets the handler threads drain and exit
        if let Some(handle) = self.task_handle.take() {
            let _ = handle.await;
        }

        debug!(
            "Waiting for {} handler threads to complete",
            self.handler_handles.len()
        );
        for handle in self.handler_handles.drain(..) {
            let _ = handle.join();
        }

        info!("All handlers shut down successfully");
        Ok(())
    }
}

/// Main client task loop: connect, run the session, decide whether to
/// reconnect, back off, repeat.
async fn run_client<R, M>(
    config: ClientConfig<R, M>,
    state: Arc<AtomicConnectionState>,
    metrics: Arc<AtomicMetrics>,
    mut command_rx: mpsc::UnboundedReceiver<ClientCommand>,
    event_tx: Sender<ClientEvent>,
) where
    R: MessageRouter<Message = M>,
    M: Send + std::fmt::Debug + 'static,
{
    let mut reconnect_attempt: usize = 0;
    let shutdown_flag = Arc::clone(&config.shutdown_flag);

    loop {
        if !shutdown_flag.load(Ordering::Acquire) {
            debug!("Shutdown flag is false, exiting main loop");
            break;
        }
        if state.is_shutting_down() {
            break;
        }

        state.set(if reconnect_attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        });

        if reconnect_attempt > 0 {
            let _ = event_tx.send(ClientEvent::Reconnecting(reconnect_attempt));
        }

        match connect_async(&config.url).await {
            Ok((ws_stream, _)) => {
                info!("Connected to {}", config.url);
                state.set(ConnectionState::Connected);
                let _ = event_tx.send(ClientEvent::Connected);
                reconnect_attempt = 0;

                match handle_connection(
                    ws_stream,
                    &config,
                    &state,
                    &metrics,
                    &mut command_rx,
                )
                .await
                {
                    Ok(LoopExit::Shutdown) => {
                        state.set(ConnectionState::ShuttingDown);
                        break;
                    }
                    Ok(LoopExit::Recycle) => {
                        info!("Session lifetime reached, recycling connection");
                        let _ = event_tx.send(ClientEvent::SessionRecycled);
                        state.set(ConnectionState::Disconnected);
                        // Planned reconnect: no backoff, counter stays reset
                        continue;
                    }
                    Err(e) => {
                        error!("Connection error: {}", e);
                        let _ = event_tx.send(ClientEvent::Error(e.to_string()));
                        state.set(ConnectionState::Disconnected);
                        let _ = event_tx.send(ClientEvent::Disconnected);
                    }
                }
            }
            Err(e) => {
                error!("Failed to connect: {}", e);
                let _ = event_tx.send(ClientEvent::Error(e.to_string()));
                state.set(ConnectionState::Disconnected);
            }
        }

        if !shutdown_flag.load(Ordering::Acquire) {
            debug!("Shutdown flag set during connection, stopping reconnection");
            break;
        }

        match config.reconnect_strategy.next_delay(reconnect_attempt) {
            Some(delay) => {
                info!(
                    "Reconnecting in {:?} (attempt {})",
                    delay,
                    reconnect_attempt + 1
                );
                if !interruptible_sleep(delay, &shutdown_flag).await {
                    return;
                }
                reconnect_attempt += 1;
                metrics.increment_reconnects();
            }
            None => {
                warn!("Reconnection strategy exhausted, stopping");
                break;
            }
        }
    }

    info!("Client task exiting");
}

/// Sleep in small slices so shutdown is observed promptly.
/// Returns false when shutdown was requested during the sleep.
async fn interruptible_sleep(duration: Duration, shutdown_flag: &Arc<AtomicBool>) -> bool {
    let check_interval = Duration::from_millis(100);
    let mut elapsed = Duration::ZERO;

    while elapsed < duration {
        if !shutdown_flag.load(Ordering::Acquire) {
            return false;
        }
        let step = std::cmp::min(check_interval, duration - elapsed);
        tokio::time::sleep(step).await;
        elapsed += step;
    }
    shutdown_flag.load(Ordering::Acquire)
}

/// Run one connected session: subscriptions, then the message loop.
async fn handle_connection<R, M>(
    ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    config: &ClientConfig<R, M>,
    state: &Arc<AtomicConnectionState>,
    metrics: &Arc<AtomicMetrics>,
    command_rx: &mut mpsc::UnboundedReceiver<ClientCommand>,
) -> Result<LoopExit>
where
    R: MessageRouter<Message = M>,
    M: Send + std::fmt::Debug + 'static,
{
    let (mut write, mut read) = ws_stream.split();

    // Send subscription messages after every (re)connection
    for sub in &config.subscriptions {
        let msg = ws_message_to_tungstenite(sub);
        write
            .send(msg)
            .await
            .map_err(|e| FlowSocketError::WebSocket(format!("Failed to send subscription: {}", e)))?;
        metrics.increment_sent();
        debug!("Sent subscription message");
    }

    let session_deadline = config
        .session_lifetime
        .map(|d| tokio::time::Instant::now() + d);

    let mut heartbeat = config.heartbeat.as_ref().map(|(interval, payload)| {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + *interval, *interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        (ticker, payload.clone())
    });

    // No idle timeout configured means effectively unbounded
    let idle_timeout = config
        .idle_timeout
        .unwrap_or(Duration::from_secs(365 * 24 * 3600));
    // Measured from the last received frame, not the last select wakeup, so
    // outgoing heartbeats cannot mask a silent connection
    let mut last_frame = tokio::time::Instant::now();

    let shutdown_flag = &config.shutdown_flag;

    loop {
        if !shutdown_flag.load(Ordering::Acquire) || state.is_shutting_down() {
            debug!("Shutdown detected in message loop, closing connection");
            let _ = write.close().await;
            return Ok(LoopExit::Shutdown);
        }

        let idle_remaining = idle_timeout.saturating_sub(last_frame.elapsed());
        if idle_remaining.is_zero() {
            warn!("No data for {:?}, treating connection as dead", idle_timeout);
            return Err(FlowSocketError::IdleTimeout(idle_timeout));
        }

        tokio::select! {
            // Incoming frames, bounded by the remaining idle budget
            frame = tokio::time::timeout(idle_remaining, read.next()) => {
                match frame {
                    Err(_) => {
                        warn!("No data for {:?}, treating connection as dead", idle_timeout);
                        return Err(FlowSocketError::IdleTimeout(idle_timeout));
                    }
                    Ok(Some(Ok(msg))) => {
                        metrics.increment_received();
                        last_frame = tokio::time::Instant::now();

                        if let Some(ws_msg) = tungstenite_to_ws_message(msg) {
                            // Answer data-frame pings before parsing
                            if let Some(ref detector) = config.passive_ping {
                                if detector.is_ping(&ws_msg) {
                                    debug!("Passive ping detected from server");
                                    let pong = ws_message_to_tungstenite(&detector.pong_response());
                                    write.send(pong).await.map_err(|e| {
                                        FlowSocketError::WebSocket(format!(
                                            "Failed to send passive pong: {}",
                                            e
                                        ))
                                    })?;
                                    metrics.increment_sent();
                                    continue;
                                }
                            }

                            // Parse inline so per-route ordering is preserved,
                            // then hand off to the handler thread
                            match config.router.parse(ws_msg).await {
                                Ok(message) => {
                                    let route_key = config.router.route_key(&message);
                                    if let Some(sender) = config.route_senders.get(&route_key) {
                                        // Send failure means the channel closed,
                                        // which only happens during shutdown
                                        let _ = sender.send(message);
                                    } else {
                                        warn!("No handler configured for route key: {:?}", route_key);
                                    }
                                }
                                Err(e) => {
                                    // Decode errors are logged and the frame skipped
                                    error!("Parse error: {}", e);
                                }
                            }
                        }
                    }
                    Ok(Some(Err(e))) => {
                        error!("WebSocket error: {}", e);
                        return Err(FlowSocketError::WebSocket(e.to_string()));
                    }
                    Ok(None) => {
                        warn!("WebSocket stream closed");
                        return Err(FlowSocketError::ConnectionClosed("Stream ended".into()));
                    }
                }
            }

            // Outbound commands from the owner
            cmd = command_rx.recv() => {
                match cmd {
                    Some(ClientCommand::Send(msg)) => {
                        let tung_msg = ws_message_to_tungstenite(&msg);
                        write
                            .send(tung_msg)
                            .await
                            .map_err(|e| FlowSocketError::WebSocket(e.to_string()))?;
                        metrics.increment_sent();
                    }
                    Some(ClientCommand::Shutdown) | None => {
                        info!("Received shutdown command");
                        let _ = write.close().await;
                        return Ok(LoopExit::Shutdown);
                    }
                }
            }

            // Periodic heartbeat payload
            payload = async {
                match heartbeat.as_mut() {
                    Some((ticker, payload)) => {
                        ticker.tick().await;
                        payload.clone()
                    }
                    None => std::future::pending().await,
                }
            } => {
                debug!("Heartbeat tick - sending payload");
                let tung_msg = ws_message_to_tungstenite(&payload);
                write
                    .send(tung_msg)
                    .await
                    .map_err(|e| FlowSocketError::WebSocket(format!("Failed to send heartbeat: {}", e)))?;
                metrics.increment_sent();
            }

            // Planned session recycle
            _ = async {
                match session_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            } => {
                let _ = write.close().await;
                return Ok(LoopExit::Recycle);
            }
        }
    }
}

/// Convert WsMessage to tungstenite Message
fn ws_message_to_tungstenite(msg: &WsMessage) -> Message {
    match msg {
        WsMessage::Text(text) => Message::Text(text.clone()),
        WsMessage::Binary(data) => Message::Binary(data.clone()),
    }
}

/// Convert tungstenite Message to WsMessage
fn tungstenite_to_ws_message(msg: Message) -> Option<WsMessage> {
    match msg {
        Message::Text(text) => Some(WsMessage::Text(text)),
        Message::Binary(data) => Some(WsMessage::Binary(data)),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => None,
    }
}
