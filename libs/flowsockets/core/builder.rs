//! Client builder.
//!
//! URL and router are constructor arguments; everything else is optional
//! with conservative defaults (exponential backoff 2s→60s, 10 attempts).

use crate::core::client::WebSocketClient;
use crate::core::config::ClientConfig;
use crate::traits::*;
use crate::Result;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

/// Routing builder helper
///
/// Collects one handler per route key; each handler gets a dedicated
/// channel and OS thread when the client is built.
pub struct RoutingBuilder<R>
where
    R: MessageRouter,
{
    handlers: HashMap<
        R::RouteKey,
        (
            crossbeam_channel::Sender<R::Message>,
            crossbeam_channel::Receiver<R::Message>,
            Box<dyn MessageHandler<R::Message>>,
        ),
    >,
}

impl<R> RoutingBuilder<R>
where
    R: MessageRouter,
{
    fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Add a handler for a specific route key
    pub fn handler<H>(mut self, route_key: R::RouteKey, handler: H) -> Self
    where
        H: MessageHandler<R::Message>,
    {
        let (sender, receiver) = crossbeam_channel::unbounded();
        self.handlers
            .insert(route_key, (sender, receiver, Box::new(handler)));
        self
    }

    fn build(
        self,
        shutdown_flag: Arc<AtomicBool>,
    ) -> (
        HashMap<R::RouteKey, crossbeam_channel::Sender<R::Message>>,
        Vec<std::thread::JoinHandle<()>>,
    ) {
        let mut senders = HashMap::new();
        let mut handles = Vec::new();

        for (route_key, (sender, receiver, handler)) in self.handlers {
            senders.insert(route_key.clone(), sender);

            let shutdown_flag = Arc::clone(&shutdown_flag);
            let handle = std::thread::spawn(move || {
                let mut handler = handler;

                loop {
                    match receiver.recv_timeout(Duration::from_millis(50)) {
                        Ok(message) => {
                            if let Err(e) = handler.handle(message) {
                                tracing::error!(
                                    "Handler error for route {:?}: {}",
                                    route_key,
                                    e
                                );
                            }
                        }
                        Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                            if !shutdown_flag.load(std::sync::atomic::Ordering::Acquire) {
                                tracing::debug!(
                                    "Shutdown flag detected, handler thread for route {:?} exiting",
                                    route_key
                                );
                                break;
                            }
                            continue;
                        }
                        Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                            tracing::debug!(
                                "Handler channel closed for route {:?}, thread exiting",
                                route_key
                            );
                            break;
                        }
                    }
                }
            });

            handles.push(handle);
        }

        (senders, handles)
    }
}

/// Builder for [`WebSocketClient`]
pub struct WebSocketClientBuilder<R>
where
    R: MessageRouter,
{
    url: String,
    router: R,
    routing: RoutingBuilder<R>,
    heartbeat: Option<(Duration, WsMessage)>,
    passive_ping: Option<Arc<dyn PassivePingDetector>>,
    reconnect_strategy: Option<Box<dyn ReconnectionStrategy>>,
    subscriptions: Vec<WsMessage>,
    session_lifetime: Option<Duration>,
    idle_timeout: Option<Duration>,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl<R> WebSocketClientBuilder<R>
where
    R: MessageRouter,
{
    /// Create a new builder for the given URL and router
    pub fn new(url: impl Into<String>, router: R) -> Self {
        Self {
            url: url.into(),
            router,
            routing: RoutingBuilder::new(),
            heartbeat: None,
            passive_ping: None,
            reconnect_strategy: None,
            subscriptions: Vec::new(),
            session_lifetime: None,
            idle_timeout: None,
            shutdown_flag: None,
        }
    }

    /// Register a handler for a route key
    pub fn handler<H>(mut self, route_key: R::RouteKey, handler: H) -> Self
    where
        H: MessageHandler<R::Message>,
    {
        self.routing = self.routing.handler(route_key, handler);
        self
    }

    /// Send `payload` every `interval` while connected
    pub fn heartbeat(mut self, interval: Duration, payload: WsMessage) -> Self {
        self.heartbeat = Some((interval, payload));
        self
    }

    /// Answer venue data-frame pings with the detector's pong
    pub fn passive_ping(mut self, detector: impl PassivePingDetector + 'static) -> Self {
        self.passive_ping = Some(Arc::new(detector));
        self
    }

    pub fn reconnect_strategy(mut self, strategy: impl ReconnectionStrategy + 'static) -> Self {
        self.reconnect_strategy = Some(Box::new(strategy));
        self
    }

    /// Message sent after each (re)connection, e.g. a subscribe/auth frame
    pub fn subscription(mut self, message: WsMessage) -> Self {
        self.subscriptions.push(message);
        self
    }

    /// Proactively recycle the connection after this duration
    ///
    /// Venue sessions expire (typically after 24h); set this below the
    /// venue limit so the reconnect happens on our schedule.
    pub fn session_lifetime(mut self, lifetime: Duration) -> Self {
        self.session_lifetime = Some(lifetime);
        self
    }

    /// Reconnect when no frame has arrived for this long
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Set a custom shutdown flag for coordinated shutdown across components
    ///
    /// When the flag is set to `false`, the client will not attempt
    /// reconnection and will gracefully shut down.
    pub fn shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Build the client and start its connection task
    pub async fn build(self) -> Result<WebSocketClient<R, R::Message>> {
        let shutdown_flag = self
            .shutdown_flag
            .unwrap_or_else(|| Arc::new(AtomicBool::new(true)));

        let reconnect_strategy = self.reconnect_strategy.unwrap_or_else(|| {
            Box::new(ExponentialBackoff::new(
                Duration::from_secs(2),
                Duration::from_secs(60),
                Some(10),
            ))
        });

        let (route_senders, handler_handles) = self.routing.build(Arc::clone(&shutdown_flag));

        let config = ClientConfig {
            url: self.url,
            router: Arc::new(self.router),
            route_senders,
            heartbeat: self.heartbeat,
            passive_ping: self.passive_ping,
            reconnect_strategy,
            subscriptions: self.subscriptions,
            session_lifetime: self.session_lifetime,
            idle_timeout: self.idle_timeout,
            shutdown_flag,
        };

        let mut client = WebSocketClient::new(config).await?;
        client.handler_handles = handler_handles;

        Ok(client)
    }
}
