use crate::traits::*;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for WebSocketClient with routing support
///
/// Built via [`crate::WebSocketClientBuilder`].
pub struct ClientConfig<R, M>
where
    R: MessageRouter<Message = M>,
    M: Send + std::fmt::Debug + 'static,
{
    /// WebSocket URL (wss:// or ws://)
    pub(crate) url: String,

    /// Message router for parsing and routing messages
    pub(crate) router: Arc<R>,

    /// Channel senders mapped by route key (for routing messages)
    pub(crate) route_senders: HashMap<R::RouteKey, crossbeam_channel::Sender<M>>,

    /// Optional heartbeat configuration (interval, payload)
    pub(crate) heartbeat: Option<(Duration, WsMessage)>,

    /// Optional passive ping detector
    pub(crate) passive_ping: Option<Arc<dyn PassivePingDetector>>,

    /// Reconnection strategy
    pub(crate) reconnect_strategy: Box<dyn ReconnectionStrategy>,

    /// Subscription messages to send after connection
    pub(crate) subscriptions: Vec<WsMessage>,

    /// Recycle the connection after this long; venue sessions have a
    /// bounded lifetime (typically 24h) and we reconnect before it expires
    pub(crate) session_lifetime: Option<Duration>,

    /// Treat the connection as dead when no frame arrives for this long
    pub(crate) idle_timeout: Option<Duration>,

    /// Shutdown flag - when false, prevents reconnection attempts
    pub(crate) shutdown_flag: Arc<AtomicBool>,
}

impl<R, M> ClientConfig<R, M>
where
    R: MessageRouter<Message = M>,
    M: Send + std::fmt::Debug + 'static,
{
    /// Get a reference to the URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Check if heartbeat is configured
    pub fn has_heartbeat(&self) -> bool {
        self.heartbeat.is_some()
    }

    /// Check if passive ping detection is configured
    pub fn has_passive_ping(&self) -> bool {
        self.passive_ping.is_some()
    }

    /// Get the number of configured subscriptions
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Get the number of configured handlers
    pub fn handler_count(&self) -> usize {
        self.route_senders.len()
    }
}
