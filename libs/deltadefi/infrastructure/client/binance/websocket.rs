//! WebSocket client for the Binance book-ticker reference feed.
//!
//! Subscribes to the combined stream for one symbol and keeps the latest
//! validated [`BookTicker`] in shared state for the quote task. Binance
//! uses protocol-level ping/pong frames which the transport answers on its
//! own; sessions are recycled before the venue's 24h limit.

use super::types::{BinanceMessage, BinanceRoute, BinanceStreamWrapper};
use crate::config::SourceConfig;
use crate::domain::BookTicker;
use crate::infrastructure::clock::Clock;
use async_trait::async_trait;
use flowsockets::{
    ClientEvent, ExponentialBackoff, MessageHandler, MessageRouter, WebSocketClient,
    WebSocketClientBuilder, WsMessage,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Recycle the session before Binance's 24h connection limit
const SESSION_LIFETIME_SECS: u64 = 23 * 3600;

/// Maximum reconnection attempts before giving up
const MAX_RECONNECT_ATTEMPTS: usize = 10;

/// A silent book-ticker stream is a dead stream
const IDLE_TIMEOUT_SECS: u64 = 30;

/// Latest validated reference ticker, shared with the quote task
pub type SharedTicker = Arc<RwLock<Option<BookTicker>>>;

/// Build the combined stream URL for one symbol
fn build_stream_url(ws_base: &str, symbol: &str) -> String {
    format!("{}?streams={}@bookTicker", ws_base, symbol.to_lowercase())
}

// =============================================================================
// Router - parses stream messages
// =============================================================================

pub struct BinanceRouter;

#[async_trait]
impl MessageRouter for BinanceRouter {
    type Message = BinanceMessage;
    type RouteKey = BinanceRoute;

    async fn parse(&self, message: WsMessage) -> flowsockets::Result<Self::Message> {
        let text = match message.as_text() {
            Some(t) => t,
            None => return Ok(BinanceMessage::Unknown("binary frame".to_string())),
        };

        match serde_json::from_str::<BinanceStreamWrapper>(text) {
            Ok(wrapper) => Ok(BinanceMessage::Ticker(wrapper)),
            Err(e) => {
                debug!("[Binance WS] Parse error: {} - {}", e, text);
                Ok(BinanceMessage::Unknown(text.to_string()))
            }
        }
    }

    fn route_key(&self, _message: &Self::Message) -> Self::RouteKey {
        BinanceRoute::Tickers
    }
}

// =============================================================================
// Handler - validates and stores ticker updates
// =============================================================================

pub struct BinanceHandler {
    ticker: SharedTicker,
    clock: Arc<dyn Clock>,
    expected_symbol: String,
    message_count: u64,
}

impl BinanceHandler {
    pub fn new(ticker: SharedTicker, clock: Arc<dyn Clock>, expected_symbol: String) -> Self {
        Self {
            ticker,
            clock,
            expected_symbol,
            message_count: 0,
        }
    }

    fn handle_ticker(&mut self, wrapper: &BinanceStreamWrapper) {
        if wrapper.data.symbol != self.expected_symbol {
            debug!("[Binance WS] Unexpected symbol: {}", wrapper.data.symbol);
            return;
        }

        let now = self.clock.now();
        let ticker = match wrapper.data.to_ticker(now) {
            Some(t) => t,
            None => {
                warn!("[Binance WS] Unparseable ticker: {:?}", wrapper.data);
                return;
            }
        };

        if let Err(e) = ticker.validate() {
            warn!("[Binance WS] Invalid ticker dropped: {}", e);
            return;
        }

        *self.ticker.write() = Some(ticker);

        // Log occasionally to avoid spam on a busy stream
        if self.message_count % 1000 == 0 {
            debug!(
                "[Binance WS] {} bid={} ask={} (count: {})",
                wrapper.data.symbol, wrapper.data.bid_px, wrapper.data.ask_px, self.message_count
            );
        }
    }
}

impl MessageHandler<BinanceMessage> for BinanceHandler {
    fn handle(&mut self, message: BinanceMessage) -> flowsockets::Result<()> {
        self.message_count += 1;

        match message {
            BinanceMessage::Ticker(wrapper) => self.handle_ticker(&wrapper),
            BinanceMessage::Unknown(_) => {}
        }

        Ok(())
    }
}

// =============================================================================
// Client construction and supervision
// =============================================================================

async fn build_binance_ws_client(
    source: &SourceConfig,
    symbol: &str,
    ticker: SharedTicker,
    clock: Arc<dyn Clock>,
    shutdown_flag: Arc<AtomicBool>,
) -> anyhow::Result<WebSocketClient<BinanceRouter, BinanceMessage>> {
    let url = build_stream_url(&source.ws_url, symbol);
    debug!("[Binance WS] Connecting to: {}", url);

    let handler = BinanceHandler::new(ticker, clock, symbol.to_string());

    // No subscription frame needed - streams are specified in the URL.
    // No custom heartbeat - Binance uses standard WS ping/pong.
    let client = WebSocketClientBuilder::new(url, BinanceRouter)
        .handler(BinanceRoute::Tickers, handler)
        .idle_timeout(Duration::from_secs(IDLE_TIMEOUT_SECS))
        .session_lifetime(Duration::from_secs(SESSION_LIFETIME_SECS))
        .reconnect_strategy(ExponentialBackoff::new(
            Duration::from_secs(2),
            Duration::from_secs(60),
            Some(MAX_RECONNECT_ATTEMPTS),
        ))
        .shutdown_flag(shutdown_flag)
        .build()
        .await?;

    Ok(client)
}

fn handle_client_event(event: ClientEvent) {
    match event {
        ClientEvent::Connected => info!("[Binance WS] Connected to book-ticker feed"),
        ClientEvent::Disconnected => warn!("[Binance WS] Disconnected from feed"),
        ClientEvent::Reconnecting(attempt) => {
            warn!("[Binance WS] Reconnecting (attempt {})", attempt)
        }
        ClientEvent::SessionRecycled => info!("[Binance WS] Session recycled"),
        ClientEvent::Error(err) => warn!("[Binance WS] Error: {}", err),
    }
}

/// Spawn the reference ticker stream.
///
/// Returns the shared ticker cell for the quote task.
pub async fn spawn_ticker_stream(
    source: SourceConfig,
    symbol: String,
    clock: Arc<dyn Clock>,
    shutdown_flag: Arc<AtomicBool>,
) -> anyhow::Result<(SharedTicker, JoinHandle<()>)> {
    let ticker: SharedTicker = Arc::new(RwLock::new(None));

    let client = build_binance_ws_client(
        &source,
        &symbol,
        Arc::clone(&ticker),
        clock,
        Arc::clone(&shutdown_flag),
    )
    .await?;

    info!("[Binance WS] Ticker stream started for {}", symbol);

    let handle = tokio::spawn(async move {
        while shutdown_flag.load(Ordering::Acquire) {
            match client.try_recv_event() {
                Some(event) => handle_client_event(event),
                None => sleep(Duration::from_millis(10)).await,
            }
        }

        info!("[Binance WS] Closing connection");
        if let Err(e) = client.shutdown().await {
            warn!("[Binance WS] Error during shutdown: {}", e);
        }
        info!("[Binance WS] Ticker stream stopped");
    });

    Ok((ticker, handle))
}
