//! DeltaDeFi account stream client.
//!
//! Authenticated WebSocket delivering balance, order and fill events.
//! Messages are decoded into [`AccountEvent`] and forwarded over a bounded
//! channel to the reconciler; unknown discriminators are logged and
//! dropped. The connection answers venue pings, recycles itself before the
//! 24h session limit and reconnects with exponential backoff.

use async_trait::async_trait;
use flowsockets::{
    ClientEvent, ExponentialBackoff, JsonPassivePing, MessageHandler, MessageRouter,
    WebSocketClient, WebSocketClientBuilder, WsMessage,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::types::{AccountEvent, BalanceUpdateMessage, FillMessage, OrderUpdateMessage};
use crate::config::{TimeoutConfig, VenueConfig};

/// Heartbeat interval towards the venue
const HEARTBEAT_INTERVAL_SECS: u64 = 15;

/// Recycle the session before the venue's 24h limit
const SESSION_LIFETIME_SECS: u64 = 23 * 3600;

/// Reconnection attempts before giving up and surfacing to the supervisor
const MAX_RECONNECT_ATTEMPTS: usize = 10;

// =============================================================================
// Router - parses account stream messages
// =============================================================================

pub struct AccountRouter;

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum AccountRoute {
    Account,
}

#[async_trait]
impl MessageRouter for AccountRouter {
    type Message = AccountEvent;
    type RouteKey = AccountRoute;

    async fn parse(&self, message: WsMessage) -> flowsockets::Result<Self::Message> {
        let text = match message.as_text() {
            Some(t) => t,
            None => return Ok(AccountEvent::Unknown("binary frame".to_string())),
        };

        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!("[AccountWS] Undecodable frame: {} - {}", e, text);
                return Ok(AccountEvent::Unknown(text.to_string()));
            }
        };

        let event = match value.get("type").and_then(|t| t.as_str()) {
            Some("balance_update") => serde_json::from_value::<BalanceUpdateMessage>(value.clone())
                .map(AccountEvent::Balance),
            Some("order_update") => serde_json::from_value::<OrderUpdateMessage>(value.clone())
                .map(AccountEvent::Order),
            Some("fill") => {
                serde_json::from_value::<FillMessage>(value.clone()).map(AccountEvent::Fill)
            }
            _ => return Ok(AccountEvent::Unknown(text.to_string())),
        };

        Ok(event.unwrap_or_else(|e| {
            debug!("[AccountWS] Malformed message: {} - {}", e, text);
            AccountEvent::Unknown(text.to_string())
        }))
    }

    fn route_key(&self, _message: &Self::Message) -> Self::RouteKey {
        AccountRoute::Account
    }
}

// =============================================================================
// Handler - forwards events to the reconciler
// =============================================================================

pub struct AccountHandler {
    events_tx: mpsc::Sender<AccountEvent>,
    message_count: u64,
}

impl AccountHandler {
    pub fn new(events_tx: mpsc::Sender<AccountEvent>) -> Self {
        Self {
            events_tx,
            message_count: 0,
        }
    }
}

impl MessageHandler<AccountEvent> for AccountHandler {
    fn handle(&mut self, message: AccountEvent) -> flowsockets::Result<()> {
        self.message_count += 1;

        if let AccountEvent::Unknown(raw) = &message {
            if !raw.is_empty() {
                debug!("[AccountWS] Unknown message dropped: {}", raw);
            }
            return Ok(());
        }

        // Runs on a dedicated handler thread, blocking send is fine here
        if self.events_tx.blocking_send(message).is_err() {
            debug!("[AccountWS] Reconciler channel closed, dropping event");
        }

        Ok(())
    }
}

// =============================================================================
// Client construction and supervision
// =============================================================================

async fn build_account_ws_client(
    venue: &VenueConfig,
    timeouts: &TimeoutConfig,
    api_key: String,
    events_tx: mpsc::Sender<AccountEvent>,
    shutdown_flag: Arc<AtomicBool>,
) -> anyhow::Result<WebSocketClient<AccountRouter, AccountEvent>> {
    let auth = serde_json::json!({ "type": "auth", "api_key": api_key }).to_string();

    let client = WebSocketClientBuilder::new(venue.account_ws_url.clone(), AccountRouter)
        .handler(AccountRoute::Account, AccountHandler::new(events_tx))
        .subscription(WsMessage::Text(auth))
        .heartbeat(
            Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            WsMessage::Text(r#"{"type":"ping"}"#.to_string()),
        )
        .passive_ping(JsonPassivePing::new(
            "type",
            "ping",
            WsMessage::Text(r#"{"type":"pong"}"#.to_string()),
        ))
        .idle_timeout(Duration::from_secs(timeouts.account_idle_secs))
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
        ClientEvent::Connected => info!("[AccountWS] Connected to account stream"),
        ClientEvent::Disconnected => warn!("[AccountWS] Disconnected from account stream"),
        ClientEvent::Reconnecting(attempt) => {
            warn!("[AccountWS] Reconnecting (attempt {})", attempt)
        }
        ClientEvent::SessionRecycled => info!("[AccountWS] Session recycled"),
        ClientEvent::Error(err) => warn!("[AccountWS] Error: {}", err),
    }
}

/// Spawn the account stream task.
///
/// Decoded events arrive on `events_tx`; the task runs until the shutdown
/// flag drops.
pub async fn spawn_account_stream(
    venue: VenueConfig,
    timeouts: TimeoutConfig,
    api_key: String,
    events_tx: mpsc::Sender<AccountEvent>,
    shutdown_flag: Arc<AtomicBool>,
) -> anyhow::Result<JoinHandle<()>> {
    let client = build_account_ws_client(
        &venue,
        &timeouts,
        api_key,
        events_tx,
        Arc::clone(&shutdown_flag),
    )
    .await?;

    info!("[AccountWS] Account stream started");

    let handle = tokio::spawn(async move {
        while shutdown_flag.load(Ordering::Acquire) {
            match client.try_recv_event() {
                Some(event) => handle_client_event(event),
                None => sleep(Duration::from_millis(10)).await,
            }
        }

        info!("[AccountWS] Closing connection");
        if let Err(e) = client.shutdown().await {
            warn!("[AccountWS] Error during shutdown: {}", e);
        }
        info!("[AccountWS] Account stream stopped");
    });

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_parse_balance_update() {
        let router = AccountRouter;
        let msg = WsMessage::Text(
            r#"{"type":"balance_update","asset":"USDM","available":"900","locked":"100"}"#
                .to_string(),
        );

        match router.parse(msg).await.unwrap() {
            AccountEvent::Balance(b) => {
                assert_eq!(b.asset, "USDM");
                assert_eq!(b.available, "900");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_parse_order_update() {
        let router = AccountRouter;
        let msg = WsMessage::Text(
            r#"{"type":"order_update","order_id":"ext-1","symbol":"ADAUSDM","status":"open"}"#
                .to_string(),
        );

        match router.parse(msg).await.unwrap() {
            AccountEvent::Order(o) => {
                assert_eq!(o.order_id, "ext-1");
                assert_eq!(o.status, "open");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_parse_fill() {
        let router = AccountRouter;
        let msg = WsMessage::Text(
            r#"{"type":"fill","fill_id":"f-1","order_id":"ext-1","symbol":"ADAUSDM",
                "side":"buy","price":"0.4998","quantity":"40","executed_at":1700000000.0}"#
                .to_string(),
        );

        match router.parse(msg).await.unwrap() {
            AccountEvent::Fill(f) => assert_eq!(f.fill_id, "f-1"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_discriminator_dropped() {
        let router = AccountRouter;
        let msg = WsMessage::Text(r#"{"type":"margin_call","level":"high"}"#.to_string());
        assert!(matches!(
            router.parse(msg).await.unwrap(),
            AccountEvent::Unknown(_)
        ));

        let msg = WsMessage::Text("not json at all".to_string());
        assert!(matches!(
            router.parse(msg).await.unwrap(),
            AccountEvent::Unknown(_)
        ));
    }

    #[tokio::test]
    async fn test_malformed_known_type_is_unknown() {
        let router = AccountRouter;
        // balance_update missing required fields
        let msg = WsMessage::Text(r#"{"type":"balance_update","asset":"USDM"}"#.to_string());
        assert!(matches!(
            router.parse(msg).await.unwrap(),
            AccountEvent::Unknown(_)
        ));
    }
}
