//! Account stream reconciliation.
//!
//! Applies balance, order and fill events from the destination venue to
//! the store and the OMS. The reconciler is authoritative for balances;
//! fills are deduplicated by id (a fast in-memory set backed by the
//! store's uniqueness constraint), so message replay is harmless. Orders
//! discovered on the venue that the store does not know are cancelled so
//! the system converges to "no orders it does not own".

use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{
    Balance, CancelOrderPayload, Fill, OutboxEvent, OutboxEventType, OutboxStatus, Side,
};
use crate::infrastructure::client::deltadefi::types::{
    AccountEvent, BalanceUpdateMessage, FillMessage, OrderUpdateMessage,
};
use crate::infrastructure::clock::Clock;
use crate::infrastructure::oms::Oms;
use crate::infrastructure::store::Store;

/// Balance moves below this are not worth a log line
const BALANCE_LOG_THRESHOLD: Decimal = dec!(0.01);

pub struct Reconciler {
    store: Store,
    oms: Arc<Oms>,
    clock: Arc<dyn Clock>,
    /// Fill ids already applied this session (store uniqueness backs this)
    seen_fills: Mutex<HashSet<String>>,
    /// Unknown venue orders already swept, to avoid duplicate cancels
    swept_unknown: Mutex<HashSet<String>>,
}

impl Reconciler {
    pub fn new(store: Store, oms: Arc<Oms>, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            store,
            oms,
            clock,
            seen_fills: Mutex::new(HashSet::new()),
            swept_unknown: Mutex::new(HashSet::new()),
        })
    }

    /// Spawn the reconciliation task consuming the account event channel
    pub fn spawn(
        self: Arc<Self>,
        mut events_rx: mpsc::Receiver<AccountEvent>,
        shutdown_flag: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("[Reconciler] Started");

            loop {
                tokio::select! {
                    event = events_rx.recv() => {
                        match event {
                            Some(event) => self.handle_event(event).await,
                            None => {
                                debug!("[Reconciler] Event channel closed");
                                break;
                            }
                        }
                    }
                    _ = sleep(Duration::from_millis(100)) => {
                        if !shutdown_flag.load(Ordering::Acquire) {
                            break;
                        }
                    }
                }
            }

            info!("[Reconciler] Stopped");
        })
    }

    /// Apply one account event. Failures are logged; the stream goes on.
    pub async fn handle_event(&self, event: AccountEvent) {
        match event {
            AccountEvent::Balance(msg) => self.handle_balance(msg).await,
            AccountEvent::Order(msg) => self.handle_order_update(msg).await,
            AccountEvent::Fill(msg) => self.handle_fill(msg).await,
            AccountEvent::Unknown(raw) => {
                debug!("[Reconciler] Unknown event dropped: {}", raw);
            }
        }
    }

    async fn handle_balance(&self, msg: BalanceUpdateMessage) {
        let (Ok(available), Ok(locked)) = (
            Decimal::from_str(&msg.available),
            Decimal::from_str(&msg.locked),
        ) else {
            warn!("[Reconciler] Unparseable balance for {}: {:?}", msg.asset, msg);
            return;
        };

        let updated_at = msg.timestamp.unwrap_or_else(|| self.clock.now());
        let balance = Balance {
            asset: msg.asset.clone(),
            available,
            locked,
            updated_at,
        };

        // Log only material moves
        match self.store.get_balance(&msg.asset).await {
            Ok(previous) => {
                let delta = previous
                    .map(|p| (balance.total() - p.total()).abs())
                    .unwrap_or_else(|| balance.total().abs());
                if delta > BALANCE_LOG_THRESHOLD {
                    info!(
                        "[Reconciler] Balance {}: available={}, locked={}",
                        msg.asset, available, locked
                    );
                }
            }
            Err(e) => warn!("[Reconciler] Balance read failed for {}: {}", msg.asset, e),
        }

        // Last write wins; replays overwrite idempotently
        if let Err(e) = self.store.upsert_balance(&balance).await {
            warn!("[Reconciler] Balance upsert failed for {}: {}", msg.asset, e);
        }
    }

    async fn handle_order_update(&self, msg: OrderUpdateMessage) {
        let local = match self.oms.order_by_external(&msg.order_id).await {
            Ok(order) => order,
            Err(e) => {
                warn!("[Reconciler] Order lookup failed for {}: {}", msg.order_id, e);
                return;
            }
        };

        let Some(order) = local else {
            self.sweep_unknown_order(&msg).await;
            return;
        };

        let reason = msg.reason.as_deref().unwrap_or("venue update");
        let result = match msg.status.to_lowercase().as_str() {
            "open" | "new" | "acknowledged" => {
                // Usually already applied via the dispatch ack; idempotent
                self.oms.apply_ack(&order.order_id, &msg.order_id).await
            }
            "cancelled" | "canceled" => {
                self.oms.apply_external_cancel(&order.order_id, reason).await
            }
            "rejected" => self.oms.apply_reject(&order.order_id, reason).await,
            // Fill progress arrives through dedicated fill events
            "filled" | "partially_filled" => Ok(()),
            other => {
                debug!(
                    "[Reconciler] Unhandled order status '{}' for {}",
                    other, order.order_id
                );
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!(
                "[Reconciler] Failed to apply order update for {}: {}",
                order.order_id, e
            );
        }
    }

    async fn handle_fill(&self, msg: FillMessage) {
        // Fast-path dedup before any store work
        if !self.seen_fills.lock().insert(msg.fill_id.clone()) {
            debug!("[Reconciler] Duplicate fill {} (seen), skipping", msg.fill_id);
            return;
        }

        let order = match self.oms.order_by_external(&msg.order_id).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                warn!(
                    "[Reconciler] Fill {} for unknown venue order {}, ignoring",
                    msg.fill_id, msg.order_id
                );
                // The mapping may simply not exist yet; let a replay retry
                self.seen_fills.lock().remove(&msg.fill_id);
                return;
            }
            Err(e) => {
                warn!("[Reconciler] Order lookup failed for fill {}: {}", msg.fill_id, e);
                // Allow a replay to retry
                self.seen_fills.lock().remove(&msg.fill_id);
                return;
            }
        };

        let (Ok(price), Ok(quantity)) =
            (Decimal::from_str(&msg.price), Decimal::from_str(&msg.quantity))
        else {
            warn!("[Reconciler] Unparseable fill {}: {:?}", msg.fill_id, msg);
            return;
        };
        let Some(side) = Side::parse(&msg.side) else {
            warn!("[Reconciler] Bad side '{}' on fill {}", msg.side, msg.fill_id);
            return;
        };
        let commission = msg
            .commission
            .as_deref()
            .and_then(|c| Decimal::from_str(c).ok())
            .unwrap_or(Decimal::ZERO);

        let fill = Fill {
            fill_id: msg.fill_id.clone(),
            order_id: order.order_id.clone(),
            symbol: msg.symbol.clone(),
            side,
            price,
            quantity,
            executed_at: msg.executed_at,
            trade_id: msg.trade_id.clone(),
            commission,
            commission_asset: msg.commission_asset.clone(),
            is_maker: msg.is_maker,
        };

        if let Err(e) = self.oms.apply_fill(fill).await {
            warn!("[Reconciler] Failed to apply fill {}: {}", msg.fill_id, e);
            self.seen_fills.lock().remove(&msg.fill_id);
        }
    }

    /// The venue reported an order we never created: cancel it so the book
    /// converges to orders we own.
    async fn sweep_unknown_order(&self, msg: &OrderUpdateMessage) {
        // Only live orders are worth sweeping
        match msg.status.to_lowercase().as_str() {
            "cancelled" | "canceled" | "rejected" | "filled" => return,
            _ => {}
        }

        if !self.swept_unknown.lock().insert(msg.order_id.clone()) {
            return;
        }

        warn!(
            "[Reconciler] Unregistered venue order {} ({}), enqueuing cancel",
            msg.order_id, msg.symbol
        );

        let now = self.clock.now();
        let payload = CancelOrderPayload {
            order_id: None,
            external_order_id: Some(msg.order_id.clone()),
            reason: "unregistered venue order".to_string(),
        };
        let event = OutboxEvent {
            event_id: Uuid::new_v4().to_string(),
            event_type: OutboxEventType::CancelOrder,
            aggregate_id: format!("venue:{}", msg.order_id),
            payload: match serde_json::to_string(&payload) {
                Ok(p) => p,
                Err(e) => {
                    warn!("[Reconciler] Failed to serialize sweep payload: {}", e);
                    return;
                }
            },
            status: OutboxStatus::Pending,
            retry_count: 0,
            next_retry_at: now,
            last_error: None,
            created_at: now,
        };

        if let Err(e) = self.store.enqueue_outbox(&event).await {
            warn!("[Reconciler] Failed to enqueue sweep cancel: {}", e);
            self.swept_unknown.lock().remove(&msg.order_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskConfig;
    use crate::domain::{OrderState, OrderType};
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::oms::{OrderRequest, RiskEngine};

    async fn setup() -> (Arc<Reconciler>, Arc<Oms>, Store) {
        let store = Store::open(":memory:").await.unwrap();
        let clock = Arc::new(ManualClock::new(1000.0));
        let risk = RiskEngine::new(
            RiskConfig {
                max_position_size: dec!(100000),
                max_daily_loss: dec!(500),
                max_open_orders: 50,
                max_skew: dec!(200000),
                min_quote_size: dec!(1),
                emergency_stop: false,
            },
            1000.0,
        );
        let oms = Arc::new(Oms::new(store.clone(), clock.clone(), risk, "ADA"));
        let reconciler = Reconciler::new(store.clone(), Arc::clone(&oms), clock);
        (reconciler, oms, store)
    }

    async fn working_order(oms: &Oms, external_id: &str) -> String {
        let order = oms
            .submit(OrderRequest {
                symbol: "ADAUSDM".to_string(),
                side: Side::Buy,
                order_type: OrderType::Limit,
                quantity: dec!(100),
                price: Some(dec!(0.50)),
                quote_id: None,
            })
            .await
            .unwrap();
        oms.apply_ack(&order.order_id, external_id).await.unwrap();
        order.order_id
    }

    fn fill_msg(fill_id: &str, external_order: &str, qty: &str) -> FillMessage {
        FillMessage {
            fill_id: fill_id.to_string(),
            order_id: external_order.to_string(),
            symbol: "ADAUSDM".to_string(),
            side: "buy".to_string(),
            price: "0.50".to_string(),
            quantity: qty.to_string(),
            executed_at: 1001.0,
            trade_id: None,
            commission: None,
            commission_asset: None,
            is_maker: true,
        }
    }

    #[tokio::test]
    async fn test_balance_update_applied() {
        let (reconciler, _oms, store) = setup().await;

        reconciler
            .handle_event(AccountEvent::Balance(BalanceUpdateMessage {
                asset: "USDM".to_string(),
                available: "900".to_string(),
                locked: "100".to_string(),
                timestamp: Some(1001.0),
            }))
            .await;

        let balance = store.get_balance("USDM").await.unwrap().unwrap();
        assert_eq!(balance.available, dec!(900));
        assert_eq!(balance.total(), dec!(1000));
    }

    #[tokio::test]
    async fn test_fill_applied_and_deduped() {
        let (reconciler, oms, _store) = setup().await;
        let order_id = working_order(&oms, "ext-1").await;

        reconciler
            .handle_event(AccountEvent::Fill(fill_msg("f-1", "ext-1", "40")))
            .await;
        // Replay of the same fill
        reconciler
            .handle_event(AccountEvent::Fill(fill_msg("f-1", "ext-1", "40")))
            .await;

        let order = oms.order(&order_id).await.unwrap();
        assert_eq!(order.filled_qty, dec!(40));
        assert_eq!(oms.position("ADAUSDM").await.quantity, dec!(40));
    }

    #[tokio::test]
    async fn test_external_cancel_via_stream() {
        let (reconciler, oms, _store) = setup().await;
        let order_id = working_order(&oms, "ext-1").await;

        reconciler
            .handle_event(AccountEvent::Order(OrderUpdateMessage {
                order_id: "ext-1".to_string(),
                client_order_id: None,
                symbol: "ADAUSDM".to_string(),
                status: "cancelled".to_string(),
                reason: Some("self trade".to_string()),
                timestamp: None,
            }))
            .await;

        let order = oms.order(&order_id).await.unwrap();
        assert_eq!(order.state, OrderState::Cancelled);
    }

    #[tokio::test]
    async fn test_unknown_order_swept_once() {
        let (reconciler, _oms, store) = setup().await;

        let msg = OrderUpdateMessage {
            order_id: "ghost-1".to_string(),
            client_order_id: None,
            symbol: "ADAUSDM".to_string(),
            status: "open".to_string(),
            reason: None,
            timestamp: None,
        };

        reconciler.handle_event(AccountEvent::Order(msg.clone())).await;
        // A repeated report must not enqueue a second cancel
        reconciler.handle_event(AccountEvent::Order(msg)).await;

        let events = store.claim_pending_events(1000.0, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, OutboxEventType::CancelOrder);

        let payload: CancelOrderPayload = serde_json::from_str(&events[0].payload).unwrap();
        assert_eq!(payload.external_order_id.as_deref(), Some("ghost-1"));
        assert!(payload.order_id.is_none());
    }

    #[tokio::test]
    async fn test_unknown_terminal_order_not_swept() {
        let (reconciler, _oms, store) = setup().await;

        reconciler
            .handle_event(AccountEvent::Order(OrderUpdateMessage {
                order_id: "ghost-2".to_string(),
                client_order_id: None,
                symbol: "ADAUSDM".to_string(),
                status: "cancelled".to_string(),
                reason: None,
                timestamp: None,
            }))
            .await;

        assert!(store.claim_pending_events(1000.0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fill_for_unknown_order_ignored() {
        let (reconciler, oms, _store) = setup().await;

        reconciler
            .handle_event(AccountEvent::Fill(fill_msg("f-9", "nobody", "40")))
            .await;

        assert!(oms.position("ADAUSDM").await.is_flat());
    }
}
