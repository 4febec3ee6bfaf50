//! Order Management System.
//!
//! Owns the order state machine and per-symbol positions, gates
//! submissions through pre-trade risk, and emits outbox events in the same
//! transaction as the state writes. No network I/O happens here; the
//! outbox dispatcher and the reconciler drive the OMS from the outside.
//!
//! Concurrency: one async mutex covers every transition together with its
//! outbox emission, so observers and the store always see a consistent
//! ordering. Illegal transitions are protocol violations: logged and
//! ignored, never applied.

pub mod position;
pub mod risk;

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{
    CancelOrderPayload, Fill, Order, OrderState, OrderType, OutboxEvent, OutboxEventType,
    OutboxStatus, Position, Side, SubmitOrderPayload,
};
use crate::infrastructure::clock::Clock;
use crate::infrastructure::store::{Store, StoreError};

pub use risk::{OrderIntent, RiskEngine, RiskViolation};

/// Capacity of each observer channel
const OBSERVER_CHANNEL_CAPACITY: usize = 256;

#[derive(Error, Debug)]
pub enum OmsError {
    #[error("rejected by pre-trade risk: {}", format_violations(.0))]
    RiskRejected(Vec<RiskViolation>),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Unknown order: {0}")]
    UnknownOrder(String),
}

fn format_violations(violations: &[RiskViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, OmsError>;

/// What a caller asks the OMS to submit
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub quote_id: Option<String>,
}

/// Notifications emitted after successful transitions.
///
/// Delivered over bounded channels; a slow or dead observer loses events
/// but never affects OMS state.
#[derive(Debug, Clone)]
pub enum OmsEvent {
    Submitted {
        order_id: String,
        symbol: String,
        side: Side,
        quantity: Decimal,
        price: Option<Decimal>,
    },
    Acked {
        order_id: String,
        external_id: String,
    },
    FillApplied {
        order_id: String,
        quantity: Decimal,
        price: Decimal,
        full: bool,
    },
    CancelRequested {
        order_id: String,
        reason: String,
    },
    Cancelled {
        order_id: String,
        reason: String,
    },
    Rejected {
        order_id: String,
        reason: String,
    },
    Failed {
        order_id: String,
        reason: String,
    },
}

#[derive(Default)]
struct OmsInner {
    orders: HashMap<String, Order>,
    /// external_order_id -> order_id
    external_index: HashMap<String, String>,
    positions: HashMap<String, Position>,
}

/// The order management system
pub struct Oms {
    store: Store,
    clock: Arc<dyn Clock>,
    risk: RiskEngine,
    /// Base asset of the traded instrument, for commission conversion
    base_asset: String,
    inner: Mutex<OmsInner>,
    observers: parking_lot::RwLock<Vec<mpsc::Sender<OmsEvent>>>,
}

impl Oms {
    pub fn new(
        store: Store,
        clock: Arc<dyn Clock>,
        risk: RiskEngine,
        base_asset: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            risk,
            base_asset: base_asset.into(),
            inner: Mutex::new(OmsInner::default()),
            observers: parking_lot::RwLock::new(Vec::new()),
        }
    }

    /// Warm the in-memory index from the store (startup/recovery)
    pub async fn load_from_store(&self, symbol: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;

        let open = self.store.list_open_orders(symbol).await?;
        for order in open {
            if let Some(ext) = &order.external_order_id {
                inner.external_index.insert(ext.clone(), order.order_id.clone());
            }
            inner.orders.insert(order.order_id.clone(), order);
        }

        if let Some(position) = self.store.get_position(symbol).await? {
            inner.positions.insert(symbol.to_string(), position);
        }

        info!(
            "[OMS] Loaded {} open orders for {} from store",
            inner.orders.len(),
            symbol
        );
        Ok(())
    }

    /// Subscribe to OMS notifications
    pub fn subscribe(&self) -> mpsc::Receiver<OmsEvent> {
        let (tx, rx) = mpsc::channel(OBSERVER_CHANNEL_CAPACITY);
        self.observers.write().push(tx);
        rx
    }

    pub fn risk(&self) -> &RiskEngine {
        &self.risk
    }

    pub fn set_emergency_stop(&self, on: bool) {
        self.risk.set_emergency_stop(on);
    }

    // =========================================================================
    // Submissions
    // =========================================================================

    /// Run risk, persist the order in `pending` together with its
    /// `submit_order` outbox event, and return it.
    pub async fn submit(&self, request: OrderRequest) -> Result<Order> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;

        let position_qty = inner
            .positions
            .get(&request.symbol)
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO);
        let open_orders = inner.orders.values().filter(|o| !o.is_terminal()).count();
        let open_same_side_qty: Decimal = inner
            .orders
            .values()
            .filter(|o| o.is_open() && o.symbol == request.symbol && o.side == request.side)
            .map(|o| o.remaining_qty())
            .sum();

        let intent = OrderIntent {
            signed_qty: request.side.sign() * request.quantity,
            qty: request.quantity,
        };
        let violations = self.risk.check(
            &intent,
            position_qty,
            open_same_side_qty,
            open_orders,
            now,
        );
        if !violations.is_empty() {
            warn!(
                "[OMS] Submission rejected ({} {} {}): {}",
                request.side,
                request.quantity,
                request.symbol,
                format_violations(&violations)
            );
            return Err(OmsError::RiskRejected(violations));
        }

        let order = Order {
            order_id: Uuid::new_v4().to_string(),
            quote_id: request.quote_id.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            price: request.price,
            quantity: request.quantity,
            filled_qty: Decimal::ZERO,
            avg_fill_px: Decimal::ZERO,
            state: OrderState::Pending,
            external_order_id: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        };

        let payload = SubmitOrderPayload {
            order_id: order.order_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            order_type: order.order_type,
            price: order.price,
            quantity: order.quantity,
        };
        let event = OutboxEvent {
            event_id: Uuid::new_v4().to_string(),
            event_type: OutboxEventType::SubmitOrder,
            aggregate_id: order.order_id.clone(),
            payload: serde_json::to_string(&payload).map_err(StoreError::from)?,
            status: OutboxStatus::Pending,
            retry_count: 0,
            next_retry_at: now,
            last_error: None,
            created_at: now,
        };

        self.store.create_order_with_event(&order, &event).await?;
        inner.orders.insert(order.order_id.clone(), order.clone());
        drop(inner);

        debug!(
            "[OMS] Submitted {} {} {} @ {:?} ({})",
            order.side, order.quantity, order.symbol, order.price, order.order_id
        );
        self.notify(OmsEvent::Submitted {
            order_id: order.order_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            price: order.price,
        });

        Ok(order)
    }

    // =========================================================================
    // Venue-driven transitions
    // =========================================================================

    /// Venue acknowledged the order: `pending -> working`
    ///
    /// A late ack for an already-terminal order is logged and ignored.
    pub async fn apply_ack(&self, order_id: &str, external_id: &str) -> Result<()> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;

        let Some(order) = inner.orders.get(order_id).cloned() else {
            warn!("[OMS] Ack for unknown order {}, ignoring", order_id);
            return Ok(());
        };

        if order.state.is_terminal() {
            warn!(
                "[OMS] Late ack for terminal order {} ({}), ignoring",
                order_id, order.state
            );
            return Ok(());
        }

        if !order.state.can_transition_to(OrderState::Working) {
            // Duplicate ack for a working order just refreshes the id
            if order.state == OrderState::Working {
                debug!("[OMS] Duplicate ack for {}, ignoring", order_id);
            } else {
                warn!(
                    "[OMS] Protocol violation: ack for {} in state {}, ignoring",
                    order_id, order.state
                );
            }
            return Ok(());
        }

        if !self
            .store
            .update_order_state(order_id, order.state, OrderState::Working, now)
            .await?
        {
            warn!("[OMS] Lost ack race for {}, ignoring", order_id);
            return Ok(());
        }
        self.store.set_external_order_id(order_id, external_id).await?;

        if let Some(order) = inner.orders.get_mut(order_id) {
            order.state = OrderState::Working;
            order.external_order_id = Some(external_id.to_string());
            order.updated_at = now;
        }
        inner
            .external_index
            .insert(external_id.to_string(), order_id.to_string());
        drop(inner);

        debug!("[OMS] Order {} working (venue id {})", order_id, external_id);
        self.notify(OmsEvent::Acked {
            order_id: order_id.to_string(),
            external_id: external_id.to_string(),
        });
        Ok(())
    }

    /// Apply an execution. Idempotent by `fill_id`; updates the order's
    /// fill bookkeeping and the symbol position atomically.
    pub async fn apply_fill(&self, fill: Fill) -> Result<()> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;

        let existing = match inner.orders.get(&fill.order_id) {
            Some(order) => order.clone(),
            None => match self.store.get_order(&fill.order_id).await? {
                Some(order) => order,
                None => {
                    warn!(
                        "[OMS] Fill {} references unknown order {}, ignoring",
                        fill.fill_id, fill.order_id
                    );
                    return Ok(());
                }
            },
        };

        let mut order = existing;

        // A fill proves the order is live on the venue even if the ack has
        // not been processed yet
        if order.state == OrderState::Pending {
            order.state = OrderState::Working;
        }

        if order.state != OrderState::Working && order.state != OrderState::Filled {
            warn!(
                "[OMS] Protocol violation: fill for {} in state {}, ignoring",
                order.order_id, order.state
            );
            return Ok(());
        }

        let prev_filled = order.filled_qty;
        let new_filled = prev_filled + fill.quantity;
        if new_filled > order.quantity {
            warn!(
                "[OMS] Overfill on {}: {} + {} > {}",
                order.order_id, prev_filled, fill.quantity, order.quantity
            );
        }
        order.avg_fill_px = if new_filled.is_zero() {
            Decimal::ZERO
        } else {
            (order.avg_fill_px * prev_filled + fill.price * fill.quantity) / new_filled
        };
        order.filled_qty = new_filled;
        order.updated_at = now;

        let full = order.filled_qty >= order.quantity;
        if full && order.state == OrderState::Working {
            order.state = OrderState::Filled;
        }

        let mut position = inner
            .positions
            .get(&fill.symbol)
            .cloned()
            .unwrap_or_else(|| Position::flat(fill.symbol.clone()));

        let commission_quote = self.commission_in_quote(&fill);
        let realized_delta = position::apply_fill(&mut position, &fill, commission_quote);

        // The store call is the dedup gate; nothing is mutated on duplicates
        if !self.store.apply_fill_txn(&fill, &order, &position).await? {
            debug!("[OMS] Duplicate fill {}, no-op", fill.fill_id);
            return Ok(());
        }

        inner.orders.insert(order.order_id.clone(), order.clone());
        inner.positions.insert(fill.symbol.clone(), position);
        drop(inner);

        self.risk.record_realized(realized_delta, now);

        info!(
            "[OMS] Fill {}: {} {} @ {} ({}/{} filled)",
            fill.fill_id, fill.side, fill.quantity, fill.price, order.filled_qty, order.quantity
        );
        self.notify(OmsEvent::FillApplied {
            order_id: order.order_id.clone(),
            quantity: fill.quantity,
            price: fill.price,
            full,
        });

        Ok(())
    }

    /// Request cancellation of an active order by enqueuing a
    /// `cancel_order` outbox event. Terminal orders are a no-op.
    pub async fn cancel(&self, order_id: &str, reason: &str) -> Result<()> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;

        let Some(order) = inner.orders.get(order_id).cloned() else {
            return Err(OmsError::UnknownOrder(order_id.to_string()));
        };

        if order.is_terminal() {
            debug!(
                "[OMS] Cancel of terminal order {} ({}), no-op",
                order_id, order.state
            );
            return Ok(());
        }
        if order.cancel_requested {
            debug!("[OMS] Cancel already in flight for {}, no-op", order_id);
            return Ok(());
        }

        let payload = CancelOrderPayload {
            order_id: Some(order.order_id.clone()),
            external_order_id: order.external_order_id.clone(),
            reason: reason.to_string(),
        };
        let event = OutboxEvent {
            event_id: Uuid::new_v4().to_string(),
            event_type: OutboxEventType::CancelOrder,
            aggregate_id: order.order_id.clone(),
            payload: serde_json::to_string(&payload).map_err(StoreError::from)?,
            status: OutboxStatus::Pending,
            retry_count: 0,
            next_retry_at: now,
            last_error: None,
            created_at: now,
        };

        self.store
            .request_cancel_with_event(order_id, &event, now)
            .await?;

        if let Some(order) = inner.orders.get_mut(order_id) {
            order.cancel_requested = true;
            order.updated_at = now;
        }
        drop(inner);

        debug!("[OMS] Cancel requested for {} ({})", order_id, reason);
        self.notify(OmsEvent::CancelRequested {
            order_id: order_id.to_string(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Venue confirmed a cancellation (via dispatch result or the account
    /// stream): `working -> cancelled`. Cancelling an already-terminal
    /// order (e.g. it filled first) is a no-op.
    pub async fn apply_external_cancel(&self, order_id: &str, reason: &str) -> Result<()> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;

        let Some(order) = inner.orders.get(order_id).cloned() else {
            debug!("[OMS] External cancel for unknown order {}, ignoring", order_id);
            return Ok(());
        };

        if order.is_terminal() {
            debug!(
                "[OMS] External cancel for terminal order {} ({}), no-op",
                order_id, order.state
            );
            return Ok(());
        }

        let (to, event) = match order.state {
            OrderState::Working => (
                OrderState::Cancelled,
                OmsEvent::Cancelled {
                    order_id: order_id.to_string(),
                    reason: reason.to_string(),
                },
            ),
            // Cancelled before it was ever acked: it never became live
            OrderState::Pending => (
                OrderState::Failed,
                OmsEvent::Failed {
                    order_id: order_id.to_string(),
                    reason: format!("cancelled before ack: {}", reason),
                },
            ),
            other => {
                warn!(
                    "[OMS] Protocol violation: external cancel for {} in state {}, ignoring",
                    order_id, other
                );
                return Ok(());
            }
        };

        if !self
            .store
            .update_order_state(order_id, order.state, to, now)
            .await?
        {
            warn!("[OMS] Lost cancel race for {}, ignoring", order_id);
            return Ok(());
        }

        if let Some(order) = inner.orders.get_mut(order_id) {
            order.state = to;
            order.updated_at = now;
        }
        drop(inner);

        info!("[OMS] Order {} {} ({})", order_id, to, reason);
        self.notify(event);
        Ok(())
    }

    /// Venue rejected the order (terminal validation error)
    pub async fn apply_reject(&self, order_id: &str, reason: &str) -> Result<()> {
        self.apply_terminal(order_id, OrderState::Rejected, reason).await
    }

    /// Submit delivery exhausted its retries: the order goes to `failed`
    pub async fn apply_dispatch_failure(&self, order_id: &str, reason: &str) -> Result<()> {
        self.apply_terminal(order_id, OrderState::Failed, reason).await
    }

    async fn apply_terminal(&self, order_id: &str, to: OrderState, reason: &str) -> Result<()> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;

        let Some(order) = inner.orders.get(order_id).cloned() else {
            debug!("[OMS] {} for unknown order {}, ignoring", to, order_id);
            return Ok(());
        };

        if order.is_terminal() {
            debug!(
                "[OMS] {} for terminal order {} ({}), no-op",
                to, order_id, order.state
            );
            return Ok(());
        }

        if !order.state.can_transition_to(to) {
            warn!(
                "[OMS] Protocol violation: {} -> {} for {}, ignoring",
                order.state, to, order_id
            );
            return Ok(());
        }

        if !self
            .store
            .update_order_state(order_id, order.state, to, now)
            .await?
        {
            warn!("[OMS] Lost {} race for {}, ignoring", to, order_id);
            return Ok(());
        }

        if let Some(order) = inner.orders.get_mut(order_id) {
            order.state = to;
            order.updated_at = now;
        }
        drop(inner);

        info!("[OMS] Order {} {} ({})", order_id, to, reason);
        let event = match to {
            OrderState::Rejected => OmsEvent::Rejected {
                order_id: order_id.to_string(),
                reason: reason.to_string(),
            },
            _ => OmsEvent::Failed {
                order_id: order_id.to_string(),
                reason: reason.to_string(),
            },
        };
        self.notify(event);
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn order(&self, order_id: &str) -> Option<Order> {
        self.inner.lock().await.orders.get(order_id).cloned()
    }

    /// Resolve a venue order id to a local order (memory first, then store)
    pub async fn order_by_external(&self, external_id: &str) -> Result<Option<Order>> {
        {
            let inner = self.inner.lock().await;
            if let Some(order_id) = inner.external_index.get(external_id) {
                if let Some(order) = inner.orders.get(order_id) {
                    return Ok(Some(order.clone()));
                }
            }
        }
        Ok(self.store.get_order_by_external(external_id).await?)
    }

    pub async fn open_orders(&self, symbol: &str) -> Vec<Order> {
        self.inner
            .lock()
            .await
            .orders
            .values()
            .filter(|o| o.is_open() && o.symbol == symbol)
            .cloned()
            .collect()
    }

    pub async fn open_order_count(&self) -> usize {
        self.inner
            .lock()
            .await
            .orders
            .values()
            .filter(|o| !o.is_terminal())
            .count()
    }

    pub async fn position(&self, symbol: &str) -> Position {
        self.inner
            .lock()
            .await
            .positions
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| Position::flat(symbol))
    }

    /// Mark-to-market P&L at the given reference mid
    pub async fn unrealized_pnl(&self, symbol: &str, mid: Decimal) -> Decimal {
        self.position(symbol).await.unrealized_at(mid)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Normalize a fill's commission to quote-asset units
    fn commission_in_quote(&self, fill: &Fill) -> Decimal {
        match &fill.commission_asset {
            Some(asset) if *asset == self.base_asset => fill.commission * fill.price,
            _ => fill.commission,
        }
    }

    /// Deliver an event to all observers; failures never propagate
    fn notify(&self, event: OmsEvent) {
        let observers = self.observers.read();
        for tx in observers.iter() {
            if tx.try_send(event.clone()).is_err() {
                debug!("[OMS] Observer channel full or closed, event dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskConfig;
    use crate::infrastructure::clock::ManualClock;
    use rust_decimal_macros::dec;

    async fn make_oms() -> (Arc<Oms>, Arc<ManualClock>) {
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
        let oms = Arc::new(Oms::new(store, clock.clone(), risk, "ADA"));
        (oms, clock)
    }

    fn buy_request(qty: Decimal, price: Decimal) -> OrderRequest {
        OrderRequest {
            symbol: "ADAUSDM".to_string(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            quantity: qty,
            price: Some(price),
            quote_id: None,
        }
    }

    fn fill_for(order: &Order, fill_id: &str, qty: Decimal, price: Decimal) -> Fill {
        Fill {
            fill_id: fill_id.to_string(),
            order_id: order.order_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            price,
            quantity: qty,
            executed_at: 1001.0,
            trade_id: None,
            commission: Decimal::ZERO,
            commission_asset: None,
            is_maker: true,
        }
    }

    #[tokio::test]
    async fn test_submit_creates_pending_order_and_event() {
        let (oms, _clock) = make_oms().await;
        let order = oms.submit(buy_request(dec!(100), dec!(0.4998))).await.unwrap();

        assert_eq!(order.state, OrderState::Pending);
        assert_eq!(oms.open_order_count().await, 1);

        // The submit event is claimable from the outbox
        let events = oms.store.claim_pending_events(1000.0, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, OutboxEventType::SubmitOrder);
        assert_eq!(events[0].aggregate_id, order.order_id);
    }

    #[tokio::test]
    async fn test_risk_rejection_leaves_no_trace() {
        let (oms, _clock) = make_oms().await;
        oms.set_emergency_stop(true);

        let result = oms.submit(buy_request(dec!(100), dec!(0.4998))).await;
        assert!(matches!(result, Err(OmsError::RiskRejected(_))));

        // No order, no outbox event, no position change
        assert_eq!(oms.open_order_count().await, 0);
        assert!(oms.store.claim_pending_events(1000.0, 10).await.unwrap().is_empty());
        assert!(oms.position("ADAUSDM").await.is_flat());
    }

    #[tokio::test]
    async fn test_ack_transitions_to_working() {
        let (oms, _clock) = make_oms().await;
        let order = oms.submit(buy_request(dec!(100), dec!(0.4998))).await.unwrap();

        oms.apply_ack(&order.order_id, "ext-1").await.unwrap();

        let order = oms.order(&order.order_id).await.unwrap();
        assert_eq!(order.state, OrderState::Working);
        assert_eq!(order.external_order_id.as_deref(), Some("ext-1"));

        let resolved = oms.order_by_external("ext-1").await.unwrap().unwrap();
        assert_eq!(resolved.order_id, order.order_id);
    }

    #[tokio::test]
    async fn test_fill_bookkeeping_vwap() {
        let (oms, _clock) = make_oms().await;
        let order = oms.submit(buy_request(dec!(100), dec!(0.50))).await.unwrap();
        oms.apply_ack(&order.order_id, "ext-1").await.unwrap();

        oms.apply_fill(fill_for(&order, "f-1", dec!(40), dec!(0.50))).await.unwrap();
        oms.apply_fill(fill_for(&order, "f-2", dec!(60), dec!(0.51))).await.unwrap();

        let order = oms.order(&order.order_id).await.unwrap();
        assert_eq!(order.state, OrderState::Filled);
        assert_eq!(order.filled_qty, dec!(100));
        // VWAP: (40*0.50 + 60*0.51) / 100 = 0.506
        assert_eq!(order.avg_fill_px, dec!(0.506));

        let position = oms.position("ADAUSDM").await;
        assert_eq!(position.quantity, dec!(100));
        assert_eq!(position.avg_entry_price, dec!(0.506));
    }

    #[tokio::test]
    async fn test_duplicate_fill_is_noop() {
        let (oms, _clock) = make_oms().await;
        let order = oms.submit(buy_request(dec!(100), dec!(0.50))).await.unwrap();
        oms.apply_ack(&order.order_id, "ext-1").await.unwrap();

        let fill = fill_for(&order, "f-1", dec!(40), dec!(0.50));
        oms.apply_fill(fill.clone()).await.unwrap();
        oms.apply_fill(fill).await.unwrap();

        let order = oms.order(&order.order_id).await.unwrap();
        assert_eq!(order.filled_qty, dec!(40));
        assert_eq!(oms.position("ADAUSDM").await.quantity, dec!(40));
    }

    #[tokio::test]
    async fn test_fill_then_cancel_race() {
        // The venue fills the order, then a cancel confirmation arrives.
        // The fill wins; the cancel is a no-op.
        let (oms, _clock) = make_oms().await;
        let order = oms.submit(buy_request(dec!(100), dec!(0.50))).await.unwrap();
        oms.apply_ack(&order.order_id, "ext-1").await.unwrap();

        oms.apply_fill(fill_for(&order, "f-1", dec!(100), dec!(0.50))).await.unwrap();
        oms.apply_external_cancel(&order.order_id, "venue cancel").await.unwrap();

        let order = oms.order(&order.order_id).await.unwrap();
        assert_eq!(order.state, OrderState::Filled);
        assert_eq!(oms.position("ADAUSDM").await.quantity, dec!(100));
    }

    #[tokio::test]
    async fn test_cancel_flow() {
        let (oms, _clock) = make_oms().await;
        let order = oms.submit(buy_request(dec!(100), dec!(0.50))).await.unwrap();
        oms.apply_ack(&order.order_id, "ext-1").await.unwrap();

        // Drain the submit event so only the cancel remains claimable
        let submit_events = oms.store.claim_pending_events(1000.0, 10).await.unwrap();
        oms.store.mark_event_completed(&submit_events[0].event_id).await.unwrap();

        oms.cancel(&order.order_id, "requote").await.unwrap();

        let events = oms.store.claim_pending_events(1000.0, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, OutboxEventType::CancelOrder);

        // Second cancel request is a no-op (at most one live cancel event)
        oms.cancel(&order.order_id, "again").await.unwrap();
        assert!(oms.store.claim_pending_events(1000.0, 10).await.unwrap().is_empty());

        oms.apply_external_cancel(&order.order_id, "confirmed").await.unwrap();
        let order = oms.order(&order.order_id).await.unwrap();
        assert_eq!(order.state, OrderState::Cancelled);
    }

    #[tokio::test]
    async fn test_reject_is_terminal() {
        let (oms, _clock) = make_oms().await;
        let order = oms.submit(buy_request(dec!(100), dec!(0.50))).await.unwrap();

        oms.apply_reject(&order.order_id, "validation failed").await.unwrap();
        let loaded = oms.order(&order.order_id).await.unwrap();
        assert_eq!(loaded.state, OrderState::Rejected);

        // Nothing moves a terminal order
        oms.apply_ack(&order.order_id, "ext-late").await.unwrap();
        oms.apply_external_cancel(&order.order_id, "x").await.unwrap();
        let loaded = oms.order(&order.order_id).await.unwrap();
        assert_eq!(loaded.state, OrderState::Rejected);
        assert!(loaded.external_order_id.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_failure_fails_order() {
        let (oms, _clock) = make_oms().await;
        let order = oms.submit(buy_request(dec!(100), dec!(0.50))).await.unwrap();

        oms.apply_dispatch_failure(&order.order_id, "retries exhausted").await.unwrap();
        let loaded = oms.order(&order.order_id).await.unwrap();
        assert_eq!(loaded.state, OrderState::Failed);
    }

    #[tokio::test]
    async fn test_observers_receive_events() {
        let (oms, _clock) = make_oms().await;
        let mut rx = oms.subscribe();

        let order = oms.submit(buy_request(dec!(100), dec!(0.50))).await.unwrap();
        oms.apply_ack(&order.order_id, "ext-1").await.unwrap();

        match rx.recv().await.unwrap() {
            OmsEvent::Submitted { order_id, .. } => assert_eq!(order_id, order.order_id),
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.recv().await.unwrap() {
            OmsEvent::Acked { external_id, .. } => assert_eq!(external_id, "ext-1"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_commission_conversion_from_base() {
        let (oms, _clock) = make_oms().await;
        let order = oms.submit(buy_request(dec!(100), dec!(0.50))).await.unwrap();
        oms.apply_ack(&order.order_id, "ext-1").await.unwrap();

        let mut fill = fill_for(&order, "f-1", dec!(100), dec!(0.50));
        fill.commission = dec!(2); // 2 ADA at 0.50 = 1 USDM
        fill.commission_asset = Some("ADA".to_string());
        oms.apply_fill(fill).await.unwrap();

        let position = oms.position("ADAUSDM").await;
        assert_eq!(position.realized_pnl, dec!(-1.00));
    }
}
