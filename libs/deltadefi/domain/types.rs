//! Core domain types shared across the engine.
//!
//! All monetary and quantity fields are `rust_decimal::Decimal`; binary
//! floating point is only used for timestamps (seconds since epoch).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Sides and order kinds
// =============================================================================

/// Side of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "buy" | "bid" => Some(Side::Buy),
            "sell" | "ask" => Some(Side::Sell),
            _ => None,
        }
    }

    /// Signed unit for position deltas: +1 for buys, -1 for sells
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => -Decimal::ONE,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "limit",
            OrderType::Market => "market",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "limit" => Some(OrderType::Limit),
            "market" => Some(OrderType::Market),
            _ => None,
        }
    }
}

// =============================================================================
// Book ticker (reference top-of-book)
// =============================================================================

/// Validation error for an incoming ticker
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TickerError {
    #[error("non-positive price: bid={bid} ask={ask}")]
    NonPositivePrice { bid: Decimal, ask: Decimal },

    #[error("crossed book: bid={bid} >= ask={ask}")]
    CrossedBook { bid: Decimal, ask: Decimal },
}

/// Best bid/offer snapshot from the source venue. Ephemeral - the engine
/// only ever looks at the most recent one.
#[derive(Debug, Clone, PartialEq)]
pub struct BookTicker {
    pub symbol: String,
    pub bid_px: Decimal,
    pub bid_qty: Decimal,
    pub ask_px: Decimal,
    pub ask_qty: Decimal,
    /// Receive time, seconds since epoch
    pub ts: f64,
}

impl BookTicker {
    /// Check structural invariants: positive prices, uncrossed book
    pub fn validate(&self) -> Result<(), TickerError> {
        if self.bid_px <= Decimal::ZERO || self.ask_px <= Decimal::ZERO {
            return Err(TickerError::NonPositivePrice {
                bid: self.bid_px,
                ask: self.ask_px,
            });
        }
        if self.bid_px >= self.ask_px {
            return Err(TickerError::CrossedBook {
                bid: self.bid_px,
                ask: self.ask_px,
            });
        }
        Ok(())
    }

    pub fn mid(&self) -> Decimal {
        (self.bid_px + self.ask_px) / Decimal::TWO
    }

    /// A ticker older than `stale_ms` must not be quoted against
    pub fn is_stale(&self, now: f64, stale_ms: u64) -> bool {
        (now - self.ts) * 1000.0 > stale_ms as f64
    }
}

// =============================================================================
// Quotes
// =============================================================================

/// Lifecycle of a persisted quote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStatus {
    Generated,
    Persisted,
    OrdersCreated,
    OrdersSubmitted,
    Expired,
    Cancelled,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteStatus::Generated => "generated",
            QuoteStatus::Persisted => "persisted",
            QuoteStatus::OrdersCreated => "orders_created",
            QuoteStatus::OrdersSubmitted => "orders_submitted",
            QuoteStatus::Expired => "expired",
            QuoteStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "generated" => Some(QuoteStatus::Generated),
            "persisted" => Some(QuoteStatus::Persisted),
            "orders_created" => Some(QuoteStatus::OrdersCreated),
            "orders_submitted" => Some(QuoteStatus::OrdersSubmitted),
            "expired" => Some(QuoteStatus::Expired),
            "cancelled" => Some(QuoteStatus::Cancelled),
            _ => None,
        }
    }
}

/// One (price, size) rung of a quote ladder
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuoteLayer {
    pub price: Decimal,
    pub size: Decimal,
}

/// A layered two-sided quote derived from one reference ticker
#[derive(Debug, Clone)]
pub struct Quote {
    pub quote_id: String,
    pub ts: f64,
    pub symbol_src: String,
    pub symbol_dst: String,
    /// Source BBO snapshot the quote was derived from
    pub src_bid_px: Decimal,
    pub src_bid_qty: Decimal,
    pub src_ask_px: Decimal,
    pub src_ask_qty: Decimal,
    pub bid_layers: Vec<QuoteLayer>,
    pub ask_layers: Vec<QuoteLayer>,
    pub status: QuoteStatus,
    pub spread_bps: Decimal,
    pub expires_at: f64,
}

impl Quote {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bid_layers.iter().map(|l| l.price).max()
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.ask_layers.iter().map(|l| l.price).min()
    }

    pub fn is_expired(&self, now: f64) -> bool {
        now >= self.expires_at
    }
}

// =============================================================================
// Orders
// =============================================================================

/// Order state machine states.
///
/// Allowed transitions:
/// - idle -> {pending, rejected}
/// - pending -> {working, rejected, failed}
/// - working -> {filled, cancelled, rejected}
/// - filled / cancelled / rejected / failed are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderState {
    Idle,
    Pending,
    Working,
    Filled,
    Cancelled,
    Rejected,
    Failed,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Idle => "idle",
            OrderState::Pending => "pending",
            OrderState::Working => "working",
            OrderState::Filled => "filled",
            OrderState::Cancelled => "cancelled",
            OrderState::Rejected => "rejected",
            OrderState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(OrderState::Idle),
            "pending" => Some(OrderState::Pending),
            "working" => Some(OrderState::Working),
            "filled" => Some(OrderState::Filled),
            "cancelled" => Some(OrderState::Cancelled),
            "rejected" => Some(OrderState::Rejected),
            "failed" => Some(OrderState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Cancelled | OrderState::Rejected | OrderState::Failed
        )
    }

    /// Check whether `self -> next` is a legal transition
    pub fn can_transition_to(&self, next: OrderState) -> bool {
        use OrderState::*;
        matches!(
            (self, next),
            (Idle, Pending)
                | (Idle, Rejected)
                | (Pending, Working)
                | (Pending, Rejected)
                | (Pending, Failed)
                | (Working, Filled)
                | (Working, Cancelled)
                | (Working, Rejected)
        )
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A maker order on the destination venue
#[derive(Debug, Clone)]
pub struct Order {
    /// Client-generated unique id; also the outbox aggregate id
    pub order_id: String,
    /// Quote this order was spawned from, if any
    pub quote_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    /// None for market orders
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub filled_qty: Decimal,
    pub avg_fill_px: Decimal,
    pub state: OrderState,
    /// Venue-assigned id, known after the ack
    pub external_order_id: Option<String>,
    /// Set while a cancel is in flight for a working order
    pub cancel_requested: bool,
    pub created_at: f64,
    pub updated_at: f64,
}

impl Order {
    pub fn remaining_qty(&self) -> Decimal {
        self.quantity - self.filled_qty
    }

    /// Open means the order still rests (or will rest) on the venue
    pub fn is_open(&self) -> bool {
        matches!(self.state, OrderState::Pending | OrderState::Working)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

// =============================================================================
// Fills
// =============================================================================

/// An execution against one of our orders
#[derive(Debug, Clone)]
pub struct Fill {
    /// Venue-unique id; the dedup key
    pub fill_id: String,
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub executed_at: f64,
    pub trade_id: Option<String>,
    /// Fee in quote-asset units
    pub commission: Decimal,
    pub commission_asset: Option<String>,
    pub is_maker: bool,
}

impl Fill {
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

// =============================================================================
// Positions and balances
// =============================================================================

/// Net position per symbol, updated only by the reconciler/OMS fill path
#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: String,
    /// Signed: buys positive, sells negative
    pub quantity: Decimal,
    pub avg_entry_price: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub last_update: f64,
}

impl Position {
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            quantity: Decimal::ZERO,
            avg_entry_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            last_update: 0.0,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Mark-to-market against a reference mid; recomputed on demand
    pub fn unrealized_at(&self, mid: Decimal) -> Decimal {
        if self.is_flat() {
            return Decimal::ZERO;
        }
        (mid - self.avg_entry_price) * self.quantity
    }
}

/// Account balance per asset on the destination venue
#[derive(Debug, Clone)]
pub struct Balance {
    pub asset: String,
    pub available: Decimal,
    pub locked: Decimal,
    pub updated_at: f64,
}

impl Balance {
    pub fn total(&self) -> Decimal {
        self.available + self.locked
    }
}

// =============================================================================
// Outbox
// =============================================================================

/// Kind of side effect an outbox event carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxEventType {
    SubmitOrder,
    CancelOrder,
}

impl OutboxEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxEventType::SubmitOrder => "submit_order",
            OutboxEventType::CancelOrder => "cancel_order",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "submit_order" => Some(OutboxEventType::SubmitOrder),
            "cancel_order" => Some(OutboxEventType::CancelOrder),
            _ => None,
        }
    }
}

/// Delivery status of an outbox event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    InFlight,
    Completed,
    Failed,
    DeadLetter,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::InFlight => "in_flight",
            OutboxStatus::Completed => "completed",
            OutboxStatus::Failed => "failed",
            OutboxStatus::DeadLetter => "dead_letter",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OutboxStatus::Pending),
            "in_flight" => Some(OutboxStatus::InFlight),
            "completed" => Some(OutboxStatus::Completed),
            "failed" => Some(OutboxStatus::Failed),
            "dead_letter" => Some(OutboxStatus::DeadLetter),
            _ => None,
        }
    }
}

/// A persisted side effect awaiting delivery to the venue.
///
/// Written in the same transaction as the state change that caused it;
/// the dispatcher is the only component that talks to the venue.
#[derive(Debug, Clone)]
pub struct OutboxEvent {
    pub event_id: String,
    pub event_type: OutboxEventType,
    /// The order this event belongs to; per-aggregate dispatch is FIFO
    pub aggregate_id: String,
    /// JSON-serialized payload
    pub payload: String,
    pub status: OutboxStatus,
    pub retry_count: i64,
    pub next_retry_at: f64,
    pub last_error: Option<String>,
    pub created_at: f64,
}

/// Payload of a `submit_order` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitOrderPayload {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
}

/// Payload of a `cancel_order` event.
///
/// `order_id` is None for the unregistered-order sweep, where the venue
/// reported an order we never created; `external_order_id` is always set
/// in that case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOrderPayload {
    pub order_id: Option<String>,
    pub external_order_id: Option<String>,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ticker(bid: Decimal, ask: Decimal) -> BookTicker {
        BookTicker {
            symbol: "ADAUSDT".to_string(),
            bid_px: bid,
            bid_qty: dec!(100),
            ask_px: ask,
            ask_qty: dec!(100),
            ts: 1_700_000_000.0,
        }
    }

    #[test]
    fn test_ticker_validation() {
        assert!(ticker(dec!(0.4999), dec!(0.5001)).validate().is_ok());
        assert!(matches!(
            ticker(dec!(0), dec!(0.5001)).validate(),
            Err(TickerError::NonPositivePrice { .. })
        ));
        assert!(matches!(
            ticker(dec!(0.5001), dec!(0.4999)).validate(),
            Err(TickerError::CrossedBook { .. })
        ));
        // Equal bid/ask is also crossed
        assert!(ticker(dec!(0.5), dec!(0.5)).validate().is_err());
    }

    #[test]
    fn test_ticker_mid_and_staleness() {
        let t = ticker(dec!(0.4999), dec!(0.5001));
        assert_eq!(t.mid(), dec!(0.5000));
        assert!(!t.is_stale(t.ts + 4.9, 5000));
        assert!(t.is_stale(t.ts + 5.1, 5000));
    }

    #[test]
    fn test_order_state_transitions() {
        use OrderState::*;
        assert!(Idle.can_transition_to(Pending));
        assert!(Idle.can_transition_to(Rejected));
        assert!(Pending.can_transition_to(Working));
        assert!(Pending.can_transition_to(Failed));
        assert!(Working.can_transition_to(Filled));
        assert!(Working.can_transition_to(Cancelled));

        // Terminal states never transition
        for terminal in [Filled, Cancelled, Rejected, Failed] {
            for next in [Idle, Pending, Working, Filled, Cancelled, Rejected, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }

        // No skipping idle -> working
        assert!(!Idle.can_transition_to(Working));
        assert!(!Pending.can_transition_to(Filled));
    }

    #[test]
    fn test_state_string_roundtrip() {
        use OrderState::*;
        for state in [Idle, Pending, Working, Filled, Cancelled, Rejected, Failed] {
            assert_eq!(OrderState::parse(state.as_str()), Some(state));
        }
        assert_eq!(OrderState::parse("bogus"), None);
    }

    #[test]
    fn test_position_unrealized() {
        let mut pos = Position::flat("ADAUSDM");
        pos.quantity = dec!(100);
        pos.avg_entry_price = dec!(0.50);
        assert_eq!(pos.unrealized_at(dec!(0.52)), dec!(2.00));

        pos.quantity = dec!(-100);
        assert_eq!(pos.unrealized_at(dec!(0.52)), dec!(-2.00));

        let flat = Position::flat("ADAUSDM");
        assert_eq!(flat.unrealized_at(dec!(0.52)), Decimal::ZERO);
    }

    #[test]
    fn test_side_sign() {
        assert_eq!(Side::Buy.sign(), Decimal::ONE);
        assert_eq!(Side::Sell.sign(), -Decimal::ONE);
    }

    #[test]
    fn test_quote_best_levels() {
        let quote = Quote {
            quote_id: "q1".to_string(),
            ts: 0.0,
            symbol_src: "ADAUSDT".to_string(),
            symbol_dst: "ADAUSDM".to_string(),
            src_bid_px: dec!(0.4999),
            src_bid_qty: dec!(10),
            src_ask_px: dec!(0.5001),
            src_ask_qty: dec!(10),
            bid_layers: vec![
                QuoteLayer { price: dec!(0.4998), size: dec!(1000) },
                QuoteLayer { price: dec!(0.4997), size: dec!(2001) },
            ],
            ask_layers: vec![
                QuoteLayer { price: dec!(0.5002), size: dec!(999) },
                QuoteLayer { price: dec!(0.5003), size: dec!(1998) },
            ],
            status: QuoteStatus::Generated,
            spread_bps: dec!(3),
            expires_at: 2.0,
        };

        assert_eq!(quote.best_bid(), Some(dec!(0.4998)));
        assert_eq!(quote.best_ask(), Some(dec!(0.5002)));
        assert!(quote.best_bid().unwrap() < quote.best_ask().unwrap());
        assert!(quote.is_expired(2.0));
        assert!(!quote.is_expired(1.9));
    }
}
