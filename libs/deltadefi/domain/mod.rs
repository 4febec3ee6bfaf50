//! Exchange-agnostic domain model.

pub mod math;
pub mod types;

pub use math::{ceil_to_tick, floor_to_step, floor_to_tick};
pub use types::{
    Balance, BookTicker, CancelOrderPayload, Fill, Order, OrderState, OrderType, OutboxEvent,
    OutboxEventType, OutboxStatus, Position, Quote, QuoteLayer, QuoteStatus, Side,
    SubmitOrderPayload, TickerError,
};
