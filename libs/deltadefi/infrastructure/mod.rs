//! Infrastructure: persistence, OMS, outbox, rate limiting, venue clients.

pub mod client;
pub mod clock;
pub mod logging;
pub mod oms;
pub mod outbox;
pub mod rate_limiter;
pub mod reconciler;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use logging::{init_tracing, init_tracing_with_level};
pub use oms::{Oms, OmsError, OmsEvent, OrderRequest, RiskEngine, RiskViolation};
pub use outbox::OutboxDispatcher;
pub use rate_limiter::{RateLimiter, RateLimiterStatus};
pub use reconciler::Reconciler;
pub use store::{Store, StoreError};
