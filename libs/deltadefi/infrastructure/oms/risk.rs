//! Pre-trade risk checks.
//!
//! Every check runs on every submission; all violated checks are reported
//! together so the caller sees the complete picture, not just the first
//! failure. A rejection changes no state.

use crate::config::RiskConfig;
use parking_lot::Mutex;
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Seconds in the daily-loss accounting window
const DAILY_WINDOW_SECS: f64 = 24.0 * 3600.0;

/// A single violated pre-trade check
#[derive(Debug, Clone, PartialEq)]
pub enum RiskViolation {
    EmergencyStop,
    BelowMinSize {
        qty: Decimal,
        min: Decimal,
    },
    PositionLimit {
        projected: Decimal,
        limit: Decimal,
    },
    SkewLimit {
        projected: Decimal,
        limit: Decimal,
    },
    DailyLossLimit {
        realized_today: Decimal,
        limit: Decimal,
    },
    OpenOrderLimit {
        count: usize,
        limit: usize,
    },
}

impl std::fmt::Display for RiskViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskViolation::EmergencyStop => write!(f, "emergency stop is set"),
            RiskViolation::BelowMinSize { qty, min } => {
                write!(f, "quantity {} below minimum {}", qty, min)
            }
            RiskViolation::PositionLimit { projected, limit } => {
                write!(f, "projected position {} exceeds limit {}", projected, limit)
            }
            RiskViolation::SkewLimit { projected, limit } => {
                write!(f, "projected exposure {} exceeds skew limit {}", projected, limit)
            }
            RiskViolation::DailyLossLimit { realized_today, limit } => {
                write!(f, "daily loss {} breaches limit {}", realized_today, limit)
            }
            RiskViolation::OpenOrderLimit { count, limit } => {
                write!(f, "open order count {} exceeds limit {}", count, limit)
            }
        }
    }
}

/// What the risk engine needs to know about an order before it exists
#[derive(Debug, Clone)]
pub struct OrderIntent {
    /// Signed quantity: positive for buys, negative for sells
    pub signed_qty: Decimal,
    pub qty: Decimal,
}

#[derive(Debug)]
struct DailyLoss {
    realized_today: Decimal,
    window_started_at: f64,
}

/// Pre-trade risk engine. The emergency-stop flag is the one runtime-mutable
/// piece of configuration and lives in an atomic consulted on every check.
pub struct RiskEngine {
    config: RiskConfig,
    emergency_stop: Arc<AtomicBool>,
    daily: Mutex<DailyLoss>,
}

impl RiskEngine {
    pub fn new(config: RiskConfig, now: f64) -> Self {
        let emergency_stop = Arc::new(AtomicBool::new(config.emergency_stop));
        Self {
            config,
            emergency_stop,
            daily: Mutex::new(DailyLoss {
                realized_today: Decimal::ZERO,
                window_started_at: now,
            }),
        }
    }

    /// Shareable handle to the emergency-stop flag
    pub fn emergency_stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.emergency_stop)
    }

    pub fn set_emergency_stop(&self, on: bool) {
        if on {
            warn!("[Risk] EMERGENCY STOP engaged - new submissions halted");
        }
        self.emergency_stop.store(on, Ordering::Release);
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.emergency_stop.load(Ordering::Acquire)
    }

    /// Run all checks for a prospective order.
    ///
    /// `position_qty` is the current signed position, `open_same_side_qty`
    /// the summed remaining quantity of resting orders on the intent's side,
    /// `open_orders` the count of non-terminal orders.
    pub fn check(
        &self,
        intent: &OrderIntent,
        position_qty: Decimal,
        open_same_side_qty: Decimal,
        open_orders: usize,
        now: f64,
    ) -> Vec<RiskViolation> {
        let mut violations = Vec::new();

        if self.is_emergency_stopped() {
            violations.push(RiskViolation::EmergencyStop);
        }

        if intent.qty < self.config.min_quote_size {
            violations.push(RiskViolation::BelowMinSize {
                qty: intent.qty,
                min: self.config.min_quote_size,
            });
        }

        // Position limit on the post-fill position
        let projected = position_qty + intent.signed_qty;
        if projected.abs() > self.config.max_position_size {
            violations.push(RiskViolation::PositionLimit {
                projected,
                limit: self.config.max_position_size,
            });
        }

        // Skew limit also counts same-side resting orders: the worst case
        // where everything on this side fills
        let direction = intent.signed_qty.signum();
        let exposure = position_qty + intent.signed_qty + direction * open_same_side_qty;
        if exposure.abs() > self.config.max_skew {
            violations.push(RiskViolation::SkewLimit {
                projected: exposure,
                limit: self.config.max_skew,
            });
        }

        let realized_today = self.realized_today(now);
        if realized_today <= -self.config.max_daily_loss {
            violations.push(RiskViolation::DailyLossLimit {
                realized_today,
                limit: self.config.max_daily_loss,
            });
        }

        if open_orders + 1 > self.config.max_open_orders {
            violations.push(RiskViolation::OpenOrderLimit {
                count: open_orders,
                limit: self.config.max_open_orders,
            });
        }

        violations
    }

    /// Record a realized P&L delta (from a fill) into the daily accumulator
    pub fn record_realized(&self, delta: Decimal, now: f64) {
        let mut daily = self.daily.lock();
        self.roll_window(&mut daily, now);
        daily.realized_today += delta;
    }

    /// Realized P&L inside the current 24h window
    pub fn realized_today(&self, now: f64) -> Decimal {
        let mut daily = self.daily.lock();
        self.roll_window(&mut daily, now);
        daily.realized_today
    }

    fn roll_window(&self, daily: &mut DailyLoss, now: f64) {
        // The accumulator resets 24h after its last reset, not at midnight
        if now - daily.window_started_at >= DAILY_WINDOW_SECS {
            daily.realized_today = Decimal::ZERO;
            daily.window_started_at = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn engine() -> RiskEngine {
        RiskEngine::new(
            RiskConfig {
                max_position_size: dec!(1000),
                max_daily_loss: dec!(100),
                max_open_orders: 3,
                max_skew: dec!(1500),
                min_quote_size: dec!(5),
                emergency_stop: false,
            },
            0.0,
        )
    }

    fn buy(qty: Decimal) -> OrderIntent {
        OrderIntent {
            signed_qty: qty,
            qty,
        }
    }

    fn sell(qty: Decimal) -> OrderIntent {
        OrderIntent {
            signed_qty: -qty,
            qty,
        }
    }

    #[test]
    fn test_clean_order_passes() {
        let engine = engine();
        let violations = engine.check(&buy(dec!(100)), Decimal::ZERO, Decimal::ZERO, 0, 0.0);
        assert!(violations.is_empty());
    }

    #[test]
    fn test_emergency_stop_rejects() {
        let engine = engine();
        engine.set_emergency_stop(true);
        let violations = engine.check(&buy(dec!(100)), Decimal::ZERO, Decimal::ZERO, 0, 0.0);
        assert!(violations.contains(&RiskViolation::EmergencyStop));

        engine.set_emergency_stop(false);
        let violations = engine.check(&buy(dec!(100)), Decimal::ZERO, Decimal::ZERO, 0, 0.0);
        assert!(violations.is_empty());
    }

    #[test]
    fn test_min_size() {
        let engine = engine();
        let violations = engine.check(&buy(dec!(4)), Decimal::ZERO, Decimal::ZERO, 0, 0.0);
        assert!(matches!(violations[0], RiskViolation::BelowMinSize { .. }));
    }

    #[test]
    fn test_position_limit_uses_projection() {
        let engine = engine();

        // 900 held + 200 more breaches the 1000 cap
        let violations = engine.check(&buy(dec!(200)), dec!(900), Decimal::ZERO, 0, 0.0);
        assert!(violations
            .iter()
            .any(|v| matches!(v, RiskViolation::PositionLimit { .. })));

        // Selling from a long position reduces exposure and passes
        let violations = engine.check(&sell(dec!(200)), dec!(900), Decimal::ZERO, 0, 0.0);
        assert!(violations.is_empty());
    }

    #[test]
    fn test_skew_counts_resting_orders() {
        let engine = engine();

        // 900 position + 100 new + 600 resting same-side = 1600 > 1500
        let violations = engine.check(&buy(dec!(100)), dec!(900), dec!(600), 0, 0.0);
        assert!(violations
            .iter()
            .any(|v| matches!(v, RiskViolation::SkewLimit { .. })));
    }

    #[test]
    fn test_open_order_limit() {
        let engine = engine();
        let violations = engine.check(&buy(dec!(10)), Decimal::ZERO, Decimal::ZERO, 3, 0.0);
        assert!(matches!(
            violations[0],
            RiskViolation::OpenOrderLimit { count: 3, limit: 3 }
        ));
    }

    #[test]
    fn test_daily_loss_blocks_and_window_resets() {
        let engine = engine();
        engine.record_realized(dec!(-150), 1000.0);

        let violations = engine.check(&buy(dec!(10)), Decimal::ZERO, Decimal::ZERO, 0, 1000.0);
        assert!(violations
            .iter()
            .any(|v| matches!(v, RiskViolation::DailyLossLimit { .. })));

        // 24h after the window started the accumulator resets
        let later = 1000.0 + 24.0 * 3600.0;
        assert_eq!(engine.realized_today(later), Decimal::ZERO);
        let violations = engine.check(&buy(dec!(10)), Decimal::ZERO, Decimal::ZERO, 0, later);
        assert!(violations.is_empty());
    }

    #[test]
    fn test_all_violations_reported_together() {
        let engine = engine();
        engine.set_emergency_stop(true);
        engine.record_realized(dec!(-500), 0.0);

        let violations = engine.check(&buy(dec!(1)), dec!(1000), dec!(5000), 10, 0.0);
        // Emergency stop, min size, position, skew, daily loss, open orders
        assert_eq!(violations.len(), 6);
    }
}
