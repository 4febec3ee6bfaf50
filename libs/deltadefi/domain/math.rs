//! Explicit decimal rounding helpers.
//!
//! All price/quantity rounding in the engine goes through these three
//! functions so the rounding direction is always visible at the call site.

use rust_decimal::Decimal;

/// Round a price down to the nearest tick
pub fn floor_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    if tick.is_zero() {
        return price;
    }
    (price / tick).floor() * tick
}

/// Round a price up to the nearest tick
pub fn ceil_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    if tick.is_zero() {
        return price;
    }
    (price / tick).ceil() * tick
}

/// Round a quantity down to the nearest step
pub fn floor_to_step(qty: Decimal, step: Decimal) -> Decimal {
    if step.is_zero() {
        return qty;
    }
    (qty / step).floor() * step
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_floor_to_tick() {
        assert_eq!(floor_to_tick(dec!(0.49985), dec!(0.0001)), dec!(0.4998));
        assert_eq!(floor_to_tick(dec!(0.4998), dec!(0.0001)), dec!(0.4998));
        assert_eq!(floor_to_tick(dec!(0.49989), dec!(0.0001)), dec!(0.4998));
    }

    #[test]
    fn test_ceil_to_tick() {
        assert_eq!(ceil_to_tick(dec!(0.50015), dec!(0.0001)), dec!(0.5002));
        assert_eq!(ceil_to_tick(dec!(0.5002), dec!(0.0001)), dec!(0.5002));
        assert_eq!(ceil_to_tick(dec!(0.50011), dec!(0.0001)), dec!(0.5002));
    }

    #[test]
    fn test_floor_to_step() {
        assert_eq!(floor_to_step(dec!(1000.4), dec!(1)), dec!(1000));
        assert_eq!(floor_to_step(dec!(226.77), dec!(1)), dec!(226));
        assert_eq!(floor_to_step(dec!(0.9), dec!(1)), dec!(0));
    }

    #[test]
    fn test_zero_tick_passthrough() {
        assert_eq!(floor_to_tick(dec!(1.2345), Decimal::ZERO), dec!(1.2345));
        assert_eq!(floor_to_step(dec!(1.2345), Decimal::ZERO), dec!(1.2345));
    }
}
