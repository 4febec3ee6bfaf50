//! Inventory skew: normalized imbalance between quote and base holdings.

use crate::config::SkewConfig;
use rust_decimal::Decimal;

/// Compute the skew factor γ from current asset values.
///
/// `raw = (V_quote - r·V_base) / (V_quote + r·V_base)` where `r` is the
/// target quote/base value ratio. Positive γ means quote-asset heavy, so
/// the engine tightens bids and fattens bid sizes to buy base.
///
/// Imbalances inside `ratio_tolerance` are treated as balanced (γ = 0);
/// the result is clamped to ±γ_max.
pub fn inventory_gamma(quote_value: Decimal, base_value: Decimal, config: &SkewConfig) -> Decimal {
    let weighted_base = base_value * config.target_asset_ratio;
    let denom = quote_value + weighted_base;
    if denom <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let raw = (quote_value - weighted_base) / denom;

    if raw.abs() <= config.ratio_tolerance {
        return Decimal::ZERO;
    }

    raw.clamp(-config.gamma_max, config.gamma_max)
}
