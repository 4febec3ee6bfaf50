//! Position accounting.
//!
//! Signed-quantity bookkeeping: buys add, sells subtract. Adding to a
//! same-signed position moves the volume-weighted average entry; reducing
//! realizes P&L against the held average; flipping through flat re-bases
//! the average at the fill price. Commission is charged against realized
//! P&L in quote-asset units.

use crate::domain::{Fill, Position};
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;

/// Apply one fill to a position. `commission_quote` must already be
/// normalized to quote-asset units.
///
/// Returns the realized P&L delta of this fill (commission included).
pub fn apply_fill(position: &mut Position, fill: &Fill, commission_quote: Decimal) -> Decimal {
    let delta = fill.side.sign() * fill.quantity;
    let current = position.quantity;

    let mut realized = Decimal::ZERO;

    if current.is_zero() || current.signum() == delta.signum() {
        // Opening or adding: volume-weighted average entry
        let abs_current = current.abs();
        let new_abs = abs_current + fill.quantity;
        if new_abs > Decimal::ZERO {
            position.avg_entry_price =
                (abs_current * position.avg_entry_price + fill.quantity * fill.price) / new_abs;
        }
        position.quantity = current + delta;
    } else {
        // Reducing: realize against the held average
        let qty_closed = fill.quantity.min(current.abs());
        realized = qty_closed * (fill.price - position.avg_entry_price) * current.signum();

        position.quantity = current + delta;

        if position.quantity.signum() == delta.signum() && !position.quantity.is_zero() {
            // Flipped through flat: the residual side starts at the fill price
            position.avg_entry_price = fill.price;
        }
        // A plain reduction (or exact flat) keeps the average
    }

    realized -= commission_quote;
    position.realized_pnl += realized;
    position.last_update = fill.executed_at;

    realized
}
