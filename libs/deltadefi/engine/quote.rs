//! Layered quote derivation from a reference top-of-book.
//!
//! Pure transformation of (ticker, inventory skew, config) into a two-sided
//! ladder. Requote gating, spread/size skew, tick/step rounding and the
//! don't-cross guard all live here; persistence and order placement do not.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;
use uuid::Uuid;

use crate::config::{QuoteConfig, SkewConfig};
use crate::domain::{
    ceil_to_tick, floor_to_step, floor_to_tick, BookTicker, Quote, QuoteLayer, QuoteStatus,
    TickerError,
};

/// Size multiplier clamp bounds. The floor prevents a strong skew from
/// flipping the multiplier sign and emitting negative sizes.
const MULT_MIN: Decimal = dec!(0.1);
const MULT_MAX: Decimal = dec!(2.0);

const BPS: Decimal = dec!(10000);

/// Stateful quote calculator for one (source, destination) instrument pair.
///
/// Holds the last-emitted snapshot needed for requote gating; everything
/// else is a pure function of the inputs.
pub struct QuoteEngine {
    symbol_src: String,
    symbol_dst: String,
    quote: QuoteConfig,
    skew: SkewConfig,
    last_quote_ts: Option<f64>,
    last_bid_px: Option<Decimal>,
    last_ask_px: Option<Decimal>,
}

impl QuoteEngine {
    pub fn new(
        symbol_src: impl Into<String>,
        symbol_dst: impl Into<String>,
        quote: QuoteConfig,
        skew: SkewConfig,
    ) -> Self {
        Self {
            symbol_src: symbol_src.into(),
            symbol_dst: symbol_dst.into(),
            quote,
            skew,
            last_quote_ts: None,
            last_bid_px: None,
            last_ask_px: None,
        }
    }

    /// Derive the next quote, or `None` when the engine declines to requote.
    ///
    /// Returns `Err` only for a structurally invalid ticker; staleness and
    /// gating are silent skips.
    pub fn next_quote(
        &mut self,
        ticker: &BookTicker,
        gamma: Decimal,
        now: f64,
    ) -> Result<Option<Quote>, TickerError> {
        ticker.validate()?;

        if ticker.is_stale(now, self.quote.stale_ms) {
            debug!(
                "[QuoteEngine] Stale ticker ({}s old), skipping",
                now - ticker.ts
            );
            return Ok(None);
        }

        // Requote gating: minimum interval, then minimum reference move
        if let Some(last_ts) = self.last_quote_ts {
            if (now - last_ts) * 1000.0 < self.quote.min_requote_ms as f64 {
                return Ok(None);
            }
        }

        if let (Some(last_bid), Some(last_ask)) = (self.last_bid_px, self.last_ask_px) {
            let threshold = self.quote.requote_tick_threshold;
            let bid_moved = (ticker.bid_px - last_bid).abs() >= threshold;
            let ask_moved = (ticker.ask_px - last_ask).abs() >= threshold;
            if !bid_moved && !ask_moved {
                return Ok(None);
            }
        }

        let mid = ticker.mid();

        // Half-spreads in bps, shifted by the skew and clamped
        let lambda_g = self.skew.lambda_bps * gamma;
        let s_bid = (self.quote.base_spread_bps - lambda_g)
            .clamp(self.quote.min_spread_bps, self.quote.max_spread_bps)
            .max(self.quote.min_edge_bps);
        let s_ask = (self.quote.base_spread_bps + lambda_g)
            .clamp(self.quote.min_spread_bps, self.quote.max_spread_bps)
            .max(self.quote.min_edge_bps);

        // Size multipliers: overweight side shrinks, underweight side grows
        let mu_g = self.skew.mu * gamma;
        let m_bid = (Decimal::ONE + mu_g).clamp(MULT_MIN, MULT_MAX);
        let m_ask = (Decimal::ONE - mu_g).clamp(MULT_MIN, MULT_MAX);

        let mut bid_layers = if self.quote.bid_enabled {
            self.build_side(mid, s_bid, m_bid, LadderSide::Bid)
        } else {
            Vec::new()
        };
        let mut ask_layers = if self.quote.ask_enabled {
            self.build_side(mid, s_ask, m_ask, LadderSide::Ask)
        } else {
            Vec::new()
        };

        // Don't-cross guard: a numerical edge can fold the sides into each
        // other; widen both symmetrically around the mid until separated
        if let (Some(best_bid), Some(best_ask)) = (
            bid_layers.iter().map(|l| l.price).max(),
            ask_layers.iter().map(|l| l.price).min(),
        ) {
            if best_bid >= best_ask {
                let adjust = (best_bid - best_ask) / Decimal::TWO + self.quote.tick_size;
                debug!(
                    "[QuoteEngine] Crossed ladder (bid {} >= ask {}), widening by {}",
                    best_bid, best_ask, adjust
                );
                for layer in &mut bid_layers {
                    layer.price = floor_to_tick(layer.price - adjust, self.quote.tick_size);
                }
                for layer in &mut ask_layers {
                    layer.price = ceil_to_tick(layer.price + adjust, self.quote.tick_size);
                }
                bid_layers.retain(|l| l.price > Decimal::ZERO);
            }
        }

        if bid_layers.is_empty() && ask_layers.is_empty() {
            debug!("[QuoteEngine] No viable layers, skipping quote");
            return Ok(None);
        }

        self.last_quote_ts = Some(now);
        self.last_bid_px = Some(ticker.bid_px);
        self.last_ask_px = Some(ticker.ask_px);

        Ok(Some(Quote {
            quote_id: Uuid::new_v4().to_string(),
            ts: now,
            symbol_src: self.symbol_src.clone(),
            symbol_dst: self.symbol_dst.clone(),
            src_bid_px: ticker.bid_px,
            src_bid_qty: ticker.bid_qty,
            src_ask_px: ticker.ask_px,
            src_ask_qty: ticker.ask_qty,
            bid_layers,
            ask_layers,
            status: QuoteStatus::Generated,
            spread_bps: s_bid + s_ask,
            expires_at: now + self.quote.quote_ttl_ms as f64 / 1000.0,
        }))
    }

    /// Build one side of the ladder. Layers that round to a non-positive
    /// price or size are dropped, not errors.
    fn build_side(
        &self,
        mid: Decimal,
        half_spread_bps: Decimal,
        size_mult: Decimal,
        side: LadderSide,
    ) -> Vec<QuoteLayer> {
        let num_layers = self.quote.num_layers;
        let mut layers = Vec::with_capacity(num_layers);

        let layer_base = self.quote.total_liquidity / Decimal::from(num_layers as u64);

        for i in 0..num_layers {
            let idx = Decimal::from(i as u64);
            let step_bps = idx * self.quote.tick_spread_bps;
            let offset = (half_spread_bps + step_bps) / BPS;

            let price = match side {
                LadderSide::Bid => {
                    floor_to_tick(mid * (Decimal::ONE - offset), self.quote.tick_size)
                }
                LadderSide::Ask => {
                    ceil_to_tick(mid * (Decimal::ONE + offset), self.quote.tick_size)
                }
            };

            if price <= Decimal::ZERO {
                continue;
            }

            // Notional grows with depth per the liquidity multiplier
            let notional =
                layer_base * (Decimal::ONE + idx * self.quote.layer_liquidity_multiplier);
            let size = floor_to_step(notional * size_mult / price, self.quote.step_size);

            if size <= Decimal::ZERO {
                continue;
            }

            layers.push(QuoteLayer { price, size });
        }

        layers
    }
}

#[derive(Clone, Copy)]
enum LadderSide {
    Bid,
    Ask,
}
