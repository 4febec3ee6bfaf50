//! Quote task: reference ticker in, synchronized maker book out.
//!
//! Runs its own tick loop. Each tick reads the latest shared ticker,
//! derives the desired ladder from the quote engine, persists the quote
//! and converges the venue book by diffing desired layers against open
//! orders: matching orders are left resting, stale ones are cancelled,
//! missing layers are submitted. A stale feed cancels everything rather
//! than leaving orders at prices nobody is watching.

use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{MarketConfig, QuoteConfig, SkewConfig};
use crate::domain::{Order, OrderType, Quote, QuoteLayer, QuoteStatus, Side};
use crate::engine::{inventory_gamma, QuoteEngine};
use crate::infrastructure::client::binance::SharedTicker;
use crate::infrastructure::clock::Clock;
use crate::infrastructure::oms::{Oms, OmsError, OrderRequest};
use crate::infrastructure::store::Store;

/// Tick loop cadence; requote gating lives in the engine
const TICK_INTERVAL_MS: u64 = 50;

pub struct Quoter {
    market: MarketConfig,
    quote_config: QuoteConfig,
    skew_config: SkewConfig,
    engine: QuoteEngine,
    ticker: SharedTicker,
    store: Store,
    oms: Arc<Oms>,
    clock: Arc<dyn Clock>,
    shutdown_flag: Arc<AtomicBool>,
    /// Set after a defensive sweep so a dead feed cancels only once
    swept_on_stale: bool,
}

impl Quoter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        market: MarketConfig,
        quote_config: QuoteConfig,
        skew_config: SkewConfig,
        ticker: SharedTicker,
        store: Store,
        oms: Arc<Oms>,
        clock: Arc<dyn Clock>,
        shutdown_flag: Arc<AtomicBool>,
    ) -> Self {
        let engine = QuoteEngine::new(
            market.symbol_src.clone(),
            market.symbol_dst.clone(),
            quote_config.clone(),
            skew_config.clone(),
        );
        Self {
            market,
            quote_config,
            skew_config,
            engine,
            ticker,
            store,
            oms,
            clock,
            shutdown_flag,
            swept_on_stale: false,
        }
    }

    /// Main run loop - call from a spawned task. Runs until shutdown, then
    /// cancels all resting orders.
    pub async fn run(mut self) {
        info!(
            "[Quoter] Starting {} -> {} with {}ms ticks",
            self.market.symbol_src, self.market.symbol_dst, TICK_INTERVAL_MS
        );

        let tick_duration = Duration::from_millis(TICK_INTERVAL_MS);

        while self.shutdown_flag.load(Ordering::Acquire) {
            let tick_start = self.clock.now();

            self.tick().await;

            let elapsed = self.clock.now() - tick_start;
            let remaining = tick_duration.as_secs_f64() - elapsed;
            if remaining > 0.0 {
                sleep(Duration::from_secs_f64(remaining)).await;
            }
        }

        self.cleanup().await;
        info!("[Quoter] Stopped");
    }

    async fn tick(&mut self) {
        let Some(ticker) = self.ticker.read().clone() else {
            return;
        };
        let now = self.clock.now();

        // A stale reference feed means our prices are fiction: pull them
        if ticker.is_stale(now, self.quote_config.stale_ms) {
            if !self.swept_on_stale {
                warn!("[Quoter] Reference feed stale, cancelling all orders");
                self.cancel_all_open("stale reference feed").await;
                self.swept_on_stale = true;
            }
            return;
        }
        self.swept_on_stale = false;

        let gamma = self.compute_gamma(ticker.mid()).await;

        let quote = match self.engine.next_quote(&ticker, gamma, now) {
            Ok(Some(quote)) => quote,
            Ok(None) => return,
            Err(e) => {
                warn!("[Quoter] Invalid ticker: {}", e);
                return;
            }
        };

        self.apply_quote(quote).await;
    }

    /// Persist the quote and converge open orders towards its layers
    async fn apply_quote(&mut self, mut quote: Quote) {
        quote.status = QuoteStatus::Persisted;
        if let Err(e) = self.store.put_quote(&quote).await {
            error!("[Quoter] Failed to persist quote {}: {}", quote.quote_id, e);
            return;
        }

        let open = self.oms.open_orders(&self.market.symbol_dst).await;
        let (to_cancel, to_place) = diff_orders(
            &open,
            &quote,
            self.quote_config.step_size,
        );

        if to_cancel.is_empty() && to_place.is_empty() {
            debug!("[Quoter] Book already in shape for quote {}", quote.quote_id);
            return;
        }

        for order_id in &to_cancel {
            if let Err(e) = self.oms.cancel(order_id, "requote").await {
                warn!("[Quoter] Failed to cancel {}: {}", order_id, e);
            }
        }

        if !to_place.is_empty() {
            let _ = self
                .store
                .update_quote_status(&quote.quote_id, QuoteStatus::OrdersCreated)
                .await;
        }

        let mut placed = 0usize;
        for (side, layer) in &to_place {
            let request = OrderRequest {
                symbol: self.market.symbol_dst.clone(),
                side: *side,
                order_type: OrderType::Limit,
                quantity: layer.size,
                price: Some(layer.price),
                quote_id: Some(quote.quote_id.clone()),
            };
            match self.oms.submit(request).await {
                Ok(_) => placed += 1,
                Err(OmsError::RiskRejected(_)) => {
                    // Already logged by the OMS; stop adding exposure this tick
                    break;
                }
                Err(e) => {
                    warn!("[Quoter] Submit failed: {}", e);
                }
            }
        }

        debug!(
            "[Quoter] Quote {}: {} cancels, {}/{} placements",
            quote.quote_id,
            to_cancel.len(),
            placed,
            to_place.len()
        );

        if placed > 0 {
            let _ = self
                .store
                .update_quote_status(&quote.quote_id, QuoteStatus::OrdersSubmitted)
                .await;
        }
    }

    /// Inventory skew from reconciler-authoritative balances
    async fn compute_gamma(&self, mid: Decimal) -> Decimal {
        let quote_value = match self.store.get_balance(&self.market.quote_asset).await {
            Ok(Some(balance)) => balance.total(),
            Ok(None) => return Decimal::ZERO,
            Err(e) => {
                warn!("[Quoter] Balance read failed: {}", e);
                return Decimal::ZERO;
            }
        };
        let base_value = match self.store.get_balance(&self.market.base_asset).await {
            Ok(Some(balance)) => balance.total() * mid,
            Ok(None) => return Decimal::ZERO,
            Err(e) => {
                warn!("[Quoter] Balance read failed: {}", e);
                return Decimal::ZERO;
            }
        };

        inventory_gamma(quote_value, base_value, &self.skew_config)
    }

    async fn cancel_all_open(&self, reason: &str) {
        let open = self.oms.open_orders(&self.market.symbol_dst).await;
        for order in open {
            if let Err(e) = self.oms.cancel(&order.order_id, reason).await {
                warn!("[Quoter] Failed to cancel {}: {}", order.order_id, e);
            }
        }
    }

    async fn cleanup(&self) {
        info!("[Quoter] Cleaning up: cancelling resting orders");
        self.cancel_all_open("shutdown").await;

        match self.store.cancel_active_quotes(&self.market.symbol_dst).await {
            Ok(0) => {}
            Ok(n) => debug!("[Quoter] Cancelled {} active quotes", n),
            Err(e) => warn!("[Quoter] Quote cancellation failed: {}", e),
        }
    }
}

/// Compare open orders with a desired quote ladder.
/// Returns (orders_to_cancel, layers_to_place).
///
/// An order matches a layer when side and price agree exactly (both are
/// tick-rounded) and the size is within 1% or one step. Orders already
/// being cancelled are left alone.
fn diff_orders(
    open: &[Order],
    quote: &Quote,
    step_size: Decimal,
) -> (Vec<String>, Vec<(Side, QuoteLayer)>) {
    let mut to_cancel = Vec::new();
    let mut to_place = Vec::new();

    let desired: Vec<(Side, &QuoteLayer)> = quote
        .bid_layers
        .iter()
        .map(|l| (Side::Buy, l))
        .chain(quote.ask_layers.iter().map(|l| (Side::Sell, l)))
        .collect();

    for order in open {
        if order.cancel_requested {
            continue;
        }
        let matched = desired
            .iter()
            .any(|(side, layer)| order_matches(order, *side, layer, step_size));
        if !matched {
            to_cancel.push(order.order_id.clone());
        }
    }

    for (side, layer) in &desired {
        let matched = open
            .iter()
            .any(|o| !o.cancel_requested && order_matches(o, *side, layer, step_size));
        if !matched {
            to_place.push((*side, **layer));
        }
    }

    (to_cancel, to_place)
}

fn order_matches(order: &Order, side: Side, layer: &QuoteLayer, step_size: Decimal) -> bool {
    if order.side != side {
        return false;
    }
    let Some(price) = order.price else {
        return false;
    };
    if price != layer.price {
        return false;
    }

    let tolerance = (layer.size * Decimal::new(1, 2)).max(step_size);
    (order.quantity - layer.size).abs() <= tolerance
}
