//! Supervisor: wires the components at startup, runs the periodic
//! housekeeping, and orchestrates graceful shutdown.
//!
//! Shutdown sequence: the trading flag drops first (quoter exits and
//! cancels its resting orders through the outbox), then the outbox is
//! flushed for a bounded time so those cancels actually reach the venue,
//! and only then do the dispatcher workers and streams stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::application::quoter::Quoter;
use crate::config::BotConfig;
use crate::infrastructure::client::binance::{spawn_ticker_stream, SharedTicker};
use crate::infrastructure::client::deltadefi::{
    spawn_account_stream, DeltaDefiRestClient, LocalKeySigner,
};
use crate::infrastructure::clock::{Clock, SystemClock};
use crate::infrastructure::oms::{Oms, RiskEngine};
use crate::infrastructure::outbox::OutboxDispatcher;
use crate::infrastructure::rate_limiter::RateLimiter;
use crate::infrastructure::reconciler::Reconciler;
use crate::infrastructure::store::Store;
use crate::utils::ShutdownManager;

/// Account event channel depth
const ACCOUNT_CHANNEL_CAPACITY: usize = 1024;

/// Status report cadence
const STATUS_INTERVAL_SECS: u64 = 30;

/// Housekeeping cadence (quote expiry)
const CLEANUP_INTERVAL_SECS: u64 = 1;

/// How long shutdown waits for the outbox to drain
const OUTBOX_FLUSH_TIMEOUT_SECS: u64 = 10;

pub struct Supervisor {
    config: BotConfig,
}

impl Supervisor {
    pub fn new(config: BotConfig) -> Self {
        Self { config }
    }

    /// Run the engine until Ctrl+C
    pub async fn run(self) -> anyhow::Result<()> {
        let config = self.config;
        let shutdown = ShutdownManager::new();
        shutdown.spawn_signal_handler();

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        // Durable state
        let store = Store::open(&config.database.path).await?;

        // OMS with pre-trade risk
        let risk = RiskEngine::new(config.risk.clone(), clock.now());
        let oms = Arc::new(Oms::new(
            store.clone(),
            Arc::clone(&clock),
            risk,
            config.market.base_asset.clone(),
        ));
        oms.load_from_store(&config.market.symbol_dst).await?;

        // Outbound command path: rate limiter -> REST client -> venue
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit.burst_capacity,
            config.rate_limit.max_orders_per_second,
            Arc::clone(&clock),
        ));
        let signer = Arc::new(LocalKeySigner::new(config.signing_key.clone()));
        let command_client = Arc::new(DeltaDefiRestClient::new(
            config.venue.rest_url.clone(),
            config.api_key.clone(),
            signer,
            &config.timeouts,
        )?);

        // The outbox outlives the trading flag so shutdown cancels drain
        let outbox_flag = Arc::new(AtomicBool::new(true));
        let dispatcher = OutboxDispatcher::new(
            store.clone(),
            Arc::clone(&oms),
            command_client,
            Arc::clone(&rate_limiter),
            Arc::clone(&clock),
            config.outbox.clone(),
        );
        let worker_handles = dispatcher.spawn_workers(Arc::clone(&outbox_flag));

        // Inbound: account stream -> reconciler
        let (account_tx, account_rx) = mpsc::channel(ACCOUNT_CHANNEL_CAPACITY);
        let account_handle = spawn_account_stream(
            config.venue.clone(),
            config.timeouts.clone(),
            config.api_key.clone(),
            account_tx,
            shutdown.flag(),
        )
        .await?;
        let reconciler = Reconciler::new(store.clone(), Arc::clone(&oms), Arc::clone(&clock));
        let reconciler_handle = reconciler.spawn(account_rx, shutdown.flag());

        // Inbound: reference ticker -> quoter
        let (ticker, ticker_handle) = spawn_ticker_stream(
            config.source.clone(),
            config.market.symbol_src.clone(),
            Arc::clone(&clock),
            shutdown.flag(),
        )
        .await?;

        let quoter = Quoter::new(
            config.market.clone(),
            config.quote.clone(),
            config.skew.clone(),
            Arc::clone(&ticker),
            store.clone(),
            Arc::clone(&oms),
            Arc::clone(&clock),
            shutdown.flag(),
        );
        let quoter_handle = tokio::spawn(quoter.run());

        // Periodic reporting and housekeeping
        let status_handle = spawn_status_task(
            Arc::clone(&oms),
            store.clone(),
            Arc::clone(&rate_limiter),
            Arc::clone(&ticker),
            config.market.symbol_dst.clone(),
            shutdown.flag(),
        );
        let cleanup_handle = spawn_cleanup_task(
            store.clone(),
            Arc::clone(&clock),
            config.database.checkpoint_interval_secs,
            shutdown.flag(),
        );

        info!("Engine running: {} -> {}", config.market.symbol_src, config.market.symbol_dst);

        while shutdown.is_running() {
            sleep(Duration::from_millis(200)).await;
        }

        // ---- Graceful shutdown ----
        info!("Shutting down: waiting for quoter to pull its orders");
        let _ = quoter_handle.await;

        flush_outbox(&store, OUTBOX_FLUSH_TIMEOUT_SECS).await;

        outbox_flag.store(false, Ordering::Release);
        for handle in worker_handles {
            let _ = handle.await;
        }

        let _ = ticker_handle.await;
        let _ = account_handle.await;
        let _ = reconciler_handle.await;
        let _ = status_handle.await;
        let _ = cleanup_handle.await;

        if let Err(e) = store.wal_checkpoint().await {
            warn!("Final WAL checkpoint failed: {}", e);
        }
        store.close().await;

        info!("Engine stopped");
        Ok(())
    }
}

/// Wait until the outbox drains or the timeout passes
async fn flush_outbox(store: &Store, timeout_secs: u64) {
    let deadline = std::time::Instant::now() + Duration::from_secs(timeout_secs);

    loop {
        match store.outbox_depth().await {
            Ok((0, 0)) => {
                info!("Outbox flushed");
                return;
            }
            Ok((pending, in_flight)) => {
                if std::time::Instant::now() >= deadline {
                    warn!(
                        "Outbox flush timed out with {} pending, {} in flight",
                        pending, in_flight
                    );
                    return;
                }
                debug!("Flushing outbox: {} pending, {} in flight", pending, in_flight);
            }
            Err(e) => {
                warn!("Outbox depth check failed during flush: {}", e);
                return;
            }
        }
        sleep(Duration::from_millis(100)).await;
    }
}

/// Periodic one-line health/status report
fn spawn_status_task(
    oms: Arc<Oms>,
    store: Store,
    rate_limiter: Arc<RateLimiter>,
    ticker: SharedTicker,
    symbol_dst: String,
    shutdown_flag: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs(STATUS_INTERVAL_SECS);

        while shutdown_flag.load(Ordering::Acquire) {
            sleep(interval).await;
            if !shutdown_flag.load(Ordering::Acquire) {
                break;
            }

            let position = oms.position(&symbol_dst).await;
            let open_orders = oms.open_order_count().await;
            let limiter = rate_limiter.status();
            let outbox = store.outbox_depth().await.unwrap_or((0, 0));
            let mid = ticker.read().as_ref().map(|t| t.mid());

            let unrealized = mid
                .map(|m| position.unrealized_at(m).to_string())
                .unwrap_or_else(|| "n/a".to_string());

            info!(
                "[Status] pos={} @ {} | realized={} unrealized={} | open_orders={} | outbox={}p/{}f | limiter={:.0}%",
                position.quantity,
                position.avg_entry_price,
                position.realized_pnl,
                unrealized,
                open_orders,
                outbox.0,
                outbox.1,
                limiter.utilization * 100.0,
            );
        }

        debug!("[Status] Task stopped");
    })
}

/// Periodic housekeeping: quote expiry and WAL checkpoints
fn spawn_cleanup_task(
    store: Store,
    clock: Arc<dyn Clock>,
    checkpoint_interval_secs: u64,
    shutdown_flag: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs(CLEANUP_INTERVAL_SECS);
        let mut last_checkpoint = clock.now();

        while shutdown_flag.load(Ordering::Acquire) {
            sleep(interval).await;
            let now = clock.now();

            match store.expire_stale_quotes(now).await {
                Ok(0) => {}
                Ok(n) => debug!("[Cleanup] Expired {} stale quotes", n),
                Err(e) => warn!("[Cleanup] Quote expiry failed: {}", e),
            }

            if now - last_checkpoint >= checkpoint_interval_secs as f64 {
                if let Err(e) = store.wal_checkpoint().await {
                    warn!("[Cleanup] WAL checkpoint failed: {}", e);
                }
                last_checkpoint = now;
            }
        }

        debug!("[Cleanup] Task stopped");
    })
}
