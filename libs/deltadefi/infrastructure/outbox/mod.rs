//! Outbox dispatcher: at-least-once delivery of order side effects.
//!
//! Workers claim pending events (oldest first, one in flight per order),
//! take a rate-limit token, and push the command to the venue. Transient
//! failures reschedule with exponential backoff and jitter until
//! `max_retries`, then dead-letter; terminal failures finalize immediately.
//! Dispatch results feed straight back into the OMS.

use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::OutboxConfig;
use crate::domain::{
    CancelOrderPayload, OutboxEvent, OutboxEventType, SubmitOrderPayload,
};
use crate::infrastructure::client::deltadefi::{CommandClient, VenueError};
use crate::infrastructure::clock::Clock;
use crate::infrastructure::oms::{Oms, OmsError};
use crate::infrastructure::rate_limiter::RateLimiter;
use crate::infrastructure::store::Store;

/// Consecutive store failures before a worker gives up and surfaces
const MAX_CONSECUTIVE_STORE_FAILURES: u32 = 5;

/// Pulls events off the outbox and drives them to completion
pub struct OutboxDispatcher {
    store: Store,
    oms: Arc<Oms>,
    client: Arc<dyn CommandClient>,
    rate_limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    config: OutboxConfig,
}

impl OutboxDispatcher {
    pub fn new(
        store: Store,
        oms: Arc<Oms>,
        client: Arc<dyn CommandClient>,
        rate_limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
        config: OutboxConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            oms,
            client,
            rate_limiter,
            clock,
            config,
        })
    }

    /// Spawn the worker pool
    pub fn spawn_workers(self: &Arc<Self>, shutdown_flag: Arc<AtomicBool>) -> Vec<JoinHandle<()>> {
        (0..self.config.workers)
            .map(|worker_id| {
                let dispatcher = Arc::clone(self);
                let shutdown = Arc::clone(&shutdown_flag);
                tokio::spawn(async move {
                    dispatcher.run_worker(worker_id, shutdown).await;
                })
            })
            .collect()
    }

    async fn run_worker(&self, worker_id: usize, shutdown_flag: Arc<AtomicBool>) {
        info!("[Outbox] Worker {} started", worker_id);
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut consecutive_failures: u32 = 0;

        while shutdown_flag.load(Ordering::Acquire) {
            match self.dispatch_next().await {
                Ok(true) => {
                    consecutive_failures = 0;
                    // Immediately look for more work
                }
                Ok(false) => {
                    consecutive_failures = 0;
                    sleep(poll_interval).await;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    if consecutive_failures >= MAX_CONSECUTIVE_STORE_FAILURES {
                        error!(
                            "[Outbox] Worker {} halting after {} consecutive store failures: {}",
                            worker_id, consecutive_failures, e
                        );
                        break;
                    }
                    warn!(
                        "[Outbox] Worker {} store failure ({}/{}): {}",
                        worker_id, consecutive_failures, MAX_CONSECUTIVE_STORE_FAILURES, e
                    );
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }

        info!("[Outbox] Worker {} stopped", worker_id);
    }

    /// Claim and dispatch one event. Returns whether anything was processed.
    pub async fn dispatch_next(&self) -> Result<bool, OmsError> {
        let now = self.clock.now();
        let mut events = self.store.claim_pending_events(now, 1).await?;
        let Some(event) = events.pop() else {
            return Ok(false);
        };

        self.dispatch_event(event).await?;
        Ok(true)
    }

    async fn dispatch_event(&self, event: OutboxEvent) -> Result<(), OmsError> {
        // One token per outbound command, acquired after the claim so a
        // starved bucket never holds events hostage in `pending`
        self.rate_limiter.wait(1.0).await;

        debug!(
            "[Outbox] Dispatching {} {} (attempt {})",
            event.event_type.as_str(),
            event.event_id,
            event.retry_count + 1
        );

        match event.event_type {
            OutboxEventType::SubmitOrder => self.dispatch_submit(event).await,
            OutboxEventType::CancelOrder => self.dispatch_cancel(event).await,
        }
    }

    async fn dispatch_submit(&self, event: OutboxEvent) -> Result<(), OmsError> {
        let payload: SubmitOrderPayload = match serde_json::from_str(&event.payload) {
            Ok(p) => p,
            Err(e) => {
                error!("[Outbox] Corrupt submit payload {}: {}", event.event_id, e);
                self.store
                    .mark_event_failed(&event.event_id, &format!("corrupt payload: {}", e))
                    .await?;
                return Ok(());
            }
        };

        match self.client.submit_order(&payload).await {
            Ok(external_id) => {
                self.store.mark_event_completed(&event.event_id).await?;
                self.oms.apply_ack(&payload.order_id, &external_id).await?;
                debug!(
                    "[Outbox] Submit {} completed (venue id {})",
                    payload.order_id, external_id
                );
                Ok(())
            }
            Err(venue_error) => {
                self.handle_venue_error(&event, venue_error, Some(payload.order_id.as_str()), true)
                    .await
            }
        }
    }

    async fn dispatch_cancel(&self, event: OutboxEvent) -> Result<(), OmsError> {
        let mut payload: CancelOrderPayload = match serde_json::from_str(&event.payload) {
            Ok(p) => p,
            Err(e) => {
                error!("[Outbox] Corrupt cancel payload {}: {}", event.event_id, e);
                self.store
                    .mark_event_failed(&event.event_id, &format!("corrupt payload: {}", e))
                    .await?;
                return Ok(());
            }
        };

        // The venue id may have arrived after the event was enqueued
        if payload.external_order_id.is_none() {
            if let Some(order_id) = &payload.order_id {
                if let Some(order) = self.oms.order(order_id).await {
                    payload.external_order_id = order.external_order_id;
                }
            }
        }

        match self.client.cancel_order(&payload).await {
            Ok(()) => {
                self.store.mark_event_completed(&event.event_id).await?;
                if let Some(order_id) = &payload.order_id {
                    self.oms
                        .apply_external_cancel(order_id, "cancel confirmed by venue")
                        .await?;
                }
                Ok(())
            }
            Err(venue_error) => {
                self.handle_venue_error(&event, venue_error, payload.order_id.as_deref(), false)
                    .await
            }
        }
    }

    async fn handle_venue_error(
        &self,
        event: &OutboxEvent,
        venue_error: VenueError,
        order_id: Option<&str>,
        is_submit: bool,
    ) -> Result<(), OmsError> {
        match venue_error {
            VenueError::Terminal(msg) => {
                warn!(
                    "[Outbox] Terminal failure for {} {}: {}",
                    event.event_type.as_str(),
                    event.event_id,
                    msg
                );
                self.store.mark_event_failed(&event.event_id, &msg).await?;
                if is_submit {
                    if let Some(order_id) = order_id {
                        self.oms.apply_reject(order_id, &msg).await?;
                    }
                }
                Ok(())
            }
            VenueError::Transient(msg) => {
                let retry_count = event.retry_count + 1;
                if retry_count >= self.config.max_retries {
                    error!(
                        "[Outbox] Dead-lettering {} after {} attempts: {}",
                        event.event_id, retry_count, msg
                    );
                    self.store
                        .mark_event_dead_letter(&event.event_id, &msg)
                        .await?;
                    if is_submit {
                        if let Some(order_id) = order_id {
                            self.oms
                                .apply_dispatch_failure(order_id, "delivery retries exhausted")
                                .await?;
                        }
                    }
                    return Ok(());
                }

                let delay = self.backoff_secs(retry_count);
                let next_retry_at = self.clock.now() + delay;
                debug!(
                    "[Outbox] Rescheduling {} in {:.2}s (attempt {}): {}",
                    event.event_id, delay, retry_count, msg
                );
                self.store
                    .reschedule_event(&event.event_id, retry_count, next_retry_at, &msg)
                    .await?;
                Ok(())
            }
        }
    }

    /// `min(cap, base * 2^n)` seconds with ±10% jitter
    fn backoff_secs(&self, retry_count: i64) -> f64 {
        let base = self.config.backoff_base_ms as f64 / 1000.0;
        let cap = self.config.backoff_cap_ms as f64 / 1000.0;
        let exp = retry_count.clamp(0, 30) as u32;
        let raw = (base * 2f64.powi(exp as i32)).min(cap);
        let jitter = rand::thread_rng().gen_range(0.9..=1.1);
        raw * jitter
    }
}
