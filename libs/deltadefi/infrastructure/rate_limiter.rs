//! Token-bucket rate limiter for outbound order traffic.
//!
//! Continuous refill: tokens accrue at `refill_rate` per second up to
//! `capacity`. Every submit or cancel sent to the venue costs one token.
//! Concurrency-safe; acquisitions serialize through a mutex so concurrent
//! callers observe a consistent order.

use crate::infrastructure::clock::Clock;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Upper bound on how long `wait` sleeps between acquisition attempts
const WAIT_GRANULARITY: Duration = Duration::from_millis(100);

/// Snapshot of limiter state
#[derive(Debug, Clone)]
pub struct RateLimiterStatus {
    pub tokens: f64,
    pub capacity: f64,
    pub refill_rate: f64,
    /// Fraction of capacity currently consumed
    pub utilization: f64,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: f64,
}

/// Continuous-refill token bucket
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    capacity: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// Create a full bucket
    pub fn new(capacity: f64, refill_rate: f64, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            clock,
            capacity,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: now,
            }),
        }
    }

    /// Refill based on elapsed time, then deduct `n` tokens if available.
    /// Atomic with respect to other callers.
    pub fn try_acquire(&self, n: f64) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();

        self.refill_locked(&mut state, now);

        if state.tokens >= n {
            state.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Block cooperatively until `n` tokens are available.
    ///
    /// Wake-up granularity is at most 100ms; the sleep is sized to the
    /// expected refill time so callers rarely spin.
    pub async fn wait(&self, n: f64) {
        let n = if n > self.capacity {
            warn!(
                "[RateLimiter] Requested {} tokens exceeds capacity {}, clamping",
                n, self.capacity
            );
            self.capacity
        } else {
            n
        };

        loop {
            let deficit = {
                let now = self.clock.now();
                let mut state = self.state.lock();
                self.refill_locked(&mut state, now);

                if state.tokens >= n {
                    state.tokens -= n;
                    return;
                }
                n - state.tokens
            };

            // Sleep until the deficit should have refilled, capped at the
            // wake-up granularity
            let secs = (deficit / self.refill_rate).max(0.001);
            let sleep_for = Duration::from_secs_f64(secs).min(WAIT_GRANULARITY);
            self.clock.sleep(sleep_for).await;
        }
    }

    /// Current limiter state
    pub fn status(&self) -> RateLimiterStatus {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.refill_locked(&mut state, now);

        RateLimiterStatus {
            tokens: state.tokens,
            capacity: self.capacity,
            refill_rate: self.refill_rate,
            utilization: ((self.capacity - state.tokens) / self.capacity).clamp(0.0, 1.0),
        }
    }

    fn refill_locked(&self, state: &mut BucketState, now: f64) {
        // Refill is monotonic; a clock step backwards adds nothing
        let elapsed = (now - state.last_refill).max(0.0);
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
            state.last_refill = now;
        }
    }
}
