//! Shared fixtures for integration tests.
#![allow(dead_code)]

use deltadefi::config::test_support::test_config;
use deltadefi::config::OutboxConfig;
use deltadefi::domain::{OrderType, Side};
use deltadefi::infrastructure::client::deltadefi::CommandClient;
use deltadefi::infrastructure::clock::{Clock, ManualClock};
use deltadefi::infrastructure::oms::{Oms, OrderRequest, RiskEngine};
use deltadefi::infrastructure::outbox::OutboxDispatcher;
use deltadefi::infrastructure::rate_limiter::RateLimiter;
use deltadefi::infrastructure::store::Store;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

pub struct TestHarness {
    pub store: Store,
    pub clock: Arc<ManualClock>,
    pub oms: Arc<Oms>,
    pub rate_limiter: Arc<RateLimiter>,
}

pub async fn harness() -> TestHarness {
    harness_with_rate(5.0, 5.0).await
}

pub async fn harness_with_rate(capacity: f64, rate: f64) -> TestHarness {
    let store = Store::open(":memory:").await.unwrap();
    let clock = Arc::new(ManualClock::new(1000.0));
    let risk = RiskEngine::new(test_config().risk, clock.now());
    let oms = Arc::new(Oms::new(store.clone(), clock.clone(), risk, "ADA"));
    let rate_limiter = Arc::new(RateLimiter::new(capacity, rate, clock.clone()));

    TestHarness {
        store,
        clock,
        oms,
        rate_limiter,
    }
}

pub fn dispatcher(
    harness: &TestHarness,
    client: Arc<dyn CommandClient>,
    outbox: OutboxConfig,
) -> Arc<OutboxDispatcher> {
    OutboxDispatcher::new(
        harness.store.clone(),
        Arc::clone(&harness.oms),
        client,
        Arc::clone(&harness.rate_limiter),
        harness.clock.clone(),
        outbox,
    )
}

pub fn buy_request(qty: Decimal) -> OrderRequest {
    OrderRequest {
        symbol: "ADAUSDM".to_string(),
        side: Side::Buy,
        order_type: OrderType::Limit,
        quantity: qty,
        price: Some(dec!(0.4998)),
        quote_id: None,
    }
}

/// Drive the dispatcher until the outbox is quiet, advancing virtual time
/// past retry schedules as needed.
pub async fn drain_outbox(
    dispatcher: &OutboxDispatcher,
    harness: &TestHarness,
    max_rounds: usize,
) {
    for _ in 0..max_rounds {
        if dispatcher.dispatch_next().await.unwrap() {
            continue;
        }
        let (pending, in_flight) = harness.store.outbox_depth().await.unwrap();
        if pending == 0 && in_flight == 0 {
            return;
        }
        // Nothing claimable yet: step over the earliest retry schedule
        harness.clock.advance(0.5);
    }
    panic!("outbox did not drain within {} rounds", max_rounds);
}
