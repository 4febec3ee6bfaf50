//! Outbox delivery semantics against a scripted venue.

mod common;

use common::{buy_request, dispatcher, drain_outbox, harness};
use deltadefi::config::test_support::test_config;
use deltadefi::domain::{CancelOrderPayload, OrderState, SubmitOrderPayload};
use deltadefi::infrastructure::client::deltadefi::types::{AccountEvent, OrderUpdateMessage};
use deltadefi::infrastructure::client::deltadefi::{CommandClient, VenueError};
use deltadefi::infrastructure::reconciler::Reconciler;
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::sync::Arc;

/// Venue stub that replays a script of submit/cancel results and records
/// every call it receives.
#[derive(Default)]
struct ScriptedClient {
    submit_script: Mutex<VecDeque<Result<String, VenueError>>>,
    cancel_script: Mutex<VecDeque<Result<(), VenueError>>>,
    submit_calls: Mutex<Vec<SubmitOrderPayload>>,
    cancel_calls: Mutex<Vec<CancelOrderPayload>>,
}

impl ScriptedClient {
    fn with_submit_script(script: Vec<Result<String, VenueError>>) -> Arc<Self> {
        let client = Self::default();
        *client.submit_script.lock() = script.into();
        Arc::new(client)
    }

    fn with_cancel_script(script: Vec<Result<(), VenueError>>) -> Arc<Self> {
        let client = Self::default();
        *client.cancel_script.lock() = script.into();
        Arc::new(client)
    }

    fn submit_count(&self) -> usize {
        self.submit_calls.lock().len()
    }

    fn cancel_count(&self) -> usize {
        self.cancel_calls.lock().len()
    }
}

#[async_trait::async_trait]
impl CommandClient for ScriptedClient {
    async fn submit_order(&self, payload: &SubmitOrderPayload) -> Result<String, VenueError> {
        self.submit_calls.lock().push(payload.clone());
        self.submit_script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("ext-{}", payload.order_id)))
    }

    async fn cancel_order(&self, payload: &CancelOrderPayload) -> Result<(), VenueError> {
        self.cancel_calls.lock().push(payload.clone());
        self.cancel_script.lock().pop_front().unwrap_or(Ok(()))
    }
}

#[tokio::test]
async fn test_submit_retries_then_succeeds() {
    // Three transient failures, then the venue accepts
    let harness = harness().await;
    let client = ScriptedClient::with_submit_script(vec![
        Err(VenueError::Transient("timeout".into())),
        Err(VenueError::Transient("502".into())),
        Err(VenueError::Transient("connection reset".into())),
        Ok("ext-42".into()),
    ]);
    let dispatcher = dispatcher(&harness, client.clone(), test_config().outbox);

    let order = harness.oms.submit(buy_request(dec!(100))).await.unwrap();

    drain_outbox(&dispatcher, &harness, 100).await;

    // Exactly four venue calls: three failures, one success, none after
    assert_eq!(client.submit_count(), 4);

    // The order progressed to working exactly once, with the venue id
    let order = harness.oms.order(&order.order_id).await.unwrap();
    assert_eq!(order.state, OrderState::Working);
    assert_eq!(order.external_order_id.as_deref(), Some("ext-42"));
}

#[tokio::test]
async fn test_terminal_failure_rejects_order() {
    let harness = harness().await;
    let client = ScriptedClient::with_submit_script(vec![Err(VenueError::Terminal(
        "price below minimum".into(),
    ))]);
    let dispatcher = dispatcher(&harness, client.clone(), test_config().outbox);

    let order = harness.oms.submit(buy_request(dec!(100))).await.unwrap();
    drain_outbox(&dispatcher, &harness, 20).await;

    // One call, no retries, order rejected
    assert_eq!(client.submit_count(), 1);
    let order = harness.oms.order(&order.order_id).await.unwrap();
    assert_eq!(order.state, OrderState::Rejected);
}

#[tokio::test]
async fn test_retries_exhausted_dead_letters_and_fails_order() {
    let harness = harness().await;
    let mut config = test_config().outbox;
    config.max_retries = 3;

    let client = ScriptedClient::with_submit_script(vec![
        Err(VenueError::Transient("down".into())),
        Err(VenueError::Transient("down".into())),
        Err(VenueError::Transient("down".into())),
        Err(VenueError::Transient("down".into())),
    ]);
    let dispatcher = dispatcher(&harness, client.clone(), config);

    let order = harness.oms.submit(buy_request(dec!(100))).await.unwrap();
    drain_outbox(&dispatcher, &harness, 100).await;

    // max_retries attempts total, then dead letter
    assert_eq!(client.submit_count(), 3);
    let order = harness.oms.order(&order.order_id).await.unwrap();
    assert_eq!(order.state, OrderState::Failed);
}

#[tokio::test]
async fn test_cancel_waits_for_submit_and_picks_up_venue_id() {
    // Cancel requested before the submit was ever dispatched: per-aggregate
    // FIFO dispatches the submit first, and the cancel is enriched with the
    // venue id the ack brought in.
    let harness = harness().await;
    let client = ScriptedClient::with_submit_script(vec![Ok("ext-7".into())]);
    let dispatcher = dispatcher(&harness, client.clone(), test_config().outbox);

    let order = harness.oms.submit(buy_request(dec!(100))).await.unwrap();
    harness.oms.cancel(&order.order_id, "requote").await.unwrap();

    drain_outbox(&dispatcher, &harness, 50).await;

    assert_eq!(client.submit_count(), 1);
    assert_eq!(client.cancel_count(), 1);
    let cancel = client.cancel_calls.lock()[0].clone();
    assert_eq!(cancel.external_order_id.as_deref(), Some("ext-7"));

    let order = harness.oms.order(&order.order_id).await.unwrap();
    assert_eq!(order.state, OrderState::Cancelled);
}

#[tokio::test]
async fn test_unregistered_order_sweep_reaches_venue() {
    // The account stream reports an order we never created; the reconciler
    // enqueues a cancel and the dispatcher delivers it.
    let harness = harness().await;
    let client = ScriptedClient::with_cancel_script(vec![Ok(())]);
    let dispatcher = dispatcher(&harness, client.clone(), test_config().outbox);

    let reconciler = Reconciler::new(
        harness.store.clone(),
        Arc::clone(&harness.oms),
        harness.clock.clone(),
    );
    reconciler
        .handle_event(AccountEvent::Order(OrderUpdateMessage {
            order_id: "ghost-1".to_string(),
            client_order_id: None,
            symbol: "ADAUSDM".to_string(),
            status: "open".to_string(),
            reason: None,
            timestamp: None,
        }))
        .await;

    drain_outbox(&dispatcher, &harness, 20).await;

    assert_eq!(client.cancel_count(), 1);
    let cancel = client.cancel_calls.lock()[0].clone();
    assert_eq!(cancel.external_order_id.as_deref(), Some("ghost-1"));
    assert!(cancel.order_id.is_none());

    // Nothing local was created for the ghost order
    assert_eq!(harness.oms.open_order_count().await, 0);
}

#[tokio::test]
async fn test_completed_events_are_not_redispatched() {
    let harness = harness().await;
    let client = ScriptedClient::with_submit_script(vec![Ok("ext-1".into())]);
    let dispatcher = dispatcher(&harness, client.clone(), test_config().outbox);

    harness.oms.submit(buy_request(dec!(100))).await.unwrap();
    drain_outbox(&dispatcher, &harness, 20).await;
    assert_eq!(client.submit_count(), 1);

    // Idle dispatcher stays idle
    assert!(!dispatcher.dispatch_next().await.unwrap());
    assert_eq!(client.submit_count(), 1);
}

#[tokio::test]
async fn test_events_for_distinct_orders_all_deliver() {
    let harness = harness().await;
    let client = Arc::new(ScriptedClient::default());
    let dispatcher = dispatcher(&harness, client.clone(), test_config().outbox);

    for _ in 0..5 {
        harness.oms.submit(buy_request(dec!(10))).await.unwrap();
    }
    drain_outbox(&dispatcher, &harness, 100).await;

    assert_eq!(client.submit_count(), 5);

    // Every event ended completed
    let (pending, in_flight) = harness.store.outbox_depth().await.unwrap();
    assert_eq!((pending, in_flight), (0, 0));

    for call in client.submit_calls.lock().iter() {
        assert_eq!(call.symbol, "ADAUSDM");
    }
}
