//! DeltaDeFi order command client.
//!
//! Every order-side effect is a build -> sign -> submit round trip: the
//! venue builds the transaction, the signer signs it locally, and the
//! signed envelope goes back up. Responses are classified into transient
//! and terminal failures for the outbox retry policy.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::signer::TxSigner;
use super::types::{
    BuildCancelRequest, BuildCancelResponse, BuildOrderRequest, BuildOrderResponse,
    SubmitCancelRequest, SubmitOrderRequest, SubmitOrderResponse, VenueError, VenueErrorBody,
};
use crate::config::TimeoutConfig;
use crate::domain::{CancelOrderPayload, SubmitOrderPayload};

/// Issues order commands to the destination venue.
///
/// The outbox dispatcher is the only caller; it treats
/// [`VenueError::Transient`] as retryable and everything else as final.
#[async_trait]
pub trait CommandClient: Send + Sync {
    /// Build, sign and submit a new order. Returns the venue order id.
    async fn submit_order(&self, payload: &SubmitOrderPayload) -> Result<String, VenueError>;

    /// Build, sign and submit a cancellation.
    async fn cancel_order(&self, payload: &CancelOrderPayload) -> Result<(), VenueError>;
}

/// REST implementation against the DeltaDeFi API
pub struct DeltaDefiRestClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    signer: Arc<dyn TxSigner>,
}

impl DeltaDefiRestClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        signer: Arc<dyn TxSigner>,
        timeouts: &TimeoutConfig,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .timeout(Duration::from_secs(timeouts.request_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            signer,
        })
    }

    async fn post_json<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, VenueError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http
            .post(&url)
            .header("X-API-Key", &self.api_key)
            .json(body)
            .send()
            .await
            // Connect failures and timeouts never reached the venue
            .map_err(|e| VenueError::Transient(format!("{}: {}", path, e)))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<Resp>()
                .await
                .map_err(|e| VenueError::Transient(format!("{}: bad response body: {}", path, e)));
        }

        let text = response
            .json::<VenueErrorBody>()
            .await
            .map(|b| b.text())
            .unwrap_or_else(|_| status.to_string());

        Err(classify_status(status, format!("{}: {}", path, text)))
    }

    fn sign(&self, tx_hex: &str) -> Result<String, VenueError> {
        // A signer failure is terminal: the same input will fail again
        self.signer
            .sign(tx_hex)
            .map_err(|e| VenueError::Terminal(e.to_string()))
    }
}

/// Map an HTTP status to the retry classification
fn classify_status(status: StatusCode, text: String) -> VenueError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        VenueError::Transient(text)
    } else {
        VenueError::Terminal(text)
    }
}

#[async_trait]
impl CommandClient for DeltaDefiRestClient {
    async fn submit_order(&self, payload: &SubmitOrderPayload) -> Result<String, VenueError> {
        let build = BuildOrderRequest {
            symbol: payload.symbol.clone(),
            side: payload.side.as_str().to_string(),
            order_type: payload.order_type.as_str().to_string(),
            quantity: payload.quantity,
            price: payload.price,
        };

        let built: BuildOrderResponse = self.post_json("/order/build", &build).await?;
        debug!(
            "[DeltaDefi] Built order {} for {} ({} bytes tx)",
            built.order_id,
            payload.order_id,
            built.tx_hex.len() / 2
        );

        let signed_tx = self.sign(&built.tx_hex)?;

        let submit = SubmitOrderRequest {
            order_id: built.order_id.clone(),
            signed_tx,
        };
        let submitted: SubmitOrderResponse = self.post_json("/order/submit", &submit).await?;

        Ok(submitted.order_id)
    }

    async fn cancel_order(&self, payload: &CancelOrderPayload) -> Result<(), VenueError> {
        // Cancels are built against the venue order id. Until the ack has
        // delivered it, the cancel cannot be expressed yet: retry later.
        let venue_order_id = payload
            .external_order_id
            .clone()
            .ok_or_else(|| VenueError::Transient("venue order id not yet known".to_string()))?;

        let build = BuildCancelRequest {
            order_id: venue_order_id.clone(),
        };
        let built: BuildCancelResponse = self.post_json("/order/cancel/build", &build).await?;

        let signed_tx = self.sign(&built.tx_hex)?;

        let submit = SubmitCancelRequest {
            order_id: venue_order_id,
            signed_tx,
        };
        let _: serde_json::Value = self.post_json("/order/cancel/submit", &submit).await?;

        Ok(())
    }
}
