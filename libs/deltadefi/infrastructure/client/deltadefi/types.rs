//! Wire types for the DeltaDeFi REST API and account stream.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Errors
// =============================================================================

/// Venue-side failure, classified for the outbox retry policy
#[derive(Error, Debug, Clone)]
pub enum VenueError {
    /// Timeout, connection drop, 5xx, rate limiting: safe to retry
    #[error("transient venue error: {0}")]
    Transient(String),

    /// Validation or authorization failure: retrying will not help
    #[error("terminal venue error: {0}")]
    Terminal(String),
}

impl VenueError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, VenueError::Transient(_))
    }
}

// =============================================================================
// REST: build -> sign -> submit
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct BuildOrderRequest {
    pub symbol: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub quantity: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
}

/// The venue builds the order transaction; we sign and submit it
#[derive(Debug, Clone, Deserialize)]
pub struct BuildOrderResponse {
    pub order_id: String,
    pub tx_hex: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitOrderRequest {
    pub order_id: String,
    pub signed_tx: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitOrderResponse {
    pub order_id: String,
    #[serde(default)]
    pub tx_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildCancelRequest {
    pub order_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildCancelResponse {
    pub tx_hex: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitCancelRequest {
    pub order_id: String,
    pub signed_tx: String,
}

/// Error body the venue attaches to non-2xx responses
#[derive(Debug, Clone, Deserialize)]
pub struct VenueErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl VenueErrorBody {
    pub fn text(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "unknown venue error".to_string())
    }
}

// =============================================================================
// Account stream
// =============================================================================

/// Balance update message
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceUpdateMessage {
    pub asset: String,
    pub available: String,
    pub locked: String,
    #[serde(default)]
    pub timestamp: Option<f64>,
}

/// Order update message (ack / cancel / reject as seen by the venue)
#[derive(Debug, Clone, Deserialize)]
pub struct OrderUpdateMessage {
    /// Venue order id
    pub order_id: String,
    #[serde(default)]
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub timestamp: Option<f64>,
}

/// Fill message
#[derive(Debug, Clone, Deserialize)]
pub struct FillMessage {
    pub fill_id: String,
    /// Venue order id of the filled order
    pub order_id: String,
    pub symbol: String,
    pub side: String,
    pub price: String,
    pub quantity: String,
    pub executed_at: f64,
    #[serde(default)]
    pub trade_id: Option<String>,
    #[serde(default)]
    pub commission: Option<String>,
    #[serde(default)]
    pub commission_asset: Option<String>,
    #[serde(default = "default_true")]
    pub is_maker: bool,
}

fn default_true() -> bool {
    true
}

/// Decoded account stream message.
///
/// The wire is untyped JSON with a `type` discriminator; unknown
/// discriminators are logged and dropped.
#[derive(Debug, Clone)]
pub enum AccountEvent {
    Balance(BalanceUpdateMessage),
    Order(OrderUpdateMessage),
    Fill(FillMessage),
    Unknown(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_order_response_decodes() {
        let json = r#"{"order_id":"ord-1","tx_hex":"84a4..."}"#;
        let resp: BuildOrderResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.order_id, "ord-1");
        assert_eq!(resp.tx_hex, "84a4...");
    }

    #[test]
    fn test_fill_message_decodes_with_defaults() {
        let json = r#"{
            "fill_id": "f-1",
            "order_id": "ext-1",
            "symbol": "ADAUSDM",
            "side": "buy",
            "price": "0.4998",
            "quantity": "40",
            "executed_at": 1700000000.5
        }"#;
        let msg: FillMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.fill_id, "f-1");
        assert!(msg.commission.is_none());
        assert!(msg.is_maker);
    }

    #[test]
    fn test_error_body_text() {
        let body: VenueErrorBody =
            serde_json::from_str(r#"{"error":"insufficient balance"}"#).unwrap();
        assert_eq!(body.text(), "insufficient balance");

        let body: VenueErrorBody = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(body.text(), "unknown venue error");
    }

    #[test]
    fn test_venue_error_classification() {
        assert!(VenueError::Transient("timeout".into()).is_retryable());
        assert!(!VenueError::Terminal("bad price".into()).is_retryable());
    }
}
