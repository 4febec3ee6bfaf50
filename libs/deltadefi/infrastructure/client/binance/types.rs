//! Wire types for the Binance combined book-ticker stream.

use crate::domain::BookTicker;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

/// Combined-stream envelope: `{"stream":"adausdt@bookTicker","data":{...}}`
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceStreamWrapper {
    pub stream: String,
    pub data: BookTickerData,
}

/// Top-of-book payload. Prices and quantities arrive as strings.
#[derive(Debug, Clone, Deserialize)]
pub struct BookTickerData {
    #[serde(rename = "u")]
    pub update_id: u64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "b")]
    pub bid_px: String,
    #[serde(rename = "B")]
    pub bid_qty: String,
    #[serde(rename = "a")]
    pub ask_px: String,
    #[serde(rename = "A")]
    pub ask_qty: String,
}

impl BookTickerData {
    /// Decode into a domain ticker stamped with the local receive time.
    /// Returns None when any numeric field fails to parse.
    pub fn to_ticker(&self, received_at: f64) -> Option<BookTicker> {
        Some(BookTicker {
            symbol: self.symbol.clone(),
            bid_px: Decimal::from_str(&self.bid_px).ok()?,
            bid_qty: Decimal::from_str(&self.bid_qty).ok()?,
            ask_px: Decimal::from_str(&self.ask_px).ok()?,
            ask_qty: Decimal::from_str(&self.ask_qty).ok()?,
            ts: received_at,
        })
    }
}

/// Parsed stream message
#[derive(Debug, Clone)]
pub enum BinanceMessage {
    Ticker(BinanceStreamWrapper),
    Unknown(String),
}

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum BinanceRoute {
    Tickers,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_decode_book_ticker() {
        let json = r#"{
            "stream": "adausdt@bookTicker",
            "data": {
                "u": 400900217,
                "s": "ADAUSDT",
                "b": "0.49990000",
                "B": "31.21000000",
                "a": "0.50010000",
                "A": "40.66000000"
            }
        }"#;

        let wrapper: BinanceStreamWrapper = serde_json::from_str(json).unwrap();
        assert_eq!(wrapper.data.symbol, "ADAUSDT");

        let ticker = wrapper.data.to_ticker(123.0).unwrap();
        assert_eq!(ticker.bid_px, dec!(0.4999));
        assert_eq!(ticker.ask_px, dec!(0.5001));
        assert_eq!(ticker.ts, 123.0);
        assert!(ticker.validate().is_ok());
    }

    #[test]
    fn test_garbage_price_yields_none() {
        let data = BookTickerData {
            update_id: 1,
            symbol: "ADAUSDT".to_string(),
            bid_px: "not-a-number".to_string(),
            bid_qty: "1".to_string(),
            ask_px: "0.5".to_string(),
            ask_qty: "1".to_string(),
        };
        assert!(data.to_ticker(0.0).is_none());
    }
}
