//! Binance reference market data (source venue).

pub mod types;
pub mod websocket;

pub use types::{BinanceMessage, BinanceRoute, BinanceStreamWrapper, BookTickerData};
pub use websocket::{spawn_ticker_stream, SharedTicker};
