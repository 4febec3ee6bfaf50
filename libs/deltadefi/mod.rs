//! DeltaDeFi cross-venue market-making engine.
//!
//! Consumes the Binance top-of-book for a source symbol, derives a layered
//! maker book around the reference mid and keeps it synchronized on the
//! DeltaDeFi destination venue, with inventory skew, pre-trade risk and an
//! at-least-once transactional outbox towards the venue.
//!
//! ## Architecture
//!
//! - **config**: YAML + .env configuration with validation
//! - **domain**: exchange-agnostic types (tickers, quotes, orders, fills,
//!   positions, balances) on `rust_decimal`
//! - **engine**: pure quote/skew math, no I/O
//! - **infrastructure**: store (SQLite), OMS, outbox, rate limiter, venue
//!   clients, reconciler
//! - **application**: supervisor wiring and long-running tasks

pub mod application;
pub mod config;
pub mod domain;
pub mod engine;
pub mod infrastructure;
pub mod utils;
