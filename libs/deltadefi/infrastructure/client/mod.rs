//! Venue clients: Binance source feed, DeltaDeFi command + account stream.

pub mod binance;
pub mod deltadefi;
