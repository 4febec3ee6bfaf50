//! Pure quoting logic. No I/O, no suspension points.

pub mod quote;
pub mod skew;

pub use quote::QuoteEngine;
pub use skew::inventory_gamma;
