//! Core client: builder, connection task, state tracking.

pub mod builder;
pub mod client;
pub mod config;
pub mod state;

// Re-export main types
pub use builder::{RoutingBuilder, WebSocketClientBuilder};
pub use client::{ClientEvent, Metrics, WebSocketClient};
pub use config::ClientConfig;
pub use state::{AtomicConnectionState, AtomicMetrics, ConnectionState};

// Re-export traits for convenience
pub use crate::traits::*;
