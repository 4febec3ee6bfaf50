//! # FlowSockets
//!
//! A reconnecting WebSocket client for exchange data streams.
//!
//! ## Features
//!
//! - **Typed routing**: messages are parsed once and routed to per-type
//!   handlers running on dedicated threads (sequential per type, parallel
//!   across types)
//! - **Pluggable reconnection**: exponential backoff / fixed delay / never
//! - **Session recycling**: connections are torn down and re-established
//!   before the venue's session lifetime expires
//! - **Idle detection**: a silent connection past the idle timeout is
//!   treated as dead and reconnected
//! - **Keep-alive**: periodic heartbeat payloads plus passive ping/pong
//!   for venues that ping inside data frames

pub mod core;
pub mod traits;

// Re-export all traits
pub use traits::*;

// Re-export core client functionality
pub use core::{
    builder::{RoutingBuilder, WebSocketClientBuilder},
    client::{ClientEvent, Metrics, WebSocketClient},
    config::ClientConfig,
    state::{AtomicConnectionState, AtomicMetrics, ConnectionState},
};

/// Type alias for Result with FlowSocketError
pub type Result<T> = std::result::Result<T, traits::FlowSocketError>;
