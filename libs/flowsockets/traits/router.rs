//! Message Routing System
//!
//! Core traits for conditional message routing with per-message-type
//! ordering guarantees while allowing cross-type parallelism.
//!
//! ```text
//! WebSocket → PassivePing? → Router → Route Key → Channel → Handler Thread
//!                                         ↓              ↓
//!                                    TypeA Channel → TypeA Handler (sequential)
//!                                    TypeB Channel → TypeB Handler (sequential)
//! ```

use crate::{Result, WsMessage};
use async_trait::async_trait;
use std::fmt::Debug;
use std::hash::Hash;

/// Message router that parses WebSocket messages and determines routing
///
/// The router has two responsibilities:
/// 1. Parse the raw WebSocket message into a typed message
/// 2. Extract a route key that determines which handler processes it
#[async_trait]
pub trait MessageRouter: Send + Sync + 'static {
    /// The parsed message type
    type Message: Send + Debug + 'static;

    /// The route key type (determines which handler processes the message)
    type RouteKey: Hash + Eq + Clone + Send + Sync + Debug + 'static;

    /// Parse a raw WebSocket message into a typed message
    ///
    /// Called for every non-ping message received from the WebSocket.
    /// Decode failures should be mapped to a typed "unknown" variant where
    /// possible so the stream keeps flowing; hard errors are logged and the
    /// frame is skipped.
    async fn parse(&self, message: WsMessage) -> Result<Self::Message>;

    /// Extract the route key from a parsed message
    ///
    /// Messages with the same route key are processed sequentially in order.
    /// Messages with different route keys are processed in parallel.
    fn route_key(&self, message: &Self::Message) -> Self::RouteKey;
}

/// Message handler that processes typed messages sequentially
///
/// Each handler runs in its own dedicated OS thread and processes messages
/// sequentially in the order they were received. Multiple handlers for
/// different message types run in parallel on separate threads.
pub trait MessageHandler<M>: Send + 'static
where
    M: Send + Debug + 'static,
{
    /// Handle a parsed message
    ///
    /// Errors are logged; the handler thread continues with the next message.
    fn handle(&mut self, message: M) -> Result<()>;
}
