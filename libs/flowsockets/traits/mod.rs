//! Trait surface of the library: message types, routing, reconnection
//! strategies and passive ping detection.

pub mod error;
pub mod message;
pub mod ping;
pub mod reconnect;
pub mod router;

pub use error::FlowSocketError;
pub use message::WsMessage;
pub use ping::{JsonPassivePing, PassivePingDetector, TextPassivePing};
pub use reconnect::{ExponentialBackoff, FixedDelay, NeverReconnect, ReconnectionStrategy};
pub use router::{MessageHandler, MessageRouter};
