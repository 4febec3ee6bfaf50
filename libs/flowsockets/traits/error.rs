use thiserror::Error;

/// Main error type for flowsockets
#[derive(Error, Debug)]
pub enum FlowSocketError {
    /// WebSocket connection error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Connection closed unexpectedly
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Message parsing error
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Channel send error
    #[error("Channel send error: {0}")]
    ChannelSend(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Reconnection failed
    #[error("Reconnection failed after {attempts} attempts: {reason}")]
    ReconnectionFailed { attempts: usize, reason: String },

    /// No data received within the idle timeout
    #[error("Connection idle for {0:?}")]
    IdleTimeout(std::time::Duration),

    /// Generic error
    #[error("Error: {0}")]
    Other(String),
}

/// Result type for flowsockets operations
pub type Result<T> = std::result::Result<T, FlowSocketError>;
