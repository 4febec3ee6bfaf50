use crate::message::WsMessage;

/// Trait for detecting and responding to passive ping messages
///
/// Some venues send ping messages as regular data messages (not WebSocket
/// PING frames). When a passive ping is detected the configured response is
/// sent immediately and the frame is not forwarded to the router.
pub trait PassivePingDetector: Send + Sync {
    /// Check if a message is a passive ping from the server
    fn is_ping(&self, message: &WsMessage) -> bool;

    /// Get the response message for a passive ping
    fn pong_response(&self) -> WsMessage;
}

/// Simple text-based passive ping detector
///
/// Detects pings based on exact text matching and responds with a configured
/// message, e.g. `TextPassivePing::new("PING", WsMessage::Text("PONG".into()))`.
pub struct TextPassivePing {
    ping_text: String,
    pong: WsMessage,
}

impl TextPassivePing {
    pub fn new(ping_text: impl Into<String>, pong: WsMessage) -> Self {
        Self {
            ping_text: ping_text.into(),
            pong,
        }
    }
}

impl PassivePingDetector for TextPassivePing {
    fn is_ping(&self, message: &WsMessage) -> bool {
        message
            .as_text()
            .map(|text| text == self.ping_text)
            .unwrap_or(false)
    }

    fn pong_response(&self) -> WsMessage {
        self.pong.clone()
    }
}

/// JSON-based passive ping detector
///
/// Detects JSON messages with a specific field/value, e.g. `{"type":"ping"}`,
/// and responds with a JSON message.
pub struct JsonPassivePing {
    field_name: String,
    ping_value: String,
    pong: WsMessage,
}

impl JsonPassivePing {
    pub fn new(
        field_name: impl Into<String>,
        ping_value: impl Into<String>,
        pong: WsMessage,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            ping_value: ping_value.into(),
            pong,
        }
    }
}

impl PassivePingDetector for JsonPassivePing {
    fn is_ping(&self, message: &WsMessage) -> bool {
        if let Some(text) = message.as_text() {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(text) {
                if let Some(value) = json.get(&self.field_name) {
                    return value.as_str() == Some(&self.ping_value);
                }
            }
        }
        false
    }

    fn pong_response(&self) -> WsMessage {
        self.pong.clone()
    }
}
