use chrono::NaiveDateTime;
use std::fmt;

/// A message received from the broker, decoded to text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
    pub received: NaiveDateTime,
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} - {}: {}", self.received, self.topic, self.preview())
    }
}

impl InboundMessage {
    pub fn from_topic(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        InboundMessage {
            topic: topic.into(),
            payload: payload.into(),
            received: chrono::Local::now().naive_local(),
        }
    }

    /// Decodes a raw MQTT payload. Non UTF-8 bytes are replaced rather than rejected.
    pub fn from_bytes(topic: impl Into<String>, payload: &[u8]) -> Self {
        Self::from_topic(topic, String::from_utf8_lossy(payload).into_owned())
    }

    /// First 32 characters of the payload, for log lines.
    pub fn preview(&self) -> &str {
        match self.payload.char_indices().nth(32) {
            Some((idx, _)) => &self.payload[..idx],
            None => &self.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_long_payloads() {
        let msg = InboundMessage::from_topic("t", "x".repeat(40));
        assert_eq!(msg.preview().len(), 32);

        let short = InboundMessage::from_topic("t", "on");
        assert_eq!(short.preview(), "on");
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let msg = InboundMessage::from_bytes("t", &[0x6f, 0xff, 0x6e]);
        assert_eq!(msg.payload, "o\u{FFFD}n");
    }
}
