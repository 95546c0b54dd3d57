//! Message and subscription types shared by the client and its transports.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::error::PubSubError;

/// Delivery guarantee level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum QoS {
    /// At most once.
    #[default]
    AtMostOnce = 0,
    /// At least once.
    AtLeastOnce = 1,
}

impl QoS {
    /// Wire value of this level.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parses a wire value. Exactly-once (2) is not supported.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            _ => None,
        }
    }
}

/// Text encoding applied to payloads before they reach a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// UTF-8 text.
    Utf8,
    /// 7-bit ASCII text.
    Ascii,
}

impl Encoding {
    /// Decodes raw bytes into text.
    pub fn decode(self, topic: &str, bytes: &[u8]) -> Result<String, PubSubError> {
        let decoded: Option<String> = match self {
            Encoding::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_owned),
            Encoding::Ascii => bytes
                .is_ascii()
                .then(|| bytes.iter().map(|&b| b as char).collect::<String>()),
        };
        decoded.ok_or_else(|| PubSubError::Decode {
            topic: topic.to_string(),
            encoding: self.to_string(),
        })
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Utf8 => write!(f, "utf-8"),
            Encoding::Ascii => write!(f, "ascii"),
        }
    }
}

/// Payload as delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Raw bytes (subscription without encoding).
    Bytes(Bytes),
    /// Decoded text.
    Text(String),
}

impl Payload {
    /// Payload bytes regardless of representation.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Bytes(b) => b,
            Payload::Text(s) => s.as_bytes(),
        }
    }

    /// Text form, if the payload was decoded.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            Payload::Bytes(_) => None,
        }
    }
}

/// A PUBLISH received from the broker, before dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    /// Packet identifier to acknowledge (QoS 1 only).
    pub packet_id: Option<u16>,
}

impl RawMessage {
    /// Create a QoS 0 message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
            packet_id: None,
        }
    }
}

/// A message as handed to a subscription callback.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Topic the message was published on.
    pub topic: String,
    /// Payload, decoded if the subscription requested an encoding.
    pub payload: Payload,
    pub qos: QoS,
    pub retain: bool,
    /// Filter of the subscription that matched.
    pub subscribed_topic: String,
    /// When the client received the message.
    pub timestamp: DateTime<Utc>,
}

/// Connection lifecycle of a [`super::PubSubClient`].
///
/// ```text
/// Disconnected ──► Connecting ──► Connected
///      ▲               │              │
///      └───────────────┴──────────────┘  (error / lost session)
/// any state ──disconnect()──► Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Terminal; no further reconnects are attempted.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_ordering_and_wire_values() {
        assert!(QoS::AtLeastOnce > QoS::AtMostOnce);
        assert_eq!(QoS::from_u8(1), Some(QoS::AtLeastOnce));
        assert_eq!(QoS::from_u8(2), None);
        assert_eq!(QoS::AtMostOnce.as_u8(), 0);
    }

    #[test]
    fn test_utf8_decode() {
        let text = Encoding::Utf8.decode("t", "zażółć".as_bytes()).unwrap();
        assert_eq!(text, "zażółć");
        assert!(matches!(
            Encoding::Utf8.decode("t", &[0xff, 0xfe]),
            Err(PubSubError::Decode { .. })
        ));
    }

    #[test]
    fn test_ascii_decode_rejects_high_bytes() {
        assert_eq!(Encoding::Ascii.decode("t", b"ok").unwrap(), "ok");
        assert!(Encoding::Ascii.decode("t", "ż".as_bytes()).is_err());
    }

    #[test]
    fn test_payload_accessors() {
        let text = Payload::Text("hi".into());
        let raw = Payload::Bytes(Bytes::from_static(b"hi"));
        assert_eq!(text.as_bytes(), raw.as_bytes());
        assert_eq!(text.as_text(), Some("hi"));
        assert_eq!(raw.as_text(), None);
    }
}
