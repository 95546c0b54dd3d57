//! Error types for the pub/sub client.

use thiserror::Error;

use super::codec::CodecError;

/// Errors surfaced by [`super::PubSubClient`] and its transports.
#[derive(Debug, Error)]
pub enum PubSubError {
    /// The broker could not be reached or refused the session.
    ///
    /// Retried automatically by the reconnect loop; only returned to callers
    /// awaiting a specific network operation.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Topic pattern is empty or uses wildcards incorrectly.
    #[error("Invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: &'static str },

    /// Payload could not be decoded with a subscription's encoding.
    #[error("Can't decode payload on {topic} with encoding {encoding}")]
    Decode { topic: String, encoding: String },

    /// A network operation was requested while no session is open.
    #[error("Not connected to broker")]
    NotConnected,

    /// The broker sent something that violates the wire protocol.
    #[error("Protocol error: {0}")]
    Protocol(CodecError),

    /// The client has been shut down.
    #[error("Client is closed")]
    Closed,
}

impl PubSubError {
    /// Returns true for failures the reconnect loop should retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PubSubError::Connection(_) | PubSubError::Protocol(_))
    }
}

impl From<CodecError> for PubSubError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Io(io) => PubSubError::Connection(io.to_string()),
            other => PubSubError::Protocol(other),
        }
    }
}

impl From<std::io::Error> for PubSubError {
    fn from(e: std::io::Error) -> Self {
        PubSubError::Connection(e.to_string())
    }
}
