//! Publish/subscribe client over MQTT 3.1.1.
//!
//! # Overview
//!
//! ```text
//! ┌──────────────┐   Transport    ┌───────────────┐
//! │ PubSubClient │──────────────►│ TcpTransport  │──► broker
//! │  (registry,  │               ├───────────────┤
//! │  reconnect)  │               │MemoryTransport│──► MemoryBroker
//! └──────────────┘               └───────────────┘
//! ```
//!
//! Callers register callbacks per topic filter. The client keeps the
//! registry across connection losses, reconnects with exponential backoff
//! and replays subscriptions onto each new session.

mod client;
pub mod codec;
mod error;
pub mod memory;
mod message;
pub mod topic;
mod transport;

pub use client::{ClientOptions, MessageCallback, PubSubClient, SubscriptionHandle, MAX_BACKOFF};
pub use error::PubSubError;
pub use memory::{BrokerOp, MemoryBroker, MemoryTransport};
pub use message::{ConnectionState, Encoding, InboundMessage, Payload, QoS, RawMessage};
pub use transport::{
    BrokerConfig, SessionEvent, SessionReader, SessionWriter, TcpTransport, Transport,
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_KEEP_ALIVE, DEFAULT_PORT,
};
