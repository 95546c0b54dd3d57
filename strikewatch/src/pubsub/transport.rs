//! Transport abstraction and the TCP implementation.
//!
//! A [`Transport`] opens broker sessions. Each session is split into a
//! [`SessionWriter`] (outbound control packets, guarded by the client's
//! connection mutex) and a [`SessionReader`] (inbound events, consumed only
//! by the client's supervisor task), so reading never blocks writes.
//!
//! [`TcpTransport`] speaks MQTT 3.1.1 over a plain TCP socket using
//! [`MqttCodec`]. Tests use [`super::memory::MemoryTransport`] instead.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, trace, warn};

use super::codec::{connack_reason, CodecError, Connect, MqttCodec, Packet, Publish, SUBACK_FAILURE};
use super::error::PubSubError;
use super::message::{QoS, RawMessage};

/// Default broker port.
pub const DEFAULT_PORT: u16 = 1883;

/// Default keep-alive interval.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Default timeout for TCP connect and CONNACK.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Something read from a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// An application message.
    Message(RawMessage),
    /// The broker refused a subscription.
    SubscribeRejected { packet_id: u16 },
    /// Reply to a keep-alive ping.
    Pong,
}

/// Opens sessions to a broker.
pub trait Transport: Send + Sync + 'static {
    type Writer: SessionWriter;
    type Reader: SessionReader;

    /// Open a session. Resolves once the broker has accepted it.
    fn open(
        &self,
    ) -> impl Future<Output = Result<(Self::Writer, Self::Reader), PubSubError>> + Send;

    /// Human-readable broker address, for logging.
    fn describe(&self) -> String;
}

/// Outbound half of a session.
pub trait SessionWriter: Send + 'static {
    fn subscribe(
        &mut self,
        topic: &str,
        qos: QoS,
    ) -> impl Future<Output = Result<(), PubSubError>> + Send;

    fn unsubscribe(&mut self, topic: &str) -> impl Future<Output = Result<(), PubSubError>> + Send;

    fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> impl Future<Output = Result<(), PubSubError>> + Send;

    /// Acknowledge a QoS 1 delivery.
    fn acknowledge(&mut self, packet_id: u16) -> impl Future<Output = Result<(), PubSubError>> + Send;

    fn ping(&mut self) -> impl Future<Output = Result<(), PubSubError>> + Send;

    /// Close the session cleanly.
    fn disconnect(&mut self) -> impl Future<Output = Result<(), PubSubError>> + Send;
}

/// Inbound half of a session.
pub trait SessionReader: Send + 'static {
    /// Next event, or `None` once the broker closed the session.
    ///
    /// Must be cancel-safe: the client polls it inside `select!`.
    fn next_event(
        &mut self,
    ) -> impl Future<Output = Result<Option<SessionEvent>, PubSubError>> + Send;
}

// =============================================================================
// TCP transport
// =============================================================================

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// Keep-alive announced in CONNECT.
    pub keep_alive: Duration,
    pub client_id: String,
    pub connect_timeout: Duration,
}

impl BrokerConfig {
    /// Create a config for `host:port` with default timings.
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            keep_alive: DEFAULT_KEEP_ALIVE,
            client_id: client_id.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the keep-alive interval.
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// MQTT 3.1.1 over TCP.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    config: BrokerConfig,
}

impl TcpTransport {
    /// Create a TCP transport.
    pub fn new(config: BrokerConfig) -> Self {
        Self { config }
    }

    /// Connection settings.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }
}

impl Transport for TcpTransport {
    type Writer = TcpWriter;
    type Reader = TcpReader;

    async fn open(&self) -> Result<(TcpWriter, TcpReader), PubSubError> {
        let timeout = self.config.connect_timeout;
        let address = self.config.address();

        let stream = tokio::time::timeout(
            timeout,
            TcpStream::connect((self.config.host.as_str(), self.config.port)),
        )
        .await
        .map_err(|_| PubSubError::Connection(format!("timed out connecting to {address}")))??;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, MqttCodec::new());
        let mut writer = FramedWrite::new(write_half, MqttCodec::new());

        writer
            .send(Packet::Connect(Connect {
                client_id: self.config.client_id.clone(),
                keep_alive: self.config.keep_alive.as_secs().min(u16::MAX as u64) as u16,
                clean_session: true,
            }))
            .await?;

        let reply = tokio::time::timeout(timeout, reader.next())
            .await
            .map_err(|_| PubSubError::Connection(format!("timed out waiting for CONNACK from {address}")))?;

        match reply {
            Some(Ok(Packet::ConnAck { return_code: 0, .. })) => {
                debug!(broker = %address, "Session accepted");
            }
            Some(Ok(Packet::ConnAck { return_code, .. })) => {
                return Err(PubSubError::Connection(format!(
                    "broker refused connection: {}",
                    connack_reason(return_code)
                )));
            }
            Some(Ok(other)) => {
                return Err(PubSubError::Protocol(CodecError::UnexpectedPacket(other.name())));
            }
            Some(Err(e)) => return Err(e.into()),
            None => {
                return Err(PubSubError::Connection(format!(
                    "{address} closed the connection before CONNACK"
                )));
            }
        }

        Ok((
            TcpWriter {
                framed: writer,
                next_packet_id: 0,
            },
            TcpReader { framed: reader },
        ))
    }

    fn describe(&self) -> String {
        self.config.address()
    }
}

/// Outbound half of a TCP session.
pub struct TcpWriter {
    framed: FramedWrite<OwnedWriteHalf, MqttCodec>,
    next_packet_id: u16,
}

impl TcpWriter {
    /// Packet identifiers are non-zero and wrap around.
    fn packet_id(&mut self) -> u16 {
        self.next_packet_id = self.next_packet_id.wrapping_add(1).max(1);
        self.next_packet_id
    }

    async fn send(&mut self, packet: Packet) -> Result<(), PubSubError> {
        trace!(packet = packet.name(), "Sending packet");
        self.framed.send(packet).await.map_err(PubSubError::from)
    }
}

impl SessionWriter for TcpWriter {
    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), PubSubError> {
        let packet_id = self.packet_id();
        self.send(Packet::Subscribe {
            packet_id,
            filters: vec![(topic.to_string(), qos)],
        })
        .await
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), PubSubError> {
        let packet_id = self.packet_id();
        self.send(Packet::Unsubscribe {
            packet_id,
            filters: vec![topic.to_string()],
        })
        .await
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), PubSubError> {
        let packet_id = match qos {
            QoS::AtMostOnce => None,
            QoS::AtLeastOnce => Some(self.packet_id()),
        };
        self.send(Packet::Publish(Publish {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
            dup: false,
            packet_id,
        }))
        .await
    }

    async fn acknowledge(&mut self, packet_id: u16) -> Result<(), PubSubError> {
        self.send(Packet::PubAck { packet_id }).await
    }

    async fn ping(&mut self) -> Result<(), PubSubError> {
        self.send(Packet::PingReq).await
    }

    async fn disconnect(&mut self) -> Result<(), PubSubError> {
        self.send(Packet::Disconnect).await?;
        self.framed.close().await.map_err(PubSubError::from)
    }
}

/// Inbound half of a TCP session.
pub struct TcpReader {
    framed: FramedRead<OwnedReadHalf, MqttCodec>,
}

impl SessionReader for TcpReader {
    async fn next_event(&mut self) -> Result<Option<SessionEvent>, PubSubError> {
        loop {
            let packet = match self.framed.next().await {
                Some(packet) => packet?,
                None => return Ok(None),
            };

            match packet {
                Packet::Publish(publish) => {
                    return Ok(Some(SessionEvent::Message(RawMessage {
                        topic: publish.topic,
                        payload: publish.payload,
                        qos: publish.qos,
                        retain: publish.retain,
                        packet_id: publish.packet_id,
                    })));
                }
                Packet::SubAck {
                    packet_id,
                    return_codes,
                } => {
                    if return_codes.contains(&SUBACK_FAILURE) {
                        return Ok(Some(SessionEvent::SubscribeRejected { packet_id }));
                    }
                    trace!(packet_id, "Subscription acknowledged");
                }
                Packet::PingResp => return Ok(Some(SessionEvent::Pong)),
                Packet::UnsubAck { packet_id } | Packet::PubAck { packet_id } => {
                    trace!(packet_id, "Acknowledged");
                }
                other => {
                    warn!(packet = other.name(), "Unexpected packet from broker");
                    return Err(PubSubError::Protocol(CodecError::UnexpectedPacket(
                        other.name(),
                    )));
                }
            }
        }
    }
}
