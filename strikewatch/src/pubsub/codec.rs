//! MQTT 3.1.1 wire codec.
//!
//! Frames and parses the control packets needed by a subscribing client:
//!
//! | Type        | Code | Direction        |
//! |-------------|------|------------------|
//! | CONNECT     | 1    | client → broker  |
//! | CONNACK     | 2    | broker → client  |
//! | PUBLISH     | 3    | both             |
//! | PUBACK      | 4    | both             |
//! | SUBSCRIBE   | 8    | client → broker  |
//! | SUBACK      | 9    | broker → client  |
//! | UNSUBSCRIBE | 10   | client → broker  |
//! | UNSUBACK    | 11   | broker → client  |
//! | PINGREQ     | 12   | client → broker  |
//! | PINGRESP    | 13   | broker → client  |
//! | DISCONNECT  | 14   | client → broker  |
//!
//! Both directions are encodable and decodable so the codec can also drive a
//! broker-side peer in tests. QoS 2 flows are not supported.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use super::message::QoS;

const CONNECT: u8 = 1;
const CONNACK: u8 = 2;
const PUBLISH: u8 = 3;
const PUBACK: u8 = 4;
const SUBSCRIBE: u8 = 8;
const SUBACK: u8 = 9;
const UNSUBSCRIBE: u8 = 10;
const UNSUBACK: u8 = 11;
const PINGREQ: u8 = 12;
const PINGRESP: u8 = 13;
const DISCONNECT: u8 = 14;

/// Protocol name and level for MQTT 3.1.1.
const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;

/// Largest value the remaining-length field can express.
const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Default cap on a single inbound packet.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1024 * 1024;

/// SUBACK return code signalling a rejected filter.
pub const SUBACK_FAILURE: u8 = 0x80;

/// Wire codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed remaining length")]
    MalformedLength,

    #[error("Packet of {size} bytes exceeds limit of {max} bytes")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Unknown packet type {0}")]
    UnknownPacketType(u8),

    #[error("Invalid flags {flags:#06b} for packet type {packet_type}")]
    InvalidFlags { packet_type: u8, flags: u8 },

    #[error("Unsupported QoS {0}")]
    UnsupportedQoS(u8),

    #[error("Packet truncated")]
    Truncated,

    #[error("String is not valid UTF-8")]
    InvalidUtf8,

    #[error("String of {len} bytes exceeds the 65535 byte field limit")]
    StringTooLong { len: usize },

    #[error("Unexpected {0} packet")]
    UnexpectedPacket(&'static str),

    #[error("Unsupported protocol {name} level {level}")]
    UnsupportedProtocol { name: String, level: u8 },
}

/// CONNECT packet fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub client_id: String,
    pub keep_alive: u16,
    pub clean_session: bool,
}

/// PUBLISH packet fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    /// Present iff `qos` is at least once.
    pub packet_id: Option<u16>,
}

/// An MQTT control packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck { session_present: bool, return_code: u8 },
    Publish(Publish),
    PubAck { packet_id: u16 },
    Subscribe { packet_id: u16, filters: Vec<(String, QoS)> },
    SubAck { packet_id: u16, return_codes: Vec<u8> },
    Unsubscribe { packet_id: u16, filters: Vec<String> },
    UnsubAck { packet_id: u16 },
    PingReq,
    PingResp,
    Disconnect,
}

/// Describes a CONNACK return code.
pub fn connack_reason(code: u8) -> &'static str {
    match code {
        0 => "connection accepted",
        1 => "unacceptable protocol version",
        2 => "identifier rejected",
        3 => "server unavailable",
        4 => "bad user name or password",
        5 => "not authorised",
        _ => "unknown return code",
    }
}

impl Packet {
    /// Control packet name, for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Packet::Connect(_) => "CONNECT",
            Packet::ConnAck { .. } => "CONNACK",
            Packet::Publish(_) => "PUBLISH",
            Packet::PubAck { .. } => "PUBACK",
            Packet::Subscribe { .. } => "SUBSCRIBE",
            Packet::SubAck { .. } => "SUBACK",
            Packet::Unsubscribe { .. } => "UNSUBSCRIBE",
            Packet::UnsubAck { .. } => "UNSUBACK",
            Packet::PingReq => "PINGREQ",
            Packet::PingResp => "PINGRESP",
            Packet::Disconnect => "DISCONNECT",
        }
    }
}

/// Framing codec for [`Packet`]s.
#[derive(Debug, Clone)]
pub struct MqttCodec {
    max_packet_size: usize,
}

impl MqttCodec {
    /// Create a codec with the default inbound size limit.
    pub fn new() -> Self {
        Self::with_max_packet_size(DEFAULT_MAX_PACKET_SIZE)
    }

    /// Create a codec that rejects packets larger than `max_packet_size`.
    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        Self { max_packet_size }
    }
}

impl Default for MqttCodec {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Decoding
// =============================================================================

impl Decoder for MqttCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
        if src.len() < 2 {
            return Ok(None);
        }

        let Some((remaining, length_bytes)) = read_remaining_length(&src[1..])? else {
            return Ok(None);
        };

        let total = 1 + length_bytes + remaining;
        if total > self.max_packet_size {
            return Err(CodecError::PacketTooLarge {
                size: total,
                max: self.max_packet_size,
            });
        }
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let header = src[0];
        let mut body = src.split_to(total).freeze();
        body.advance(1 + length_bytes);

        parse_packet(header >> 4, header & 0x0f, body).map(Some)
    }
}

/// Reads the variable-length remaining-length field.
///
/// Returns `None` if more bytes are needed.
fn read_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>, CodecError> {
    let mut value = 0usize;
    for (i, byte) in buf.iter().take(4).enumerate() {
        value |= ((byte & 0x7f) as usize) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    if buf.len() >= 4 {
        Err(CodecError::MalformedLength)
    } else {
        Ok(None)
    }
}

fn parse_packet(packet_type: u8, flags: u8, mut body: Bytes) -> Result<Packet, CodecError> {
    let expect_flags = |expected: u8| {
        if flags == expected {
            Ok(())
        } else {
            Err(CodecError::InvalidFlags { packet_type, flags })
        }
    };

    let packet = match packet_type {
        CONNECT => {
            expect_flags(0)?;
            let name = read_string(&mut body)?;
            let level = read_u8(&mut body)?;
            if name != PROTOCOL_NAME || level != PROTOCOL_LEVEL {
                return Err(CodecError::UnsupportedProtocol { name, level });
            }
            let connect_flags = read_u8(&mut body)?;
            let keep_alive = read_u16(&mut body)?;
            let client_id = read_string(&mut body)?;
            Packet::Connect(Connect {
                client_id,
                keep_alive,
                clean_session: connect_flags & 0x02 != 0,
            })
        }
        CONNACK => {
            expect_flags(0)?;
            let ack_flags = read_u8(&mut body)?;
            let return_code = read_u8(&mut body)?;
            Packet::ConnAck {
                session_present: ack_flags & 0x01 != 0,
                return_code,
            }
        }
        PUBLISH => {
            let dup = flags & 0x08 != 0;
            let qos_bits = (flags >> 1) & 0x03;
            let qos = QoS::from_u8(qos_bits).ok_or(CodecError::UnsupportedQoS(qos_bits))?;
            let retain = flags & 0x01 != 0;
            let topic = read_string(&mut body)?;
            let packet_id = match qos {
                QoS::AtMostOnce => None,
                QoS::AtLeastOnce => Some(read_u16(&mut body)?),
            };
            Packet::Publish(Publish {
                topic,
                payload: body,
                qos,
                retain,
                dup,
                packet_id,
            })
        }
        PUBACK => {
            expect_flags(0)?;
            Packet::PubAck {
                packet_id: read_u16(&mut body)?,
            }
        }
        SUBSCRIBE => {
            expect_flags(0b0010)?;
            let packet_id = read_u16(&mut body)?;
            let mut filters = Vec::new();
            while body.has_remaining() {
                let filter = read_string(&mut body)?;
                let qos_bits = read_u8(&mut body)?;
                let qos = QoS::from_u8(qos_bits).ok_or(CodecError::UnsupportedQoS(qos_bits))?;
                filters.push((filter, qos));
            }
            Packet::Subscribe { packet_id, filters }
        }
        SUBACK => {
            expect_flags(0)?;
            let packet_id = read_u16(&mut body)?;
            Packet::SubAck {
                packet_id,
                return_codes: body.to_vec(),
            }
        }
        UNSUBSCRIBE => {
            expect_flags(0b0010)?;
            let packet_id = read_u16(&mut body)?;
            let mut filters = Vec::new();
            while body.has_remaining() {
                filters.push(read_string(&mut body)?);
            }
            Packet::Unsubscribe { packet_id, filters }
        }
        UNSUBACK => {
            expect_flags(0)?;
            Packet::UnsubAck {
                packet_id: read_u16(&mut body)?,
            }
        }
        PINGREQ => Packet::PingReq,
        PINGRESP => Packet::PingResp,
        DISCONNECT => Packet::Disconnect,
        other => return Err(CodecError::UnknownPacketType(other)),
    };

    Ok(packet)
}

fn read_u8(buf: &mut Bytes) -> Result<u8, CodecError> {
    if buf.remaining() < 1 {
        return Err(CodecError::Truncated);
    }
    Ok(buf.get_u8())
}

fn read_u16(buf: &mut Bytes) -> Result<u16, CodecError> {
    if buf.remaining() < 2 {
        return Err(CodecError::Truncated);
    }
    Ok(buf.get_u16())
}

fn read_string(buf: &mut Bytes) -> Result<String, CodecError> {
    let len = read_u16(buf)? as usize;
    if buf.remaining() < len {
        return Err(CodecError::Truncated);
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
}

// =============================================================================
// Encoding
// =============================================================================

impl Encoder<Packet> for MqttCodec {
    type Error = CodecError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), CodecError> {
        let mut body = BytesMut::new();

        let header = match packet {
            Packet::Connect(connect) => {
                put_string(&mut body, PROTOCOL_NAME)?;
                body.put_u8(PROTOCOL_LEVEL);
                body.put_u8(if connect.clean_session { 0x02 } else { 0x00 });
                body.put_u16(connect.keep_alive);
                put_string(&mut body, &connect.client_id)?;
                CONNECT << 4
            }
            Packet::ConnAck {
                session_present,
                return_code,
            } => {
                body.put_u8(session_present as u8);
                body.put_u8(return_code);
                CONNACK << 4
            }
            Packet::Publish(publish) => {
                put_string(&mut body, &publish.topic)?;
                if let Some(packet_id) = publish.packet_id {
                    body.put_u16(packet_id);
                }
                body.extend_from_slice(&publish.payload);
                (PUBLISH << 4)
                    | ((publish.dup as u8) << 3)
                    | (publish.qos.as_u8() << 1)
                    | publish.retain as u8
            }
            Packet::PubAck { packet_id } => {
                body.put_u16(packet_id);
                PUBACK << 4
            }
            Packet::Subscribe { packet_id, filters } => {
                body.put_u16(packet_id);
                for (filter, qos) in &filters {
                    put_string(&mut body, filter)?;
                    body.put_u8(qos.as_u8());
                }
                (SUBSCRIBE << 4) | 0b0010
            }
            Packet::SubAck {
                packet_id,
                return_codes,
            } => {
                body.put_u16(packet_id);
                body.extend_from_slice(&return_codes);
                SUBACK << 4
            }
            Packet::Unsubscribe { packet_id, filters } => {
                body.put_u16(packet_id);
                for filter in &filters {
                    put_string(&mut body, filter)?;
                }
                (UNSUBSCRIBE << 4) | 0b0010
            }
            Packet::UnsubAck { packet_id } => {
                body.put_u16(packet_id);
                UNSUBACK << 4
            }
            Packet::PingReq => PINGREQ << 4,
            Packet::PingResp => PINGRESP << 4,
            Packet::Disconnect => DISCONNECT << 4,
        };

        if body.len() > MAX_REMAINING_LENGTH {
            return Err(CodecError::PacketTooLarge {
                size: body.len(),
                max: MAX_REMAINING_LENGTH,
            });
        }

        dst.reserve(body.len() + 5);
        dst.put_u8(header);
        put_remaining_length(dst, body.len());
        dst.extend_from_slice(&body);
        Ok(())
    }
}

fn put_remaining_length(dst: &mut BytesMut, mut len: usize) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        dst.put_u8(byte);
        if len == 0 {
            break;
        }
    }
}

fn put_string(dst: &mut BytesMut, s: &str) -> Result<(), CodecError> {
    let len = u16::try_from(s.len()).map_err(|_| CodecError::StringTooLong { len: s.len() })?;
    dst.put_u16(len);
    dst.extend_from_slice(s.as_bytes());
    Ok(())
}
