use bytes::Bytes;

mod connack;
mod connect;
mod disconnect;
mod pingreq;
mod pingresp;
mod puback;
mod pubcomp;
mod publish;
mod pubrec;
mod pubrel;
mod suback;
mod subscribe;
mod unsuback;
mod unsubscribe;

pub use connack::ConnAckPacket;
pub use connect::{ConnectFlags, ConnectPacket, Will, PROTOCOL_LEVEL, PROTOCOL_NAME};
pub use disconnect::DisconnectPacket;
pub use pingreq::PingReqPacket;
pub use pingresp::PingRespPacket;
pub use puback::PubAckPacket;
pub use pubcomp::PubCompPacket;
pub use publish::PublishPacket;
pub use pubrec::PubRecPacket;
pub use pubrel::PubRelPacket;
pub use suback::SubAckPacket;
pub use subscribe::{SubscribePacket, TopicRequest};
pub use unsuback::UnsubAckPacket;
pub use unsubscribe::UnsubscribePacket;

use core::fmt::Display;

use crate::{
    err::{DecodeError, DecodeErrorKind, EncodeError},
    io::decode_packet_length,
};

const PACKET_TYPE_BITS: u8 = 0b1111_0000;
const PACKET_FLAG_BITS: u8 = 0b0000_1111;

pub fn decode_packet(f_header: FixedHeader, buf: &mut Bytes) -> Result<MqttPacket, DecodeError> {
    return MqttPacket::decode(f_header, buf);
}

#[derive(PartialEq, Debug, Clone)]
pub enum MqttPacket {
    Connect(ConnectPacket),
    ConnAck(ConnAckPacket),
    Publish(PublishPacket),
    PubAck(PubAckPacket),
    PubRec(PubRecPacket),
    PubRel(PubRelPacket),
    PubComp(PubCompPacket),
    Subscribe(SubscribePacket),
    SubAck(SubAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubAck(UnsubAckPacket),
    PingReq(PingReqPacket),
    PingResp(PingRespPacket),
    Disconnect(DisconnectPacket),
}

impl MqttPacket {
    pub fn decode(f_header: FixedHeader, bytes: &mut Bytes) -> Result<Self, DecodeError> {
        return match f_header.type_ {
            PacketType::CONNECT => Ok(Self::Connect(ConnectPacket::decode(bytes)?)),
            PacketType::CONNACK => Ok(Self::ConnAck(ConnAckPacket::decode(bytes)?)),
            PacketType::PUBLISH => Ok(Self::Publish(PublishPacket::decode(f_header, bytes)?)),
            PacketType::PUBACK => Ok(Self::PubAck(PubAckPacket::decode(f_header, bytes)?)),
            PacketType::PUBREC => Ok(Self::PubRec(PubRecPacket::decode(f_header, bytes)?)),
            PacketType::PUBREL => Ok(Self::PubRel(PubRelPacket::decode(f_header, bytes)?)),
            PacketType::PUBCOMP => Ok(Self::PubComp(PubCompPacket::decode(f_header, bytes)?)),
            PacketType::SUBSCRIBE => Ok(Self::Subscribe(SubscribePacket::decode(bytes)?)),
            PacketType::SUBACK => Ok(Self::SubAck(SubAckPacket::decode(bytes)?)),
            PacketType::UNSUBSCRIBE => Ok(Self::Unsubscribe(UnsubscribePacket::decode(bytes)?)),
            PacketType::UNSUBACK => Ok(Self::UnsubAck(UnsubAckPacket::decode(f_header, bytes)?)),
            PacketType::PINGREQ => Ok(Self::PingReq(PingReqPacket::decode(f_header)?)),
            PacketType::PINGRESP => Ok(Self::PingResp(PingRespPacket::decode(f_header)?)),
            PacketType::DISCONNECT => Ok(Self::Disconnect(DisconnectPacket::decode(f_header)?)),
        };
    }

    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        return match self {
            Self::Connect(packet) => packet.encode(),
            Self::ConnAck(packet) => Ok(packet.encode()),
            Self::Publish(packet) => packet.encode(),
            Self::PubAck(packet) => Ok(packet.encode()),
            Self::PubRec(packet) => Ok(packet.encode()),
            Self::PubRel(packet) => Ok(packet.encode()),
            Self::PubComp(packet) => Ok(packet.encode()),
            Self::Subscribe(packet) => packet.encode(),
            Self::SubAck(packet) => packet.encode(),
            Self::Unsubscribe(packet) => packet.encode(),
            Self::UnsubAck(packet) => Ok(packet.encode()),
            Self::PingReq(packet) => Ok(packet.encode()),
            Self::PingResp(packet) => Ok(packet.encode()),
            Self::Disconnect(packet) => Ok(packet.encode()),
        };
    }
}

#[derive(Copy, Clone, Debug)]
pub struct FixedHeader {
    pub type_: PacketType,
    pub flags: HeaderFlags,
    rest_len: usize,
    header_len: usize,
}

impl FixedHeader {
    pub fn decode(bytes: &mut Bytes) -> Result<Self, DecodeError> {
        if bytes.len() == 0 {
            return Err(DecodeError::new(
                DecodeErrorKind::ShortBuffer,
                String::from("Received a packet of length zero."),
            ));
        }

        let byte = bytes[0];
        let type_ = PacketType::try_from(byte)?;
        let flags = HeaderFlags::try_from((type_, byte))?;

        let (header_len, rest_len) = decode_packet_length(bytes)?;

        return Ok(Self {
            type_,
            flags,
            header_len,
            rest_len,
        });
    }

    pub fn header_len(&self) -> usize {
        return self.header_len;
    }

    pub fn rest_len(&self) -> usize {
        return self.rest_len;
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct HeaderFlags {
    byte: u8,
}

impl HeaderFlags {
    pub fn as_byte(&self) -> u8 {
        return self.byte & PACKET_FLAG_BITS;
    }
}

impl TryFrom<(PacketType, u8)> for HeaderFlags {
    type Error = DecodeError;

    fn try_from((type_, byte): (PacketType, u8)) -> Result<Self, DecodeError> {
        match type_ {
            PacketType::PUBLISH => {
                // the flag nibble carries dup/QoS/retain, validated by the
                // PUBLISH decoder itself.
            }
            PacketType::PUBREL | PacketType::SUBSCRIBE | PacketType::UNSUBSCRIBE => {
                // these packet types require the flag nibble to be 0010.
                if byte & PACKET_FLAG_BITS != 2 {
                    return Err(DecodeError::new(
                        DecodeErrorKind::FlagBits,
                        format!(
                            "Invalid flag bits {:#06b} for packet type {type_}, the nibble must be 0010.",
                            byte & PACKET_FLAG_BITS
                        ),
                    ));
                }
            }
            _ => {
                // all other packets must have a zeroed flag nibble.
                if byte & PACKET_FLAG_BITS != 0 {
                    return Err(DecodeError::new(
                        DecodeErrorKind::FlagBits,
                        format!(
                            "Invalid flag bits {:#06b} for packet type {type_}, the nibble must be 0000.",
                            byte & PACKET_FLAG_BITS
                        ),
                    ));
                }
            }
        }
        return Ok(Self { byte });
    }
}

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum PacketType {
    CONNECT = 0b0001_0000,
    CONNACK = 0b0010_0000,
    PUBLISH = 0b0011_0000,
    PUBACK = 0b0100_0000,
    PUBREC = 0b0101_0000,
    PUBREL = 0b0110_0000,
    PUBCOMP = 0b0111_0000,
    SUBSCRIBE = 0b1000_0000,
    SUBACK = 0b1001_0000,
    UNSUBSCRIBE = 0b1010_0000,
    UNSUBACK = 0b1011_0000,
    PINGREQ = 0b1100_0000,
    PINGRESP = 0b1101_0000,
    DISCONNECT = 0b1110_0000,
}

impl TryFrom<u8> for PacketType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, DecodeError> {
        // only the most significant nibble carries the type.
        let out = match value & PACKET_TYPE_BITS {
            0x10 => Self::CONNECT,
            0x20 => Self::CONNACK,
            0x30 => Self::PUBLISH,
            0x40 => Self::PUBACK,
            0x50 => Self::PUBREC,
            0x60 => Self::PUBREL,
            0x70 => Self::PUBCOMP,
            0x80 => Self::SUBSCRIBE,
            0x90 => Self::SUBACK,
            0xA0 => Self::UNSUBSCRIBE,
            0xB0 => Self::UNSUBACK,
            0xC0 => Self::PINGREQ,
            0xD0 => Self::PINGRESP,
            0xE0 => Self::DISCONNECT,
            _ => {
                return Err(DecodeError::new(
                    DecodeErrorKind::PacketType,
                    format!("Byte {value:#04x} does not carry a valid packet type."),
                ))
            }
        };
        return Ok(out);
    }
}

impl Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CONNECT => write!(f, "CONNECT"),
            Self::CONNACK => write!(f, "CONNACK"),
            Self::PUBLISH => write!(f, "PUBLISH"),
            Self::PUBACK => write!(f, "PUBACK"),
            Self::PUBREC => write!(f, "PUBREC"),
            Self::PUBREL => write!(f, "PUBREL"),
            Self::PUBCOMP => write!(f, "PUBCOMP"),
            Self::SUBSCRIBE => write!(f, "SUBSCRIBE"),
            Self::SUBACK => write!(f, "SUBACK"),
            Self::UNSUBSCRIBE => write!(f, "UNSUBSCRIBE"),
            Self::UNSUBACK => write!(f, "UNSUBACK"),
            Self::PINGREQ => write!(f, "PINGREQ"),
            Self::PINGRESP => write!(f, "PINGRESP"),
            Self::DISCONNECT => write!(f, "DISCONNECT"),
        }
    }
}
