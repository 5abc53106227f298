use crate::{
    err::{DecodeError, DecodeErrorKind, EncodeError},
    io::{decode_u16, decode_utf8, encode_packet_length, encode_utf8},
    qos::QosLevel,
    v3::{FixedHeader, PacketType},
};
use bytes::{BufMut, Bytes, BytesMut};

/*
 * A PUBLISH packet transports an Application Message in either direction.
 * The variable header holds the topic name and, when QoS is 1 or 2, a
 * packet identifier. The payload is whatever remains of the body; it has no
 * length prefix of its own.
 */
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Debug)]
pub struct PublishPacket {
    flags: PublishFlags,
    topic_name: String,
    packet_id: Option<u16>,
    payload: Bytes,
}

impl PublishPacket {
    pub fn new(topic_name: &str, payload: Bytes) -> Self {
        return Self {
            flags: PublishFlags::zero(),
            topic_name: topic_name.to_string(),
            packet_id: None,
            payload,
        };
    }

    pub fn decode(f_header: FixedHeader, bytes: &mut Bytes) -> Result<Self, DecodeError> {
        let flags = PublishFlags::from_byte(f_header.flags.as_byte())?;

        let topic_name = decode_utf8(bytes)?;

        if topic_name.is_empty() {
            return Err(DecodeError::new(
                DecodeErrorKind::MalformedTopic,
                String::from("PUBLISH topic name contains no bytes."),
            ));
        }

        let packet_id = if flags.qos() != QosLevel::AtMostOnce {
            Some(decode_u16(bytes)?)
        } else {
            None
        };

        // everything left in the body is the application payload.
        return Ok(Self {
            flags,
            topic_name,
            packet_id,
            payload: bytes.clone(),
        });
    }

    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        let mut len = 2 + self.topic_name.len();

        if self.packet_id.is_some() {
            len += 2;
        }

        len += self.payload.len();

        let mut bytes = BytesMut::with_capacity(len + 2);

        bytes.put_u8(PacketType::PUBLISH as u8 | self.flags.byte);
        encode_packet_length(&mut bytes, len)?;

        encode_utf8(&mut bytes, &self.topic_name);

        if let Some(packet_id) = self.packet_id {
            bytes.put_u16(packet_id);
        }

        bytes.put_slice(&self.payload);

        return Ok(bytes.into());
    }

    pub fn set_qos_atmostonce(&mut self) {
        self.flags.set_qos(QosLevel::AtMostOnce);
        self.packet_id = None;
    }

    pub fn set_qos_atleastonce(&mut self, packet_id: u16) {
        self.flags.set_qos(QosLevel::AtLeastOnce);
        self.packet_id = Some(packet_id);
    }

    pub fn set_qos_exactlyonce(&mut self, packet_id: u16) {
        self.flags.set_qos(QosLevel::ExactlyOnce);
        self.packet_id = Some(packet_id);
    }

    pub fn topic(&self) -> &str {
        return &self.topic_name;
    }

    pub fn qos(&self) -> QosLevel {
        return self.flags.qos();
    }

    pub fn retain(&self) -> bool {
        return self.flags.retain();
    }

    pub fn set_retain(&mut self, val: bool) {
        self.flags.set_retain(val);
    }

    pub fn dup(&self) -> bool {
        return self.flags.dup();
    }

    pub fn set_dup(&mut self, val: bool) {
        self.flags.set_dup(val);
    }

    pub fn id(&self) -> Option<u16> {
        return self.packet_id;
    }

    pub fn payload(&self) -> &Bytes {
        return &self.payload;
    }
}

const RETAIN: u8 = 0b0000_0001;

/*
 * A PUBLISH packet MUST NOT have both QoS bits set to 1; a receiver of such
 * a packet MUST close the Network Connection [MQTT-3.3.1-4].
 */
const QOS_1: u8 = 0b0000_0010;
const QOS_2: u8 = 0b0000_0100;
const QOS_BITS: u8 = 0b0000_0110;

const DUP: u8 = 0b0000_1000;

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug)]
pub struct PublishFlags {
    byte: u8,
}

impl PublishFlags {
    fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        if byte & QOS_BITS == QOS_BITS {
            return Err(DecodeError::new(
                DecodeErrorKind::QoS,
                String::from("PUBLISH packet with both QoS bits set."),
            ));
        }

        return Ok(Self {
            byte: byte & 0b0000_1111,
        });
    }

    fn zero() -> Self {
        return Self { byte: 0 };
    }

    fn qos(&self) -> QosLevel {
        match self.byte & QOS_BITS {
            QOS_1 => return QosLevel::AtLeastOnce,
            QOS_2 => return QosLevel::ExactlyOnce,
            _ => return QosLevel::AtMostOnce,
        }
    }

    fn set_qos(&mut self, val: QosLevel) {
        self.byte = self.byte & !QOS_BITS;
        self.byte = self.byte | ((val as u8) << 1);
    }

    fn retain(&self) -> bool {
        return self.byte & RETAIN == RETAIN;
    }

    fn set_retain(&mut self, val: bool) {
        if val {
            self.byte = self.byte | RETAIN;
        } else {
            self.byte = self.byte & !RETAIN;
        }
    }

    fn dup(&self) -> bool {
        return self.byte & DUP == DUP;
    }

    fn set_dup(&mut self, val: bool) {
        if val {
            self.byte = self.byte | DUP;
        } else {
            self.byte = self.byte & !DUP;
        }
    }
}
