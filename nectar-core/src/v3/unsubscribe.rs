use crate::{
    err::{DecodeError, DecodeErrorKind, EncodeError},
    io::{decode_u16, decode_utf8, encode_packet_length, encode_utf8},
    v3::PacketType,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/*
 * The UNSUBSCRIBE packet payload is a list of topics running to the end of
 * the body. The payload MUST contain at least one topic [MQTT-3.10.3-2].
 */
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Debug)]
pub struct UnsubscribePacket {
    packet_id: u16,
    topics: Vec<String>,
}

impl UnsubscribePacket {
    pub fn new(packet_id: u16, topics: Vec<String>) -> Self {
        return Self { packet_id, topics };
    }

    pub fn decode(bytes: &mut Bytes) -> Result<Self, DecodeError> {
        let packet_id = decode_u16(bytes)?;

        let mut topics = Vec::new();

        while bytes.remaining() > 0 {
            let topic = decode_utf8(bytes)?;

            if topic.is_empty() {
                return Err(DecodeError::new(
                    DecodeErrorKind::MalformedTopic,
                    String::from("UNSUBSCRIBE topic contains no bytes."),
                ));
            }

            topics.push(topic);
        }

        return Ok(Self { packet_id, topics });
    }

    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        let len = 2 + self.topics.iter().map(|topic| 2 + topic.len()).sum::<usize>();

        let mut bytes = BytesMut::with_capacity(len + 2);

        bytes.put_u8(PacketType::UNSUBSCRIBE as u8 | 0b0000_0010);
        encode_packet_length(&mut bytes, len)?;

        bytes.put_u16(self.packet_id);

        for topic in &self.topics {
            encode_utf8(&mut bytes, topic);
        }

        return Ok(bytes.into());
    }

    pub fn id(&self) -> u16 {
        return self.packet_id;
    }

    pub fn topics(&self) -> &[String] {
        return &self.topics;
    }
}
