use crate::{
    err::{DecodeError, DecodeErrorKind, EncodeError},
    io::{decode_u16, decode_u8, decode_utf8, encode_packet_length, encode_utf8},
    qos::QosLevel,
    v3::PacketType,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/*
 * The SUBSCRIBE packet payload is a list of (topic, requested QoS) pairs
 * that runs to the end of the body; it has no element count of its own.
 * The payload MUST contain at least one pair [MQTT-3.8.3-3].
 */
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Debug)]
pub struct SubscribePacket {
    packet_id: u16,
    topics: Vec<TopicRequest>,
}

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Debug)]
pub struct TopicRequest {
    pub topic: String,
    pub qos: QosLevel,
}

impl SubscribePacket {
    pub fn new(packet_id: u16, topics: Vec<TopicRequest>) -> Self {
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
                    String::from("SUBSCRIBE topic contains no bytes."),
                ));
            }

            let qos = QosLevel::try_from(decode_u8(bytes)?)?;

            topics.push(TopicRequest { topic, qos });
        }

        return Ok(Self { packet_id, topics });
    }

    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        let len = 2 + self
            .topics
            .iter()
            .map(|req| 2 + req.topic.len() + 1)
            .sum::<usize>();

        let mut bytes = BytesMut::with_capacity(len + 2);

        bytes.put_u8(PacketType::SUBSCRIBE as u8 | 0b0000_0010);
        encode_packet_length(&mut bytes, len)?;

        bytes.put_u16(self.packet_id);

        for req in &self.topics {
            encode_utf8(&mut bytes, &req.topic);
            bytes.put_u8(req.qos as u8);
        }

        return Ok(bytes.into());
    }

    pub fn id(&self) -> u16 {
        return self.packet_id;
    }

    pub fn topics(&self) -> &[TopicRequest] {
        return &self.topics;
    }
}

#[cfg(test)]
mod packet {
    use bytes::Buf;

    use super::{SubscribePacket, TopicRequest};
    use crate::{
        qos::QosLevel,
        v3::{FixedHeader, MqttPacket},
    };

    #[test]
    fn serialize_deserialize() {
        let packet = SubscribePacket::new(
            1,
            vec![
                TopicRequest {
                    topic: "metrics/load".to_string(),
                    qos: QosLevel::AtMostOnce,
                },
                TopicRequest {
                    topic: "alerts".to_string(),
                    qos: QosLevel::ExactlyOnce,
                },
            ],
        );
        let mut buf = packet.encode().unwrap();

        let f_header = FixedHeader::decode(&mut buf).unwrap();
        buf.advance(f_header.header_len());
        let packet_de = MqttPacket::decode(f_header, &mut buf).expect("Could not decode packet");

        assert_eq!(packet_de, MqttPacket::Subscribe(packet));
    }

    #[test]
    fn wire_bytes() {
        let packet = SubscribePacket::new(
            1,
            vec![TopicRequest {
                topic: "hello".to_string(),
                qos: QosLevel::AtMostOnce,
            }],
        );
        let buf = packet.encode().unwrap();

        assert_eq!(
            &buf[..],
            &[0x82, 0x0A, 0x00, 0x01, 0x00, 0x05, b'h', b'e', b'l', b'l', b'o', 0x00]
        );
    }
}
