use crate::{
    err::{DecodeError, EncodeError},
    io::{decode_u16, decode_u8, encode_packet_length},
    qos::SubAckReturnCode,
    v3::PacketType,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/*
 * A SUBACK packet confirms a SUBSCRIBE. The payload carries one return code
 * per requested topic, in the order the topics were requested
 * [MQTT-3.9.3-1].
 */
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Debug)]
pub struct SubAckPacket {
    packet_id: u16,
    return_codes: Vec<SubAckReturnCode>,
}

impl SubAckPacket {
    pub fn new(packet_id: u16, return_codes: Vec<SubAckReturnCode>) -> Self {
        return Self {
            packet_id,
            return_codes,
        };
    }

    pub fn decode(bytes: &mut Bytes) -> Result<Self, DecodeError> {
        let packet_id = decode_u16(bytes)?;

        let mut return_codes = Vec::new();

        while bytes.remaining() > 0 {
            return_codes.push(decode_u8(bytes)?.try_into()?);
        }

        return Ok(Self {
            packet_id,
            return_codes,
        });
    }

    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        let len = 2 + self.return_codes.len();

        let mut bytes = BytesMut::with_capacity(len + 2);

        bytes.put_u8(PacketType::SUBACK as u8);
        encode_packet_length(&mut bytes, len)?;

        bytes.put_u16(self.packet_id);

        for code in &self.return_codes {
            bytes.put_u8((*code).into());
        }

        return Ok(bytes.into());
    }

    pub fn id(&self) -> u16 {
        return self.packet_id;
    }

    pub fn return_codes(&self) -> &[SubAckReturnCode] {
        return &self.return_codes;
    }
}

#[cfg(test)]
mod packet {
    use bytes::Buf;

    use super::SubAckPacket;
    use crate::{
        qos::{QosLevel, SubAckReturnCode},
        v3::{FixedHeader, MqttPacket},
    };

    #[test]
    fn serialize_deserialize() {
        let packet = SubAckPacket::new(
            1234,
            vec![
                SubAckReturnCode::Granted(QosLevel::AtLeastOnce),
                SubAckReturnCode::Failure,
            ],
        );
        let mut buf = packet.encode().unwrap();

        let f_header = FixedHeader::decode(&mut buf).unwrap();
        buf.advance(f_header.header_len());
        let packet_de = MqttPacket::decode(f_header, &mut buf).expect("Could not decode packet");

        assert_eq!(packet_de, MqttPacket::SubAck(packet));
    }

    #[test]
    fn wire_bytes() {
        let packet = SubAckPacket::new(1, vec![SubAckReturnCode::Granted(QosLevel::AtMostOnce)]);
        let buf = packet.encode().unwrap();

        assert_eq!(&buf[..], &[0x90, 0x03, 0x00, 0x01, 0x00]);
    }
}
