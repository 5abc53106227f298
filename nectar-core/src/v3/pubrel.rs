use crate::{
    err::{DecodeError, DecodeErrorKind},
    io::decode_u16,
    v3::{FixedHeader, PacketType},
};
use bytes::{BufMut, Bytes, BytesMut};

/*
 * A PUBREL packet is the response to a PUBREC packet, the third step of the
 * exactly-once exchange. Bits 3,2,1,0 of its fixed header are reserved and
 * MUST be 0,0,1,0 [MQTT-3.6.1-1].
 */
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug)]
pub struct PubRelPacket {
    id: u16,
}

impl PubRelPacket {
    pub fn new(id: u16) -> Self {
        return Self { id };
    }

    pub fn decode(f_header: FixedHeader, bytes: &mut Bytes) -> Result<Self, DecodeError> {
        if f_header.rest_len() != 2 {
            return Err(DecodeError::new(
                DecodeErrorKind::MalformedLength,
                String::from("PUBREL packets can only contain a packet id."),
            ));
        }

        let id = decode_u16(bytes)?;
        return Ok(Self { id });
    }

    pub fn encode(&self) -> Bytes {
        let mut bytes = BytesMut::with_capacity(4);

        bytes.put_u8(PacketType::PUBREL as u8 | 0b0000_0010);
        bytes.put_u8(2);
        bytes.put_u16(self.id);

        return bytes.into();
    }

    pub fn id(&self) -> u16 {
        return self.id;
    }
}

#[cfg(test)]
mod packet {
    use bytes::Buf;

    use super::PubRelPacket;
    use crate::v3::{FixedHeader, MqttPacket};

    #[test]
    fn serialize_deserialize() {
        let packet = PubRelPacket::new(4321);
        let mut buf = packet.encode();

        let f_header = FixedHeader::decode(&mut buf).unwrap();
        buf.advance(f_header.header_len());
        let packet_de = MqttPacket::decode(f_header, &mut buf).expect("Could not decode packet");

        assert_eq!(packet_de, MqttPacket::PubRel(packet));
    }

    #[test]
    fn wire_bytes_carry_reserved_flag_nibble() {
        assert_eq!(&PubRelPacket::new(1).encode()[..], &[0x62, 0x02, 0x00, 0x01]);
    }
}
