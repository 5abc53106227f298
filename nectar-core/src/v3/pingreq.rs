use crate::{
    err::{DecodeError, DecodeErrorKind},
    v3::{FixedHeader, PacketType},
};
use bytes::{BufMut, Bytes, BytesMut};

/*
 * Sent by a Client to keep the connection alive in the absence of other
 * control packets. Header only.
 */
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug)]
pub struct PingReqPacket;

impl PingReqPacket {
    pub fn new() -> Self {
        return Self;
    }

    pub fn decode(f_header: FixedHeader) -> Result<Self, DecodeError> {
        if f_header.rest_len() != 0 {
            return Err(DecodeError::new(
                DecodeErrorKind::MalformedLength,
                String::from("PINGREQ packets carry no body."),
            ));
        }

        return Ok(Self);
    }

    pub fn encode(&self) -> Bytes {
        let mut bytes = BytesMut::with_capacity(2);

        bytes.put_u8(PacketType::PINGREQ as u8);
        bytes.put_u8(0);

        return bytes.into();
    }
}

#[cfg(test)]
mod packet {
    use bytes::Buf;

    use super::PingReqPacket;
    use crate::v3::{FixedHeader, MqttPacket};

    #[test]
    fn serialize_deserialize() {
        let packet = PingReqPacket::new();
        let mut buf = packet.encode();

        assert_eq!(&buf[..], &[0xC0, 0x00]);

        let f_header = FixedHeader::decode(&mut buf).unwrap();
        buf.advance(f_header.header_len());
        let packet_de = MqttPacket::decode(f_header, &mut buf).expect("Could not decode packet");

        assert_eq!(packet_de, MqttPacket::PingReq(packet));
    }
}
