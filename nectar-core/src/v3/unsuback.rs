use crate::{
    err::{DecodeError, DecodeErrorKind},
    io::decode_u16,
    v3::{FixedHeader, PacketType},
};
use bytes::{BufMut, Bytes, BytesMut};

/// Sent by the Server to confirm receipt of an UNSUBSCRIBE packet.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug)]
pub struct UnsubAckPacket {
    id: u16,
}

impl UnsubAckPacket {
    pub fn new(id: u16) -> Self {
        return Self { id };
    }

    pub fn decode(f_header: FixedHeader, bytes: &mut Bytes) -> Result<Self, DecodeError> {
        if f_header.rest_len() != 2 {
            return Err(DecodeError::new(
                DecodeErrorKind::MalformedLength,
                String::from("UNSUBACK packets can only contain a packet id."),
            ));
        }

        let id = decode_u16(bytes)?;
        return Ok(Self { id });
    }

    pub fn encode(&self) -> Bytes {
        let mut bytes = BytesMut::with_capacity(4);

        bytes.put_u8(PacketType::UNSUBACK as u8);
        bytes.put_u8(2);
        bytes.put_u16(self.id);

        return bytes.into();
    }

    pub fn id(&self) -> u16 {
        return self.id;
    }
}
