use crate::{
    err::{DecodeError, DecodeErrorKind},
    v3::{FixedHeader, PacketType},
};
use bytes::{BufMut, Bytes, BytesMut};

/*
 * The final packet sent from the Client to the Server. Indicates a clean
 * disconnection: the Server MUST discard any Will Message associated with
 * the connection without publishing it [MQTT-3.14.4-3]. Header only.
 */
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug)]
pub struct DisconnectPacket;

impl DisconnectPacket {
    pub fn new() -> Self {
        return Self;
    }

    pub fn decode(f_header: FixedHeader) -> Result<Self, DecodeError> {
        if f_header.rest_len() != 0 {
            return Err(DecodeError::new(
                DecodeErrorKind::MalformedLength,
                String::from("DISCONNECT packets carry no body."),
            ));
        }

        return Ok(Self);
    }

    pub fn encode(&self) -> Bytes {
        let mut bytes = BytesMut::with_capacity(2);

        bytes.put_u8(PacketType::DISCONNECT as u8);
        bytes.put_u8(0);

        return bytes.into();
    }
}
