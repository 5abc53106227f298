use crate::{
    err::{DecodeError, DecodeErrorKind},
    io::decode_u8,
    v3::PacketType,
    ConnectReturnCode,
};
use bytes::{BufMut, Bytes, BytesMut};

/*
 * The CONNACK packet is sent by the Server in response to a CONNECT packet.
 * The first packet sent from the Server to the Client MUST be a CONNACK
 * packet [MQTT-3.2.0-1]. Its remaining length is always 2: the session
 * present byte and the return code.
 */
#[derive(PartialEq, Debug, Clone)]
pub struct ConnAckPacket {
    session_present: bool,
    return_code: ConnectReturnCode,
}

impl ConnAckPacket {
    pub fn new(session_present: bool, return_code: ConnectReturnCode) -> Self {
        return Self {
            session_present,
            return_code,
        };
    }

    pub fn accepted() -> Self {
        return Self::new(true, ConnectReturnCode::Accepted);
    }

    pub fn bad_protocol_version() -> Self {
        return Self::new(false, ConnectReturnCode::BadProtocolVersion);
    }

    pub fn invalid_identifier() -> Self {
        return Self::new(false, ConnectReturnCode::IdentifierRejected);
    }

    pub fn service_unavailable() -> Self {
        return Self::new(false, ConnectReturnCode::ServerUnavailable);
    }

    pub fn bad_auth() -> Self {
        return Self::new(false, ConnectReturnCode::BadUsernameOrPassword);
    }

    pub fn not_auth() -> Self {
        return Self::new(false, ConnectReturnCode::NotAuthorized);
    }

    pub fn decode(bytes: &mut Bytes) -> Result<Self, DecodeError> {
        let ack_flags = decode_u8(bytes)?;

        // bits 7-1 of the acknowledge flags are reserved and must be zero.
        if ack_flags & 0b1111_1110 != 0 {
            return Err(DecodeError::new(
                DecodeErrorKind::ProtocolError,
                format!("Reserved connect acknowledge bits were set: {ack_flags:#010b}."),
            ));
        }

        let return_code = decode_u8(bytes)?.try_into()?;

        return Ok(Self {
            session_present: ack_flags != 0,
            return_code,
        });
    }

    pub fn encode(&self) -> Bytes {
        let mut bytes = BytesMut::with_capacity(4);

        bytes.put_u8(PacketType::CONNACK as u8);
        bytes.put_u8(2);
        bytes.put_u8(self.session_present as u8);
        bytes.put_u8(self.return_code as u8);

        return bytes.into();
    }

    pub fn return_code(&self) -> ConnectReturnCode {
        return self.return_code;
    }

    pub fn session_present(&self) -> bool {
        return self.session_present;
    }

    pub fn set_session_present(&mut self, val: bool) {
        self.session_present = val;
    }
}
