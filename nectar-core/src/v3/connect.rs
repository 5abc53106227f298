use crate::{
    err::{DecodeError, DecodeErrorKind, EncodeError},
    io::{decode_bytes, decode_u16, decode_u8, decode_utf8, encode_bytes, encode_packet_length, encode_utf8},
    qos::QosLevel,
    v3::PacketType,
};
use bytes::{BufMut, Bytes, BytesMut};

/*
 * After a Network Connection is established, the first packet sent from the
 * Client to the Server MUST be a CONNECT packet [MQTT-3.1.0-1].
 *
 * The variable header holds the protocol name, the protocol level, the
 * connect flags and the keep alive interval. The payload holds the client
 * identifier and, depending on the connect flags, the will topic, will
 * payload, user name and password, in that order.
 */
#[derive(Clone, PartialEq, Debug)]
pub struct ConnectPacket {
    /*
     * The Protocol Level for version 3.1.1 is 4 (0x04). The Server MUST
     * respond to an unsupported level with CONNACK return code 0x01 and
     * then disconnect the Client [MQTT-3.1.2-2], so an unexpected level is
     * carried through decode and left to the session handler.
     */
    level: u8,

    conn_flags: ConnectFlags,

    /*
     * Maximum interval in seconds permitted to elapse between two control
     * packets from the Client. The Server MUST disconnect a Client that
     * stays silent for one and a half times the Keep Alive period
     * [MQTT-3.1.2-24]. A value of zero turns the mechanism off.
     */
    pub keep_alive: u16,

    pub client_id: String,

    pub will: Option<Will>,

    username: Option<String>,

    password: Option<Bytes>,
}

impl ConnectPacket {
    pub fn decode(bytes: &mut Bytes) -> Result<Self, DecodeError> {
        let protocol_name = decode_utf8(bytes)?;

        if protocol_name != PROTOCOL_NAME {
            return Err(DecodeError::new(
                DecodeErrorKind::InvalidProtocol,
                format!("Expected protocol name \"MQTT\", received \"{protocol_name}\"."),
            ));
        }

        let level = decode_u8(bytes)?;

        let conn_flags = ConnectFlags::from_byte(decode_u8(bytes)?)?;

        let keep_alive = decode_u16(bytes)?;

        let client_id = decode_utf8(bytes)?;

        let mut will = None;

        if conn_flags.will() {
            let topic = decode_utf8(bytes)?;
            let payload = decode_bytes(bytes)?;

            will = Some(Will::new(
                topic,
                payload,
                conn_flags.will_qos(),
                conn_flags.will_retain(),
            ));
        }

        let username = if conn_flags.username() {
            Some(decode_utf8(bytes)?)
        } else {
            None
        };

        let password = if conn_flags.password() {
            Some(decode_bytes(bytes)?)
        } else {
            None
        };

        return Ok(Self {
            level,
            conn_flags,
            keep_alive,
            client_id,
            will,
            username,
            password,
        });
    }

    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        // protocol name, level byte, connect flags byte, keep alive.
        let mut len = 2 + PROTOCOL_NAME.len() + 1 + 1 + 2;

        len += 2 + self.client_id.len();

        if let Some(will) = &self.will {
            len += 2 + will.topic.len();
            len += 2 + will.payload.len();
        }

        if let Some(username) = &self.username {
            len += 2 + username.len();
        }

        if let Some(password) = &self.password {
            len += 2 + password.len();
        }

        let mut bytes = BytesMut::with_capacity(len + 2);

        bytes.put_u8(PacketType::CONNECT as u8);
        encode_packet_length(&mut bytes, len)?;

        encode_utf8(&mut bytes, PROTOCOL_NAME);
        bytes.put_u8(self.level);
        bytes.put_u8(self.conn_flags.as_byte());
        bytes.put_u16(self.keep_alive);

        encode_utf8(&mut bytes, &self.client_id);

        if let Some(will) = &self.will {
            encode_utf8(&mut bytes, &will.topic);
            encode_bytes(&mut bytes, &will.payload);
        }

        if let Some(username) = &self.username {
            encode_utf8(&mut bytes, username);
        }

        if let Some(password) = &self.password {
            encode_bytes(&mut bytes, password);
        }

        return Ok(bytes.into());
    }

    pub fn new(
        clean_session: bool,
        keep_alive: u16,
        client_id: String,
        will: Option<Will>,
        username: Option<String>,
        password: Option<Bytes>,
    ) -> Self {
        let mut conn_flags = ConnectFlags::default();

        if username.is_some() {
            conn_flags.set_username(true);
        }

        if password.is_some() {
            conn_flags.set_password(true);
        }

        if let Some(will) = &will {
            conn_flags.set_will(true);
            conn_flags.set_will_qos(will.qos);
            conn_flags.set_will_retain(will.retain);
        }

        conn_flags.set_clean_session(clean_session);

        return Self {
            level: PROTOCOL_LEVEL,
            conn_flags,
            keep_alive,
            client_id,
            will,
            username,
            password,
        };
    }

    pub fn level(&self) -> u8 {
        return self.level;
    }

    pub fn client_id(&self) -> &str {
        return &self.client_id;
    }

    pub fn clean_session(&self) -> bool {
        return self.conn_flags.clean_session();
    }

    pub fn username(&self) -> Option<&str> {
        return self.username.as_deref();
    }

    pub fn password(&self) -> Option<&[u8]> {
        return self.password.as_deref();
    }
}

pub const PROTOCOL_NAME: &str = "MQTT";
pub const PROTOCOL_LEVEL: u8 = 4;

/// The message the Server publishes on behalf of the Client when the
/// network connection closes without a DISCONNECT packet first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QosLevel,
    pub retain: bool,
}

impl Will {
    pub fn new(topic: String, payload: Bytes, qos: QosLevel, retain: bool) -> Self {
        return Self {
            topic,
            payload,
            qos,
            retain,
        };
    }
}

const USERNAME: u8 = 0b1000_0000;
const PASSWORD: u8 = 0b0100_0000;
const WILL_RETAIN: u8 = 0b0010_0000;
const WILL_QOS_BITS: u8 = 0b0001_1000;
const WILL: u8 = 0b0000_0100;
const CLEAN_SESSION: u8 = 0b0000_0010;
const RESERVED_BIT: u8 = 0b0000_0001;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct ConnectFlags {
    byte: u8,
}

impl ConnectFlags {
    pub fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        if byte & RESERVED_BIT == RESERVED_BIT {
            return Err(DecodeError::new(
                DecodeErrorKind::ProtocolError,
                format!("The reserved connect flag bit must be zero, received {byte:#010b}."),
            ));
        }

        // Will QoS may only be 0, 1 or 2 [MQTT-3.1.2-14].
        if (byte & WILL_QOS_BITS) >> 3 == 3 {
            return Err(DecodeError::new(
                DecodeErrorKind::WillQoS,
                String::from("Will QoS cannot be set to 3."),
            ));
        }

        if byte & WILL == 0 && byte & (WILL_QOS_BITS | WILL_RETAIN) != 0 {
            return Err(DecodeError::new(
                DecodeErrorKind::Will,
                format!(
                    "Will QoS or Will Retain set without the Will flag itself, received {byte:#010b}."
                ),
            ));
        }

        if byte & PASSWORD == PASSWORD && byte & USERNAME == 0 {
            return Err(DecodeError::new(
                DecodeErrorKind::UsernamePassword,
                format!("Password flag set without the Username flag, received {byte:#010b}."),
            ));
        }

        return Ok(Self { byte });
    }

    pub fn as_byte(&self) -> u8 {
        return self.byte;
    }

    pub fn will_qos(&self) -> QosLevel {
        // from_byte already rejected the value 3.
        match (self.byte & WILL_QOS_BITS) >> 3 {
            1 => return QosLevel::AtLeastOnce,
            2 => return QosLevel::ExactlyOnce,
            _ => return QosLevel::AtMostOnce,
        }
    }

    pub fn set_will_qos(&mut self, value: QosLevel) {
        self.byte = self.byte & !WILL_QOS_BITS;
        self.byte = self.byte | ((value as u8) << 3);
    }

    pub fn username(&self) -> bool {
        return self.byte & USERNAME == USERNAME;
    }

    pub fn set_username(&mut self, val: bool) {
        if val {
            self.byte = self.byte | USERNAME;
        } else {
            self.byte = self.byte & !USERNAME;
        }
    }

    pub fn password(&self) -> bool {
        return self.byte & PASSWORD == PASSWORD;
    }

    pub fn set_password(&mut self, val: bool) {
        if val {
            self.byte = self.byte | PASSWORD;
        } else {
            self.byte = self.byte & !PASSWORD;
        }
    }

    pub fn will_retain(&self) -> bool {
        return self.byte & WILL_RETAIN == WILL_RETAIN;
    }

    pub fn set_will_retain(&mut self, val: bool) {
        if val {
            self.byte = self.byte | WILL_RETAIN;
        } else {
            self.byte = self.byte & !WILL_RETAIN;
        }
    }

    pub fn will(&self) -> bool {
        return self.byte & WILL == WILL;
    }

    pub fn set_will(&mut self, val: bool) {
        if val {
            self.byte = self.byte | WILL;
        } else {
            self.byte = self.byte & !WILL;
        }
    }

    pub fn clean_session(&self) -> bool {
        return self.byte & CLEAN_SESSION == CLEAN_SESSION;
    }

    pub fn set_clean_session(&mut self, val: bool) {
        if val {
            self.byte = self.byte | CLEAN_SESSION;
        } else {
            self.byte = self.byte & !CLEAN_SESSION;
        }
    }
}

impl Default for ConnectFlags {
    fn default() -> Self {
        return Self { byte: 0 };
    }
}
