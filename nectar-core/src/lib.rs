use core::fmt::Display;

use err::{DecodeError, DecodeErrorKind};

pub mod err;
pub mod io;
pub mod qos;
pub mod v3;

/*
 * The values the Server is allowed to return in the second byte of a
 * CONNACK variable header. Any value above 5 is reserved by the protocol.
 */
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectReturnCode {
    Accepted = 0,
    BadProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadUsernameOrPassword = 4,
    NotAuthorized = 5,
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, DecodeError> {
        match value {
            0 => return Ok(Self::Accepted),
            1 => return Ok(Self::BadProtocolVersion),
            2 => return Ok(Self::IdentifierRejected),
            3 => return Ok(Self::ServerUnavailable),
            4 => return Ok(Self::BadUsernameOrPassword),
            5 => return Ok(Self::NotAuthorized),
            _ => {
                return Err(DecodeError::new(
                    DecodeErrorKind::InvalidReturnCode,
                    format!("Return code {value} is invalid, only values 0-5 are allowed."),
                ))
            }
        }
    }
}

impl Display for ConnectReturnCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted => write!(f, "Connection accepted"),
            Self::BadProtocolVersion => write!(f, "Unacceptable protocol version"),
            Self::IdentifierRejected => write!(f, "Identifier rejected"),
            Self::ServerUnavailable => write!(f, "Server unavailable"),
            Self::BadUsernameOrPassword => write!(f, "Bad username or password"),
            Self::NotAuthorized => write!(f, "Not authorized"),
        }
    }
}
