use std::{error::Error, fmt::Display};

#[derive(Debug, Clone)]
pub struct DecodeError {
    kind: DecodeErrorKind,
    message: String,
}

impl DecodeError {
    pub fn new(kind: DecodeErrorKind, message: String) -> Self {
        return Self { kind, message };
    }

    pub fn kind(&self) -> DecodeErrorKind {
        return self.kind;
    }

    pub fn message(&self) -> &str {
        return &self.message;
    }
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl Error for DecodeError {}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DecodeErrorKind {
    ShortBuffer,
    MalformedLength,
    PacketType,
    FlagBits,
    QoS,
    WillQoS,
    Will,
    UsernamePassword,
    Utf8ParseError,
    InvalidProtocol,
    InvalidReturnCode,
    MalformedTopic,
    ProtocolError,
}

#[derive(Debug, Clone)]
pub struct EncodeError {
    kind: EncodeErrorKind,
    message: String,
}

impl EncodeError {
    pub fn new(kind: EncodeErrorKind, message: String) -> Self {
        return Self { kind, message };
    }

    pub fn kind(&self) -> EncodeErrorKind {
        return self.kind;
    }

    pub fn message(&self) -> &str {
        return &self.message;
    }
}

impl Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl Error for EncodeError {}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EncodeErrorKind {
    OversizedPayload,
}

pub mod broker {
    use std::fmt::Display;

    use tokio::io;

    use crate::ConnectReturnCode;

    use super::{DecodeError, EncodeError};

    #[derive(Debug)]
    pub struct BrokerError {
        kind: ErrorKind,
        message: String,
    }

    #[derive(Debug)]
    pub enum ErrorKind {
        DecodeError,
        EncodeError,
        IoError(io::Error),
        ProtocolError,
        ConnectError(ConnectReturnCode),
        StoreError,
        Timeout,
    }

    impl Display for ErrorKind {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            return write!(f, "{:?}", self);
        }
    }

    impl BrokerError {
        pub fn new(kind: ErrorKind, message: String) -> Self {
            Self { kind, message }
        }

        pub fn kind(&self) -> &ErrorKind {
            return &self.kind;
        }

        pub fn message(&self) -> &str {
            return &self.message;
        }

        /// True when the underlying cause is the peer closing the stream
        /// rather than a fault in the session itself.
        pub fn is_disconnect(&self) -> bool {
            match &self.kind {
                ErrorKind::IoError(err) => {
                    return err.kind() == io::ErrorKind::UnexpectedEof
                        || err.kind() == io::ErrorKind::ConnectionReset;
                }
                _ => return false,
            }
        }
    }

    impl From<DecodeError> for BrokerError {
        fn from(value: DecodeError) -> Self {
            return Self {
                kind: ErrorKind::DecodeError,
                message: value.message,
            };
        }
    }

    impl From<EncodeError> for BrokerError {
        fn from(value: EncodeError) -> Self {
            return Self {
                kind: ErrorKind::EncodeError,
                message: value.message,
            };
        }
    }

    impl From<io::Error> for BrokerError {
        fn from(value: io::Error) -> Self {
            return Self {
                kind: ErrorKind::IoError(value),
                message: String::new(),
            };
        }
    }

    impl Display for BrokerError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            return write!(f, "{}. {}", self.kind, self.message);
        }
    }

    impl std::error::Error for BrokerError {}
}
