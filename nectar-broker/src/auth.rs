use nectar_core::err::broker::BrokerError;

/// The credential check run against a CONNECT packet before the session is
/// accepted. The broker only sees the password bytes; mapping them onto a
/// user database is the implementer's concern.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, password: Option<&[u8]>) -> Result<bool, BrokerError>;
}

/// Default handler, accepts every connection.
pub struct AcceptAll;

impl Authenticator for AcceptAll {
    fn authenticate(&self, _password: Option<&[u8]>) -> Result<bool, BrokerError> {
        return Ok(true);
    }
}
