//! The library-level error type. Only variants that the wire layer needs to
//! translate into an [`ErrorKind`] exist here; anything else (I/O, bind
//! failures) is an `anyhow` concern at the binary layer.

use crate::wire::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("username already exists")]
    UsernameAlreadyExists,

    #[error("username not found")]
    UsernameNotFound,

    #[error("session not found")]
    SessionNotFound,

    #[error("user has no main device configured")]
    NoMainDevice,

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("pairing token invalid or expired")]
    TokenInvalidOrExpired,

    #[error("unauthorized")]
    Unauthorized,

    #[error("device already registered")]
    DeviceAlreadyRegistered,

    #[error("device pairing failed: {0}")]
    AssocFailure(String),

    #[error("unknown error: {0}")]
    Unknown(String),

    /// Never sent over the wire directly — the caller logs it and closes
    /// the connection, same as a framing failure.
    #[error(transparent)]
    Wire(#[from] crate::wire::WireError),
}

impl ProtocolError {
    pub fn as_error_kind(&self) -> ErrorKind {
        match self {
            ProtocolError::UsernameAlreadyExists => ErrorKind::UsernameAlreadyExists,
            ProtocolError::UsernameNotFound => ErrorKind::UsernameNotFound,
            ProtocolError::SessionNotFound => ErrorKind::SessionNotFound,
            ProtocolError::NoMainDevice => ErrorKind::NoMainDevice,
            ProtocolError::MalformedMessage(_) => ErrorKind::MalformedMessage,
            ProtocolError::TokenInvalidOrExpired => ErrorKind::TokenInvalidOrExpired,
            ProtocolError::Unauthorized => ErrorKind::Unauthorized,
            ProtocolError::DeviceAlreadyRegistered => ErrorKind::DeviceAlreadyRegistered,
            ProtocolError::AssocFailure(_) => ErrorKind::AssocFailure,
            ProtocolError::Unknown(_) | ProtocolError::Wire(_) => ErrorKind::UnknownError,
        }
    }

    /// Extra free-text detail to attach to the error frame, if any.
    pub fn details(&self) -> Option<String> {
        match self {
            ProtocolError::MalformedMessage(d) | ProtocolError::AssocFailure(d) | ProtocolError::Unknown(d) => {
                Some(d.clone())
            }
            _ => None,
        }
    }
}
