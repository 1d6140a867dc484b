//! Wire framing and the message envelope.
//!
//! Every message is a single JSON object, UTF-8 encoded, sent in one write.
//! Receives are capped at [`MAX_FRAME_BYTES`] per message; anything the
//! codec cannot parse, or any dropped/reset connection, collapses to
//! "connection terminated" at this layer — the protocol handler decides
//! whether that warrants an error frame first.

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Per-message read ceiling. A single logical message larger than this is a
/// framing error, not a truncated-but-recoverable read.
pub const MAX_FRAME_BYTES: usize = 4096;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("message exceeds the {MAX_FRAME_BYTES}-byte frame limit")]
    FrameTooLarge,
    #[error("failed to write frame: {0}")]
    Write(#[from] std::io::Error),
}

/// Stable, wire-compatible message kinds. Implementers MUST preserve these
/// exact numeric codes (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Register,
    GroupSelection,
    Error,
    Challenge,
    AuthRequest,
    AuthResponse,
    Accepted,
    Rejected,
    Registered,
    AssocRequest,
    TokenAssoc,
    Logout,
    HandshakeReq,
    HandshakeRes,
    LoggedOut,
}

impl MessageKind {
    pub const fn code(self) -> u8 {
        match self {
            MessageKind::Register => 0,
            MessageKind::GroupSelection => 1,
            MessageKind::Error => 2,
            MessageKind::Challenge => 3,
            MessageKind::AuthRequest => 4,
            MessageKind::AuthResponse => 5,
            MessageKind::Accepted => 6,
            MessageKind::Rejected => 7,
            MessageKind::Registered => 8,
            MessageKind::AssocRequest => 9,
            MessageKind::TokenAssoc => 10,
            MessageKind::Logout => 11,
            MessageKind::HandshakeReq => 12,
            MessageKind::HandshakeRes => 13,
            MessageKind::LoggedOut => 14,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            MessageKind::Register => "REGISTER",
            MessageKind::GroupSelection => "GROUP_SELECTION",
            MessageKind::Error => "ERROR",
            MessageKind::Challenge => "CHALLENGE",
            MessageKind::AuthRequest => "AUTH_REQUEST",
            MessageKind::AuthResponse => "AUTH_RESPONSE",
            MessageKind::Accepted => "ACCEPTED",
            MessageKind::Rejected => "REJECTED",
            MessageKind::Registered => "REGISTERED",
            MessageKind::AssocRequest => "ASSOC_REQUEST",
            MessageKind::TokenAssoc => "TOKEN_ASSOC",
            MessageKind::Logout => "LOGOUT",
            MessageKind::HandshakeReq => "HANDSHAKE_REQ",
            MessageKind::HandshakeRes => "HANDSHAKE_RES",
            MessageKind::LoggedOut => "LOGGED_OUT",
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        use MessageKind::*;
        const ALL: [MessageKind; 15] = [
            Register, GroupSelection, Error, Challenge, AuthRequest, AuthResponse, Accepted,
            Rejected, Registered, AssocRequest, TokenAssoc, Logout, HandshakeReq, HandshakeRes,
            LoggedOut,
        ];
        ALL.into_iter().find(|k| k.code() == code)
    }

    pub fn from_label(label: &str) -> Option<Self> {
        use MessageKind::*;
        const ALL: [MessageKind; 15] = [
            Register, GroupSelection, Error, Challenge, AuthRequest, AuthResponse, Accepted,
            Rejected, Registered, AssocRequest, TokenAssoc, Logout, HandshakeReq, HandshakeRes,
            LoggedOut,
        ];
        ALL.into_iter().find(|k| k.label() == label)
    }
}

/// Stable, wire-compatible error kinds (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UsernameAlreadyExists,
    UsernameNotFound,
    UnknownError,
    SessionNotFound,
    NoMainDevice,
    MalformedMessage,
    TokenInvalidOrExpired,
    Unauthorized,
    DeviceAlreadyRegistered,
    AssocFailure,
}

impl ErrorKind {
    pub const fn code(self) -> u8 {
        match self {
            ErrorKind::UsernameAlreadyExists => 0,
            ErrorKind::UsernameNotFound => 1,
            ErrorKind::UnknownError => 2,
            ErrorKind::SessionNotFound => 3,
            ErrorKind::NoMainDevice => 4,
            ErrorKind::MalformedMessage => 5,
            ErrorKind::TokenInvalidOrExpired => 6,
            ErrorKind::Unauthorized => 7,
            ErrorKind::DeviceAlreadyRegistered => 8,
            ErrorKind::AssocFailure => 9,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            ErrorKind::UsernameAlreadyExists => "USERNAME_ALREADY_EXISTS",
            ErrorKind::UsernameNotFound => "USERNAME_NOT_FOUND",
            ErrorKind::UnknownError => "UNKNOWN_ERROR",
            ErrorKind::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorKind::NoMainDevice => "NO_MAIN_DEVICE",
            ErrorKind::MalformedMessage => "MALFORMED_MESSAGE",
            ErrorKind::TokenInvalidOrExpired => "TOKEN_INVALID_OR_EXPIRED",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::DeviceAlreadyRegistered => "DEVICE_ALREADY_REGISTERED",
            ErrorKind::AssocFailure => "ASSOC_FAILURE",
        }
    }

    /// Human-readable message, the `message` field sent alongside `error`.
    pub fn message(self) -> &'static str {
        match self {
            ErrorKind::UsernameAlreadyExists => "Username already exists",
            ErrorKind::UsernameNotFound => "Username not found",
            ErrorKind::UnknownError => "Unknown error",
            ErrorKind::SessionNotFound => "Session not found",
            ErrorKind::NoMainDevice => "Confirming device is not the primary device",
            ErrorKind::MalformedMessage => "Malformed message",
            ErrorKind::TokenInvalidOrExpired => "Pairing token is invalid or expired",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::DeviceAlreadyRegistered => "Device already registered",
            ErrorKind::AssocFailure => "Device pairing failed",
        }
    }
}

/// A parsed or about-to-be-sent message envelope: `{type_code, type, ...}`.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub kind: MessageKind,
    /// Kind-specific fields beyond `type_code`/`type`.
    pub fields: Map<String, Value>,
}

impl Envelope {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Build an ERROR envelope with the standard `error_code`/`error`/`message` trio.
    pub fn error(kind: ErrorKind, details: Option<&str>) -> Self {
        let mut env = Envelope::new(MessageKind::Error)
            .with_field("error_code", kind.code())
            .with_field("error", kind.label())
            .with_field("message", kind.message());
        if let Some(details) = details {
            env.fields.insert("details".into(), Value::String(details.into()));
        }
        env
    }

    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    fn into_value(self) -> Value {
        let mut map = self.fields;
        map.insert("type_code".into(), Value::from(self.kind.code()));
        map.insert("type".into(), Value::from(self.kind.label()));
        Value::Object(map)
    }

    fn from_value(value: Value) -> Option<Self> {
        let mut map = match value {
            Value::Object(map) => map,
            _ => return None,
        };
        // Prefer the numeric code; fall back to the label if the code is
        // missing or unrecognized so lenient clients that only send `type`
        // still work.
        let kind = map
            .get("type_code")
            .and_then(Value::as_u64)
            .and_then(|c| MessageKind::from_code(c as u8))
            .or_else(|| map.get("type").and_then(Value::as_str).and_then(MessageKind::from_label))?;
        map.remove("type_code");
        map.remove("type");
        Some(Envelope { kind, fields: map })
    }
}

/// Read one framed message off `stream`.
///
/// Returns `Ok(None)` for EOF, a reset peer, or a syntactically invalid
/// frame — all of these collapse to "connection terminated" at this layer.
/// Returns `Err(WireError::FrameTooLarge)` only when the read filled the
/// entire frame buffer, meaning the logical message did not fit.
pub async fn read_frame(
    stream: &mut (impl tokio::io::AsyncRead + Unpin),
) -> Result<Option<Envelope>, WireError> {
    let mut buf = vec![0u8; MAX_FRAME_BYTES];
    let n = match stream.read(&mut buf).await {
        Ok(n) => n,
        Err(_) => return Ok(None),
    };
    if n == 0 {
        return Ok(None);
    }
    if n == MAX_FRAME_BYTES {
        return Err(WireError::FrameTooLarge);
    }
    buf.truncate(n);
    let value: Value = match serde_json::from_slice(&buf) {
        Ok(v) => v,
        Err(_) => return Ok(None),
    };
    Ok(Envelope::from_value(value))
}

/// Write one framed message to `stream` in a single logical send.
pub async fn write_frame(
    stream: &mut (impl tokio::io::AsyncWrite + Unpin),
    envelope: Envelope,
) -> Result<(), WireError> {
    let bytes = serde_json::to_vec(&envelope.into_value()).expect("Value always serializes");
    stream.write_all(&bytes).await?;
    Ok(())
}

/// Parse a hex big-integer string that may carry an optional `0x` prefix.
pub fn parse_hex_biguint(s: &str) -> Option<num_bigint::BigUint> {
    let trimmed = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    num_bigint::BigUint::parse_bytes(trimmed.as_bytes(), 16)
}

/// Format a big integer as a `0x`-prefixed hex string, as the spec requires
/// for server-emitted challenge/response values.
pub fn format_hex_biguint(n: &num_bigint::BigUint) -> String {
    format!("0x{}", n.to_str_radix(16))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_spec_table() {
        assert_eq!(MessageKind::Register.code(), 0);
        assert_eq!(MessageKind::GroupSelection.code(), 1);
        assert_eq!(MessageKind::Error.code(), 2);
        assert_eq!(MessageKind::Challenge.code(), 3);
        assert_eq!(MessageKind::AuthRequest.code(), 4);
        assert_eq!(MessageKind::AuthResponse.code(), 5);
        assert_eq!(MessageKind::Accepted.code(), 6);
        assert_eq!(MessageKind::Rejected.code(), 7);
        assert_eq!(MessageKind::Registered.code(), 8);
        assert_eq!(MessageKind::AssocRequest.code(), 9);
        assert_eq!(MessageKind::TokenAssoc.code(), 10);
        assert_eq!(MessageKind::Logout.code(), 11);
        assert_eq!(MessageKind::HandshakeReq.code(), 12);
        assert_eq!(MessageKind::HandshakeRes.code(), 13);
        assert_eq!(MessageKind::LoggedOut.code(), 14);
    }

    #[test]
    fn error_codes_match_spec_table() {
        assert_eq!(ErrorKind::UsernameAlreadyExists.code(), 0);
        assert_eq!(ErrorKind::AssocFailure.code(), 9);
    }

    #[tokio::test]
    async fn round_trips_through_an_in_memory_duplex() {
        let (mut a, mut b) = tokio::io::duplex(8192);
        let env = Envelope::new(MessageKind::Challenge).with_field("challenge", "0x7");
        write_frame(&mut a, env).await.unwrap();
        let got = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(got.kind, MessageKind::Challenge);
        assert_eq!(got.field_str("challenge"), Some("0x7"));
    }

    #[test]
    fn hex_parsing_accepts_both_prefixed_and_bare() {
        assert_eq!(parse_hex_biguint("0x2"), parse_hex_biguint("2"));
        assert!(parse_hex_biguint("not-hex").is_none());
    }

    #[test]
    fn hex_formatting_always_prefixes() {
        assert_eq!(format_hex_biguint(&num_bigint::BigUint::from(2u8)), "0x2");
    }
}
