//! Per-connection session data and the socket-facing half of a connection.
//!
//! A [`ConnectionContext`] owns the write half of the socket and is the
//! protocol handler's only route to the network; the read half lives in the
//! task loop directly (see [`crate::protocol::serve`]) since only that task
//! ever reads it.

use num_bigint::BigUint;
use pauth_common::wire::{self, Envelope, ErrorKind, WireError};
use pauth_store::models::User;
use std::net::SocketAddr;
use tokio::net::tcp::OwnedWriteHalf;

/// Where a connection sits before and during the handshake (spec.md §4.6).
/// `Closed` is not modeled here — it is the task loop simply returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPhase {
    /// Nothing accepted yet except a `HANDSHAKE_REQ`.
    Init,
    /// `GROUP_SELECTION` sent; waiting for the client's confirming frame.
    AwaitingHandshakeConfirm,
    /// Handshake complete; the full state machine is live.
    Handshaked,
}

/// The session-phase half of the state machine, derived from which
/// [`SessionData`] fields are populated rather than tracked redundantly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Anonymous,
    AwaitingChallengeResponse,
    Authenticated,
}

/// Per-connection session state (spec.md §3). `user` being set is exactly
/// what `is_authenticated()` means; `temp_pk`/`challenge` are only ever
/// populated between `AUTH_REQUEST` and the matching `AUTH_RESPONSE`.
#[derive(Debug, Clone, Default)]
pub struct SessionData {
    pub user: Option<User>,
    pub logged_device: Option<String>,
    pub login_time: Option<chrono::DateTime<chrono::Utc>>,
    pub temp_pk: Option<BigUint>,
    pub challenge: Option<BigUint>,
    /// The username an in-flight `AUTH_REQUEST` named. Not part of spec.md's
    /// data model proper, but the server needs *some* way to remember whose
    /// challenge this is between request and response since `AUTH_RESPONSE`
    /// carries no username of its own.
    pub pending_username: Option<String>,
    /// The device name this (secondary) connection asked to pair as, kept
    /// from `ASSOC_REQUEST` until the primary's confirmation arrives over
    /// the inbox channel so this connection can populate its own session.
    pub pairing_device_name: Option<String>,
}

impl SessionData {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn phase(&self) -> SessionPhase {
        if self.is_authenticated() {
            SessionPhase::Authenticated
        } else if self.challenge.is_some() {
            SessionPhase::AwaitingChallengeResponse
        } else {
            SessionPhase::Anonymous
        }
    }

    /// Drop the in-flight challenge without touching `user`/`logged_device`.
    /// Used both on a rejected `AUTH_RESPONSE` (Design Notes §9.1) and as
    /// part of a full [`Self::clear`].
    pub fn clear_challenge(&mut self) {
        self.temp_pk = None;
        self.challenge = None;
        self.pending_username = None;
    }

    /// Reset to `ANONYMOUS`, as on `LOGOUT`.
    pub fn clear(&mut self) {
        *self = SessionData::default();
    }
}

/// Owns the connection's write half and its session state. After `close()`,
/// every send becomes a no-op, matching spec.md §4.5.
pub struct ConnectionContext {
    write: OwnedWriteHalf,
    pub peer_addr: SocketAddr,
    pub session: SessionData,
    pub channel_phase: ChannelPhase,
    closed: bool,
}

impl ConnectionContext {
    pub fn new(write: OwnedWriteHalf, peer_addr: SocketAddr) -> Self {
        Self {
            write,
            peer_addr,
            session: SessionData::default(),
            channel_phase: ChannelPhase::Init,
            closed: false,
        }
    }

    /// Send a typed envelope. A no-op, not an error, once the connection is
    /// closed — callers that only ever call through this context never need
    /// to special-case "already closed".
    pub async fn send(&mut self, envelope: Envelope) -> Result<(), WireError> {
        if self.closed {
            return Ok(());
        }
        if let Err(err) = wire::write_frame(&mut self.write, envelope).await {
            self.closed = true;
            return Err(err);
        }
        Ok(())
    }

    pub async fn send_error(&mut self, kind: ErrorKind, details: Option<&str>) -> Result<(), WireError> {
        self.send(Envelope::error(kind, details)).await
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
