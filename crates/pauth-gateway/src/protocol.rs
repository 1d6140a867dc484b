//! The per-connection state machine (spec.md §4.6): handshake, register,
//! authenticate, associate-request, associate-confirm, logout.
//!
//! `serve` is the task entry point spawned once per accepted connection. It
//! owns the read half of the socket directly and drives a `select!` loop
//! between the next inbound frame and this connection's cross-task inbox
//! (populated only when this connection is a secondary awaiting pairing
//! confirmation, per [`crate::registry`]).

use crate::connection::{ChannelPhase, ConnectionContext, SessionPhase};
use crate::registry::{PendingPairRegistry, ServerEvent};
use crate::schnorr;
use chrono::Utc;
use pauth_common::group::GroupParams;
use pauth_common::wire::{self, Envelope, ErrorKind, MessageKind, WireError};
use pauth_store::models::{Device, TempToken};
use pauth_store::{TokenStore, UserStore};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Everything a connection task needs to run the state machine: the shared
/// stores, the shared pairing registry, and the group this deployment
/// authenticates against.
pub struct Gateway {
    pub users: Arc<dyn UserStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub registry: PendingPairRegistry,
    pub group: &'static GroupParams,
    pub token_ttl_minutes: i64,
}

impl Gateway {
    pub fn new(
        users: Arc<dyn UserStore>,
        tokens: Arc<dyn TokenStore>,
        group: &'static GroupParams,
        token_ttl_minutes: i64,
    ) -> Self {
        Self {
            users,
            tokens,
            registry: PendingPairRegistry::new(),
            group,
            token_ttl_minutes,
        }
    }
}

/// Drive one accepted connection to completion. Never panics on protocol
/// error — only a send/receive failure or EOF ends the loop.
pub async fn serve(gateway: Arc<Gateway>, socket: TcpStream, peer_addr: SocketAddr) {
    let (mut read_half, write_half) = socket.into_split();
    let mut ctx = ConnectionContext::new(write_half, peer_addr);
    let (inbox_tx, mut inbox_rx) = mpsc::unbounded_channel::<ServerEvent>();
    let mut minted_token: Option<String> = None;

    loop {
        tokio::select! {
            frame = wire::read_frame(&mut read_half) => {
                match frame {
                    Ok(Some(envelope)) => {
                        if let Err(err) = dispatch(&gateway, &mut ctx, envelope, &inbox_tx, &mut minted_token).await {
                            tracing::warn!(peer = %peer_addr, error = %err, "send failed, closing connection");
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(WireError::FrameTooLarge) => {
                        let _ = ctx.send_error(ErrorKind::MalformedMessage, Some("frame too large")).await;
                        break;
                    }
                    Err(WireError::Write(err)) => {
                        tracing::warn!(peer = %peer_addr, error = %err, "write failed, closing connection");
                        break;
                    }
                }
            }
            Some(event) = inbox_rx.recv() => {
                handle_server_event(&gateway, &mut ctx, event).await;
            }
        }
    }

    ctx.close();
    if let Some(token) = minted_token {
        gateway.registry.remove(&token);
    }
    tracing::info!(peer = %peer_addr, "connection closed");
}

/// Apply an event posted by another connection's task (only `PairAccepted`
/// today — this is the secondary's half of transition 6).
async fn handle_server_event(gateway: &Arc<Gateway>, ctx: &mut ConnectionContext, event: ServerEvent) {
    match event {
        ServerEvent::PairAccepted { username } => {
            let device_name = ctx.session.pairing_device_name.take();
            if let Some(user) = gateway.users.find(&username) {
                ctx.session.user = Some(user);
            }
            ctx.session.logged_device = device_name;
            ctx.session.login_time = Some(Utc::now());
            let _ = ctx
                .send(Envelope::new(MessageKind::Accepted).with_field("username", username))
                .await;
        }
    }
}

/// One frame in, zero-or-more sends out. `Err` means the connection must
/// close (a send failed, the peer is gone).
async fn dispatch(
    gateway: &Arc<Gateway>,
    ctx: &mut ConnectionContext,
    envelope: Envelope,
    inbox_tx: &mpsc::UnboundedSender<ServerEvent>,
    minted_token: &mut Option<String>,
) -> Result<(), WireError> {
    match ctx.channel_phase {
        ChannelPhase::Init => {
            if envelope.kind == MessageKind::HandshakeReq {
                ctx.send(
                    Envelope::new(MessageKind::GroupSelection).with_field("group_id", gateway.group.id),
                )
                .await?;
                ctx.channel_phase = ChannelPhase::AwaitingHandshakeConfirm;
            } else {
                tracing::debug!(peer = %ctx.peer_addr, kind = ?envelope.kind, "frame dropped before handshake");
            }
            Ok(())
        }
        ChannelPhase::AwaitingHandshakeConfirm => {
            // Any non-null frame here confirms the handshake (spec.md
            // transition 1, Design Notes §9.3 names HANDSHAKE_RES as
            // canonical but any frame is tolerated).
            ctx.channel_phase = ChannelPhase::Handshaked;
            tracing::debug!(peer = %ctx.peer_addr, "handshake confirmed");
            Ok(())
        }
        ChannelPhase::Handshaked => handle_handshaked(gateway, ctx, envelope, inbox_tx, minted_token).await,
    }
}

async fn handle_handshaked(
    gateway: &Arc<Gateway>,
    ctx: &mut ConnectionContext,
    envelope: Envelope,
    inbox_tx: &mpsc::UnboundedSender<ServerEvent>,
    minted_token: &mut Option<String>,
) -> Result<(), WireError> {
    match envelope.kind {
        MessageKind::Register => handle_register(gateway, ctx, &envelope).await,
        MessageKind::AuthRequest => handle_auth_request(gateway, ctx, &envelope).await,
        MessageKind::AuthResponse => handle_auth_response(gateway, ctx, &envelope).await,
        MessageKind::AssocRequest => {
            handle_assoc_request(gateway, ctx, &envelope, inbox_tx, minted_token).await
        }
        MessageKind::TokenAssoc => handle_token_assoc_confirm(gateway, ctx, &envelope).await,
        MessageKind::Logout => handle_logout(gateway, ctx).await,
        _ => {
            tracing::debug!(peer = %ctx.peer_addr, kind = ?envelope.kind, "unknown message kind ignored");
            Ok(())
        }
    }
}

/// Pull a required non-empty string field out of an envelope, or a
/// human-readable detail for the `MALFORMED_MESSAGE` error frame.
fn field_str<'a>(envelope: &'a Envelope, key: &str) -> Result<&'a str, String> {
    envelope
        .field_str(key)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("missing or empty field `{key}`"))
}

fn field_hex_biguint(envelope: &Envelope, key: &str) -> Result<num_bigint::BigUint, String> {
    let raw = field_str(envelope, key)?;
    wire::parse_hex_biguint(raw).ok_or_else(|| format!("field `{key}` is not valid hex"))
}

/// Transition 2: `REGISTER`.
async fn handle_register(gateway: &Arc<Gateway>, ctx: &mut ConnectionContext, envelope: &Envelope) -> Result<(), WireError> {
    if ctx.session.phase() != SessionPhase::Anonymous {
        return ctx.send_error(ErrorKind::MalformedMessage, Some("already authenticated")).await;
    }

    let outcome = (|| -> Result<_, String> {
        let username = field_str(envelope, "username")?.to_string();
        let pk = field_str(envelope, "public_key")?.to_string();
        let device = field_str(envelope, "device")?.to_string();
        Ok((username, pk, device))
    })();

    let (username, pk, device_name) = match outcome {
        Ok(v) => v,
        Err(detail) => return ctx.send_error(ErrorKind::MalformedMessage, Some(&detail)).await,
    };

    if gateway.users.find(&username).is_some() {
        return ctx.send_error(ErrorKind::UsernameAlreadyExists, None).await;
    }

    let now = Utc::now();
    let user = pauth_store::models::User::new(&username, Device::primary(&pk, &device_name), now);
    if let Err(err) = gateway.users.insert(user.clone()) {
        return ctx.send_error(err.as_error_kind(), err.details().as_deref()).await;
    }

    ctx.session.user = Some(user);
    ctx.session.logged_device = Some(device_name);
    ctx.session.login_time = Some(now);
    ctx.send(Envelope::new(MessageKind::Registered)).await
}

/// Transition 3: `AUTH_REQUEST`.
async fn handle_auth_request(gateway: &Arc<Gateway>, ctx: &mut ConnectionContext, envelope: &Envelope) -> Result<(), WireError> {
    if ctx.session.phase() != SessionPhase::Anonymous {
        return ctx.send_error(ErrorKind::MalformedMessage, Some("session already in progress")).await;
    }

    let username = match field_str(envelope, "username") {
        Ok(u) => u.to_string(),
        Err(detail) => return ctx.send_error(ErrorKind::MalformedMessage, Some(&detail)).await,
    };
    let u_t = match field_hex_biguint(envelope, "temp") {
        Ok(v) => v,
        Err(detail) => return ctx.send_error(ErrorKind::MalformedMessage, Some(&detail)).await,
    };

    if gateway.users.find(&username).is_none() {
        return ctx.send_error(ErrorKind::UsernameNotFound, None).await;
    }

    let challenge = schnorr::random_below(&gateway.group.q());
    ctx.session.temp_pk = Some(u_t);
    ctx.session.challenge = Some(challenge.clone());
    ctx.session.pending_username = Some(username);

    ctx.send(Envelope::new(MessageKind::Challenge).with_field("challenge", wire::format_hex_biguint(&challenge)))
        .await
}

/// Transition 4: `AUTH_RESPONSE`.
async fn handle_auth_response(gateway: &Arc<Gateway>, ctx: &mut ConnectionContext, envelope: &Envelope) -> Result<(), WireError> {
    if ctx.session.phase() != SessionPhase::AwaitingChallengeResponse {
        return ctx.send_error(ErrorKind::SessionNotFound, None).await;
    }

    let z = match field_hex_biguint(envelope, "response") {
        Ok(v) => v,
        Err(detail) => return ctx.send_error(ErrorKind::MalformedMessage, Some(&detail)).await,
    };

    let username = ctx
        .session
        .pending_username
        .clone()
        .expect("AwaitingChallengeResponse implies pending_username is set");
    let u_t = ctx.session.temp_pk.clone().expect("AwaitingChallengeResponse implies temp_pk is set");
    let c = ctx.session.challenge.clone().expect("AwaitingChallengeResponse implies challenge is set");

    let Some(user) = gateway.users.find(&username) else {
        ctx.session.clear_challenge();
        return ctx.send_error(ErrorKind::UsernameNotFound, None).await;
    };

    let matched_device = user.devices.iter().find_map(|device| {
        let y = wire::parse_hex_biguint(&device.pk)?;
        schnorr::verify(gateway.group, &u_t, &c, &z, &y).then(|| device.device_name.clone())
    });

    match matched_device {
        Some(device_name) => {
            gateway.users.set_device_logged(&username, &device_name, true);
            ctx.session.clear_challenge();
            ctx.session.user = Some(user);
            ctx.session.logged_device = Some(device_name);
            ctx.session.login_time = Some(Utc::now());
            ctx.send(Envelope::new(MessageKind::Accepted)).await
        }
        None => {
            // Design Notes §9.1: clear the in-flight challenge on reject too,
            // so a rejected guess cannot be probed against again without a
            // fresh AUTH_REQUEST.
            ctx.session.clear_challenge();
            ctx.send(Envelope::new(MessageKind::Rejected)).await
        }
    }
}

/// Transition 5: `ASSOC_REQUEST`, sent by the secondary. Accepted from an
/// unauthenticated connection by design — the secondary has no account yet.
async fn handle_assoc_request(
    gateway: &Arc<Gateway>,
    ctx: &mut ConnectionContext,
    envelope: &Envelope,
    inbox_tx: &mpsc::UnboundedSender<ServerEvent>,
    minted_token: &mut Option<String>,
) -> Result<(), WireError> {
    let device_name = match field_str(envelope, "device") {
        Ok(v) => v.to_string(),
        Err(detail) => return ctx.send_error(ErrorKind::MalformedMessage, Some(&detail)).await,
    };
    let pk = match field_str(envelope, "pk") {
        Ok(v) => v.to_string(),
        Err(detail) => return ctx.send_error(ErrorKind::MalformedMessage, Some(&detail)).await,
    };

    let mut nonce = [0u8; 16];
    rand::rng().fill_bytes(&mut nonce);
    let mut hasher = Sha256::new();
    hasher.update(pk.as_bytes());
    hasher.update(device_name.as_bytes());
    hasher.update(nonce);
    let digest = hasher.finalize();
    let token = hex::encode(digest)[..32].to_string();

    let now = Utc::now();
    let temp_token = TempToken::with_ttl(token.clone(), pk, device_name.clone(), now, gateway.token_ttl_minutes);
    gateway.tokens.insert(temp_token);
    gateway.registry.register(token.clone(), inbox_tx.clone());
    *minted_token = Some(token.clone());
    ctx.session.pairing_device_name = Some(device_name);

    ctx.send(Envelope::new(MessageKind::TokenAssoc).with_field("token", token)).await
}

/// Transition 6: `TOKEN_ASSOC` received from the primary, confirming a
/// pairing the secondary requested.
async fn handle_token_assoc_confirm(gateway: &Arc<Gateway>, ctx: &mut ConnectionContext, envelope: &Envelope) -> Result<(), WireError> {
    if ctx.session.phase() != SessionPhase::Authenticated {
        return ctx.send_error(ErrorKind::SessionNotFound, None).await;
    }

    let token = match field_str(envelope, "token") {
        Ok(v) => v.to_string(),
        Err(detail) => return ctx.send_error(ErrorKind::MalformedMessage, Some(&detail)).await,
    };

    let Some(temp_token) = gateway.tokens.find(&token) else {
        return ctx.send_error(ErrorKind::Unauthorized, None).await;
    };
    if temp_token.is_expired(Utc::now()) {
        gateway.tokens.delete(&token);
        return ctx.send_error(ErrorKind::TokenInvalidOrExpired, None).await;
    }

    let username = ctx.session.user.as_ref().expect("Authenticated implies user is set").id.clone();
    let confirming_device = ctx.session.logged_device.clone().expect("Authenticated implies logged_device is set");

    let Some(confirming_user) = gateway.users.find(&username) else {
        return ctx.send_error(ErrorKind::UsernameNotFound, None).await;
    };
    if !confirming_user.is_main_device(&confirming_device) {
        return ctx.send_error(ErrorKind::NoMainDevice, None).await;
    }

    if let Err(err) = gateway
        .users
        .push_device(&username, Device::secondary(&temp_token.pk, &temp_token.device_name))
    {
        return ctx.send_error(err.as_error_kind(), err.details().as_deref()).await;
    }
    gateway.tokens.delete(&token);

    let Some(secondary_inbox) = gateway.registry.take(&token) else {
        return ctx.send_error(ErrorKind::AssocFailure, Some("secondary disconnected")).await;
    };

    if secondary_inbox.send(ServerEvent::PairAccepted { username: username.clone() }).is_err() {
        return ctx.send_error(ErrorKind::AssocFailure, Some("secondary disconnected")).await;
    }

    ctx.send(Envelope::new(MessageKind::Accepted)).await
}

/// Transition 7: `LOGOUT`.
async fn handle_logout(gateway: &Arc<Gateway>, ctx: &mut ConnectionContext) -> Result<(), WireError> {
    if ctx.session.phase() != SessionPhase::Authenticated {
        return ctx.send_error(ErrorKind::SessionNotFound, None).await;
    }
    let username = ctx.session.user.as_ref().expect("Authenticated implies user is set").id.clone();
    let device_name = ctx.session.logged_device.clone().expect("Authenticated implies logged_device is set");
    gateway.users.set_device_logged(&username, &device_name, false);
    ctx.session.clear();
    ctx.send(Envelope::new(MessageKind::LoggedOut)).await
}
