//! End-to-end scenarios over a real `TcpListener`, driven with plain
//! `TcpStream` clients — exercises the acceptor, codec, and protocol
//! handler together without mocking the socket (spec.md §8 S1–S6).
//!
//! All scenarios use the `mymod` toy group (p=23, g=2, q=11) so the
//! arithmetic can be checked by hand, per spec.md §8's own convention.

use chrono::{Duration, Utc};
use pauth_common::group;
use pauth_gateway::{serve, Gateway};
use pauth_store::models::TempToken;
use pauth_store::{InMemoryTokenStore, InMemoryUserStore, TokenStore, UserStore};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn spawn_server() -> (std::net::SocketAddr, Arc<Gateway>) {
    let group = group::lookup("mymod").expect("mymod toy group is registered");
    let gateway = Arc::new(Gateway::new(
        Arc::new(InMemoryUserStore::new()),
        Arc::new(InMemoryTokenStore::new()),
        group,
        10,
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let accepting = Arc::clone(&gateway);
    tokio::spawn(async move {
        loop {
            let (socket, peer_addr) = match listener.accept().await {
                Ok(v) => v,
                Err(_) => return,
            };
            let gateway = Arc::clone(&accepting);
            tokio::spawn(serve(gateway, socket, peer_addr));
        }
    });

    (addr, gateway)
}

async fn send(stream: &mut TcpStream, value: Value) {
    let bytes = serde_json::to_vec(&value).unwrap();
    stream.write_all(&bytes).await.unwrap();
}

async fn recv(stream: &mut TcpStream) -> Value {
    let mut buf = vec![0u8; 4096];
    let n = stream.read(&mut buf).await.unwrap();
    serde_json::from_slice(&buf[..n]).unwrap()
}

/// Complete the handshake (spec.md transition 1) and return the stream
/// ready for the rest of the protocol.
async fn handshaked_client(addr: std::net::SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    send(&mut stream, json!({"type_code": 12, "type": "HANDSHAKE_REQ"})).await;
    let group_selection = recv(&mut stream).await;
    assert_eq!(group_selection["type"], "GROUP_SELECTION");
    assert_eq!(group_selection["group_id"], "mymod");
    send(&mut stream, json!({"type_code": 13, "type": "HANDSHAKE_RES"})).await;
    stream
}

#[tokio::test]
async fn s1_register_and_authenticate_happy_path() {
    let (addr, _gateway) = spawn_server().await;
    let mut client = handshaked_client(addr).await;

    send(
        &mut client,
        json!({"type_code": 0, "type": "REGISTER", "username": "alice", "public_key": "0x12", "device": "dev1"}),
    )
    .await;
    assert_eq!(recv(&mut client).await["type"], "REGISTERED");

    // A fresh connection authenticates against the stored key.
    let mut auth = handshaked_client(addr).await;
    send(
        &mut auth,
        json!({"type_code": 4, "type": "AUTH_REQUEST", "username": "alice", "temp": "0x10"}),
    )
    .await;
    let challenge = recv(&mut auth).await;
    assert_eq!(challenge["type"], "CHALLENGE");
    // Whatever challenge the server drew, the client can always solve it —
    // alpha=6, alpha_t=4 (so u_t = 2^4 mod 23 = 16 = 0x10, matching `temp`
    // above), z = (alpha_t + alpha*c) mod 11.
    let c: u64 = u64::from_str_radix(challenge["challenge"].as_str().unwrap().trim_start_matches("0x"), 16).unwrap();
    let z = (4 + 6 * c) % 11;
    send(
        &mut auth,
        json!({"type_code": 5, "type": "AUTH_RESPONSE", "response": format!("0x{:x}", z)}),
    )
    .await;
    assert_eq!(recv(&mut auth).await["type"], "ACCEPTED");
}

#[tokio::test]
async fn s2_wrong_private_key_is_rejected() {
    let (addr, _gateway) = spawn_server().await;
    let mut client = handshaked_client(addr).await;
    send(
        &mut client,
        json!({"type_code": 0, "type": "REGISTER", "username": "bob", "public_key": "0x12", "device": "dev1"}),
    )
    .await;
    assert_eq!(recv(&mut client).await["type"], "REGISTERED");

    let mut auth = handshaked_client(addr).await;
    send(
        &mut auth,
        json!({"type_code": 4, "type": "AUTH_REQUEST", "username": "bob", "temp": "0x10"}),
    )
    .await;
    let challenge = recv(&mut auth).await;
    let c: u64 = u64::from_str_radix(challenge["challenge"].as_str().unwrap().trim_start_matches("0x"), 16).unwrap();
    let correct_z = (4 + 6 * c) % 11;
    let wrong_z = (correct_z + 1) % 11;
    send(
        &mut auth,
        json!({"type_code": 5, "type": "AUTH_RESPONSE", "response": format!("0x{:x}", wrong_z)}),
    )
    .await;
    assert_eq!(recv(&mut auth).await["type"], "REJECTED");
}

#[tokio::test]
async fn s3_duplicate_username_is_rejected() {
    let (addr, _gateway) = spawn_server().await;
    let mut first = handshaked_client(addr).await;
    send(
        &mut first,
        json!({"type_code": 0, "type": "REGISTER", "username": "carol", "public_key": "0x1", "device": "dev1"}),
    )
    .await;
    assert_eq!(recv(&mut first).await["type"], "REGISTERED");

    let mut second = handshaked_client(addr).await;
    send(
        &mut second,
        json!({"type_code": 0, "type": "REGISTER", "username": "carol", "public_key": "0x2", "device": "dev2"}),
    )
    .await;
    let error = recv(&mut second).await;
    assert_eq!(error["type"], "ERROR");
    assert_eq!(error["error_code"], 0);
    assert_eq!(error["error"], "USERNAME_ALREADY_EXISTS");
}

/// Registers `username` on `dev1` and authenticates it, leaving the
/// connection authenticated as the primary device.
async fn register_and_login(addr: std::net::SocketAddr, username: &str) -> TcpStream {
    let mut register = handshaked_client(addr).await;
    send(
        &mut register,
        json!({"type_code": 0, "type": "REGISTER", "username": username, "public_key": "0x12", "device": "dev1"}),
    )
    .await;
    assert_eq!(recv(&mut register).await["type"], "REGISTERED");
    register
}

#[tokio::test]
async fn s4_pairing_happy_path() {
    let (addr, _gateway) = spawn_server().await;
    let mut primary = register_and_login(addr, "dave").await;

    let mut secondary = handshaked_client(addr).await;
    send(
        &mut secondary,
        json!({"type_code": 9, "type": "ASSOC_REQUEST", "device": "dev2", "pk": "0x09"}),
    )
    .await;
    let token_msg = recv(&mut secondary).await;
    assert_eq!(token_msg["type"], "TOKEN_ASSOC");
    let token = token_msg["token"].as_str().unwrap().to_string();
    assert_eq!(token.len(), 32);

    send(
        &mut primary,
        json!({"type_code": 10, "type": "TOKEN_ASSOC", "token": token}),
    )
    .await;
    assert_eq!(recv(&mut primary).await["type"], "ACCEPTED");

    let secondary_accept = recv(&mut secondary).await;
    assert_eq!(secondary_accept["type"], "ACCEPTED");
    assert_eq!(secondary_accept["username"], "dave");
}

#[tokio::test]
async fn s5_pairing_from_non_primary_device_fails() {
    let (addr, _gateway) = spawn_server().await;
    let mut primary = register_and_login(addr, "erin").await;

    // Pair dev2 as a secondary first.
    let mut dev2 = handshaked_client(addr).await;
    send(
        &mut dev2,
        json!({"type_code": 9, "type": "ASSOC_REQUEST", "device": "dev2", "pk": "0x09"}),
    )
    .await;
    let token = recv(&mut dev2).await["token"].as_str().unwrap().to_string();
    send(&mut primary, json!({"type_code": 10, "type": "TOKEN_ASSOC", "token": token})).await;
    assert_eq!(recv(&mut primary).await["type"], "ACCEPTED");
    assert_eq!(recv(&mut dev2).await["type"], "ACCEPTED");

    // dev2 tries to confirm a new dev3 pairing — it is not the primary.
    let mut dev3 = handshaked_client(addr).await;
    send(
        &mut dev3,
        json!({"type_code": 9, "type": "ASSOC_REQUEST", "device": "dev3", "pk": "0x07"}),
    )
    .await;
    let token2 = recv(&mut dev3).await["token"].as_str().unwrap().to_string();

    send(&mut dev2, json!({"type_code": 10, "type": "TOKEN_ASSOC", "token": token2})).await;
    let error = recv(&mut dev2).await;
    assert_eq!(error["type"], "ERROR");
    assert_eq!(error["error_code"], 4);
    assert_eq!(error["error"], "NO_MAIN_DEVICE");
}

#[tokio::test]
async fn confirming_an_unknown_token_is_unauthorized() {
    let (addr, _gateway) = spawn_server().await;
    let mut primary = register_and_login(addr, "frank").await;
    send(
        &mut primary,
        json!({"type_code": 10, "type": "TOKEN_ASSOC", "token": "0000000000000000000000000000000"}),
    )
    .await;
    let error = recv(&mut primary).await;
    assert_eq!(error["error_code"], 7);
    assert_eq!(error["error"], "UNAUTHORIZED");
}

#[tokio::test]
async fn secondary_disconnecting_before_confirm_yields_assoc_failure() {
    let (addr, _gateway) = spawn_server().await;
    let mut primary = register_and_login(addr, "grace").await;

    let mut secondary = handshaked_client(addr).await;
    send(
        &mut secondary,
        json!({"type_code": 9, "type": "ASSOC_REQUEST", "device": "dev2", "pk": "0x09"}),
    )
    .await;
    let token = recv(&mut secondary).await["token"].as_str().unwrap().to_string();
    drop(secondary);

    // Give the secondary's task a moment to notice the close and clean up
    // its registry entry before the primary confirms.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    send(&mut primary, json!({"type_code": 10, "type": "TOKEN_ASSOC", "token": token})).await;
    let error = recv(&mut primary).await;
    assert_eq!(error["type"], "ERROR");
    assert_eq!(error["error"], "ASSOC_FAILURE");
}

#[tokio::test]
async fn logout_then_login_again_round_trips() {
    let (addr, _gateway) = spawn_server().await;
    let mut session = handshaked_client(addr).await;
    send(
        &mut session,
        json!({"type_code": 0, "type": "REGISTER", "username": "helen", "public_key": "0x12", "device": "dev1"}),
    )
    .await;
    assert_eq!(recv(&mut session).await["type"], "REGISTERED");

    send(&mut session, json!({"type_code": 11, "type": "LOGOUT"})).await;
    assert_eq!(recv(&mut session).await["type"], "LOGGED_OUT");

    let mut auth = handshaked_client(addr).await;
    send(
        &mut auth,
        json!({"type_code": 4, "type": "AUTH_REQUEST", "username": "helen", "temp": "0x10"}),
    )
    .await;
    let challenge = recv(&mut auth).await;
    let c: u64 = u64::from_str_radix(challenge["challenge"].as_str().unwrap().trim_start_matches("0x"), 16).unwrap();
    let z = (4 + 6 * c) % 11;
    send(
        &mut auth,
        json!({"type_code": 5, "type": "AUTH_RESPONSE", "response": format!("0x{:x}", z)}),
    )
    .await;
    assert_eq!(recv(&mut auth).await["type"], "ACCEPTED");
}

#[tokio::test]
async fn malformed_message_is_reported_without_closing_the_connection() {
    let (addr, _gateway) = spawn_server().await;
    let mut client = handshaked_client(addr).await;
    send(&mut client, json!({"type_code": 0, "type": "REGISTER", "username": "ivan"})).await;
    let error = recv(&mut client).await;
    assert_eq!(error["type"], "ERROR");
    assert_eq!(error["error"], "MALFORMED_MESSAGE");

    // The connection is still usable afterward.
    send(
        &mut client,
        json!({"type_code": 0, "type": "REGISTER", "username": "ivan", "public_key": "0x1", "device": "dev1"}),
    )
    .await;
    assert_eq!(recv(&mut client).await["type"], "REGISTERED");
}

#[tokio::test]
async fn s6_expired_token_leaves_devices_unchanged() {
    let (addr, gateway) = spawn_server().await;
    let mut primary = register_and_login(addr, "judy").await;

    let mut secondary = handshaked_client(addr).await;
    send(
        &mut secondary,
        json!({"type_code": 9, "type": "ASSOC_REQUEST", "device": "dev2", "pk": "0x09"}),
    )
    .await;
    let token = recv(&mut secondary).await["token"].as_str().unwrap().to_string();

    // Replace the freshly minted token with one already past its expiry,
    // simulating "+11 minutes" without an 11-minute-long test.
    let stale = TempToken::with_ttl("0x09".to_string(), "0x09", "dev2", Utc::now() - Duration::minutes(11), 10);
    let stale = TempToken { id: token.clone(), ..stale };
    gateway.tokens.delete(&token);
    gateway.tokens.insert(stale);

    send(&mut primary, json!({"type_code": 10, "type": "TOKEN_ASSOC", "token": token})).await;
    let error = recv(&mut primary).await;
    assert_eq!(error["type"], "ERROR");
    assert_eq!(error["error_code"], 6);
    assert_eq!(error["error"], "TOKEN_INVALID_OR_EXPIRED");

    assert!(gateway.tokens.find(&token).is_none());
    assert_eq!(gateway.users.find("judy").unwrap().devices.len(), 1);
}
