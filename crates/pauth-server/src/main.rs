//! # pauth-server
//!
//! The acceptor binary: loads configuration, initializes tracing, binds the
//! listening socket with `SO_REUSEADDR`, and spawns one detached task per
//! accepted connection (spec.md §4.8). Graceful shutdown is a non-goal —
//! workers are fire-and-forget, matching the core's scope.

use clap::Parser;
use pauth_common::{config, group};
use pauth_gateway::{serve, Gateway};
use pauth_store::{InMemoryTokenStore, InMemoryUserStore};
use socket2::{Domain, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;

/// Passwordless Schnorr multi-device authentication server.
#[derive(Debug, Parser)]
#[command(name = "pauth-server", version, about)]
struct Cli {
    /// Path to a config file, layered under defaults and above `PAUTH__*` env vars.
    #[arg(long)]
    config: Option<String>,

    /// Override the configured bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the configured bind port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let app_config = config::load(cli.config.as_deref())?;
    config::init_tracing(&app_config.log_filter);

    let host = cli.host.as_deref().unwrap_or(&app_config.host);
    let port = cli.port.unwrap_or(app_config.port);

    let group = group::lookup(&app_config.default_group_id)
        .ok_or_else(|| anyhow::anyhow!("unknown group_id `{}` in configuration", app_config.default_group_id))?;

    let gateway = Arc::new(Gateway::new(
        Arc::new(InMemoryUserStore::new()),
        Arc::new(InMemoryTokenStore::new()),
        group,
        app_config.pairing_token_ttl_minutes,
    ));

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = bind_with_reuseaddr(addr)?;
    tracing::info!(%addr, group = group.id, "pauth-server listening");

    loop {
        let (socket, peer_addr) = listener.accept().await?;
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move {
            tracing::info!(peer = %peer_addr, "connection accepted");
            serve(gateway, socket, peer_addr).await;
        });
    }
}

/// Bind a `tokio::net::TcpListener` with `SO_REUSEADDR` set, via `socket2`
/// since `tokio::net::TcpListener::bind` does not expose that option
/// directly.
fn bind_with_reuseaddr(addr: SocketAddr) -> anyhow::Result<tokio::net::TcpListener> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    socket.set_nonblocking(true)?;
    let std_listener: std::net::TcpListener = socket.into();
    Ok(tokio::net::TcpListener::from_std(std_listener)?)
}
