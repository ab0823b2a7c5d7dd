//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p platformer_server -- [--addr 0.0.0.0:3000] [--config server.json]
//!
//! The server accepts WebSocket clients, hands out player ids, relays
//! positions, and evicts connections that stop answering probes.
//!
//! `PORT` in the environment overrides the port of the listen address.
//! Ctrl-C shuts the server down.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use platformer_server::server::GameServer;
use platformer_shared::config::ServerConfig;
use tracing::info;

struct Args {
    addr: Option<String>,
    config: Option<PathBuf>,
}

fn parse_args() -> Args {
    let mut out = Args {
        addr: None,
        config: None,
    };
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                out.addr = Some(args[i + 1].clone());
                i += 2;
            }
            "--config" if i + 1 < args.len() => {
                out.config = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            _ => i += 1,
        }
    }
    out
}

fn load_config(args: Args) -> anyhow::Result<ServerConfig> {
    let mut cfg = match &args.config {
        Some(path) => ServerConfig::from_json_file(path)?,
        None => ServerConfig::default(),
    };
    if let Some(addr) = args.addr {
        cfg.listen_addr = addr;
    }
    if let Ok(port) = env::var("PORT") {
        let port: u16 = port.parse().context("parse PORT")?;
        let mut addr: SocketAddr = cfg.listen_addr.parse().context("parse listen_addr")?;
        addr.set_port(port);
        cfg.listen_addr = addr.to_string();
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = load_config(parse_args())?;
    info!(
        addr = %cfg.listen_addr,
        probe_interval_ms = cfg.probe_interval_ms,
        connection_timeout_ms = cfg.connection_timeout_ms,
        "Starting server"
    );

    let server = GameServer::bind(cfg).await.context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    server.run().await
}
