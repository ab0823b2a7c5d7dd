//! WebSocket server.
//!
//! One task per connection. The task splits the socket: the writer half
//! drains the connection's outbound queue, the reader half feeds frames to
//! the hub in receipt order. When either half finishes the connection is
//! cleaned up through the hub's Disconnect path.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::Context;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use platformer_shared::config::ServerConfig;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinHandle,
    time::Instant,
};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    hub::Hub,
    liveness,
    peers::{ConnId, Outbound, OutboundRx},
};

/// Game server.
pub struct GameServer {
    pub cfg: ServerConfig,
    hub: Hub,
    listener: TcpListener,
    shutdown: CancellationToken,
}

impl GameServer {
    /// Binds the listen socket from config.
    pub async fn bind(cfg: ServerConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.listen_addr.parse().context("parse listen_addr")?;
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        let hub = Hub::new(&cfg);
        Ok(Self {
            cfg,
            hub,
            listener,
            shutdown: CancellationToken::new(),
        })
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// `ws://` URL clients should connect to.
    pub fn ws_url(&self) -> anyhow::Result<String> {
        Ok(format!("ws://{}", self.local_addr()?))
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Token that stops [`GameServer::run`] when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accepts connections until shutdown. Also drives the liveness monitor.
    pub async fn run(self) -> anyhow::Result<()> {
        let monitor = liveness::spawn(
            self.hub.clone(),
            self.cfg.probe_interval(),
            self.cfg.connection_timeout(),
            self.shutdown.child_token(),
        );

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let hub = self.hub.clone();
                            let cancel = self.shutdown.child_token();
                            tokio::spawn(async move {
                                serve_connection(hub, stream, peer, cancel).await;
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "accept failed");
                        }
                    }
                }
                () = self.shutdown.cancelled() => {
                    info!("server shutting down");
                    break;
                }
            }
        }

        let _ = monitor.await;
        Ok(())
    }

    /// Runs the server on a background task.
    pub fn spawn(self) -> (CancellationToken, JoinHandle<anyhow::Result<()>>) {
        let token = self.shutdown_token();
        (token, tokio::spawn(self.run()))
    }
}

/// Handles one client from handshake to cleanup.
async fn serve_connection(
    hub: Hub,
    stream: TcpStream,
    peer: SocketAddr,
    cancel: CancellationToken,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, error = %e, "websocket handshake failed");
            return;
        }
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let conn = hub.connect(tx, cancel.clone(), Instant::now());
    info!(%conn, %peer, "client connected");

    let (sink, stream) = ws.split();
    // Cancelled by server shutdown or by a liveness eviction. Either way both
    // halves are dropped here, queued frames and all.
    tokio::select! {
        () = write_loop(conn, sink, rx) => {}
        () = read_loop(&hub, conn, stream) => {}
        () = cancel.cancelled() => debug!(%conn, "hard close"),
    }

    hub.disconnect(conn);
    info!(%conn, %peer, "client disconnected");
}

async fn write_loop<S>(conn: ConnId, mut sink: S, mut rx: OutboundRx)
where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(out) = rx.recv().await {
        let frame = match out {
            Outbound::Text(text) => Message::text(text.to_string()),
            Outbound::Ping => Message::Ping(Bytes::new()),
        };
        if let Err(e) = sink.send(frame).await {
            debug!(%conn, error = %e, "write failed");
            return;
        }
    }
}

async fn read_loop<S, E>(hub: &Hub, conn: ConnId, mut stream: S)
where
    S: futures::Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => hub.handle_text(conn, text.as_str(), Instant::now()),
            Ok(Message::Pong(_)) => hub.pong(conn, Instant::now()),
            Ok(Message::Close(reason)) => {
                debug!(%conn, ?reason, "close frame");
                return;
            }
            Ok(Message::Binary(data)) => {
                warn!(%conn, len = data.len(), "ignoring binary frame");
            }
            // Pings are answered by tungstenite itself.
            Ok(Message::Ping(_)) | Ok(Message::Frame(_)) => {}
            Err(e) => {
                debug!(%conn, error = %e, "read failed");
                return;
            }
        }
    }
}

/// Helper for tests: bind to an ephemeral port on localhost.
pub async fn bind_ephemeral(cfg: ServerConfig) -> anyhow::Result<GameServer> {
    let cfg = ServerConfig {
        listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).to_string(),
        ..cfg
    };
    GameServer::bind(cfg).await
}
