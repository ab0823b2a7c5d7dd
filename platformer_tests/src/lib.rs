//! Test harness for socket-level multiplayer tests.
//!
//! `TestPeer` is a bare WebSocket client that speaks the protocol by hand, so
//! tests can observe exactly which frames the server sends and in what order.
//! The real `NetworkClient` is exercised alongside it in `tests/`.

use std::time::Duration;

use anyhow::Context;
use futures::{SinkExt, StreamExt};
use platformer_server::{server::bind_ephemeral, Hub};
use platformer_shared::{
    config::ServerConfig,
    protocol::{decode_server, encode, ClientMessage, ServerMessage},
};
use tokio::{net::TcpStream, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

/// Default timeout for waiting on a frame or a condition.
pub const WAIT: Duration = Duration::from_secs(5);

/// How long to listen before concluding that nothing more is coming.
pub const QUIET: Duration = Duration::from_millis(200);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// A running server on an ephemeral port.
pub struct TestServer {
    pub url: String,
    pub hub: Hub,
    shutdown: CancellationToken,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    pub async fn start(cfg: ServerConfig) -> anyhow::Result<Self> {
        let server = bind_ephemeral(cfg).await?;
        let url = server.ws_url()?;
        let hub = server.hub().clone();
        let (shutdown, handle) = server.spawn();
        Ok(Self {
            url,
            hub,
            shutdown,
            handle,
        })
    }

    pub async fn stop(self) -> anyhow::Result<()> {
        self.shutdown.cancel();
        self.handle.await.context("server task")?
    }
}

/// Hand-driven protocol client.
pub struct TestPeer {
    ws: WsStream,
}

impl TestPeer {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let (ws, _) = connect_async(url).await.context("ws connect")?;
        Ok(Self { ws })
    }

    /// Connects and joins, returning the assigned id frame's value.
    pub async fn join(url: &str) -> anyhow::Result<(Self, u64)> {
        let mut peer = Self::connect(url).await?;
        peer.send(&ClientMessage::Join).await?;
        match peer.recv().await? {
            ServerMessage::Id { id } => Ok((peer, id.0)),
            other => anyhow::bail!("expected id, got {other:?}"),
        }
    }

    pub async fn send(&mut self, msg: &ClientMessage) -> anyhow::Result<()> {
        self.send_raw(&encode(msg)?).await
    }

    /// Writes many messages with a single flush at the end.
    pub async fn send_batch(
        &mut self,
        msgs: impl IntoIterator<Item = ClientMessage>,
    ) -> anyhow::Result<()> {
        for msg in msgs {
            self.ws
                .feed(Message::text(encode(&msg)?))
                .await
                .context("ws feed")?;
        }
        self.ws.flush().await.context("ws flush")
    }

    pub async fn send_raw(&mut self, text: &str) -> anyhow::Result<()> {
        self.ws
            .send(Message::text(text.to_string()))
            .await
            .context("ws send")
    }

    /// Next protocol message. Control frames are skipped.
    pub async fn recv(&mut self) -> anyhow::Result<ServerMessage> {
        self.recv_within(WAIT)
            .await?
            .context("timed out waiting for a message")
    }

    /// Next protocol message, or `None` if nothing arrives within `wait`.
    pub async fn recv_within(&mut self, wait: Duration) -> anyhow::Result<Option<ServerMessage>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let frame = match tokio::time::timeout_at(deadline, self.ws.next()).await {
                Ok(frame) => frame,
                Err(_) => return Ok(None),
            };
            match frame {
                Some(Ok(Message::Text(text))) => return Ok(Some(decode_server(text.as_str())?)),
                Some(Ok(Message::Close(_))) | None => anyhow::bail!("connection closed"),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e).context("ws read"),
            }
        }
    }

    /// Collects everything that arrives until the connection goes quiet.
    pub async fn drain(&mut self) -> anyhow::Result<Vec<ServerMessage>> {
        let mut out = Vec::new();
        while let Some(msg) = self.recv_within(QUIET).await? {
            out.push(msg);
        }
        Ok(out)
    }

    /// Waits until the server drops the socket. Returns false on timeout.
    pub async fn closed_within(&mut self, wait: Duration) -> bool {
        self.frames_until_closed(wait).await.is_some()
    }

    /// Counts the text frames still delivered before the socket closes.
    /// `None` if it is still open after `wait`.
    pub async fn frames_until_closed(&mut self, wait: Duration) -> Option<usize> {
        let deadline = tokio::time::Instant::now() + wait;
        let mut frames = 0;
        loop {
            match tokio::time::timeout_at(deadline, self.ws.next()).await {
                Err(_) => return None,
                Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => {
                    return Some(frames)
                }
                Ok(Some(Ok(Message::Text(_)))) => frames += 1,
                Ok(Some(Ok(_))) => {}
            }
        }
    }

    pub async fn close(mut self) -> anyhow::Result<()> {
        self.ws.close(None).await.context("ws close")
    }
}

/// Polls `cond` until it holds or `wait` elapses.
pub async fn wait_until(wait: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + wait;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
