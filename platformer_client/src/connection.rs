//! Connection lifecycle manager.
//!
//! A single background task owns the WebSocket. It connects, sends `join`,
//! applies inbound events to the roster, sends application heartbeats, and
//! watches for silence. When the socket closes (cleanly, with an error, or
//! because it went stale) it waits a fixed delay and reconnects, up to a
//! bounded number of consecutive failed attempts, after which it parks in
//! [`ConnectionState::Failed`].
//!
//! The game never touches the socket. It reads the roster, queues positions
//! (fire and forget), and calls [`NetworkClient::shutdown`] when leaving;
//! cancellation stops the reconnect timer and both periodic timers together.

use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, MutexGuard};
use platformer_shared::{
    config::ClientConfig,
    math::Position,
    protocol::{decode_server, encode, ClientMessage, PlayerId},
};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{interval_at, Instant},
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{roster::RemoteRoster, throttle::PositionThrottle};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on waiting for a close handshake during shutdown.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket. Either between attempts or shut down.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Socket open; `join` sent.
    Connected,
    /// Retry budget exhausted. Terminal.
    Failed,
}

/// Why a connected session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Closed,
    Errored,
    Stale,
    Cancelled,
}

#[derive(Debug)]
struct Shared {
    roster: Mutex<RemoteRoster>,
    throttle: Mutex<PositionThrottle>,
    attempts: AtomicU32,
}

/// Handle held by the game.
pub struct NetworkClient {
    cfg: ClientConfig,
    shared: Arc<Shared>,
    state_rx: watch::Receiver<ConnectionState>,
    out_tx: mpsc::UnboundedSender<ClientMessage>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl NetworkClient {
    /// Starts the lifecycle task. Must be called inside a tokio runtime.
    pub fn start(cfg: ClientConfig) -> Self {
        let shared = Arc::new(Shared {
            roster: Mutex::new(RemoteRoster::new()),
            throttle: Mutex::new(PositionThrottle::new(cfg.min_position_delta)),
            attempts: AtomicU32::new(0),
        });
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let lifecycle = Lifecycle {
            cfg: cfg.clone(),
            shared: Arc::clone(&shared),
            state_tx,
            out_rx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(lifecycle.run());

        Self {
            cfg,
            shared,
            state_rx,
            out_tx,
            cancel,
            task: Some(task),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.cfg
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Consecutive reconnect attempts since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::Relaxed)
    }

    pub fn local_id(&self) -> Option<PlayerId> {
        self.shared.roster.lock().local_id()
    }

    /// Locks the roster for reading or draining changes. Keep the guard short-lived.
    pub fn roster(&self) -> MutexGuard<'_, RemoteRoster> {
        self.shared.roster.lock()
    }

    /// Queues the local position. Dropped unless connected and identified.
    pub fn send_position(&self, x: f64, y: f64) -> bool {
        let Some(id) = self.sendable_id() else {
            return false;
        };
        self.queue(ClientMessage::Position { id, x, y })
    }

    /// Like [`send_position`](Self::send_position), but only once the player
    /// has moved more than the configured delta since the last sent position.
    pub fn report_position(&self, x: f64, y: f64) -> bool {
        let Some(id) = self.sendable_id() else {
            return false;
        };
        if !self.shared.throttle.lock().should_send(Position::new(x, y)) {
            return false;
        }
        self.queue(ClientMessage::Position { id, x, y })
    }

    /// Stops the lifecycle task, closes the socket, and cancels every timer.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "lifecycle task panicked");
            }
        }
    }

    fn sendable_id(&self) -> Option<PlayerId> {
        if self.state() != ConnectionState::Connected {
            return None;
        }
        self.local_id()
    }

    fn queue(&self, msg: ClientMessage) -> bool {
        self.out_tx.send(msg).is_ok()
    }
}

impl Drop for NetworkClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// State owned by the background task.
struct Lifecycle {
    cfg: ClientConfig,
    shared: Arc<Shared>,
    state_tx: watch::Sender<ConnectionState>,
    out_rx: mpsc::UnboundedReceiver<ClientMessage>,
    cancel: CancellationToken,
}

impl Lifecycle {
    async fn run(mut self) {
        loop {
            self.set_state(ConnectionState::Connecting);
            let connected = tokio::select! {
                res = connect_async(self.cfg.server_url.as_str()) => res,
                () = self.cancel.cancelled() => {
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }
            };

            match connected {
                Ok((ws, _)) => {
                    self.shared.attempts.store(0, Ordering::Relaxed);
                    info!(url = %self.cfg.server_url, "Connected to server");
                    let end = self.session(ws).await;
                    if end == SessionEnd::Cancelled {
                        self.set_state(ConnectionState::Disconnected);
                        info!("connection closed by shutdown");
                        return;
                    }
                    warn!(reason = ?end, "connection lost");
                }
                Err(e) => {
                    warn!(url = %self.cfg.server_url, error = %e, "connect failed");
                }
            }

            let attempts = self.shared.attempts.load(Ordering::Relaxed);
            if attempts >= self.cfg.max_reconnect_attempts {
                self.set_state(ConnectionState::Disconnected);
                error!(attempts, "max reconnection attempts reached");
                self.set_state(ConnectionState::Failed);
                return;
            }
            let attempt = attempts + 1;
            self.shared.attempts.store(attempt, Ordering::Relaxed);
            self.set_state(ConnectionState::Disconnected);
            info!(
                attempt,
                max = self.cfg.max_reconnect_attempts,
                delay_ms = self.cfg.reconnect_delay_ms,
                "scheduling reconnect"
            );

            tokio::select! {
                () = tokio::time::sleep(self.cfg.reconnect_delay()) => {}
                () = self.cancel.cancelled() => {
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }
            }
        }
    }

    async fn session(&mut self, ws: WsStream) -> SessionEnd {
        let (mut sink, mut stream) = ws.split();

        // Anything queued while offline describes a stale world.
        while self.out_rx.try_recv().is_ok() {}
        self.shared.roster.lock().clear_remote();
        self.shared.throttle.lock().reset();
        self.set_state(ConnectionState::Connected);

        if let Err(e) = send(&mut sink, &ClientMessage::Join).await {
            warn!(error = %e, "join failed");
            return SessionEnd::Errored;
        }

        let now = Instant::now();
        let mut last_message = now;
        let heartbeat_every = self.cfg.heartbeat_interval();
        let stale_every = self.cfg.stale_check_interval();
        let mut heartbeat = interval_at(now + heartbeat_every, heartbeat_every);
        let mut stale_check = interval_at(now + stale_every, stale_every);

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        last_message = Instant::now();
                        self.handle_text(text.as_str());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        last_message = Instant::now();
                        warn!(len = data.len(), "ignoring binary frame");
                    }
                    Some(Ok(Message::Close(reason))) => {
                        debug!(?reason, "server closed connection");
                        return SessionEnd::Closed;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "read failed");
                        return SessionEnd::Errored;
                    }
                    None => return SessionEnd::Closed,
                },
                msg = self.out_rx.recv() => {
                    let Some(msg) = msg else {
                        return SessionEnd::Cancelled;
                    };
                    if let Err(e) = send(&mut sink, &msg).await {
                        debug!(error = %e, kind = msg.kind(), "write failed");
                        return SessionEnd::Errored;
                    }
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = send(&mut sink, &ClientMessage::Heartbeat).await {
                        debug!(error = %e, "heartbeat failed");
                        return SessionEnd::Errored;
                    }
                }
                _ = stale_check.tick() => {
                    let silent = last_message.elapsed();
                    if silent > self.cfg.stale_timeout() {
                        warn!(silent_ms = silent.as_millis() as u64, "connection appears stale, reconnecting");
                        return SessionEnd::Stale;
                    }
                }
                () = self.cancel.cancelled() => {
                    let _ = tokio::time::timeout(CLOSE_GRACE, sink.close()).await;
                    return SessionEnd::Cancelled;
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match decode_server(text) {
            Ok(msg) => {
                debug!(kind = msg.kind(), "server message");
                self.shared.roster.lock().apply(&msg);
            }
            Err(e) if e.is_unknown_type() => debug!(error = %e, "ignoring unknown message type"),
            Err(e) => warn!(error = %e, "discarding bad frame"),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let prev = self.state_tx.send_replace(state);
        if prev != state {
            debug!(from = ?prev, to = ?state, "connection state");
        }
    }
}

async fn send<S>(sink: &mut S, msg: &ClientMessage) -> anyhow::Result<()>
where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let text = encode(msg)?;
    sink.send(Message::text(text)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn closed_port_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("ws://{addr}")
    }

    fn fast_config(url: String) -> ClientConfig {
        ClientConfig {
            server_url: url,
            reconnect_delay_ms: 10,
            max_reconnect_attempts: 3,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn gives_up_after_retry_budget() {
        let mut client = NetworkClient::start(fast_config(closed_port_url().await));
        let mut state = client.subscribe_state();
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == ConnectionState::Failed),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(client.attempts(), 3);
        client.shutdown().await;
        assert_eq!(client.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn shutdown_stops_reconnecting() {
        let cfg = ClientConfig {
            reconnect_delay_ms: 60_000,
            ..fast_config(closed_port_url().await)
        };
        let mut client = NetworkClient::start(cfg);
        tokio::time::timeout(Duration::from_secs(5), async {
            while client.attempts() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(1), client.shutdown())
            .await
            .unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.attempts(), 1);
    }

    #[tokio::test]
    async fn positions_are_dropped_while_offline() {
        let client = NetworkClient::start(fast_config(closed_port_url().await));
        assert!(!client.send_position(1.0, 2.0));
        assert!(!client.report_position(1.0, 2.0));
    }
}
