//! Protocol dispatcher.
//!
//! The hub owns the session registry and the connection set behind a single
//! lock. Every operation takes the lock, mutates state, enqueues outbound
//! frames, and returns; nothing awaits while the lock is held.

use std::sync::Arc;

use parking_lot::Mutex;
use platformer_shared::{
    config::ServerConfig,
    math::Position,
    protocol::{decode_client, ClientMessage, PlayerId, ServerMessage},
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    peers::{ConnId, OutboundTx, PeerSet},
    registry::SessionRegistry,
};

/// State guarded by the hub lock.
#[derive(Debug, Default)]
pub struct HubState {
    pub registry: SessionRegistry,
    pub peers: PeerSet,
}

impl HubState {
    /// Removes the connection and announces its player's departure.
    /// Returns the identity that left, if the connection had joined.
    pub(crate) fn disconnect(&mut self, conn: ConnId) -> Option<PlayerId> {
        let was_open = self.peers.remove(conn).is_some();
        let id = self.registry.player_for(conn);
        if let Some(id) = id {
            self.peers.broadcast(None, &ServerMessage::PlayerLeft { id });
            self.registry.leave(conn);
            info!(%conn, player = %id, remaining = self.registry.len(), "player left");
        } else if was_open {
            debug!(%conn, "connection closed before joining");
        }
        id
    }

    /// Hard-closes the connection, then runs the Disconnect cleanup.
    pub(crate) fn terminate(&mut self, conn: ConnId) -> Option<PlayerId> {
        if let Some(peer) = self.peers.get(conn) {
            peer.terminate();
        }
        self.disconnect(conn)
    }
}

/// Shared handle to the dispatcher.
#[derive(Debug, Clone)]
pub struct Hub {
    state: Arc<Mutex<HubState>>,
    bind_position_to_sender: bool,
}

impl Hub {
    pub fn new(cfg: &ServerConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState::default())),
            bind_position_to_sender: cfg.bind_position_to_sender,
        }
    }

    /// Registers a newly opened connection. Cancelling `close` must drop its socket.
    pub fn connect(&self, tx: OutboundTx, close: CancellationToken, now: Instant) -> ConnId {
        let conn = ConnId::new_unique();
        let mut state = self.state.lock();
        state.peers.insert(conn, tx, close, now);
        debug!(%conn, open = state.peers.len(), "connection registered");
        conn
    }

    /// Decodes one text frame and routes it. Bad frames are logged and dropped.
    pub fn handle_text(&self, conn: ConnId, text: &str, now: Instant) {
        match decode_client(text) {
            Ok(msg) => self.dispatch(conn, msg, now),
            Err(e) if e.is_unknown_type() => {
                warn!(%conn, error = %e, "ignoring unknown message type");
            }
            Err(e) => {
                warn!(%conn, error = %e, "discarding bad frame");
            }
        }
    }

    pub fn dispatch(&self, conn: ConnId, msg: ClientMessage, now: Instant) {
        debug!(%conn, kind = msg.kind(), "dispatch");
        match msg {
            ClientMessage::Join => {
                self.join(conn);
            }
            ClientMessage::Position { id, x, y } => self.position(conn, id, Position::new(x, y)),
            ClientMessage::Heartbeat => self.heartbeat(conn, now),
        }
    }

    /// Grants `conn` an identity and synchronizes it with everyone else.
    pub fn join(&self, conn: ConnId) -> PlayerId {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let outcome = state.registry.join(conn);
        if let Some(old) = outcome.retired {
            state
                .peers
                .broadcast(Some(conn), &ServerMessage::PlayerLeft { id: old });
            info!(%conn, player = %old, "identity retired by rejoin");
        }

        let id = outcome.id;
        state.peers.send_to(conn, &ServerMessage::Id { id });

        for (other, pos) in &outcome.others {
            let Some(other_conn) = state.registry.conn_for(*other) else {
                continue;
            };
            if !state.peers.contains(other_conn) {
                continue;
            }
            state
                .peers
                .send_to(conn, &ServerMessage::NewPlayer { id: *other });
            if let Some(pos) = pos {
                state
                    .peers
                    .send_to(conn, &ServerMessage::position(*other, *pos));
            }
        }

        state
            .peers
            .broadcast(Some(conn), &ServerMessage::NewPlayer { id });
        info!(%conn, player = %id, players = state.registry.len(), "player joined");
        id
    }

    /// Stores and relays a reported position. The id comes from the payload.
    pub fn position(&self, conn: ConnId, id: PlayerId, pos: Position) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if self.bind_position_to_sender && state.registry.player_for(conn) != Some(id) {
            warn!(%conn, claimed = %id, "position for another player rejected");
            return;
        }
        if !state.registry.set_position(id, pos) {
            debug!(%conn, player = %id, "position for unknown player dropped");
            return;
        }
        state
            .peers
            .broadcast(Some(conn), &ServerMessage::position(id, pos));
    }

    pub fn heartbeat(&self, conn: ConnId, now: Instant) {
        let mut state = self.state.lock();
        state.peers.mark_seen(conn, now);
        state.peers.send_to(conn, &ServerMessage::HeartbeatAck);
    }

    /// Transport-level pong.
    pub fn pong(&self, conn: ConnId, now: Instant) {
        self.state.lock().peers.mark_seen(conn, now);
    }

    /// Cleanup for a closed connection. Safe to call more than once.
    pub fn disconnect(&self, conn: ConnId) -> Option<PlayerId> {
        self.state.lock().disconnect(conn)
    }

    /// Drops the socket without draining its queue, then cleans up like [`Hub::disconnect`].
    pub fn terminate(&self, conn: ConnId) -> Option<PlayerId> {
        self.state.lock().terminate(conn)
    }

    /// Runs `f` under the hub lock.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut HubState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().peers.len()
    }

    pub fn player_count(&self) -> usize {
        self.state.lock().registry.len()
    }

    pub fn player_position(&self, id: PlayerId) -> Option<Position> {
        self.state.lock().registry.position(id)
    }
}
