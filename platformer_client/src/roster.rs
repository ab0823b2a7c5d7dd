//! Remote state mirror.
//!
//! Applies server events to a local roster of players. The local player's
//! own entry is authoritative locally, so relayed positions never touch it.
//! The game polls the roster each frame and may drain change events to
//! create or remove whatever it renders per player. Undrained changes are
//! bounded: back-to-back moves of one player collapse into the latest, and
//! past [`CHANGE_LOG_CAPACITY`] the oldest entries are dropped.

use std::collections::{BTreeMap, VecDeque};

use platformer_shared::{
    math::Position,
    protocol::{PlayerId, ServerMessage},
};
use tracing::debug;

/// Most changes kept between two [`RemoteRoster::drain_changes`] calls.
pub const CHANGE_LOG_CAPACITY: usize = 1024;

/// A player known to this client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemotePlayer {
    pub position: Position,
    /// Position before the latest report, for smoothing.
    pub previous: Position,
}

impl RemotePlayer {
    fn spawned() -> Self {
        Self {
            position: Position::SPAWN,
            previous: Position::SPAWN,
        }
    }
}

/// Roster mutations, in the order they were applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RosterChange {
    Added(PlayerId),
    Moved(PlayerId, Position),
    Removed(PlayerId),
}

#[derive(Debug, Default)]
pub struct RemoteRoster {
    local_id: Option<PlayerId>,
    players: BTreeMap<PlayerId, RemotePlayer>,
    changes: VecDeque<RosterChange>,
}

impl RemoteRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one server message. Heartbeat acks carry no roster state.
    pub fn apply(&mut self, msg: &ServerMessage) {
        match *msg {
            ServerMessage::Id { id } => self.on_id(id),
            ServerMessage::NewPlayer { id } => self.on_new_player(id),
            ServerMessage::Position { id, x, y } => self.on_position(id, x, y),
            ServerMessage::PlayerLeft { id } => self.on_player_left(id),
            ServerMessage::HeartbeatAck => {}
        }
    }

    /// Records the local identity. Receiving the same id again changes nothing.
    pub fn on_id(&mut self, id: PlayerId) {
        if let Some(old) = self.local_id.replace(id) {
            if old != id {
                self.remove(old);
            }
        }
        self.insert(id);
    }

    pub fn on_new_player(&mut self, id: PlayerId) {
        if self.is_local(id) {
            return;
        }
        self.insert(id);
    }

    /// Last writer wins. An unannounced id is registered on the spot.
    pub fn on_position(&mut self, id: PlayerId, x: f64, y: f64) {
        if self.is_local(id) {
            return;
        }
        self.insert(id);
        let pos = Position::new(x, y);
        if let Some(player) = self.players.get_mut(&id) {
            player.previous = player.position;
            player.position = pos;
            self.push_change(RosterChange::Moved(id, pos));
        }
    }

    pub fn on_player_left(&mut self, id: PlayerId) {
        self.remove(id);
    }

    /// Forgets every remote player. The server resends them after the next join.
    pub fn clear_remote(&mut self) {
        let remote: Vec<PlayerId> = self
            .players
            .keys()
            .copied()
            .filter(|id| !self.is_local(*id))
            .collect();
        for id in remote {
            self.remove(id);
        }
    }

    pub fn local_id(&self) -> Option<PlayerId> {
        self.local_id
    }

    pub fn is_local(&self, id: PlayerId) -> bool {
        self.local_id == Some(id)
    }

    pub fn get(&self, id: PlayerId) -> Option<&RemotePlayer> {
        self.players.get(&id)
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.players.contains_key(&id)
    }

    /// All known players, local included, ascending by id.
    pub fn players(&self) -> impl Iterator<Item = (PlayerId, &RemotePlayer)> {
        self.players.iter().map(|(id, p)| (*id, p))
    }

    /// Number of known players, local included.
    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Position between the previous and latest report.
    ///
    /// `alpha` should be in $[0,1]$ where 0 = previous report, 1 = latest.
    pub fn interpolated(&self, id: PlayerId, alpha: f64) -> Option<Position> {
        self.players
            .get(&id)
            .map(|p| p.previous.lerp(p.position, alpha))
    }

    /// Takes the changes accumulated since the last call.
    pub fn drain_changes(&mut self) -> Vec<RosterChange> {
        self.changes.drain(..).collect()
    }

    /// Changes waiting for [`drain_changes`](Self::drain_changes).
    pub fn pending_changes(&self) -> usize {
        self.changes.len()
    }

    fn push_change(&mut self, change: RosterChange) {
        if let RosterChange::Moved(id, _) = change {
            if matches!(self.changes.back(), Some(RosterChange::Moved(last, _)) if *last == id) {
                self.changes.pop_back();
            }
        }
        if self.changes.len() == CHANGE_LOG_CAPACITY {
            self.changes.pop_front();
        }
        self.changes.push_back(change);
    }

    fn insert(&mut self, id: PlayerId) {
        if self.players.contains_key(&id) {
            return;
        }
        self.players.insert(id, RemotePlayer::spawned());
        self.push_change(RosterChange::Added(id));
        debug!(player = %id, total = self.players.len(), "player added");
    }

    fn remove(&mut self, id: PlayerId) {
        if self.players.remove(&id).is_some() {
            self.push_change(RosterChange::Removed(id));
            debug!(player = %id, remaining = self.players.len(), "player removed");
        }
    }
}
