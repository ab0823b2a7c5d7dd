//! Session registry.
//!
//! Maps connections to player identities and identities to their last
//! reported position. Pure state: callers hold the hub lock and do the I/O.

use std::collections::{BTreeMap, HashMap};

use platformer_shared::{math::Position, protocol::PlayerId};

use crate::peers::ConnId;

/// Result of [`SessionRegistry::join`].
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    pub id: PlayerId,
    /// Every other registered player, ascending by id, with its position if one was reported.
    pub others: Vec<(PlayerId, Option<Position>)>,
    /// Identity the connection held before this join, now retired.
    pub retired: Option<PlayerId>,
}

#[derive(Debug)]
pub struct SessionRegistry {
    next_id: u64,
    by_conn: HashMap<ConnId, PlayerId>,
    by_player: BTreeMap<PlayerId, ConnId>,
    positions: HashMap<PlayerId, Position>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            by_conn: HashMap::new(),
            by_player: BTreeMap::new(),
            positions: HashMap::new(),
        }
    }

    /// Grants `conn` a fresh identity. Never fails.
    pub fn join(&mut self, conn: ConnId) -> JoinOutcome {
        let retired = self.leave(conn);

        let id = PlayerId(self.next_id);
        self.next_id += 1;

        let others = self
            .by_player
            .keys()
            .map(|&other| (other, self.positions.get(&other).copied()))
            .collect();

        self.by_conn.insert(conn, id);
        self.by_player.insert(id, conn);

        JoinOutcome {
            id,
            others,
            retired,
        }
    }

    /// Overwrites the position of `id`. Returns false when no live connection owns `id`.
    pub fn set_position(&mut self, id: PlayerId, pos: Position) -> bool {
        if !self.by_player.contains_key(&id) {
            return false;
        }
        self.positions.insert(id, pos);
        true
    }

    /// Drops the identity bound to `conn` along with its position.
    pub fn leave(&mut self, conn: ConnId) -> Option<PlayerId> {
        let id = self.by_conn.remove(&conn)?;
        self.by_player.remove(&id);
        self.positions.remove(&id);
        Some(id)
    }

    pub fn player_for(&self, conn: ConnId) -> Option<PlayerId> {
        self.by_conn.get(&conn).copied()
    }

    pub fn conn_for(&self, id: PlayerId) -> Option<ConnId> {
        self.by_player.get(&id).copied()
    }

    pub fn position(&self, id: PlayerId) -> Option<Position> {
        self.positions.get(&id).copied()
    }

    /// Number of joined players.
    pub fn len(&self) -> usize {
        self.by_player.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_player.is_empty()
    }

    /// Joined players in ascending id order.
    pub fn players(&self) -> impl Iterator<Item = (PlayerId, ConnId)> + '_ {
        self.by_player.iter().map(|(&id, &conn)| (id, conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_start_at_one_and_increase() {
        let mut reg = SessionRegistry::new();
        let a = reg.join(ConnId(10));
        let b = reg.join(ConnId(11));
        assert_eq!(a.id, PlayerId(1));
        assert_eq!(b.id, PlayerId(2));
        assert!(a.others.is_empty());
        assert_eq!(b.others, vec![(PlayerId(1), None)]);
    }

    #[test]
    fn ids_are_not_reused_after_leave() {
        let mut reg = SessionRegistry::new();
        reg.join(ConnId(1));
        assert_eq!(reg.leave(ConnId(1)), Some(PlayerId(1)));
        assert_eq!(reg.join(ConnId(2)).id, PlayerId(2));
    }

    #[test]
    fn join_lists_known_positions() {
        let mut reg = SessionRegistry::new();
        let a = reg.join(ConnId(1)).id;
        reg.join(ConnId(2));
        assert!(reg.set_position(a, Position::new(5.0, 7.0)));
        let c = reg.join(ConnId(3));
        assert_eq!(
            c.others,
            vec![(PlayerId(1), Some(Position::new(5.0, 7.0))), (PlayerId(2), None)]
        );
    }

    #[test]
    fn position_is_last_writer_wins() {
        let mut reg = SessionRegistry::new();
        let a = reg.join(ConnId(1)).id;
        reg.set_position(a, Position::new(1.0, 1.0));
        reg.set_position(a, Position::new(-4.0, 2.5));
        assert_eq!(reg.position(a), Some(Position::new(-4.0, 2.5)));
    }

    #[test]
    fn position_for_unbound_id_is_not_stored() {
        let mut reg = SessionRegistry::new();
        reg.join(ConnId(1));
        assert!(!reg.set_position(PlayerId(99), Position::ORIGIN));
        assert_eq!(reg.position(PlayerId(99)), None);
    }

    #[test]
    fn leave_clears_both_directions_and_position() {
        let mut reg = SessionRegistry::new();
        let a = reg.join(ConnId(1)).id;
        reg.set_position(a, Position::new(3.0, 4.0));
        assert_eq!(reg.conn_for(a), Some(ConnId(1)));
        assert_eq!(reg.leave(ConnId(1)), Some(a));
        assert_eq!(reg.player_for(ConnId(1)), None);
        assert_eq!(reg.conn_for(a), None);
        assert_eq!(reg.position(a), None);
        assert!(reg.is_empty());
        assert_eq!(reg.leave(ConnId(1)), None);
    }

    #[test]
    fn rejoin_retires_previous_identity() {
        let mut reg = SessionRegistry::new();
        let first = reg.join(ConnId(1)).id;
        reg.set_position(first, Position::new(1.0, 2.0));
        let second = reg.join(ConnId(1));
        assert_eq!(second.retired, Some(first));
        assert_eq!(second.id, PlayerId(2));
        assert!(second.others.is_empty());
        assert_eq!(reg.position(first), None);
        assert_eq!(reg.len(), 1);
    }
}
