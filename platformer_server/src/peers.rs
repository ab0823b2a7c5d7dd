//! Open connections and their outbound queues.
//!
//! Each connection task owns the socket; the set only holds the sending half
//! of an unbounded queue, so enqueueing never blocks the hub lock. A separate
//! close token lets the hub drop a socket without waiting behind its queue.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use platformer_shared::protocol::{encode, ServerMessage};
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies an open transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnId(pub u64);

impl ConnId {
    pub fn new_unique() -> Self {
        ConnId(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Work for a connection's writer half.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(Arc<str>),
    /// Transport-level liveness probe.
    Ping,
}

pub type OutboundTx = mpsc::UnboundedSender<Outbound>;
pub type OutboundRx = mpsc::UnboundedReceiver<Outbound>;

/// One open connection.
#[derive(Debug)]
pub struct Peer {
    pub id: ConnId,
    tx: OutboundTx,
    close: CancellationToken,
    /// A probe was sent and no pong or heartbeat has come back yet.
    pub awaiting_pong: bool,
    pub last_seen: Instant,
}

impl Peer {
    fn push(&self, out: Outbound) -> bool {
        self.tx.send(out).is_ok()
    }

    /// Hard close: the connection task drops the socket at once, whatever is
    /// still queued, and skips the close handshake.
    pub fn terminate(&self) {
        self.close.cancel();
    }
}

#[derive(Debug, Default)]
pub struct PeerSet {
    peers: BTreeMap<ConnId, Peer>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ConnId, tx: OutboundTx, close: CancellationToken, now: Instant) {
        self.peers.insert(
            id,
            Peer {
                id,
                tx,
                close,
                awaiting_pong: false,
                last_seen: now,
            },
        );
    }

    pub fn remove(&mut self, id: ConnId) -> Option<Peer> {
        self.peers.remove(&id)
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn get(&self, id: ConnId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn ids(&self) -> Vec<ConnId> {
        self.peers.keys().copied().collect()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Peer> {
        self.peers.values_mut()
    }

    /// Refreshes the liveness timestamp and clears the awaiting flag.
    pub fn mark_seen(&mut self, id: ConnId, now: Instant) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.last_seen = now;
            peer.awaiting_pong = false;
        }
    }

    /// Enqueues a message for one connection. Closed or unknown connections are skipped.
    pub fn send_to(&self, id: ConnId, msg: &ServerMessage) {
        let Some(peer) = self.peers.get(&id) else {
            debug!(conn = %id, kind = msg.kind(), "send to unknown connection skipped");
            return;
        };
        match encode(msg) {
            Ok(text) => {
                if !peer.push(Outbound::Text(text.into())) {
                    debug!(conn = %id, kind = msg.kind(), "connection closed, send skipped");
                }
            }
            Err(e) => warn!(kind = msg.kind(), error = %e, "failed to encode message"),
        }
    }

    /// Enqueues a message for every open connection except `except`.
    pub fn broadcast(&self, except: Option<ConnId>, msg: &ServerMessage) {
        let text: Arc<str> = match encode(msg) {
            Ok(text) => text.into(),
            Err(e) => {
                warn!(kind = msg.kind(), error = %e, "failed to encode broadcast");
                return;
            }
        };
        let mut recipients = 0u32;
        for peer in self.peers.values() {
            if Some(peer.id) == except {
                continue;
            }
            if peer.push(Outbound::Text(Arc::clone(&text))) {
                recipients += 1;
            }
        }
        debug!(kind = msg.kind(), recipients, "broadcast");
    }

    pub(crate) fn push(&self, id: ConnId, out: Outbound) -> bool {
        self.peers.get(&id).is_some_and(|p| p.push(out))
    }
}
