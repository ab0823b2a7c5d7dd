//! Liveness monitor.
//!
//! Every probe interval each open connection is either terminated (silent for
//! longer than the timeout, or still owing a pong from the previous probe) or
//! sent a fresh transport ping. Pongs and application heartbeats both feed the
//! same `last_seen` timestamp, see [`Hub::pong`] and [`Hub::heartbeat`].

use std::time::Duration;

use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    hub::Hub,
    peers::{ConnId, Outbound},
};

/// Why a connection was evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eviction {
    /// No liveness signal for longer than the timeout.
    TimedOut,
    /// The previous probe was never answered.
    MissedProbe,
}

/// What one sweep did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepReport {
    pub probed: Vec<ConnId>,
    pub evicted: Vec<(ConnId, Eviction)>,
}

/// Runs one probe round at `now`.
///
/// Evicted connections are hard-closed and their Disconnect cleanup runs
/// before the hub lock is released.
pub fn sweep(hub: &Hub, timeout: Duration, now: Instant) -> SweepReport {
    hub.with_state(|state| {
        let mut report = SweepReport::default();
        for peer in state.peers.iter_mut() {
            if now.saturating_duration_since(peer.last_seen) > timeout {
                report.evicted.push((peer.id, Eviction::TimedOut));
            } else if peer.awaiting_pong {
                report.evicted.push((peer.id, Eviction::MissedProbe));
            } else {
                peer.awaiting_pong = true;
                report.probed.push(peer.id);
            }
        }

        for conn in &report.probed {
            state.peers.push(*conn, Outbound::Ping);
        }
        for (conn, reason) in &report.evicted {
            warn!(%conn, ?reason, "terminating unresponsive connection");
            state.terminate(*conn);
        }
        debug!(
            probed = report.probed.len(),
            evicted = report.evicted.len(),
            "liveness sweep"
        );
        report
    })
}

/// Spawns the periodic sweep. Stops when `cancel` fires.
pub fn spawn(
    hub: Hub,
    probe_interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = Instant::now() + probe_interval;
        let mut ticker = tokio::time::interval_at(start, probe_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sweep(&hub, timeout, Instant::now());
                }
                () = cancel.cancelled() => {
                    info!("liveness monitor stopped");
                    return;
                }
            }
        }
    })
}
