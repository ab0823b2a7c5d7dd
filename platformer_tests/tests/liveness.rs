//! Server-side liveness: silent connections are probed, then evicted.

use std::time::Duration;

use anyhow::Context;
use platformer_shared::{
    config::ServerConfig,
    protocol::{ClientMessage, PlayerId, ServerMessage},
};
use platformer_tests::{init_tracing, wait_until, TestPeer, TestServer, WAIT};

fn fast_probe() -> ServerConfig {
    ServerConfig {
        probe_interval_ms: 100,
        connection_timeout_ms: 150,
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_peer_is_evicted_once() -> anyhow::Result<()> {
    init_tracing();
    let server = TestServer::start(fast_probe()).await?;

    // Never polled after joining, so it never answers a probe.
    let (mut silent, silent_id) = TestPeer::join(&server.url).await?;
    let (mut active, _) = TestPeer::join(&server.url).await?;

    let left = ServerMessage::PlayerLeft {
        id: PlayerId(silent_id),
    };
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + WAIT;
    while !seen.contains(&left) && tokio::time::Instant::now() < deadline {
        active.send(&ClientMessage::Heartbeat).await?;
        if let Some(msg) = active.recv_within(Duration::from_millis(40)).await? {
            seen.push(msg);
        }
    }
    assert!(seen.contains(&left), "{seen:?}");

    // Keep the active peer alive a little longer; no second announcement.
    for _ in 0..10 {
        active.send(&ClientMessage::Heartbeat).await?;
        if let Some(msg) = active.recv_within(Duration::from_millis(40)).await? {
            seen.push(msg);
        }
    }
    assert_eq!(seen.iter().filter(|m| **m == left).count(), 1);

    assert!(wait_until(WAIT, || server.hub.connection_count() == 1).await);
    assert_eq!(server.hub.player_count(), 1);
    assert!(silent.closed_within(WAIT).await);

    active.close().await?;
    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reading_peer_survives_probes() -> anyhow::Result<()> {
    init_tracing();
    let server = TestServer::start(fast_probe()).await?;

    let (mut peer, _) = TestPeer::join(&server.url).await?;
    // Reading lets the websocket layer answer pings with pongs.
    assert!(peer.recv_within(Duration::from_millis(600)).await?.is_none());
    assert_eq!(server.hub.connection_count(), 1);
    assert_eq!(server.hub.player_count(), 1);

    peer.close().await?;
    server.stop().await
}

/// A hard close drops the socket even while its writer is stuck behind a
/// backlog the peer never reads.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn terminate_skips_backlog_of_stuck_peer() -> anyhow::Result<()> {
    // No test subscriber here: the flood would log every relayed frame.
    const FLOOD: usize = 400_000;
    const SLOW: Duration = Duration::from_secs(30);
    let server = TestServer::start(ServerConfig::default()).await?;

    let (mut stuck, stuck_id) = TestPeer::join(&server.url).await?;
    let (mut flooder, flooder_id) = TestPeer::join(&server.url).await?;

    flooder
        .send_batch((0..FLOOD).map(|i| ClientMessage::Position {
            id: PlayerId(flooder_id),
            x: i as f64 + 0.123_456_789,
            y: -987.654_321,
        }))
        .await?;
    // One connection's frames are handled in order, so the ack means every
    // position has already been queued for the stuck peer.
    flooder.send(&ClientMessage::Heartbeat).await?;
    loop {
        match flooder.recv_within(SLOW).await? {
            Some(ServerMessage::HeartbeatAck) => break,
            Some(_) => continue,
            None => anyhow::bail!("no heartbeat ack after flood"),
        }
    }

    let conn = server
        .hub
        .with_state(|state| state.registry.conn_for(PlayerId(stuck_id)))
        .context("stuck peer has no connection")?;
    assert_eq!(server.hub.terminate(conn), Some(PlayerId(stuck_id)));
    assert_eq!(server.hub.connection_count(), 1);

    let delivered = stuck
        .frames_until_closed(SLOW)
        .await
        .context("socket still open after terminate")?;
    assert!(
        delivered < FLOOD,
        "backlog was flushed before closing: {delivered}/{FLOOD}"
    );

    flooder.close().await?;
    server.stop().await
}
