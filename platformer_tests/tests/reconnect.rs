//! Client reconnect behavior against scripted servers.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use platformer_client::{ConnectionState, NetworkClient};
use platformer_shared::{
    config::{ClientConfig, ServerConfig},
    protocol::PlayerId,
};
use platformer_tests::{init_tracing, wait_until, TestServer, WAIT};
use tokio::{net::TcpListener, task::JoinHandle, time::Instant};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Accepts TCP connections and hangs up before the websocket handshake.
async fn refusing_listener() -> anyhow::Result<(String, Arc<AtomicUsize>, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("ws://{}", listener.local_addr()?);
    let accepts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepts);
    let task = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });
    Ok((url, accepts, task))
}

/// Completes the handshake, then either hangs up after `hold` or, with
/// `hold == None`, keeps the socket open without ever writing.
async fn scripted_listener(
    hold: Option<Duration>,
) -> anyhow::Result<(String, Arc<Mutex<Vec<Instant>>>, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("ws://{}", listener.local_addr()?);
    let accepted = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&accepted);
    let task = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            log.lock().push(Instant::now());
            let Ok(ws) = accept_async(stream).await else {
                continue;
            };
            tokio::spawn(async move {
                match hold {
                    Some(hold) => tokio::time::sleep(hold).await,
                    None => tokio::time::sleep(Duration::from_secs(3600)).await,
                }
                drop(ws);
            });
        }
    });
    Ok((url, accepted, task))
}

/// Completes the handshake, sends `frames` verbatim, then keeps reading.
async fn frame_script_listener(
    frames: &'static [&'static str],
) -> anyhow::Result<(String, Arc<AtomicUsize>, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("ws://{}", listener.local_addr()?);
    let accepts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepts);
    let task = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let Ok(mut ws) = accept_async(stream).await else {
                continue;
            };
            tokio::spawn(async move {
                for frame in frames {
                    if ws.send(Message::text(frame.to_string())).await.is_err() {
                        return;
                    }
                }
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });
    Ok((url, accepts, task))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bad_server_frames_are_ignored() -> anyhow::Result<()> {
    init_tracing();
    let (url, accepts, task) = frame_script_listener(&[
        "not json",
        r#"{"type":"dance"}"#,
        r#"{"type":"position","id":1}"#,
        r#"{"type":"id","id":3}"#,
    ])
    .await?;
    let client = NetworkClient::start(ClientConfig {
        server_url: url,
        reconnect_delay_ms: 20,
        ..Default::default()
    });

    assert!(wait_until(WAIT, || client.local_id() == Some(PlayerId(3))).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(accepts.load(Ordering::SeqCst), 1);
    // Only the local entry; the incomplete position was not applied.
    assert_eq!(client.roster().len(), 1);
    assert!(!client.roster().contains(PlayerId(1)));

    drop(client);
    task.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn gives_up_after_five_failed_reconnects() -> anyhow::Result<()> {
    init_tracing();
    let (url, accepts, task) = refusing_listener().await?;
    let mut client = NetworkClient::start(ClientConfig {
        server_url: url,
        reconnect_delay_ms: 20,
        ..Default::default()
    });

    let mut state = client.subscribe_state();
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Failed)).await??;
    assert_eq!(client.attempts(), 5);

    // The initial connect plus five retries, and nothing after giving up.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(accepts.load(Ordering::SeqCst), 6);

    client.shutdown().await;
    assert_eq!(client.state(), ConnectionState::Failed);
    task.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconnects_after_server_hangs_up() -> anyhow::Result<()> {
    init_tracing();
    let (url, accepted, task) = scripted_listener(Some(Duration::from_millis(50))).await?;
    let delay = Duration::from_millis(300);
    let client = NetworkClient::start(ClientConfig {
        server_url: url,
        reconnect_delay_ms: delay.as_millis() as u64,
        ..Default::default()
    });

    assert!(wait_until(WAIT, || accepted.lock().len() >= 2).await);
    let times = accepted.lock().clone();
    let gap = times[1] - times[0];
    assert!(gap >= delay, "reconnected too early: {gap:?}");
    assert!(gap < delay * 4, "reconnected too late: {gap:?}");

    drop(client);
    task.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stale_connection_is_dropped_and_retried() -> anyhow::Result<()> {
    init_tracing();
    let (url, accepted, task) = scripted_listener(None).await?;
    let client = NetworkClient::start(ClientConfig {
        server_url: url,
        reconnect_delay_ms: 20,
        heartbeat_interval_ms: 50,
        stale_check_interval_ms: 60,
        stale_timeout_ms: 150,
        ..Default::default()
    });

    assert!(wait_until(WAIT, || client.state() == ConnectionState::Connected).await);
    assert!(wait_until(WAIT, || accepted.lock().len() >= 2).await);
    let times = accepted.lock().clone();
    assert!(times[1] - times[0] >= Duration::from_millis(150));

    drop(client);
    task.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn successful_reconnect_resets_attempts() -> anyhow::Result<()> {
    init_tracing();
    let server = TestServer::start(ServerConfig::default()).await?;
    let client = NetworkClient::start(ClientConfig {
        server_url: server.url.clone(),
        reconnect_delay_ms: 50,
        ..Default::default()
    });
    assert!(wait_until(WAIT, || client.local_id().is_some()).await);
    let first = client.local_id();

    // Kick the player from the server side; the client comes back as someone new.
    for conn in server.hub.with_state(|state| state.peers.ids()) {
        server.hub.terminate(conn);
    }
    assert!(wait_until(WAIT, || client.local_id().is_some() && client.local_id() != first).await);
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(client.attempts(), 0);
    assert_eq!(server.hub.player_count(), 1);

    drop(client);
    server.stop().await
}
