//! Standalone headless client.
//!
//! Usage:
//!   cargo run -p platformer_client -- [--url ws://127.0.0.1:3000] [--config client.json]
//!
//! The client connects, joins, and logs roster changes as other players come,
//! move, and go. It stands in for the game loop: each frame it drains roster
//! changes and reports the local position.
//!
//! Console commands:
//!   status        - Show connection state and local id
//!   roster        - List known players and positions
//!   move <x> <y>  - Set the local player's position
//!   quit          - Disconnect and exit

use std::env;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use platformer_client::{ConnectionState, NetworkClient, RosterChange};
use platformer_shared::{config::ClientConfig, math::Position};
use tokio::sync::mpsc;
use tracing::info;

const FRAME: Duration = Duration::from_millis(16);

fn parse_args() -> anyhow::Result<ClientConfig> {
    let args: Vec<String> = env::args().collect();
    let mut url = None;
    let mut config = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--url" if i + 1 < args.len() => {
                url = Some(args[i + 1].clone());
                i += 2;
            }
            "--config" if i + 1 < args.len() => {
                config = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            _ => i += 1,
        }
    }
    let mut cfg = match config {
        Some(path) => ClientConfig::from_json_file(&path)?,
        None => ClientConfig::default(),
    };
    if let Some(url) = url {
        cfg.server_url = url;
    }
    Ok(cfg)
}

/// Runs one console command. Returns false when the client should exit.
fn exec_console(client: &NetworkClient, local: &mut Position, line: &str) -> bool {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.as_slice() {
        ["status"] => {
            println!("State: {:?}", client.state());
            println!("Local id: {:?}", client.local_id());
            println!("Reconnect attempts: {}", client.attempts());
        }
        ["roster"] => {
            let roster = client.roster();
            for (id, player) in roster.players() {
                let marker = if roster.is_local(id) { " (you)" } else { "" };
                println!(
                    "  {}{}: ({:.1}, {:.1})",
                    id, marker, player.position.x, player.position.y
                );
            }
        }
        ["move", x, y] => match (x.parse(), y.parse()) {
            (Ok(x), Ok(y)) => *local = Position::new(x, y),
            _ => println!("Usage: move <x> <y>"),
        },
        ["quit"] | ["exit"] => return false,
        [] => {}
        _ => println!("Unknown command: {line}"),
    }
    true
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(server = %cfg.server_url, "Starting client");

    let mut client = NetworkClient::start(cfg);

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Type 'status', 'roster', 'move <x> <y>', or 'quit'.");
    println!();

    let mut local = Position::SPAWN;
    let mut last_state = client.state();

    loop {
        while let Ok(line) = console_rx.try_recv() {
            if !exec_console(&client, &mut local, &line) {
                client.shutdown().await;
                return Ok(());
            }
        }

        let state = client.state();
        if state != last_state {
            info!(?state, "Connection state changed");
            last_state = state;
        }
        if state == ConnectionState::Failed {
            println!("Gave up reconnecting to server.");
            break;
        }

        let changes = client.roster().drain_changes();
        for change in changes {
            match change {
                RosterChange::Added(id) => info!(player = %id, "Player appeared"),
                RosterChange::Moved(id, pos) => {
                    info!(player = %id, x = pos.x, y = pos.y, "Player moved")
                }
                RosterChange::Removed(id) => info!(player = %id, "Player left"),
            }
        }

        client.report_position(local.x, local.y);

        tokio::time::sleep(FRAME).await;
    }

    client.shutdown().await;
    Ok(())
}
