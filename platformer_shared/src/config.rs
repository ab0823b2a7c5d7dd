//! Configuration system.
//!
//! Server and client configs load from JSON; every field has a default so a
//! partial file (or `{}`) is valid. Durations are stored as milliseconds.

use std::{path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address, e.g. `0.0.0.0:3000`.
    pub listen_addr: String,
    /// How often every connection is probed with a transport ping.
    pub probe_interval_ms: u64,
    /// A connection silent for longer than this is terminated.
    pub connection_timeout_ms: u64,
    /// Reject `position` messages whose id is not the sender's own.
    /// Off by default: the protocol trusts the client-reported id.
    pub bind_position_to_sender: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            probe_interval_ms: 30_000,
            connection_timeout_ms: 40_000,
            bind_position_to_sender: false,
        }
    }
}

impl ServerConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket URL of the server, e.g. `ws://127.0.0.1:3000`.
    pub server_url: String,
    /// Delay before each reconnect attempt.
    pub reconnect_delay_ms: u64,
    /// Consecutive failed attempts allowed before giving up for good.
    pub max_reconnect_attempts: u32,
    /// Application heartbeat period while connected.
    pub heartbeat_interval_ms: u64,
    /// How often the connection is checked for staleness.
    pub stale_check_interval_ms: u64,
    /// No inbound message for this long means the connection is stale.
    pub stale_timeout_ms: u64,
    /// Local position is only sent after moving more than this on an axis.
    pub min_position_delta: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:3000".to_string(),
            reconnect_delay_ms: 3_000,
            max_reconnect_attempts: 5,
            heartbeat_interval_ms: 30_000,
            stale_check_interval_ms: 35_000,
            stale_timeout_ms: 40_000,
            min_position_delta: 1.0,
        }
    }
}

impl ClientConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn stale_check_interval(&self) -> Duration {
        Duration::from_millis(self.stale_check_interval_ms)
    }

    pub fn stale_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_timeout_ms)
    }
}
