//! `platformer_client`
//!
//! Client-side systems:
//! - Connection lifecycle (connect, join, reconnect with a bounded budget)
//! - Application heartbeats and stale-connection detection
//! - Remote state mirror of other players' identities and positions
//! - Position send throttling

pub mod connection;
pub mod roster;
pub mod throttle;

pub use connection::{ConnectionState, NetworkClient};
pub use roster::{RemoteRoster, RosterChange};
