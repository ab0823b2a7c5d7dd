//! `platformer_server`
//!
//! Server-side systems:
//! - Session registry (connection ↔ player identity, last positions)
//! - Protocol dispatcher with fan-out to open connections
//! - Liveness monitor (transport ping/pong plus application heartbeats)
//!
//! Networking model:
//! - One WebSocket per client, JSON text frames
//! - All shared state behind one lock in [`hub::Hub`]

pub mod hub;
pub mod liveness;
pub mod peers;
pub mod registry;
pub mod server;

pub use hub::Hub;
pub use server::GameServer;
