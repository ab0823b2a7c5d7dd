//! Wire protocol.
//!
//! Every frame is one JSON object with a required string `type` field.
//! Client and server speak different message families, so each direction
//! gets its own enum; `position` is the only kind that flows both ways.
//!
//! Decoding is two-phase: the frame is parsed as a JSON value first so that
//! an unknown `type` can be told apart from a known type with bad fields.
//! Receivers log and drop the offending frame in either case.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::math::Position;

/// Server-assigned player identity. Starts at 1 and is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Messages sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Request a player identity.
    Join,
    /// Report the sender's position. The id is whatever the client claims.
    Position { id: PlayerId, x: f64, y: f64 },
    /// Application-level liveness signal.
    Heartbeat,
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Identity assigned to the receiving connection.
    Id { id: PlayerId },
    /// Another player is present.
    NewPlayer { id: PlayerId },
    /// Relayed position of another player.
    Position { id: PlayerId, x: f64, y: f64 },
    /// Another player disconnected.
    PlayerLeft { id: PlayerId },
    /// Reply to [`ClientMessage::Heartbeat`].
    #[serde(rename = "heartbeat_ack")]
    HeartbeatAck,
}

impl ServerMessage {
    pub fn position(id: PlayerId, pos: Position) -> Self {
        ServerMessage::Position {
            id,
            x: pos.x,
            y: pos.y,
        }
    }

    /// Wire name of this message kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Id { .. } => "id",
            ServerMessage::NewPlayer { .. } => "newPlayer",
            ServerMessage::Position { .. } => "position",
            ServerMessage::PlayerLeft { .. } => "playerLeft",
            ServerMessage::HeartbeatAck => "heartbeat_ack",
        }
    }
}

impl ClientMessage {
    /// Wire name of this message kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Join => "join",
            ClientMessage::Position { .. } => "position",
            ClientMessage::Heartbeat => "heartbeat",
        }
    }
}

const CLIENT_KINDS: &[&str] = &["join", "position", "heartbeat"];
const SERVER_KINDS: &[&str] = &["id", "newPlayer", "position", "playerLeft", "heartbeat_ack"];

/// Why a frame could not be encoded or decoded.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has no string `type` field")]
    MissingType,
    #[error("unknown message type `{0}`")]
    UnknownType(String),
    #[error("invalid fields for `{kind}`: {source}")]
    InvalidFields {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ProtocolError {
    /// True for frames that were well-formed but of a kind this end does not handle.
    pub fn is_unknown_type(&self) -> bool {
        matches!(self, ProtocolError::UnknownType(_))
    }
}

/// Encodes a message as a single JSON text frame.
pub fn encode<M: Serialize>(msg: &M) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(ProtocolError::Encode)
}

/// Decodes a frame sent by a client.
pub fn decode_client(text: &str) -> Result<ClientMessage, ProtocolError> {
    decode_tagged(text, CLIENT_KINDS)
}

/// Decodes a frame sent by the server.
pub fn decode_server(text: &str) -> Result<ServerMessage, ProtocolError> {
    decode_tagged(text, SERVER_KINDS)
}

fn decode_tagged<M: DeserializeOwned>(text: &str, known: &[&str]) -> Result<M, ProtocolError> {
    let value: Value = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
    let kind = match &value {
        Value::Object(map) => match map.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            _ => return Err(ProtocolError::MissingType),
        },
        _ => return Err(ProtocolError::NotAnObject),
    };
    if !known.contains(&kind.as_str()) {
        return Err(ProtocolError::UnknownType(kind));
    }
    serde_json::from_value(value).map_err(|source| ProtocolError::InvalidFields { kind, source })
}
