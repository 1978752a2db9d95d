//! Lobby wire protocol.
//!
//! Every message is a JSON object keyed by a `"type"` field.
//!
//! Outbound (client → server):
//!
//! ```text
//! {"type": "start_game"}
//! {"type": "ping"}
//! ```
//!
//! Inbound (server → client):
//!
//! ```text
//! {"type": "connected", "player_id": "...", "lobby_id": "..."}
//! {"type": "player_joined", "player_count": 2, "players": ["...", "..."]}
//! {"type": "player_disconnected", "player_id": "...", "player_count": 1}
//! {"type": "game_started", "letter": "K", "categories": [...], ...}
//! {"type": "error", "message": "..."}
//! {"type": "pong"}
//! ```
//!
//! Any other string tag decodes to [`InboundEvent::Unknown`] so newer servers
//! do not break older clients. A known tag with a malformed payload is a
//! [`DecodeError`]; nothing is partially applied.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::player::PlayerId;

/// Commands the client sends to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundCommand {
    /// Ask the server to leave the lobby phase and start the first round.
    StartGame,
    /// Heartbeat; the server answers with [`InboundEvent::Pong`].
    Ping,
}

impl OutboundCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StartGame => "start_game",
            Self::Ping => "ping",
        }
    }
}

/// Round details carried by `game_started`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStart {
    pub letter: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    /// Round length in seconds.
    pub timer_duration: Option<u32>,
    pub round_number: Option<u32>,
}

/// Events the server pushes to the client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// Connection acknowledged by the server.
    Connected {
        player_id: Option<PlayerId>,
        lobby_id: Option<String>,
    },

    /// Full roster snapshot after someone (re)joined.
    PlayerJoined {
        player_count: u32,
        players: Vec<PlayerId>,
    },

    /// Someone dropped; carries the new count but no roster.
    PlayerDisconnected {
        player_id: Option<PlayerId>,
        player_count: u32,
    },

    GameStarted(RoundStart),

    /// The server refused a command.
    Error { message: String },

    Pong,

    /// A well-formed message with a tag this client does not know.
    #[serde(skip)]
    Unknown {
        kind: String,
        payload: serde_json::Value,
    },
}

const KNOWN_KINDS: &[&str] = &[
    "connected",
    "player_joined",
    "player_disconnected",
    "game_started",
    "error",
    "pong",
];

impl InboundEvent {
    /// The wire tag of this event.
    pub fn kind(&self) -> &str {
        match self {
            Self::Connected { .. } => "connected",
            Self::PlayerJoined { .. } => "player_joined",
            Self::PlayerDisconnected { .. } => "player_disconnected",
            Self::GameStarted(_) => "game_started",
            Self::Error { .. } => "error",
            Self::Pong => "pong",
            Self::Unknown { kind, .. } => kind,
        }
    }
}

/// Why an inbound payload was rejected.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("payload has no \"type\" field")]
    MissingType,

    #[error("\"type\" field is not a string")]
    InvalidType,

    #[error("malformed {kind:?} payload: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Error serializing an outbound command.
#[derive(Debug, Error)]
#[error("failed to encode command: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// Serialize a command into a text frame.
pub fn encode(command: &OutboundCommand) -> Result<String, EncodeError> {
    Ok(serde_json::to_string(command)?)
}

/// Parse a text frame into an event.
pub fn decode(payload: &str) -> Result<InboundEvent, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(payload).map_err(DecodeError::Json)?;

    let kind = match value.as_object() {
        None => return Err(DecodeError::NotAnObject),
        Some(object) => match object.get("type") {
            None => return Err(DecodeError::MissingType),
            Some(serde_json::Value::String(kind)) => kind.clone(),
            Some(_) => return Err(DecodeError::InvalidType),
        },
    };

    if !KNOWN_KINDS.contains(&kind.as_str()) {
        return Ok(InboundEvent::Unknown {
            kind,
            payload: value,
        });
    }

    serde_json::from_value(value).map_err(|source| DecodeError::InvalidPayload { kind, source })
}
