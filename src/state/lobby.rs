//! Lobby state.
//!
//! A lobby pairs exactly two players before a game starts. The client never
//! owns the lobby: it derives a read-only view, [`LobbyState`], from the
//! ordered stream of server events.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{InboundEvent, RoundStart};
use crate::state::player::PlayerId;

/// Players required to start a game.
pub const LOBBY_CAPACITY: u32 = 2;

/// Maximum length of a lobby code.
pub const LOBBY_CODE_MAX_LEN: usize = 5;

/// Short, shareable lobby code. Always upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LobbyCode(String);

impl LobbyCode {
    /// Normalize (trim + upper case) and validate a user-supplied code.
    pub fn parse(code: &str) -> Result<Self, LobbyError> {
        let code = code.trim().to_uppercase();
        if code.is_empty() {
            return Err(LobbyError::InvalidCode("empty".to_string()));
        }
        if code.len() > LOBBY_CODE_MAX_LEN {
            return Err(LobbyError::InvalidCode(format!(
                "longer than {} characters",
                LOBBY_CODE_MAX_LEN
            )));
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(LobbyError::InvalidCode(format!("{:?} is not alphanumeric", code)));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for LobbyCode {
    type Error = LobbyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<LobbyCode> for String {
    fn from(code: LobbyCode) -> Self {
        code.0
    }
}

impl fmt::Display for LobbyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lobby errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LobbyError {
    #[error("invalid lobby code: {0}")]
    InvalidCode(String),
    #[error("lobby is full")]
    Full,
    #[error("need {needed} players to start, have {have}")]
    NotEnoughPlayers { have: u32, needed: u32 },
    #[error("game already started")]
    GameAlreadyStarted,
}

/// Client-side view of one lobby.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LobbyState {
    /// Roster in server-reported order.
    pub players: Vec<PlayerId>,

    /// Connected players as last reported by the server.
    pub player_count: u32,

    /// Set once by `game_started`; the lobby phase is over after that.
    pub game_started: bool,

    /// Round details from the `game_started` payload.
    pub round: Option<RoundStart>,

    /// Last refusal reported by the server.
    pub last_error: Option<String>,
}

impl LobbyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an event, returning the new state. `self` is left untouched.
    pub fn apply(&self, event: &InboundEvent) -> Self {
        let mut next = self.clone();
        next.apply_mut(event);
        next
    }

    /// Apply an event in place.
    pub fn apply_mut(&mut self, event: &InboundEvent) {
        match event {
            InboundEvent::PlayerJoined {
                player_count,
                players,
            } => {
                self.players = players.clone();
                self.player_count = *player_count;
            }
            // No roster in this event: keep the last one we saw
            InboundEvent::PlayerDisconnected { player_count, .. } => {
                self.player_count = *player_count;
            }
            InboundEvent::GameStarted(round) => {
                self.game_started = true;
                self.round = Some(round.clone());
            }
            InboundEvent::Error { message } => {
                self.last_error = Some(message.clone());
            }
            InboundEvent::Connected { .. } | InboundEvent::Pong | InboundEvent::Unknown { .. } => {}
        }
    }

    /// Check whether a start request would be accepted by the server.
    pub fn check_start(&self) -> Result<(), LobbyError> {
        if self.game_started {
            return Err(LobbyError::GameAlreadyStarted);
        }
        if self.player_count != LOBBY_CAPACITY {
            return Err(LobbyError::NotEnoughPlayers {
                have: self.player_count,
                needed: LOBBY_CAPACITY,
            });
        }
        Ok(())
    }

    pub fn can_start_game(&self) -> bool {
        self.check_start().is_ok()
    }

    pub fn is_waiting_for_players(&self) -> bool {
        !self.game_started && self.player_count < LOBBY_CAPACITY
    }

    pub fn contains(&self, player_id: &PlayerId) -> bool {
        self.players.contains(player_id)
    }
}
