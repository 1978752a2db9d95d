//! Client-side state for a Sartel lobby.
//!
//! - `player` - Player identity and its persistence
//! - `connection` - Connection lifecycle and reconnection
//! - `lobby` - Lobby codes and the event-driven lobby view
//! - `session` - Ties the above to the protocol codec
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          LobbySession                            │
//! │                                                                  │
//! │  ┌────────────────────────┐        ┌──────────────────────────┐  │
//! │  │   ConnectionManager    │        │        LobbyState        │  │
//! │  │                        │Deliver │                          │  │
//! │  │ target: (lobby, player)│──────▶ │ players, player_count,   │  │
//! │  │ status, intent         │ decode │ game_started, round      │  │
//! │  │ live transport id      │        │                          │  │
//! │  │ pending timer id       │        │ apply(&event) -> Self    │  │
//! │  └────────────────────────┘        └──────────────────────────┘  │
//! │                                                                  │
//! │  Idle ──▶ Connecting ──▶ Open ──▶ Closed ──(timer)──▶ Connecting │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use sartel_lobby::state::{LobbyState, PlayerId};
//! use sartel_lobby::protocol::decode;
//!
//! let mut lobby = LobbyState::new();
//! let event = decode(r#"{"type":"player_joined","player_count":1,"players":["p1"]}"#)?;
//! lobby.apply_mut(&event);
//! assert!(lobby.contains(&PlayerId::new("p1")?));
//! ```

pub mod connection;
pub mod lobby;
pub mod player;
pub mod session;

// Re-export commonly used types
pub use connection::{
    ConnectionAction, ConnectionManager, ConnectionStatus, Notice, ReconnectPolicy, Target,
    TimerId, TransportId, DEFAULT_RECONNECT_DELAY,
};
pub use lobby::{LobbyCode, LobbyError, LobbyState, LOBBY_CAPACITY};
pub use player::{IdentityError, InvalidPlayerId, PlayerId, DEFAULT_IDENTITY_FILE};
pub use session::{LobbySession, LobbySnapshot, SessionAction};
