//! Sartel Lobby Client
//!
//! This crate is the client side of a two-player Sartel lobby: it keeps one
//! persistent connection to the game server per (lobby, player) pair, speaks
//! the JSON message protocol, and folds server events into a lobby view.
//!
//! # Overview
//!
//! - **Connection Management** - Opens, closes and re-opens the websocket
//!   for the current lobby, with a fixed-delay automatic reconnect that an
//!   explicit disconnect always cancels.
//!
//! - **Protocol** - Typed inbound events and outbound commands, tagged by a
//!   `type` field. Unknown event types are tolerated.
//!
//! - **Lobby State** - A pure reducer from events to the roster, player
//!   count and game-started flag.
//!
//! - **Driver** - A tokio task that runs the above against a real transport
//!   and publishes snapshots.
//!
//! # Design Principles
//!
//! 1. **State machines do no I/O** - The connection manager and session
//!    return actions; the driver executes them.
//!
//! 2. **Stale handles are inert** - Every transport and timer carries an id.
//!    Events for ids that are no longer live are dropped.
//!
//! 3. **Events apply in arrival order** - One event loop per session.
//!
//! 4. **Serialization-ready** - Snapshots serialize to JSON for UIs.
//!
//! # Example
//!
//! ```rust
//! use sartel_lobby::endpoint::Origin;
//! use sartel_lobby::state::{
//!     ConnectionManager, ConnectionStatus, LobbySession, ReconnectPolicy, SessionAction,
//! };
//!
//! let origin = Origin::parse("http://localhost:8000").unwrap();
//! let mut session = LobbySession::new(ConnectionManager::new(origin, ReconnectPolicy::default()));
//!
//! let actions = session.connect("k3p9q", "player-1");
//! let transport = match &actions[0] {
//!     SessionAction::Open { transport, url } => {
//!         assert_eq!(url, "ws://localhost:8000/ws/K3P9Q/player-1");
//!         *transport
//!     }
//!     other => panic!("unexpected action: {other:?}"),
//! };
//!
//! session.on_open(transport);
//! session.on_message(
//!     transport,
//!     r#"{"type":"player_joined","player_count":2,"players":["player-1","player-2"]}"#.into(),
//! );
//!
//! let snapshot = session.snapshot();
//! assert_eq!(snapshot.status, ConnectionStatus::Open);
//! assert!(snapshot.lobby.can_start_game());
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod protocol;
pub mod state;
pub mod transport;

pub use client::{LobbyClient, LobbyHandle};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use state::*;
