//! Lobby session.
//!
//! Glues the [`ConnectionManager`] to the protocol codec and the
//! [`LobbyState`] reducer:
//!
//! ```text
//! transport text ──▶ ConnectionManager ──Deliver──▶ decode ──▶ LobbyState::apply ──▶ Publish
//! caller command ──▶ encode ──▶ ConnectionManager ──Send──▶ transport
//! ```
//!
//! Like the manager it wraps, the session does no I/O and returns
//! [`SessionAction`]s for a driver to execute.

use std::time::Duration;

use serde::Serialize;

use crate::protocol::{self, InboundEvent, OutboundCommand};
use crate::state::connection::{
    ConnectionAction, ConnectionManager, ConnectionStatus, Notice, Target, TimerId, TransportId,
};
use crate::state::lobby::{LobbyCode, LobbyState};

/// Immutable view of a session, published after every change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LobbySnapshot {
    pub lobby_id: Option<LobbyCode>,
    pub status: ConnectionStatus,
    pub reconnecting: bool,
    pub lobby: LobbyState,
}

impl LobbySnapshot {
    pub fn is_connected(&self) -> bool {
        self.status.is_open()
    }
}

/// Work for the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    Open { transport: TransportId, url: String },
    Close { transport: TransportId },
    Send {
        transport: TransportId,
        payload: String,
    },
    ScheduleReconnect { timer: TimerId, delay: Duration },
    CancelReconnect { timer: TimerId },
    Publish(LobbySnapshot),
    Notify(Notice),
}

/// Client session for one player.
#[derive(Debug, Clone)]
pub struct LobbySession {
    connection: ConnectionManager,
    lobby_id: Option<LobbyCode>,
    lobby: LobbyState,
    enforce_start_gate: bool,
}

impl LobbySession {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            lobby_id: None,
            lobby: LobbyState::new(),
            enforce_start_gate: true,
        }
    }

    /// Hold back `start_game` locally unless the lobby is full.
    #[must_use]
    pub fn with_start_gate(mut self, enforce: bool) -> Self {
        self.enforce_start_gate = enforce;
        self
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn lobby(&self) -> &LobbyState {
        &self.lobby
    }

    pub fn snapshot(&self) -> LobbySnapshot {
        LobbySnapshot {
            lobby_id: self.lobby_id.clone(),
            status: self.connection.status(),
            reconnecting: self.connection.is_reconnecting(),
            lobby: self.lobby.clone(),
        }
    }

    pub fn connect(&mut self, lobby_id: &str, player_id: &str) -> Vec<SessionAction> {
        let actions = self.connection.connect(lobby_id, player_id);
        self.after_connect(actions)
    }

    pub fn connect_to(&mut self, target: Target) -> Vec<SessionAction> {
        let actions = self.connection.connect_to(target);
        self.after_connect(actions)
    }

    pub fn disconnect(&mut self) -> Vec<SessionAction> {
        let actions = self.connection.disconnect();
        self.translate(actions, false)
    }

    /// Encode and send a command. Dropped with a notice when not connected.
    pub fn send(&mut self, command: OutboundCommand) -> Vec<SessionAction> {
        match protocol::encode(&command) {
            Ok(payload) => {
                let actions = self.connection.send(command.kind(), payload);
                self.translate(actions, false)
            }
            Err(e) => {
                tracing::error!(command = command.kind(), error = %e, "dropping unencodable command");
                Vec::new()
            }
        }
    }

    /// Ask the server to start the game.
    pub fn start_game(&mut self) -> Vec<SessionAction> {
        if self.enforce_start_gate {
            if let Err(e) = self.lobby.check_start() {
                tracing::warn!(reason = %e, "start_game held back");
                return vec![SessionAction::Notify(Notice::StartRejected(e))];
            }
        }
        self.send(OutboundCommand::StartGame)
    }

    /// Keepalive. Skipped silently unless the connection is open.
    pub fn ping(&mut self) -> Vec<SessionAction> {
        if !self.connection.status().is_open() {
            return Vec::new();
        }
        self.send(OutboundCommand::Ping)
    }

    pub fn on_open(&mut self, transport: TransportId) -> Vec<SessionAction> {
        let actions = self.connection.on_open(transport);
        self.translate(actions, false)
    }

    pub fn on_message(&mut self, transport: TransportId, payload: String) -> Vec<SessionAction> {
        let actions = self.connection.on_message(transport, payload);
        self.translate(actions, false)
    }

    pub fn on_error(&mut self, transport: TransportId, message: String) -> Vec<SessionAction> {
        let actions = self.connection.on_error(transport, message);
        self.translate(actions, false)
    }

    pub fn on_closed(&mut self, transport: TransportId) -> Vec<SessionAction> {
        let actions = self.connection.on_closed(transport);
        self.translate(actions, false)
    }

    pub fn on_timer(&mut self, timer: TimerId) -> Vec<SessionAction> {
        let actions = self.connection.on_timer(timer);
        self.translate(actions, false)
    }

    /// State from a previous lobby never leaks into the next one.
    fn after_connect(&mut self, actions: Vec<ConnectionAction>) -> Vec<SessionAction> {
        let current = self.connection.target().map(|t| &t.lobby);
        let switched = current != self.lobby_id.as_ref();
        if switched {
            tracing::debug!(from = ?self.lobby_id, to = ?current, "lobby changed, resetting state");
            self.lobby_id = current.cloned();
            self.lobby = LobbyState::new();
        }
        self.translate(actions, switched)
    }

    fn translate(&mut self, actions: Vec<ConnectionAction>, mut dirty: bool) -> Vec<SessionAction> {
        let mut out = Vec::with_capacity(actions.len() + 1);

        for action in actions {
            match action {
                ConnectionAction::Open { transport, url } => {
                    out.push(SessionAction::Open { transport, url });
                }
                ConnectionAction::Close { transport } => {
                    out.push(SessionAction::Close { transport });
                }
                ConnectionAction::Send { transport, payload } => {
                    out.push(SessionAction::Send { transport, payload });
                }
                ConnectionAction::ScheduleReconnect { timer, delay } => {
                    out.push(SessionAction::ScheduleReconnect { timer, delay });
                }
                ConnectionAction::CancelReconnect { timer } => {
                    out.push(SessionAction::CancelReconnect { timer });
                }
                ConnectionAction::Deliver { payload } => {
                    dirty |= self.deliver(&payload, &mut out);
                }
                ConnectionAction::Notify(notice) => out.push(SessionAction::Notify(notice)),
                ConnectionAction::StatusChanged(_) => dirty = true,
            }
        }

        // Reconnect scheduling changes the snapshot without a status change
        let timer_changed = out.iter().any(|a| {
            matches!(
                a,
                SessionAction::ScheduleReconnect { .. } | SessionAction::CancelReconnect { .. }
            )
        });
        if dirty || timer_changed {
            out.push(SessionAction::Publish(self.snapshot()));
        }
        out
    }

    /// Decode and apply one payload. Returns whether the state changed.
    fn deliver(&mut self, payload: &str, out: &mut Vec<SessionAction>) -> bool {
        let event = match protocol::decode(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable message");
                out.push(SessionAction::Notify(Notice::DecodeFailed {
                    message: e.to_string(),
                }));
                return false;
            }
        };

        match &event {
            InboundEvent::Unknown { kind, .. } => {
                tracing::debug!(kind = %kind, "ignoring unrecognized event");
            }
            InboundEvent::Error { message } => {
                tracing::warn!(message = %message, "server rejected a command");
            }
            other => tracing::trace!(kind = other.kind(), "applying event"),
        }

        let next = self.lobby.apply(&event);
        if next == self.lobby {
            return false;
        }
        self.lobby = next;
        true
    }
}
