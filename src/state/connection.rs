//! Connection lifecycle state machine.
//!
//! Owns the one persistent connection a client holds for a (lobby, player)
//! pair and decides when to open, close and re-open it.
//!
//! # Action-based design
//!
//! [`ConnectionManager`] performs no I/O. Every input (a caller request, a
//! transport callback, a timer firing) returns a list of
//! [`ConnectionAction`]s for the driver to execute. The transition table can
//! therefore be tested without a socket or a clock.
//!
//! # State diagram
//!
//! ```text
//! ┌──────┐ connect ┌────────────┐  opened  ┌──────┐
//! │ Idle │────────▶│ Connecting │─────────▶│ Open │
//! └──────┘         └────────────┘          └──┬───┘
//!                     ▲      │ disconnect      │ closed (intent) / disconnect
//!        timer fired  │      ▼                 ▼
//!                     │   ┌────────────────────────┐
//!                     └───│         Closed         │
//!                         └────────────────────────┘
//! ```
//!
//! After an unsolicited close the manager stays `Closed` with one reconnect
//! timer pending; when that timer fires it moves back to `Connecting`.
//! `disconnect` clears the reconnect intent, so `Closed` is terminal until
//! the next explicit `connect`.
//!
//! # Stale handles
//!
//! Every transport and timer is tagged with a fresh id. Callbacks carrying
//! an id that is no longer live are ignored, which is what makes
//! `disconnect` suppress both late transport events and a timer that was
//! already in flight.

use std::fmt;
use std::time::Duration;

use crate::endpoint::Origin;
use crate::state::lobby::{LobbyCode, LobbyError};
use crate::state::player::PlayerId;

/// Default delay before a reconnect attempt (3 seconds).
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Lifecycle status of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Nothing attempted yet
    #[default]
    Idle,
    /// Transport requested, not open yet
    Connecting,
    /// Transport open, commands can be sent
    Open,
    /// Transport gone (possibly with a reconnect pending)
    Closed,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one transport opened by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(u64);

/// Identifies one scheduled reconnect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport#{}", self.0)
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// The (lobby, player) pair a connection belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub lobby: LobbyCode,
    pub player: PlayerId,
}

impl Target {
    /// Build a target from raw inputs.
    ///
    /// `Ok(None)` when either id is absent or blank. A present lobby code that
    /// is not a valid code is an error.
    pub fn parse(lobby_id: &str, player_id: &str) -> Result<Option<Self>, LobbyError> {
        let Ok(player) = PlayerId::new(player_id) else {
            return Ok(None);
        };
        if lobby_id.trim().is_empty() {
            return Ok(None);
        }
        let lobby = LobbyCode::parse(lobby_id)?;
        Ok(Some(Self { lobby, player }))
    }
}

/// Non-fatal conditions surfaced to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A command was dropped because the connection is not open.
    NotConnected { command: String },
    /// The transport reported an error. A close (and reconnect) follows.
    TransportError { message: String },
    /// An inbound payload could not be decoded and was dropped.
    DecodeFailed { message: String },
    /// `start_game` was held back by the client-side start gate.
    StartRejected(LobbyError),
    /// `connect` was given a lobby code that cannot name a lobby.
    InvalidLobby(LobbyError),
}

/// Work for the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Open a transport to `url`; report its events tagged with `transport`.
    Open { transport: TransportId, url: String },
    /// Tear the transport down. Its later events will be ignored.
    Close { transport: TransportId },
    /// Write one text frame.
    Send {
        transport: TransportId,
        payload: String,
    },
    /// Call [`ConnectionManager::on_timer`] with `timer` after `delay`.
    ScheduleReconnect { timer: TimerId, delay: Duration },
    /// Forget a scheduled timer.
    CancelReconnect { timer: TimerId },
    /// Raw inbound payload for the protocol layer.
    Deliver { payload: String },
    /// Surface a non-fatal condition to observers.
    Notify(Notice),
    /// The lifecycle status moved to the given value.
    StatusChanged(ConnectionStatus),
}

/// Reconnect behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Re-open automatically after an unsolicited close
    pub auto_reconnect: bool,
    /// Constant delay before each attempt
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Connection manager for one client.
///
/// Holds at most one live transport and at most one pending reconnect timer.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    origin: Origin,
    policy: ReconnectPolicy,
    target: Option<Target>,
    status: ConnectionStatus,
    reconnect_intent: bool,
    transport: Option<TransportId>,
    pending_timer: Option<TimerId>,
    next_id: u64,
}

impl ConnectionManager {
    pub fn new(origin: Origin, policy: ReconnectPolicy) -> Self {
        Self {
            origin,
            policy,
            target: None,
            status: ConnectionStatus::Idle,
            reconnect_intent: false,
            transport: None,
            pending_timer: None,
            next_id: 0,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    /// The live transport, if any.
    pub fn transport(&self) -> Option<TransportId> {
        self.transport
    }

    pub fn pending_timer(&self) -> Option<TimerId> {
        self.pending_timer
    }

    /// Whether a reconnect attempt is scheduled.
    pub fn is_reconnecting(&self) -> bool {
        self.pending_timer.is_some()
    }

    pub fn reconnect_intent(&self) -> bool {
        self.reconnect_intent
    }

    /// Connect to a lobby.
    ///
    /// Silently does nothing when either id is missing. A lobby code that
    /// cannot be used is reported with [`Notice::InvalidLobby`]. Does nothing
    /// when the same pair is already open or being opened.
    pub fn connect(&mut self, lobby_id: &str, player_id: &str) -> Vec<ConnectionAction> {
        match Target::parse(lobby_id, player_id) {
            Ok(Some(target)) => self.connect_to(target),
            Ok(None) => {
                tracing::trace!(lobby_id, player_id, "connect skipped: missing lobby or player id");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(lobby_id, error = %e, "connect refused: unusable lobby code");
                vec![ConnectionAction::Notify(Notice::InvalidLobby(e))]
            }
        }
    }

    /// Connect to an already validated target.
    pub fn connect_to(&mut self, target: Target) -> Vec<ConnectionAction> {
        let busy = matches!(
            self.status,
            ConnectionStatus::Open | ConnectionStatus::Connecting
        );
        if busy && self.transport.is_some() && self.target.as_ref() == Some(&target) {
            tracing::debug!(lobby = %target.lobby, status = %self.status, "connect ignored: already connected");
            return Vec::new();
        }

        let mut actions = Vec::new();
        self.cancel_timer(&mut actions);
        if let Some(transport) = self.transport.take() {
            tracing::debug!(%transport, "closing previous connection before switching target");
            actions.push(ConnectionAction::Close { transport });
        }

        self.target = Some(target);
        self.reconnect_intent = true;
        self.open(&mut actions);
        actions
    }

    /// Close the connection and stop reconnecting. Safe to call repeatedly.
    pub fn disconnect(&mut self) -> Vec<ConnectionAction> {
        self.reconnect_intent = false;

        let mut actions = Vec::new();
        self.cancel_timer(&mut actions);
        if let Some(transport) = self.transport.take() {
            tracing::debug!(%transport, "disconnecting");
            actions.push(ConnectionAction::Close { transport });
        }
        self.set_status(ConnectionStatus::Closed, &mut actions);
        actions
    }

    /// Send an encoded frame. Dropped with a notice unless the connection is open.
    ///
    /// `command` only labels the notice.
    pub fn send(&mut self, command: &str, payload: String) -> Vec<ConnectionAction> {
        match (self.status, self.transport) {
            (ConnectionStatus::Open, Some(transport)) => {
                tracing::trace!(%transport, payload = %payload, "sending");
                vec![ConnectionAction::Send { transport, payload }]
            }
            _ => {
                tracing::warn!(command, status = %self.status, "not connected, dropping command");
                vec![ConnectionAction::Notify(Notice::NotConnected {
                    command: command.to_string(),
                })]
            }
        }
    }

    /// The transport finished its handshake.
    pub fn on_open(&mut self, transport: TransportId) -> Vec<ConnectionAction> {
        if !self.is_live(transport) {
            return Vec::new();
        }

        let mut actions = Vec::new();
        if self.status == ConnectionStatus::Connecting {
            tracing::debug!(%transport, "connection open");
            self.set_status(ConnectionStatus::Open, &mut actions);
        }
        actions
    }

    /// A text frame arrived.
    pub fn on_message(&mut self, transport: TransportId, payload: String) -> Vec<ConnectionAction> {
        if !self.is_live(transport) {
            return Vec::new();
        }
        vec![ConnectionAction::Deliver { payload }]
    }

    /// The transport reported an error.
    pub fn on_error(&mut self, transport: TransportId, message: String) -> Vec<ConnectionAction> {
        if !self.is_live(transport) {
            return Vec::new();
        }
        tracing::warn!(%transport, error = %message, "transport error");
        vec![ConnectionAction::Notify(Notice::TransportError { message })]
    }

    /// The transport is gone, either after a failed open or a dropped link.
    pub fn on_closed(&mut self, transport: TransportId) -> Vec<ConnectionAction> {
        if !self.is_live(transport) {
            return Vec::new();
        }

        let mut actions = Vec::new();
        self.transport = None;
        self.set_status(ConnectionStatus::Closed, &mut actions);

        if self.reconnect_intent && self.policy.auto_reconnect && self.pending_timer.is_none() {
            let timer = TimerId(self.next_id());
            self.pending_timer = Some(timer);
            tracing::info!(%timer, delay = ?self.policy.delay, "connection lost, reconnect scheduled");
            actions.push(ConnectionAction::ScheduleReconnect {
                timer,
                delay: self.policy.delay,
            });
        } else {
            tracing::info!(%transport, "connection closed");
        }
        actions
    }

    /// A scheduled reconnect timer fired.
    pub fn on_timer(&mut self, timer: TimerId) -> Vec<ConnectionAction> {
        if self.pending_timer != Some(timer) {
            tracing::trace!(%timer, "ignoring stale reconnect timer");
            return Vec::new();
        }
        self.pending_timer = None;

        if !self.reconnect_intent || self.target.is_none() {
            return Vec::new();
        }

        tracing::debug!(%timer, "reconnecting");
        let mut actions = Vec::new();
        self.open(&mut actions);
        actions
    }

    fn open(&mut self, actions: &mut Vec<ConnectionAction>) {
        let Some(target) = &self.target else {
            return;
        };
        let url = self.origin.ws_url(&target.lobby, &target.player);
        let transport = TransportId(self.next_id());

        tracing::debug!(%transport, %url, "opening connection");
        self.transport = Some(transport);
        self.set_status(ConnectionStatus::Connecting, actions);
        actions.push(ConnectionAction::Open { transport, url });
    }

    fn cancel_timer(&mut self, actions: &mut Vec<ConnectionAction>) {
        if let Some(timer) = self.pending_timer.take() {
            actions.push(ConnectionAction::CancelReconnect { timer });
        }
    }

    fn set_status(&mut self, status: ConnectionStatus, actions: &mut Vec<ConnectionAction>) {
        if self.status != status {
            self.status = status;
            actions.push(ConnectionAction::StatusChanged(status));
        }
    }

    fn is_live(&self, transport: TransportId) -> bool {
        let live = self.transport == Some(transport);
        if !live {
            tracing::trace!(%transport, "ignoring event from stale transport");
        }
        live
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}
