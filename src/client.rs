//! Async lobby client.
//!
//! [`LobbyClient`] spawns one tokio task that owns a [`LobbySession`] and
//! executes the [`SessionAction`]s it returns. Everything the session reacts
//! to is funneled into that single loop:
//!
//! ```text
//!   LobbyHandle ──commands──┐
//!   pump tasks ──events─────┼──▶ driver loop ──▶ LobbySession ──actions──▶ execute
//!   reconnect sleep ────────┤                                                │
//!   heartbeat interval ─────┘                        watch (snapshots) ◀─────┤
//!                                                    broadcast (notices) ◀───┘
//! ```
//!
//! Each open transport gets its own pump task. Pumps only forward frames and
//! report lifecycle events tagged with their [`TransportId`]; the session
//! decides what those events mean.

use std::collections::HashMap;
use std::future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};

use crate::config::{ClientConfig, ConfigError};
use crate::protocol::OutboundCommand;
use crate::state::connection::{Notice, TimerId, TransportId};
use crate::state::session::{LobbySession, LobbySnapshot, SessionAction};
use crate::transport::{Connector, WsConnector};

const NOTICE_CAPACITY: usize = 64;

/// How long a closed transport gets to flush queued frames and shut down.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// The driver task is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("lobby client has shut down")]
pub struct ClientClosed;

enum Command {
    Connect { lobby_id: String, player_id: String },
    Disconnect,
    Send(OutboundCommand),
    StartGame,
}

#[derive(Debug)]
enum TransportEvent {
    Opened,
    Message(String),
    Error(String),
    Closed,
}

/// Builder for the driver task.
pub struct LobbyClient {
    session: LobbySession,
    connector: Arc<dyn Connector>,
    heartbeat: Option<Duration>,
}

impl LobbyClient {
    /// Client over websockets.
    pub fn new(session: LobbySession) -> Self {
        Self {
            session,
            connector: Arc::new(WsConnector),
            heartbeat: None,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.session()?).with_heartbeat(config.heartbeat_interval()))
    }

    #[must_use]
    pub fn with_connector(mut self, connector: impl Connector) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Send `ping` on `interval` while the connection is open.
    #[must_use]
    pub fn with_heartbeat(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat = interval;
        self
    }

    /// Start the driver. Must be called inside a tokio runtime.
    pub fn spawn(self) -> LobbyHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshots, snapshots_rx) = watch::channel(self.session.snapshot());
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        let driver = Driver {
            session: self.session,
            connector: self.connector,
            pumps: HashMap::new(),
            closing: Vec::new(),
            events_tx,
            reconnect: None,
            snapshots,
            notices: notices.clone(),
        };
        let task = tokio::spawn(driver.run(commands_rx, events_rx, self.heartbeat));

        LobbyHandle {
            commands: commands_tx,
            snapshots: snapshots_rx,
            notices,
            task,
        }
    }
}

/// Caller side of a running client.
///
/// Dropping the handle stops the driver and closes any open transport.
pub struct LobbyHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<LobbySnapshot>,
    notices: broadcast::Sender<Notice>,
    task: JoinHandle<()>,
}

impl LobbyHandle {
    /// Connect to a lobby as a player. Missing ids are ignored; an unusable
    /// lobby code is reported as [`Notice::InvalidLobby`].
    pub fn connect(&self, lobby_id: &str, player_id: &str) -> Result<(), ClientClosed> {
        self.command(Command::Connect {
            lobby_id: lobby_id.to_string(),
            player_id: player_id.to_string(),
        })
    }

    /// Close the connection and cancel any pending reconnect.
    pub fn disconnect(&self) -> Result<(), ClientClosed> {
        self.command(Command::Disconnect)
    }

    pub fn send(&self, command: OutboundCommand) -> Result<(), ClientClosed> {
        self.command(Command::Send(command))
    }

    pub fn start_game(&self) -> Result<(), ClientClosed> {
        self.command(Command::StartGame)
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> LobbySnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<LobbySnapshot> {
        self.snapshots.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Stop the driver and wait for it to finish.
    pub async fn shutdown(self) {
        let Self { commands, task, .. } = self;
        drop(commands);
        if let Err(e) = task.await {
            tracing::error!(error = %e, "lobby client task failed");
        }
    }

    fn command(&self, command: Command) -> Result<(), ClientClosed> {
        self.commands.send(command).map_err(|_| ClientClosed)
    }
}

struct Pump {
    outgoing: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl Pump {
    /// Stop accepting frames. The pump writes what is already queued, closes
    /// the transport and exits. One still running after [`CLOSE_GRACE`]
    /// (a hung handshake, a stalled peer) is aborted.
    fn close(self) -> JoinHandle<()> {
        let Self { outgoing, mut task } = self;
        drop(outgoing);
        tokio::spawn(async move {
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                tracing::debug!("transport did not close in time, aborting");
                task.abort();
            }
        })
    }
}

enum Input {
    Command(Option<Command>),
    Transport(TransportId, TransportEvent),
    Timer(TimerId),
    Heartbeat,
}

struct Driver {
    session: LobbySession,
    connector: Arc<dyn Connector>,
    pumps: HashMap<TransportId, Pump>,
    closing: Vec<JoinHandle<()>>,
    events_tx: mpsc::UnboundedSender<(TransportId, TransportEvent)>,
    reconnect: Option<(TimerId, Pin<Box<Sleep>>)>,
    snapshots: watch::Sender<LobbySnapshot>,
    notices: broadcast::Sender<Notice>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<(TransportId, TransportEvent)>,
        heartbeat: Option<Duration>,
    ) {
        let mut heartbeat = heartbeat.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            let input = tokio::select! {
                command = commands.recv() => Input::Command(command),
                Some((transport, event)) = events.recv() => Input::Transport(transport, event),
                timer = fire(&mut self.reconnect) => Input::Timer(timer),
                () = tick(heartbeat.as_mut()) => Input::Heartbeat,
            };

            let actions = match input {
                Input::Command(None) => break,
                Input::Command(Some(command)) => self.on_command(command),
                Input::Transport(transport, event) => self.on_transport(transport, event),
                Input::Timer(timer) => {
                    self.reconnect = None;
                    self.session.on_timer(timer)
                }
                Input::Heartbeat => self.session.ping(),
            };
            self.execute(actions);
        }

        tracing::debug!("lobby client stopping");
        for (_, pump) in self.pumps.drain() {
            self.closing.push(pump.close());
        }
        for closing in self.closing.drain(..) {
            let _ = closing.await;
        }
    }

    fn on_command(&mut self, command: Command) -> Vec<SessionAction> {
        match command {
            Command::Connect {
                lobby_id,
                player_id,
            } => self.session.connect(&lobby_id, &player_id),
            Command::Disconnect => self.session.disconnect(),
            Command::Send(command) => self.session.send(command),
            Command::StartGame => self.session.start_game(),
        }
    }

    fn on_transport(&mut self, transport: TransportId, event: TransportEvent) -> Vec<SessionAction> {
        match event {
            TransportEvent::Opened => self.session.on_open(transport),
            TransportEvent::Message(payload) => self.session.on_message(transport, payload),
            TransportEvent::Error(message) => self.session.on_error(transport, message),
            TransportEvent::Closed => {
                self.pumps.remove(&transport);
                self.session.on_closed(transport)
            }
        }
    }

    fn execute(&mut self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::Open { transport, url } => self.open(transport, url),
                SessionAction::Close { transport } => {
                    if let Some(pump) = self.pumps.remove(&transport) {
                        tracing::debug!(%transport, "closing transport");
                        self.closing.retain(|closing| !closing.is_finished());
                        self.closing.push(pump.close());
                    }
                }
                SessionAction::Send { transport, payload } => {
                    let sent = self
                        .pumps
                        .get(&transport)
                        .is_some_and(|pump| pump.outgoing.send(payload).is_ok());
                    if !sent {
                        tracing::warn!(%transport, "transport gone, frame dropped");
                    }
                }
                SessionAction::ScheduleReconnect { timer, delay } => {
                    tracing::debug!(%timer, ?delay, "reconnect scheduled");
                    self.reconnect = Some((timer, Box::pin(tokio::time::sleep(delay))));
                }
                SessionAction::CancelReconnect { timer } => {
                    if self.reconnect.as_ref().map(|(pending, _)| *pending) == Some(timer) {
                        tracing::debug!(%timer, "reconnect cancelled");
                        self.reconnect = None;
                    }
                }
                SessionAction::Publish(snapshot) => {
                    self.snapshots.send_replace(snapshot);
                }
                SessionAction::Notify(notice) => {
                    // No subscribers is fine
                    let _ = self.notices.send(notice);
                }
            }
        }
    }

    fn open(&mut self, transport: TransportId, url: String) {
        tracing::debug!(%transport, url, "opening transport");
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(pump(
            Arc::clone(&self.connector),
            transport,
            url,
            outgoing_rx,
            self.events_tx.clone(),
        ));
        self.pumps.insert(transport, Pump { outgoing, task });
    }
}

async fn fire(reconnect: &mut Option<(TimerId, Pin<Box<Sleep>>)>) -> TimerId {
    match reconnect {
        Some((timer, sleep)) => {
            sleep.as_mut().await;
            *timer
        }
        None => future::pending().await,
    }
}

async fn tick(heartbeat: Option<&mut Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

/// Run one transport: connect, then shuttle frames until either side stops.
/// Always ends with a `Closed` event.
async fn pump(
    connector: Arc<dyn Connector>,
    transport: TransportId,
    url: String,
    mut outgoing_rx: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<(TransportId, TransportEvent)>,
) {
    let emit = |event| {
        // The driver may already be gone
        let _ = events.send((transport, event));
    };

    let (mut outgoing, mut incoming) = match connector.connect(&url).await {
        Ok(halves) => halves,
        Err(e) => {
            tracing::warn!(%transport, error = %e, "connect failed");
            emit(TransportEvent::Error(e.to_string()));
            emit(TransportEvent::Closed);
            return;
        }
    };
    emit(TransportEvent::Opened);

    loop {
        tokio::select! {
            frame = outgoing_rx.recv() => match frame {
                Some(payload) => {
                    if let Err(e) = outgoing.send(payload).await {
                        emit(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
                None => {
                    let _ = outgoing.close().await;
                    break;
                }
            },
            frame = incoming.next() => match frame {
                Some(Ok(payload)) => emit(TransportEvent::Message(payload)),
                Some(Err(e)) => {
                    emit(TransportEvent::Error(e.to_string()));
                    break;
                }
                None => break,
            },
        }
    }

    tracing::debug!(%transport, "transport closed");
    emit(TransportEvent::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Origin;
    use crate::state::connection::{ConnectionManager, ConnectionStatus, ReconnectPolicy};
    use crate::state::player::PlayerId;
    use crate::transport::{Incoming, Outgoing, TransportError};
    use async_trait::async_trait;
    use futures_util::{sink, stream};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};

    const WAIT: Duration = Duration::from_secs(60);

    /// Server side of one fake transport.
    struct Peer {
        url: String,
        to_client: mpsc::UnboundedSender<Result<String, TransportError>>,
        from_client: mpsc::UnboundedReceiver<String>,
    }

    impl Peer {
        fn push(&self, payload: &str) {
            self.to_client.send(Ok(payload.to_string())).unwrap();
        }

        async fn recv(&mut self) -> String {
            tokio::time::timeout(WAIT, self.from_client.recv())
                .await
                .unwrap()
                .unwrap()
        }
    }

    #[derive(Clone)]
    struct FakeConnector {
        dials: mpsc::UnboundedSender<Peer>,
        refuse: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self, url: &str) -> Result<(Outgoing, Incoming), TransportError> {
            let (to_client, client_rx) = mpsc::unbounded_channel();
            let (client_tx, from_client) = mpsc::unbounded_channel::<String>();
            let _ = self.dials.send(Peer {
                url: url.to_string(),
                to_client,
                from_client,
            });

            if self.refuse.load(Ordering::SeqCst) {
                return Err(TransportError::Connect("connection refused".to_string()));
            }

            let outgoing: Outgoing = Box::pin(sink::unfold(
                client_tx,
                |tx, payload: String| async move {
                    tx.send(payload)
                        .map_err(|_| TransportError::Send("peer gone".to_string()))?;
                    Ok::<_, TransportError>(tx)
                },
            ));
            let incoming: Incoming = Box::pin(stream::unfold(client_rx, |mut rx| async move {
                rx.recv().await.map(|frame| (frame, rx))
            }));
            Ok((outgoing, incoming))
        }
    }

    struct Harness {
        handle: LobbyHandle,
        dials: mpsc::UnboundedReceiver<Peer>,
        refuse: Arc<AtomicBool>,
    }

    impl Harness {
        fn new(gate: bool, heartbeat: Option<Duration>) -> Self {
            let (dials_tx, dials) = mpsc::unbounded_channel();
            let refuse = Arc::new(AtomicBool::new(false));
            let session = LobbySession::new(ConnectionManager::new(
                Origin::parse("http://localhost:8000").unwrap(),
                ReconnectPolicy::default(),
            ))
            .with_start_gate(gate);

            let handle = LobbyClient::new(session)
                .with_connector(FakeConnector {
                    dials: dials_tx,
                    refuse: Arc::clone(&refuse),
                })
                .with_heartbeat(heartbeat)
                .spawn();

            Self {
                handle,
                dials,
                refuse,
            }
        }

        async fn dial(&mut self) -> Peer {
            tokio::time::timeout(WAIT, self.dials.recv())
                .await
                .unwrap()
                .unwrap()
        }

        async fn wait_for(&self, f: impl Fn(&LobbySnapshot) -> bool) -> LobbySnapshot {
            let mut rx = self.handle.subscribe();
            let snapshot = tokio::time::timeout(WAIT, rx.wait_for(|s| f(s)))
                .await
                .unwrap()
                .unwrap()
                .clone();
            snapshot
        }

        async fn connected(&mut self) -> Peer {
            self.handle.connect("ab12c", "p1").unwrap();
            let peer = self.dial().await;
            self.wait_for(LobbySnapshot::is_connected).await;
            peer
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_opens_derived_url() {
        let mut h = Harness::new(true, None);
        let peer = h.connected().await;

        assert_eq!(peer.url, "ws://localhost:8000/ws/AB12C/p1");
        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.status, ConnectionStatus::Open);
        assert_eq!(snapshot.lobby_id.unwrap().as_str(), "AB12C");
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_connect_is_ignored() {
        let mut h = Harness::new(true, None);
        h.handle.connect("", "p1").unwrap();
        h.handle.connect("ab12c", "").unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.dials.try_recv().is_err());
        assert_eq!(h.handle.snapshot(), LobbySnapshot::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_events_apply_in_order() {
        let mut h = Harness::new(true, None);
        let peer = h.connected().await;

        peer.push(r#"{"type":"player_joined","player_count":1,"players":["p1"]}"#);
        peer.push(r#"{"type":"player_joined","player_count":2,"players":["p1","p2"]}"#);
        peer.push(r#"{"type":"game_started","letter":"B","categories":["Fruit"]}"#);

        let snapshot = h.wait_for(|s| s.lobby.game_started).await;
        assert_eq!(snapshot.lobby.player_count, 2);
        assert_eq!(
            snapshot.lobby.players,
            vec![PlayerId::new("p1").unwrap(), PlayerId::new("p2").unwrap()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_commands_keep_order() {
        let mut h = Harness::new(false, None);
        let mut peer = h.connected().await;

        h.handle.send(OutboundCommand::Ping).unwrap();
        h.handle.start_game().unwrap();
        h.handle.send(OutboundCommand::Ping).unwrap();

        assert_eq!(peer.recv().await, r#"{"type":"ping"}"#);
        assert_eq!(peer.recv().await, r#"{"type":"start_game"}"#);
        assert_eq!(peer.recv().await, r#"{"type":"ping"}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_flushes_accepted_frames() {
        let mut h = Harness::new(false, None);
        let mut peer = h.connected().await;

        h.handle.start_game().unwrap();
        h.handle.disconnect().unwrap();

        assert_eq!(peer.recv().await, r#"{"type":"start_game"}"#);
        assert_eq!(
            tokio::time::timeout(WAIT, peer.from_client.recv())
                .await
                .unwrap(),
            None
        );
        h.wait_for(|s| s.status == ConnectionStatus::Closed).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_accepted_frames() {
        let mut h = Harness::new(true, None);
        let mut peer = h.connected().await;

        h.handle.send(OutboundCommand::Ping).unwrap();
        h.handle.shutdown().await;

        assert_eq!(peer.recv().await, r#"{"type":"ping"}"#);
        assert_eq!(
            tokio::time::timeout(WAIT, peer.from_client.recv())
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_disconnected_notifies() {
        let h = Harness::new(true, None);
        let mut notices = h.handle.notices();

        h.handle.send(OutboundCommand::Ping).unwrap();

        let notice = tokio::time::timeout(WAIT, notices.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            notice,
            Notice::NotConnected {
                command: "ping".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_once_after_delay() {
        let mut h = Harness::new(true, None);
        let peer = h.connected().await;

        let closed_at = Instant::now();
        drop(peer);
        let snapshot = h.wait_for(|s| s.reconnecting).await;
        assert_eq!(snapshot.status, ConnectionStatus::Closed);

        let retry = h.dial().await;
        assert!(closed_at.elapsed() >= Duration::from_secs(3));
        assert_eq!(retry.url, "ws://localhost:8000/ws/AB12C/p1");
        h.wait_for(|s| s.is_connected() && !s.reconnecting).await;

        // Exactly one attempt for one drop
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(h.dials.try_recv().is_err());
        drop(retry);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_reconnect() {
        let mut h = Harness::new(true, None);
        let peer = h.connected().await;

        drop(peer);
        h.wait_for(|s| s.reconnecting).await;
        h.handle.disconnect().unwrap();
        let snapshot = h.wait_for(|s| !s.reconnecting).await;
        assert_eq!(snapshot.status, ConnectionStatus::Closed);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(h.dials.try_recv().is_err());
        assert_eq!(h.handle.snapshot().status, ConnectionStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_connect_retries() {
        let mut h = Harness::new(true, None);
        h.refuse.store(true, Ordering::SeqCst);
        let mut notices = h.handle.notices();

        h.handle.connect("ab12c", "p1").unwrap();
        h.dial().await;
        let notice = tokio::time::timeout(WAIT, notices.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(notice, Notice::TransportError { .. }));
        h.wait_for(|s| s.reconnecting).await;

        h.refuse.store(false, Ordering::SeqCst);
        let _peer = h.dial().await;
        h.wait_for(LobbySnapshot::is_connected).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_opaque_player_id() {
        let mut h = Harness::new(true, None);
        h.handle.connect("ab12c", "user@example.com").unwrap();

        let peer = h.dial().await;
        assert_eq!(peer.url, "ws://localhost:8000/ws/AB12C/user@example.com");
        h.wait_for(LobbySnapshot::is_connected).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unusable_lobby_code_notifies() {
        let mut h = Harness::new(true, None);
        let mut notices = h.handle.notices();

        h.handle.connect("abcdef", "p1").unwrap();

        let notice = tokio::time::timeout(WAIT, notices.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(notice, Notice::InvalidLobby(_)));
        assert!(h.dials.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_lobby_closes_old_transport() {
        let mut h = Harness::new(true, None);
        let mut first = h.connected().await;

        h.handle.connect("zz999", "p1").unwrap();
        let second = h.dial().await;
        assert_eq!(second.url, "ws://localhost:8000/ws/ZZ999/p1");

        // The old pump closed its outgoing side
        assert_eq!(
            tokio::time::timeout(WAIT, first.from_client.recv())
                .await
                .unwrap(),
            None
        );
        let snapshot = h.wait_for(LobbySnapshot::is_connected).await;
        assert_eq!(snapshot.lobby_id.unwrap().as_str(), "ZZ999");
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_pings_while_open() {
        let mut h = Harness::new(true, Some(Duration::from_secs(5)));
        let mut peer = h.connected().await;

        assert_eq!(peer.recv().await, r#"{"type":"ping"}"#);
        peer.push(r#"{"type":"pong"}"#);
        assert_eq!(peer.recv().await, r#"{"type":"ping"}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_transport() {
        let mut h = Harness::new(true, None);
        let mut peer = h.connected().await;

        h.handle.shutdown().await;
        assert_eq!(
            tokio::time::timeout(WAIT, peer.from_client.recv())
                .await
                .unwrap(),
            None
        );
    }
}
