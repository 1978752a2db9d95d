//! Terminal lobby client.
//!
//! Creates or joins a lobby, then keeps the connection alive and logs every
//! lobby update. Reads commands from stdin: `start`, `ping`, `leave`,
//! `rejoin`, `quit`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use sartel_lobby::api::LobbyApi;
use sartel_lobby::protocol::OutboundCommand;
use sartel_lobby::{ClientConfig, LobbyClient, LobbyCode, LobbyHandle, PlayerId};

/// Sartel lobby client.
#[derive(Parser, Debug)]
#[command(name = "sartel-lobby", about = "Create or join a Sartel lobby")]
struct Cli {
    /// JSON config file, layered under `SARTEL_*` variables.
    #[arg(long, env = "SARTEL_CONFIG")]
    config: Option<PathBuf>,

    /// Server origin, e.g. `https://sartel.example`.
    #[arg(long)]
    origin: Option<String>,

    /// Use the development backend port.
    #[arg(long)]
    dev: bool,

    /// File holding the persisted player id.
    #[arg(long)]
    identity: Option<PathBuf>,

    /// Use this player id instead of the persisted one.
    #[arg(long)]
    player: Option<String>,

    /// Send `ping` every N milliseconds while connected.
    #[arg(long)]
    heartbeat_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new lobby and wait in it.
    Create,
    /// Join an existing lobby by its share code.
    Join { code: String },
}

impl Cli {
    fn into_config(self) -> sartel_lobby::Result<(ClientConfig, Option<String>, Command)> {
        let mut config = ClientConfig::load(self.config.as_deref())?;
        if let Some(origin) = self.origin {
            config.origin = origin;
        }
        if self.dev {
            config.development = true;
        }
        if let Some(path) = self.identity {
            config.identity_file = path;
        }
        if let Some(ms) = self.heartbeat_ms {
            config.heartbeat_interval_ms = Some(ms);
        }
        Ok((config, self.player, self.command))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "sartel-lobby failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> sartel_lobby::Result<()> {
    let (config, player, command) = cli.into_config()?;

    let player = match player {
        Some(id) => PlayerId::new(id)?,
        None => PlayerId::load_or_create(&config.identity_file)?,
    };

    let api = LobbyApi::new(config.origin()?);
    let lobby = match command {
        Command::Create => api.create_lobby().await?,
        Command::Join { code } => {
            let code = LobbyCode::parse(&code)?;
            api.join_lobby(&code).await?;
            code
        }
    };
    tracing::info!(lobby = %lobby, player = %player, "entering lobby");

    let handle = LobbyClient::from_config(&config)?.spawn();
    handle.connect(lobby.as_str(), player.as_str())?;

    let watchers = [
        tokio::spawn(log_snapshots(handle.subscribe())),
        tokio::spawn(log_notices(handle.notices())),
    ];

    let result = read_commands(&handle, &lobby, &player).await;

    handle.shutdown().await;
    for watcher in watchers {
        watcher.abort();
    }
    result
}

async fn read_commands(
    handle: &LobbyHandle,
    lobby: &LobbyCode,
    player: &PlayerId,
) -> sartel_lobby::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            return Ok(());
        };

        match line.trim() {
            "" => {}
            "start" => handle.start_game()?,
            "ping" => handle.send(OutboundCommand::Ping)?,
            "leave" => handle.disconnect()?,
            "rejoin" => handle.connect(lobby.as_str(), player.as_str())?,
            "quit" | "exit" => return Ok(()),
            other => tracing::warn!(command = other, "unknown command"),
        }
    }
}

async fn log_snapshots(mut snapshots: tokio::sync::watch::Receiver<sartel_lobby::LobbySnapshot>) {
    while snapshots.changed().await.is_ok() {
        let snapshot = snapshots.borrow_and_update().clone();
        let lobby = &snapshot.lobby;
        tracing::info!(
            status = %snapshot.status,
            reconnecting = snapshot.reconnecting,
            players = lobby.player_count,
            roster = ?lobby.players.iter().map(PlayerId::as_str).collect::<Vec<_>>(),
            game_started = lobby.game_started,
            "lobby updated"
        );
        if let Some(round) = &lobby.round {
            tracing::info!(
                letter = round.letter.as_deref().unwrap_or("?"),
                categories = ?round.categories,
                "round started"
            );
        }
    }
}

async fn log_notices(mut notices: tokio::sync::broadcast::Receiver<sartel_lobby::Notice>) {
    loop {
        match notices.recv().await {
            Ok(notice) => tracing::warn!(?notice, "notice"),
            Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "notices skipped"),
            Err(RecvError::Closed) => break,
        }
    }
}
