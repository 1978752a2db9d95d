//! HTTP lobby API.
//!
//! Lobbies are created and looked up over plain HTTP before any websocket is
//! opened. Joining is gated here: a lobby that does not exist or is already
//! full is refused without touching the connection manager.

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::endpoint::Origin;
use crate::state::lobby::{LobbyCode, LOBBY_CAPACITY};
use crate::state::player::PlayerId;

/// HTTP API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("lobby {0} not found or expired")]
    LobbyNotFound(LobbyCode),
    #[error("lobby {0} is full")]
    LobbyFull(LobbyCode),
}

/// Body of `POST /api/lobby/create`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedLobby {
    pub lobby_id: LobbyCode,
    #[serde(default)]
    pub message: String,
}

/// Body of `GET /api/lobby/<code>`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LobbyInfo {
    pub lobby: LobbySummary,
    /// Opaque game state, passed through untouched
    #[serde(default)]
    pub game_state: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LobbySummary {
    pub lobby_id: Option<LobbyCode>,
    #[serde(default)]
    pub players: Vec<PlayerId>,
    /// Server-side phase such as `waiting` or `playing`
    pub state: Option<String>,
}

impl LobbySummary {
    pub fn is_full(&self) -> bool {
        self.players.len() >= LOBBY_CAPACITY as usize
    }
}

impl LobbyInfo {
    /// Refuse a join into a full lobby.
    pub fn ensure_joinable(&self, code: &LobbyCode) -> Result<(), ApiError> {
        if self.lobby.is_full() {
            return Err(ApiError::LobbyFull(code.clone()));
        }
        Ok(())
    }
}

/// Client for the lobby HTTP endpoints.
#[derive(Debug, Clone)]
pub struct LobbyApi {
    http: reqwest::Client,
    origin: Origin,
}

impl LobbyApi {
    pub fn new(origin: Origin) -> Self {
        Self::with_client(origin, reqwest::Client::new())
    }

    /// Reuse an existing HTTP client.
    pub fn with_client(origin: Origin, http: reqwest::Client) -> Self {
        Self { http, origin }
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Create a lobby and return its share code.
    #[tracing::instrument(skip_all)]
    pub async fn create_lobby(&self) -> Result<LobbyCode, ApiError> {
        let url = self.origin.http_url(&["api", "lobby", "create"]);
        let response = self.http.post(url).send().await?;
        let response = check_status(response).await?;

        let created: CreatedLobby = response.json().await?;
        tracing::info!(lobby = %created.lobby_id, "lobby created");
        Ok(created.lobby_id)
    }

    /// Fetch lobby details.
    #[tracing::instrument(skip(self), fields(lobby = %code))]
    pub async fn lookup_lobby(&self, code: &LobbyCode) -> Result<LobbyInfo, ApiError> {
        let url = self.origin.http_url(&["api", "lobby", code.as_str()]);
        let response = self.http.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ApiError::LobbyNotFound(code.clone()));
        }
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    /// Check that `code` exists and has room for one more player.
    pub async fn join_lobby(&self, code: &LobbyCode) -> Result<LobbyInfo, ApiError> {
        let info = self.lookup_lobby(code).await?;
        info.ensure_joinable(code)?;
        tracing::debug!(lobby = %code, players = info.lobby.players.len(), "lobby joinable");
        Ok(info)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn code(s: &str) -> LobbyCode {
        LobbyCode::parse(s).unwrap()
    }

    #[test]
    fn test_parse_created() {
        let created: CreatedLobby = serde_json::from_str(
            r#"{"lobby_id":"K3P9Q","message":"Lobby created successfully. Share code: K3P9Q"}"#,
        )
        .unwrap();
        assert_eq!(created.lobby_id, code("K3P9Q"));
    }

    #[test]
    fn test_parse_created_rejects_bad_code() {
        let result = serde_json::from_str::<CreatedLobby>(r#"{"lobby_id":"TOOLONG1"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_lobby_info() {
        let info: LobbyInfo = serde_json::from_str(
            r#"{
                "lobby": {
                    "lobby_id": "K3P9Q",
                    "players": ["player-1-a"],
                    "state": "waiting",
                    "created_at": "2024-01-01T00:00:00",
                    "expires_at": "2024-01-01T01:00:00"
                },
                "game_state": {"round_number": 1}
            }"#,
        )
        .unwrap();

        assert_eq!(info.lobby.lobby_id, Some(code("K3P9Q")));
        assert_eq!(info.lobby.players, vec![PlayerId::new("player-1-a").unwrap()]);
        assert_eq!(info.lobby.state.as_deref(), Some("waiting"));
        assert!(info.game_state.is_some());
        assert!(info.ensure_joinable(&code("K3P9Q")).is_ok());
    }

    #[test]
    fn test_full_lobby_refused() {
        let info: LobbyInfo =
            serde_json::from_str(r#"{"lobby":{"players":["a","b"]},"game_state":null}"#).unwrap();

        assert!(info.lobby.is_full());
        assert!(matches!(
            info.ensure_joinable(&code("K3P9Q")),
            Err(ApiError::LobbyFull(c)) if c.as_str() == "K3P9Q"
        ));
    }

    #[test]
    fn test_api_urls_follow_origin() {
        let api = LobbyApi::new(Origin::parse("http://localhost:8000").unwrap());
        assert_eq!(
            api.origin().http_url(&["api", "lobby", "K3P9Q"]).as_str(),
            "http://localhost:8000/api/lobby/K3P9Q"
        );
    }
}
