//! Server origin and connect-target derivation.
//!
//! The client is always pointed at an HTTP origin (the page the lobby UI is
//! served from). The websocket target is derived from it:
//!
//! ```text
//! http://host:port   ->  ws://host:port/ws/<lobby>/<player>
//! https://host       ->  wss://host/ws/<lobby>/<player>
//! ```
//!
//! Lobby and player ids are appended as percent-encoded path segments.

use std::fmt;

use thiserror::Error;
use url::Url;

use crate::state::lobby::LobbyCode;
use crate::state::player::PlayerId;

/// Port the backend listens on during local development.
pub const DEV_SERVER_PORT: u16 = 8000;

/// Error parsing an origin.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("invalid origin: {0}")]
    Invalid(#[from] url::ParseError),
    #[error("unsupported scheme {0:?}, expected http or https")]
    UnsupportedScheme(String),
    #[error("origin {0:?} has no host")]
    MissingHost(String),
}

/// HTTP origin of the lobby server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    http: Url,
    ws: Url,
}

impl Origin {
    /// Parse `http(s)://host[:port][/...]`. Path, query and fragment are
    /// ignored.
    pub fn parse(origin: &str) -> Result<Self, EndpointError> {
        let mut http = Url::parse(origin.trim())?;

        let ws_scheme = match http.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
        };
        if http.host_str().map_or(true, str::is_empty) {
            return Err(EndpointError::MissingHost(origin.to_string()));
        }

        http.set_path("/");
        http.set_query(None);
        http.set_fragment(None);

        let mut ws = http.clone();
        ws.set_scheme(ws_scheme)
            .map_err(|()| EndpointError::UnsupportedScheme(ws_scheme.to_string()))?;

        Ok(Self { http, ws })
    }

    /// Replace the port, e.g. with [`DEV_SERVER_PORT`] in development.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        // Only fails for host-less urls, which parse already refused
        let _ = self.http.set_port(Some(port));
        let _ = self.ws.set_port(Some(port));
        self
    }

    pub fn is_secure(&self) -> bool {
        self.http.scheme() == "https"
    }

    pub fn host(&self) -> &str {
        self.http.host_str().unwrap_or_default()
    }

    /// Explicit port, `None` when the scheme default is used.
    pub fn port(&self) -> Option<u16> {
        self.http.port()
    }

    /// Websocket target for one (lobby, player) pair.
    pub fn ws_url(&self, lobby: &LobbyCode, player: &PlayerId) -> String {
        with_segments(&self.ws, &["ws", lobby.as_str(), player.as_str()]).into()
    }

    /// HTTP URL for an API path, e.g. `["api", "lobby", "create"]`.
    pub fn http_url(&self, segments: &[&str]) -> Url {
        with_segments(&self.http, segments)
    }
}

fn with_segments(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    // Http(s) and ws(s) urls always have path segments
    if let Ok(mut path) = url.path_segments_mut() {
        path.clear().extend(segments);
    }
    url
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.http.origin().ascii_serialization())
    }
}
