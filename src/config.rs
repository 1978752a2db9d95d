//! Client configuration.
//!
//! Settings are layered, later layers winning:
//!
//! 1. compiled defaults ([`ClientConfig::default`])
//! 2. an optional JSON file (missing keys keep their defaults)
//! 3. `SARTEL_*` environment variables
//!
//! | Variable | Field |
//! |---|---|
//! | `SARTEL_ORIGIN` | `origin` |
//! | `SARTEL_DEVELOPMENT` | `development` |
//! | `SARTEL_AUTO_RECONNECT` | `auto_reconnect` |
//! | `SARTEL_RECONNECT_DELAY_MS` | `reconnect_delay_ms` |
//! | `SARTEL_HEARTBEAT_MS` | `heartbeat_interval_ms` (`0` disables) |
//! | `SARTEL_START_GATE` | `enforce_start_gate` |
//! | `SARTEL_IDENTITY_FILE` | `identity_file` |

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::endpoint::{EndpointError, Origin, DEV_SERVER_PORT};
use crate::state::connection::{ConnectionManager, ReconnectPolicy, DEFAULT_RECONNECT_DELAY};
use crate::state::player::DEFAULT_IDENTITY_FILE;
use crate::state::session::LobbySession;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
}

/// Lobby client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// HTTP origin the lobby UI is served from.
    pub origin: String,

    /// Talk to the development backend port instead of the origin's port.
    pub development: bool,

    /// Re-open the connection after it drops unexpectedly.
    pub auto_reconnect: bool,

    /// Fixed delay before each reconnect attempt.
    pub reconnect_delay_ms: u64,

    /// Send `ping` on this interval while connected. `None` disables.
    pub heartbeat_interval_ms: Option<u64>,

    /// Refuse `start_game` locally unless the lobby is full.
    pub enforce_start_gate: bool,

    /// Where the player identity is persisted.
    pub identity_file: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:5173".to_string(),
            development: false,
            auto_reconnect: true,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY.as_millis() as u64,
            heartbeat_interval_ms: None,
            enforce_start_gate: true,
            identity_file: PathBuf::from(DEFAULT_IDENTITY_FILE),
        }
    }
}

impl ClientConfig {
    /// Defaults, then `path` (if given), then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Read a JSON file over the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(?path, "loaded client config");
        Ok(config)
    }

    /// Apply `SARTEL_*` overrides from `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(origin) = lookup("SARTEL_ORIGIN") {
            self.origin = origin;
        }
        if let Some(value) = lookup("SARTEL_DEVELOPMENT") {
            self.development = parse_flag("SARTEL_DEVELOPMENT", &value)?;
        }
        if let Some(value) = lookup("SARTEL_AUTO_RECONNECT") {
            self.auto_reconnect = parse_flag("SARTEL_AUTO_RECONNECT", &value)?;
        }
        if let Some(value) = lookup("SARTEL_RECONNECT_DELAY_MS") {
            self.reconnect_delay_ms = parse_value("SARTEL_RECONNECT_DELAY_MS", &value)?;
        }
        if let Some(value) = lookup("SARTEL_HEARTBEAT_MS") {
            let ms: u64 = parse_value("SARTEL_HEARTBEAT_MS", &value)?;
            self.heartbeat_interval_ms = (ms > 0).then_some(ms);
        }
        if let Some(value) = lookup("SARTEL_START_GATE") {
            self.enforce_start_gate = parse_flag("SARTEL_START_GATE", &value)?;
        }
        if let Some(path) = lookup("SARTEL_IDENTITY_FILE") {
            self.identity_file = PathBuf::from(path);
        }
        Ok(())
    }

    /// The server origin, with the development port applied.
    pub fn origin(&self) -> Result<Origin, ConfigError> {
        let origin = Origin::parse(&self.origin)?;
        Ok(if self.development {
            origin.with_port(DEV_SERVER_PORT)
        } else {
            origin
        })
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            auto_reconnect: self.auto_reconnect,
            delay: Duration::from_millis(self.reconnect_delay_ms),
        }
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// A fresh session wired with these settings.
    pub fn session(&self) -> Result<LobbySession, ConfigError> {
        let connection = ConnectionManager::new(self.origin()?, self.reconnect_policy());
        Ok(LobbySession::new(connection).with_start_gate(self.enforce_start_gate))
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.reconnect_delay_ms, 3000);
        assert_eq!(
            config.reconnect_policy(),
            ReconnectPolicy {
                auto_reconnect: true,
                delay: Duration::from_secs(3),
            }
        );
        assert_eq!(config.heartbeat_interval(), None);
        assert!(config.enforce_start_gate);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        std::fs::write(
            &path,
            r#"{"origin": "https://sartel.example", "reconnect_delay_ms": 500}"#,
        )
        .unwrap();

        let config = ClientConfig::from_file(&path).unwrap();
        assert_eq!(config.origin, "https://sartel.example");
        assert_eq!(config.reconnect_delay_ms, 500);
        // Untouched keys keep their defaults
        assert!(config.auto_reconnect);
    }

    #[test]
    fn test_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            ClientConfig::from_file(&missing),
            Err(ConfigError::Io { .. })
        ));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{").unwrap();
        assert!(matches!(
            ClientConfig::from_file(&broken),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ClientConfig::default();
        config
            .apply_overrides(env(&[
                ("SARTEL_ORIGIN", "https://play.example"),
                ("SARTEL_AUTO_RECONNECT", "off"),
                ("SARTEL_RECONNECT_DELAY_MS", "1200"),
                ("SARTEL_HEARTBEAT_MS", "25000"),
                ("SARTEL_START_GATE", "false"),
                ("SARTEL_IDENTITY_FILE", "/tmp/id"),
            ]))
            .unwrap();

        assert_eq!(config.origin, "https://play.example");
        assert!(!config.auto_reconnect);
        assert_eq!(config.reconnect_delay_ms, 1200);
        assert_eq!(config.heartbeat_interval(), Some(Duration::from_secs(25)));
        assert!(!config.enforce_start_gate);
        assert_eq!(config.identity_file, PathBuf::from("/tmp/id"));

        config
            .apply_overrides(env(&[("SARTEL_HEARTBEAT_MS", "0")]))
            .unwrap();
        assert_eq!(config.heartbeat_interval(), None);
    }

    #[test]
    fn test_env_invalid_value() {
        let mut config = ClientConfig::default();
        let result = config.apply_overrides(env(&[("SARTEL_RECONNECT_DELAY_MS", "soon")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { ref key, .. }) if key == "SARTEL_RECONNECT_DELAY_MS"));

        let result = config.apply_overrides(env(&[("SARTEL_DEVELOPMENT", "maybe")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_development_port() {
        let config = ClientConfig {
            origin: "http://localhost:5173".to_string(),
            development: true,
            ..Default::default()
        };
        assert_eq!(config.origin().unwrap().port(), Some(DEV_SERVER_PORT));
    }

    #[test]
    fn test_session_from_config() {
        let config = ClientConfig {
            origin: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.session(), Err(ConfigError::Endpoint(_))));

        let session = ClientConfig::default().session().unwrap();
        assert_eq!(session.snapshot(), Default::default());
    }
}
