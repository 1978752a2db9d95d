//! Player identity.
//!
//! A [`PlayerId`] is an opaque string that identifies one player profile. It
//! is created once, persisted, and reused for every lobby that profile joins.
//!
//! # Format
//!
//! ```text
//! player-<unix millis>-<9 base36 chars>
//! ```
//!
//! Any non-empty string is accepted, both from the server (lobby rosters) and
//! from callers. The connect URL percent-encodes it as a path segment.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File name used for the persisted identity when no path is configured.
pub const DEFAULT_IDENTITY_FILE: &str = "sartel-player-id";

const ID_PREFIX: &str = "player-";
const SUFFIX_LEN: usize = 9;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Opaque, persisted player identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

/// Error when a string cannot be used as a player id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidPlayerId {
    #[error("player id is empty")]
    Empty,
}

/// Error loading or persisting the identity file.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity file i/o: {0}")]
    Io(#[from] io::Error),
    #[error("identity file holds an unusable id: {0}")]
    Invalid(#[from] InvalidPlayerId),
}

impl PlayerId {
    /// Wrap an id. Surrounding whitespace is trimmed; the rest is opaque.
    pub fn new(id: impl AsRef<str>) -> Result<Self, InvalidPlayerId> {
        let id = id.as_ref().trim();
        if id.is_empty() {
            return Err(InvalidPlayerId::Empty);
        }
        Ok(Self(id.to_string()))
    }

    /// Generate a fresh id.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
            .collect();
        Self(format!(
            "{}{}-{}",
            ID_PREFIX,
            chrono::Utc::now().timestamp_millis(),
            suffix
        ))
    }

    /// Read the id stored at `path`, creating and persisting a new one if the
    /// file does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self, IdentityError> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Self::new(contents)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let id = Self::generate();
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
                fs::write(path, id.as_str())?;
                tracing::info!(player_id = %id, ?path, "created new player identity");
                Ok(id)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PlayerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
