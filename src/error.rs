//! Crate-level error.
//!
//! Each module keeps its own error enum; this one gathers them for callers
//! (such as the CLI) that drive several modules at once.

use thiserror::Error;

use crate::api::ApiError;
use crate::client::ClientClosed;
use crate::config::ConfigError;
use crate::endpoint::EndpointError;
use crate::state::lobby::LobbyError;
use crate::state::player::{IdentityError, InvalidPlayerId};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    #[error("player identity: {0}")]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    PlayerId(#[from] InvalidPlayerId),
    #[error(transparent)]
    Lobby(#[from] LobbyError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Client(#[from] ClientClosed),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraps_module_errors() {
        let err: Error = LobbyError::Full.into();
        assert!(matches!(err, Error::Lobby(LobbyError::Full)));

        let err: Error = ClientClosed.into();
        assert_eq!(err.to_string(), "lobby client has shut down");
    }
}
