//! Error types for the session server

use shared::PlayerId;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or listening failed. Fatal to startup.
    #[error("failed to start listening on {addr}: {source}")]
    Bootstrap {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Every identity is in use. The accept path defers rather than failing.
    #[error("no free player identity")]
    IdentityExhausted,

    /// A send or receive on one connection failed. Only that connection is torn down.
    #[error("connection for player {player_id} failed: {reason}")]
    Connection { player_id: PlayerId, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
