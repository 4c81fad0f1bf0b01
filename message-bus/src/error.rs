//! Error types for message bus

use crate::types::PeerId;
use thiserror::Error;

/// Message bus error
#[derive(Debug, Error)]
pub enum Error {
    /// Transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Local peer is not attached to the network
    #[error("Peer {0} is not connected")]
    NotConnected(PeerId),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
