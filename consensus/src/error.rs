//! Error types for consensus

use thiserror::Error;

/// Result type for consensus operations
pub type Result<T> = std::result::Result<T, Error>;

/// Consensus errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// Message bus error
    #[error("Message bus error: {0}")]
    Bus(#[from] message_bus::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The node task is no longer running
    #[error("Node stopped")]
    NodeStopped,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
