//! Blockchained Ledger Core
//!
//! Hash-linked, proof-of-work block chain owned by a single node.
//!
//! # Architecture
//!
//! - **Chain**: Append-only sequence anchored at a fixed genesis block
//! - **Validator**: Structural checks for a single block and a whole chain
//! - **Miner**: Cancellable nonce search
//! - **Ledger**: Chain + persistence + metrics, driven by the node controller
//!
//! # Invariants
//!
//! - `chain[i].index == i`
//! - `chain[i].previous_hash == chain[i-1].hash`
//! - A block's hash is the SHA-256 of its own fields

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod miner;
pub mod storage;
pub mod types;
pub mod validation;

// Re-exports
pub use chain::{Chain, ChainSnapshot, DEFAULT_DIFFICULTY};
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::{ChainAdoption, Ledger};
pub use metrics::Metrics;
pub use miner::Miner;
pub use storage::{ChainStore, MemoryStore, RocksStore};
pub use types::{Block, BlockData, ChainStatus};
