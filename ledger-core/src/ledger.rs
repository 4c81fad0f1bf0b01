//! Main ledger orchestration layer
//!
//! This module ties together the chain, storage and metrics into the API the
//! node controller drives: build a candidate, admit a block, adopt a chain
//! from the network.
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{Ledger, MemoryStore};
//!
//! fn main() -> ledger_core::Result<()> {
//!     let ledger = Ledger::open(Box::new(MemoryStore::new()), 2)?;
//!     assert_eq!(ledger.chain().len(), 1);
//!     Ok(())
//! }
//! ```

use crate::{
    chain::{Chain, ChainSnapshot},
    metrics::Metrics,
    storage::ChainStore,
    types::{Block, BlockData, ChainStatus},
    Result,
};
use chrono::{DateTime, Utc};

/// Outcome of offering a chain received from the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainAdoption {
    /// The local chain was replaced
    Replaced,
    /// The offered chain failed validation
    Invalid(ChainStatus),
    /// The offered chain starts from a different genesis block
    ForeignGenesis,
}

/// Main ledger interface
pub struct Ledger {
    /// Local chain
    chain: Chain,

    /// Persistence
    store: Box<dyn ChainStore>,

    /// Optional metrics
    metrics: Option<Metrics>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("len", &self.chain.len())
            .field("head", &self.chain.head_hash())
            .field("difficulty", &self.chain.difficulty())
            .finish_non_exhaustive()
    }
}

impl Ledger {
    /// Open the ledger from `store`, or start a genesis-only chain at
    /// `difficulty` when nothing was persisted.
    ///
    /// A store that cannot be read is fatal: the node cannot know its tip.
    pub fn open(store: Box<dyn ChainStore>, difficulty: usize) -> Result<Self> {
        let chain = match store.load()? {
            Some(chain) => {
                let status = chain.validate();
                if !status.valid {
                    tracing::warn!(errors = ?status.errors, "Persisted chain failed validation");
                }
                tracing::info!(blocks = chain.len(), head = %chain.head_hash(), "Loaded persisted chain");
                chain
            }
            None => {
                tracing::info!(difficulty, "No persisted chain, starting from genesis");
                let chain = Chain::new(difficulty);
                store.save(&chain)?;
                chain
            }
        };

        Ok(Self {
            chain,
            store,
            metrics: None,
        })
    }

    /// Record metrics in `metrics`
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        metrics.chain_length.set(self.chain.len() as i64);
        self.metrics = Some(metrics);
        self
    }

    /// Local chain
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Hash of the head block
    pub fn head_hash(&self) -> &str {
        self.chain.head_hash()
    }

    /// Proof-of-work difficulty
    pub fn difficulty(&self) -> usize {
        self.chain.difficulty()
    }

    /// Unmined block extending the current head
    pub fn candidate(&self, payload: BlockData, timestamp: DateTime<Utc>) -> Block {
        let latest = self.chain.latest();
        Block::new(latest.index + 1, timestamp, payload, latest.hash.clone())
    }

    /// True if `block` could extend the current head
    pub fn is_valid_next(&self, block: &Block) -> bool {
        match self.chain.check_append(block) {
            Ok(()) => true,
            Err(violation) => {
                tracing::debug!(block = %block, %violation, "Block is not a valid successor");
                false
            }
        }
    }

    /// Append `block` and persist. Returns false, leaving the chain
    /// unchanged, when the block does not extend the head.
    pub fn add_block(&mut self, block: Block) -> bool {
        tracing::info!(index = block.index, hash = %block.hash, "Adding block to the chain");

        if let Err(violation) = self.chain.check_append(&block) {
            tracing::warn!(index = block.index, hash = %block.hash, %violation, "Block rejected");
            if let Some(metrics) = &self.metrics {
                metrics.blocks_rejected.inc();
            }
            return false;
        }

        self.chain.append(block);
        if let Some(metrics) = &self.metrics {
            metrics.blocks_appended.inc();
            metrics.chain_length.set(self.chain.len() as i64);
        }
        self.persist();
        true
    }

    /// Replace the local chain with `chain` if it validates and shares our
    /// genesis block.
    pub fn load_from_network(&mut self, chain: Chain) -> ChainAdoption {
        let status = chain.validate();
        if !status.valid {
            tracing::warn!(errors = ?status.errors, "Received chain is invalid");
            return ChainAdoption::Invalid(status);
        }

        if chain.blocks()[0].hash != self.chain.blocks()[0].hash {
            tracing::warn!("Received chain starts from a foreign genesis block");
            return ChainAdoption::ForeignGenesis;
        }

        tracing::info!(
            from = self.chain.len(),
            to = chain.len(),
            head = %chain.head_hash(),
            "Replacing local chain"
        );
        self.chain.replace(chain);
        if let Some(metrics) = &self.metrics {
            metrics.chain_replacements.inc();
            metrics.chain_length.set(self.chain.len() as i64);
        }
        self.persist();
        ChainAdoption::Replaced
    }

    /// Wire snapshot of the local chain
    pub fn snapshot(&self) -> ChainSnapshot {
        self.chain.snapshot()
    }

    /// Best-effort save. A failure is logged; the next mutation rewrites the
    /// whole chain.
    fn persist(&self) {
        if let Err(e) = self.store.save(&self.chain) {
            tracing::error!("Failed to persist chain: {}", e);
        }
    }
}
