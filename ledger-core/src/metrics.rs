//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_blocks_appended_total` - Blocks appended to the local chain
//! - `ledger_blocks_rejected_total` - Blocks refused by validation
//! - `ledger_chain_replacements_total` - Whole-chain replacements from the network
//! - `ledger_chain_length` - Current chain length including genesis
//! - `ledger_hash_attempts_total` - Proof-of-work hash attempts

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics collector
///
/// Every collector is registered in its own [`Registry`], so several ledgers
/// (for example one per node in an in-process cluster) can coexist.
#[derive(Clone)]
pub struct Metrics {
    /// Blocks appended
    pub blocks_appended: IntCounter,

    /// Blocks rejected
    pub blocks_rejected: IntCounter,

    /// Chain replacements
    pub chain_replacements: IntCounter,

    /// Chain length
    pub chain_length: IntGauge,

    /// Hash attempts while mining
    pub hash_attempts: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("chain_length", &self.chain_length.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let blocks_appended = IntCounter::new(
            "ledger_blocks_appended_total",
            "Blocks appended to the local chain",
        )?;
        registry.register(Box::new(blocks_appended.clone()))?;

        let blocks_rejected = IntCounter::new(
            "ledger_blocks_rejected_total",
            "Blocks refused by validation",
        )?;
        registry.register(Box::new(blocks_rejected.clone()))?;

        let chain_replacements = IntCounter::new(
            "ledger_chain_replacements_total",
            "Whole-chain replacements received from the network",
        )?;
        registry.register(Box::new(chain_replacements.clone()))?;

        let chain_length = IntGauge::new(
            "ledger_chain_length",
            "Current chain length including genesis",
        )?;
        registry.register(Box::new(chain_length.clone()))?;

        let hash_attempts = IntCounter::new(
            "ledger_hash_attempts_total",
            "Proof-of-work hash attempts",
        )?;
        registry.register(Box::new(hash_attempts.clone()))?;

        Ok(Self {
            blocks_appended,
            blocks_rejected,
            chain_replacements,
            chain_length,
            hash_attempts,
            registry,
        })
    }

    /// Render all metrics in the Prometheus text format
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
