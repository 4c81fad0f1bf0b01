//! Cancellable proof-of-work solver
//!
//! Mining is a brute-force nonce search. The caller supplies a staleness
//! predicate which is polled before every increment; once it reports that the
//! candidate's parent is no longer the chain head, the solver gives up and
//! returns the block unmined.

use crate::crypto::HASH_HEX_LEN;
use crate::metrics::Metrics;
use crate::types::Block;
use rand::Rng;
use std::fmt;
use std::time::Duration;

/// Proof-of-work miner
#[derive(Clone, Default)]
pub struct Miner {
    /// Optional randomized pause before solving, `(min, max)`
    pacing: Option<(Duration, Duration)>,

    metrics: Option<Metrics>,
}

impl fmt::Debug for Miner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Miner")
            .field("pacing", &self.pacing)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

impl Miner {
    /// Miner without pacing delay
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause for a random duration in `[min, max]` before each job.
    ///
    /// A zero range disables pacing.
    pub fn with_pacing(mut self, min: Duration, max: Duration) -> Self {
        self.pacing = if max.is_zero() {
            None
        } else {
            Some((min.min(max), max))
        };
        self
    }

    /// Count hash attempts in `metrics`
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Delay to wait before the next job
    pub fn pacing_delay(&self) -> Duration {
        match self.pacing {
            Some((min, max)) if max > min => rand::thread_rng().gen_range(min..=max),
            Some((min, _)) => min,
            None => Duration::ZERO,
        }
    }

    /// Search for a nonce whose hash has `difficulty` leading zero digits.
    ///
    /// `is_stale` is checked before every nonce increment. When it returns
    /// true the search stops and the block is returned without meeting the
    /// target. On success `valid` reflects the hash invariant.
    pub fn solve<F>(&self, candidate: Block, difficulty: usize, mut is_stale: F) -> Block
    where
        F: FnMut() -> bool,
    {
        let mut block = candidate;
        block.nonce = 0;
        block.hash = block.compute_hash();
        let mut attempts: u64 = 1;

        if difficulty > HASH_HEX_LEN {
            tracing::warn!(difficulty, "Difficulty exceeds hash length, not mining");
            block.refresh_validity();
            return block;
        }

        while !block.meets_difficulty(difficulty) {
            if is_stale() {
                tracing::warn!(
                    index = block.index,
                    attempts,
                    "Mining stopped: a new block was accepted on top of the parent"
                );
                self.record_attempts(attempts);
                block.refresh_validity();
                return block;
            }
            block.nonce += 1;
            block.hash = block.compute_hash();
            attempts += 1;
        }

        self.record_attempts(attempts);
        block.refresh_validity();
        tracing::info!(index = block.index, hash = %block.hash, nonce = block.nonce, "Mined new block");
        block
    }

    fn record_attempts(&self, attempts: u64) {
        if let Some(metrics) = &self.metrics {
            metrics.hash_attempts.inc_by(attempts);
        }
    }
}
