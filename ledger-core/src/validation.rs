//! Block and chain validation
//!
//! Two levels of checks:
//! - [`check_new_block`]: may `block` extend a chain whose head is `latest`?
//! - [`validate_chain`]: walk a whole chain and collect one diagnostic per
//!   violation instead of failing fast, so a partially broken chain can be
//!   inspected.

use crate::types::{Block, ChainStatus};
use thiserror::Error;

/// Why a block cannot extend the current head
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockViolation {
    /// `previous_hash` does not point at the head
    #[error("previous hash {found} does not match head hash {expected}")]
    BrokenLink {
        /// Hash of the current head
        expected: String,
        /// `previous_hash` carried by the block
        found: String,
    },

    /// Index is not the successor of the head index
    #[error("index {found} does not follow head index {head}")]
    BadIndex {
        /// Index of the current head
        head: u64,
        /// Index carried by the block
        found: u64,
    },

    /// Stored hash does not match the block fields
    #[error("stored hash {stored} does not match computed hash {computed}")]
    HashMismatch {
        /// Hash carried by the block
        stored: String,
        /// Hash recomputed from the fields
        computed: String,
    },
}

/// Check that `block` may be appended on top of `latest`.
pub fn check_new_block(latest: &Block, block: &Block) -> Result<(), BlockViolation> {
    if block.previous_hash != latest.hash {
        return Err(BlockViolation::BrokenLink {
            expected: latest.hash.clone(),
            found: block.previous_hash.clone(),
        });
    }

    // chain[i].index == i
    if block.index != latest.index.saturating_add(1) {
        return Err(BlockViolation::BadIndex {
            head: latest.index,
            found: block.index,
        });
    }

    let computed = block.compute_hash();
    if block.hash != computed {
        return Err(BlockViolation::HashMismatch {
            stored: block.hash.clone(),
            computed,
        });
    }

    Ok(())
}

/// Validate every block's position, hash and adjacent link.
pub fn validate_chain(blocks: &[Block]) -> ChainStatus {
    let mut errors = Vec::new();

    if blocks.is_empty() {
        errors.push("The chain is empty: missing genesis block".to_string());
    }

    for (i, current) in blocks.iter().enumerate() {
        if current.index != i as u64 {
            errors.push(format!("The block #{} is at position {}", current.index, i));
        }

        let computed = current.compute_hash();
        if current.hash != computed {
            errors.push(format!(
                "The block #{} is invalid. Calculated hash: {}",
                current.index, computed
            ));
        }

        if i > 0 {
            let previous = &blocks[i - 1];
            if current.previous_hash != previous.hash {
                errors.push(format!(
                    "The block #{} is pointing to an inexistent block. \
                     The hash does not match with previous block #{}",
                    current.index, previous.index
                ));
            }
        }
    }

    ChainStatus::from_errors(errors)
}
