//! Core types for the ledger
//!
//! All wire-visible types serialize to camelCase JSON so that every node,
//! observer and relay agrees on field names.

use crate::crypto::{hash_block_fields, meets_difficulty};
use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel `previous_hash` carried by the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Client that authored the genesis payload
pub const GENESIS_CLIENT_ID: &str = "genesis";

/// Opaque transaction record carried by a block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockData {
    /// Client that requested the block
    pub client_id: String,

    /// Arbitrary JSON payload
    pub data: serde_json::Value,
}

impl BlockData {
    /// Create a new payload
    pub fn new(client_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            client_id: client_id.into(),
            data,
        }
    }
}

/// A hash-linked, proof-of-work block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Position in the chain (genesis = 0)
    pub index: u64,

    /// Creation time (millisecond precision)
    pub timestamp: DateTime<Utc>,

    /// Transaction record
    #[serde(rename = "data")]
    pub payload: BlockData,

    /// Hash of the parent block
    pub previous_hash: String,

    /// Hash of this block's fields
    pub hash: String,

    /// Proof-of-work counter
    pub nonce: u64,

    /// True iff `hash` matches the stored fields
    pub valid: bool,
}

impl Block {
    /// Create an unmined block on top of `previous_hash`.
    ///
    /// The timestamp is truncated to milliseconds so that its digest
    /// rendering and its serialized form describe the same instant.
    pub fn new(
        index: u64,
        timestamp: DateTime<Utc>,
        payload: BlockData,
        previous_hash: impl Into<String>,
    ) -> Self {
        let mut block = Self {
            index,
            timestamp: timestamp.trunc_subsecs(3),
            payload,
            previous_hash: previous_hash.into(),
            hash: String::new(),
            nonce: 0,
            valid: true,
        };
        block.hash = block.compute_hash();
        block
    }

    /// The fixed, network-wide genesis block
    pub fn genesis() -> Self {
        let timestamp = Utc
            .with_ymd_and_hms(1997, 1, 23, 15, 40, 0)
            .single()
            .unwrap_or_default();

        Self::new(
            0,
            timestamp,
            BlockData::new(
                GENESIS_CLIENT_ID,
                serde_json::Value::String("Genesis Block".to_string()),
            ),
            GENESIS_PREVIOUS_HASH,
        )
    }

    /// Compute the digest of the block's current fields
    pub fn compute_hash(&self) -> String {
        hash_block_fields(
            self.index,
            &self.timestamp,
            &self.payload,
            &self.previous_hash,
            self.nonce,
        )
    }

    /// True if the stored hash matches the stored fields
    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }

    /// Re-run the hash invariant and store the result in `valid`
    pub fn refresh_validity(&mut self) {
        self.valid = self.has_valid_hash();
    }

    /// True if the stored hash satisfies the proof-of-work target
    pub fn meets_difficulty(&self, difficulty: usize) -> bool {
        meets_difficulty(&self.hash, difficulty)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.index, self.hash)
    }
}

/// Result of a whole-chain validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStatus {
    /// True when no violation was found
    pub valid: bool,

    /// One human-readable diagnostic per violation
    pub errors: Vec<String>,
}

impl ChainStatus {
    /// Build a status from collected diagnostics
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}
