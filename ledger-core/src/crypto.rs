//! Hashing for blocks
//!
//! This module provides:
//! - SHA-256 block digests rendered as lowercase hex
//! - The proof-of-work target check (leading zero hex digits)

use crate::types::BlockData;
use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest
pub const HASH_HEX_LEN: usize = 64;

/// Render a block timestamp the way it enters the digest.
///
/// RFC 3339, UTC, millisecond precision, `Z` suffix.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Compute the block digest from its hashed fields.
///
/// `H = sha256(index ‖ timestamp ‖ json(payload) ‖ previous_hash ‖ nonce)`
pub fn hash_block_fields(
    index: u64,
    timestamp: &DateTime<Utc>,
    payload: &BlockData,
    previous_hash: &str,
    nonce: u64,
) -> String {
    let payload_json = serde_json::to_string(payload).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(index.to_string().as_bytes());
    hasher.update(format_timestamp(timestamp).as_bytes());
    hasher.update(payload_json.as_bytes());
    hasher.update(previous_hash.as_bytes());
    hasher.update(nonce.to_string().as_bytes());

    hex::encode(hasher.finalize())
}

/// True if the first `difficulty` hex digits of `hash` are all `'0'`.
pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}
