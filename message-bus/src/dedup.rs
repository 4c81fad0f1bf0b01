//! Seen-id cache for inbound and outbound envelopes
//!
//! The cache is wiped wholesale on a fixed period. A duplicate that arrives
//! after a wipe is processed again.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Default period between wipes
pub const DEFAULT_CLEAR_INTERVAL: Duration = Duration::from_secs(15);

/// Cache shared by a node's dispatcher and its publisher
pub type SharedDedup = Arc<Mutex<DedupCache>>;

/// Set of recently seen envelope ids
#[derive(Debug, Default)]
pub struct DedupCache {
    seen: HashSet<String>,
}

impl DedupCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap for sharing
    pub fn shared(self) -> SharedDedup {
        Arc::new(Mutex::new(self))
    }

    /// True if `id` was recorded since the last wipe
    pub fn seen(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Remember `id`
    pub fn record(&mut self, id: impl Into<String>) {
        self.seen.insert(id.into());
    }

    /// Record `id`, returning false if it was already known
    pub fn admit(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        self.seen.insert(id.to_string());
        true
    }

    /// Forget every id
    pub fn clear(&mut self) {
        let dropped = self.seen.len();
        self.seen.clear();
        tracing::trace!(dropped, "Dedup cache cleared");
    }

    /// Number of remembered ids
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// True if nothing is remembered
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admit_once() {
        let mut cache = DedupCache::new();
        assert!(cache.admit("a"));
        assert!(!cache.admit("a"));
        assert!(cache.seen("a"));
        assert!(!cache.seen("b"));
    }

    #[test]
    fn test_clear_forgets() {
        let mut cache = DedupCache::new();
        cache.record("a");
        cache.clear();

        assert!(cache.is_empty());
        assert!(cache.admit("a"));
    }

    #[test]
    fn test_shared_between_holders() {
        let shared = DedupCache::new().shared();
        let other = Arc::clone(&shared);
        shared.lock().record("x");
        assert!(other.lock().seen("x"));
    }
}
