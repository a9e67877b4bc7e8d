//! Shared window store abstraction.
//!
//! A window store holds one sorted set of admitted timestamps per bucket and
//! can run the purge, count, and conditional add of an admission as a single
//! atomic step. Redis does this with a server-side script; the in-memory
//! store does it under a per-key lock and serves single-node deployments and
//! tests.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::Result;

/// Storage behind the distributed counter.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Atomically remove entries scored at or before `now_ms - window_ms`,
    /// count what is left, and add `member` scored `now_ms` if the count is
    /// below `limit`. Returns whether the member was added.
    async fn admit(&self, key: &str, limit: u32, window_ms: i64, now_ms: i64, member: &str) -> Result<bool>;

    /// Number of entries currently held for `key`.
    async fn count(&self, key: &str) -> Result<u64>;

    /// Score of the oldest entry held for `key`.
    async fn oldest(&self, key: &str) -> Result<Option<i64>>;
}

/// Sorted set emulation: `(score, member)` kept ordered by score.
type SortedSet = Vec<(i64, String)>;

/// In-memory [`WindowStore`] with the same atomicity as the Redis script.
#[derive(Debug, Default)]
pub struct MemoryWindowStore {
    sets: DashMap<String, Arc<Mutex<SortedSet>>>,
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, key: &str) -> Arc<Mutex<SortedSet>> {
        if let Some(set) = self.sets.get(key) {
            return set.clone();
        }
        self.sets.entry(key.to_string()).or_default().clone()
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn admit(&self, key: &str, limit: u32, window_ms: i64, now_ms: i64, member: &str) -> Result<bool> {
        let set = self.set(key);
        let mut entries = set.lock();

        let cutoff = now_ms - window_ms;
        entries.retain(|(score, _)| *score > cutoff);

        if entries.len() >= limit as usize {
            return Ok(false);
        }
        let at = entries.partition_point(|(score, _)| *score <= now_ms);
        entries.insert(at, (now_ms, member.to_string()));
        Ok(true)
    }

    async fn count(&self, key: &str) -> Result<u64> {
        Ok(self
            .sets
            .get(key)
            .map_or(0, |set| set.lock().len() as u64))
    }

    async fn oldest(&self, key: &str) -> Result<Option<i64>> {
        Ok(self
            .sets
            .get(key)
            .and_then(|set| set.lock().first().map(|(score, _)| *score)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_admit_and_purge() {
        let store = MemoryWindowStore::new();

        assert!(store.admit("k", 2, 1_000, 0, "a").await.unwrap());
        assert!(store.admit("k", 2, 1_000, 500, "b").await.unwrap());
        assert!(!store.admit("k", 2, 1_000, 900, "c").await.unwrap());
        assert_eq!(store.count("k").await.unwrap(), 2);
        assert_eq!(store.oldest("k").await.unwrap(), Some(0));

        // The entry at 0 expires at 1000, making room for one more
        assert!(store.admit("k", 2, 1_000, 1_000, "d").await.unwrap());
        assert_eq!(store.count("k").await.unwrap(), 2);
        assert_eq!(store.oldest("k").await.unwrap(), Some(500));
    }

    #[tokio::test]
    async fn test_unknown_key() {
        let store = MemoryWindowStore::new();
        assert_eq!(store.count("missing").await.unwrap(), 0);
        assert_eq!(store.oldest("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_entries_stay_ordered() {
        let store = MemoryWindowStore::new();
        store.admit("k", 10, 60_000, 30, "late").await.unwrap();
        store.admit("k", 10, 60_000, 10, "early").await.unwrap();
        assert_eq!(store.oldest("k").await.unwrap(), Some(10));
    }
}
