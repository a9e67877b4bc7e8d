//! In-process sliding window counter.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::trace;

use super::backend::CounterBackend;
use super::key::RateLimitKey;
use crate::error::Result;

/// Timestamps admitted for one key, oldest first.
#[derive(Debug, Default)]
struct WindowState {
    timestamps: VecDeque<i64>,
}

impl WindowState {
    /// Drop every timestamp at or before `cutoff`.
    fn purge(&mut self, cutoff: i64) {
        while self.timestamps.front().is_some_and(|ts| *ts <= cutoff) {
            self.timestamps.pop_front();
        }
    }

    /// Insert keeping the sequence ordered; callers racing on the same key
    /// may arrive slightly out of clock order.
    fn record(&mut self, ts: i64) {
        let at = self
            .timestamps
            .iter()
            .rposition(|existing| *existing <= ts)
            .map_or(0, |i| i + 1);
        self.timestamps.insert(at, ts);
    }
}

/// A thread-safe sliding window counter.
///
/// Each key owns its own lock, so the purge, count, and append of one `allow`
/// happen as a unit without making unrelated keys wait on each other. Stale
/// timestamps are removed lazily when the key is next checked.
#[derive(Debug, Default)]
pub struct SlidingWindowCounter {
    windows: DashMap<RateLimitKey, Arc<Mutex<WindowState>>>,
}

impl SlidingWindowCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn window(&self, key: &RateLimitKey) -> Arc<Mutex<WindowState>> {
        if let Some(window) = self.windows.get(key) {
            return window.clone();
        }
        self.windows.entry(key.clone()).or_default().clone()
    }

    /// Admit a request at `now_ms` if fewer than `limit` requests were admitted
    /// in the trailing `window_seconds`. Denied requests leave no trace.
    pub fn allow(&self, key: &RateLimitKey, limit: u32, window_seconds: u32, now_ms: i64) -> bool {
        let window = self.window(key);
        let mut state = window.lock();

        state.purge(now_ms - i64::from(window_seconds) * 1000);

        let admitted = state.timestamps.len() < limit as usize;
        if admitted {
            state.record(now_ms);
        }

        trace!(
            key = %key,
            count = state.timestamps.len(),
            limit = limit,
            admitted = admitted,
            "Sliding window check"
        );
        admitted
    }

    /// Requests left in the window as of the last check of this key.
    pub fn remaining(&self, key: &RateLimitKey, limit: u32) -> u32 {
        let used = self.current_count(key);
        limit.saturating_sub(u32::try_from(used).unwrap_or(u32::MAX))
    }

    /// Seconds until the oldest retained request leaves the window, rounded up.
    pub fn wait_seconds(&self, key: &RateLimitKey, window_seconds: u32, now_ms: i64) -> u64 {
        let oldest = match self.windows.get(key) {
            Some(window) => window.lock().timestamps.front().copied(),
            None => None,
        };
        oldest.map_or(0, |ts| wait_from_oldest(ts, window_seconds, now_ms))
    }

    /// Timestamps currently retained for a key.
    pub fn current_count(&self, key: &RateLimitKey) -> usize {
        self.windows
            .get(key)
            .map_or(0, |window| window.lock().timestamps.len())
    }

    /// Number of keys ever seen.
    pub fn key_count(&self) -> usize {
        self.windows.len()
    }

    /// Forget every key.
    pub fn clear(&self) {
        self.windows.clear();
    }
}

/// Whole seconds, rounded up, until `oldest_ms` exits a window of
/// `window_seconds` as seen at `now_ms`. Never negative.
pub(crate) fn wait_from_oldest(oldest_ms: i64, window_seconds: u32, now_ms: i64) -> u64 {
    let expires_at = oldest_ms + i64::from(window_seconds) * 1000;
    let wait_ms = (expires_at - now_ms).max(0) as u64;
    wait_ms.div_ceil(1000)
}

#[async_trait]
impl CounterBackend for SlidingWindowCounter {
    async fn allow(&self, key: &RateLimitKey, limit: u32, window_seconds: u32, now_ms: i64) -> Result<bool> {
        Ok(SlidingWindowCounter::allow(self, key, limit, window_seconds, now_ms))
    }

    async fn remaining(&self, key: &RateLimitKey, limit: u32) -> Result<u32> {
        Ok(SlidingWindowCounter::remaining(self, key, limit))
    }

    async fn wait_seconds(&self, key: &RateLimitKey, window_seconds: u32, now_ms: i64) -> Result<u64> {
        Ok(SlidingWindowCounter::wait_seconds(self, key, window_seconds, now_ms))
    }

    fn name(&self) -> &'static str {
        "in-process"
    }
}
