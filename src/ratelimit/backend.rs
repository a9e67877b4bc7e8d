//! Counter backend trait for abstracting in-process and distributed counters.

use async_trait::async_trait;

use super::key::RateLimitKey;
use crate::error::Result;

/// Trait for sliding window counter implementations.
///
/// This trait abstracts over both the in-process `SlidingWindowCounter` and
/// the store-backed `DistributedCounter`, so the admission engine can work
/// with whichever one a deployment selects. One deployment uses one backend
/// for every key.
#[async_trait]
pub trait CounterBackend: Send + Sync {
    /// Admit or deny one request. The check and the recording of an admitted
    /// request are atomic per key; a denial records nothing.
    async fn allow(&self, key: &RateLimitKey, limit: u32, window_seconds: u32, now_ms: i64) -> Result<bool>;

    /// Requests left in the window. Diagnostic, may be slightly stale.
    async fn remaining(&self, key: &RateLimitKey, limit: u32) -> Result<u32>;

    /// Seconds until the oldest retained request leaves the window.
    /// Diagnostic, may be slightly stale.
    async fn wait_seconds(&self, key: &RateLimitKey, window_seconds: u32, now_ms: i64) -> Result<u64>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}
