//! Distributed sliding window counter.
//!
//! This module provides a counter whose state lives in a shared
//! [`WindowStore`], so every instance of a horizontally scaled gateway sees
//! the same buckets. Admission is a single atomic store operation; the
//! diagnostic queries are plain reads and may trail concurrent admissions.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, trace};
use uuid::Uuid;

use super::backend::CounterBackend;
use super::key::RateLimitKey;
use super::sliding::wait_from_oldest;
use super::store::WindowStore;
use crate::config::RedisSettings;
use crate::error::{QuotaError, Result};

/// A sliding window counter backed by a shared store.
pub struct DistributedCounter {
    store: Arc<dyn WindowStore>,
    /// Namespace prepended to every bucket key
    key_prefix: String,
    /// Bound on each store round trip
    command_timeout: Duration,
}

impl DistributedCounter {
    pub fn new(store: Arc<dyn WindowStore>, key_prefix: impl Into<String>, command_timeout: Duration) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
            command_timeout,
        }
    }

    /// Counter configured from the `redis` settings section.
    pub fn with_settings(store: Arc<dyn WindowStore>, settings: &RedisSettings) -> Self {
        Self::new(store, settings.key_prefix.clone(), settings.command_timeout())
    }

    fn store_key(&self, key: &RateLimitKey) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn bounded<T>(&self, op: &'static str, key: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                error!(key = %key, op = op, error = %e, "Window store operation failed");
                Err(e)
            }
            Err(_) => {
                error!(
                    key = %key,
                    op = op,
                    timeout_ms = self.command_timeout.as_millis() as u64,
                    "Window store operation timed out"
                );
                Err(QuotaError::BackendTimeout(self.command_timeout))
            }
        }
    }

    /// Admit a request at `now_ms` if the shared window has room.
    pub async fn allow(&self, key: &RateLimitKey, limit: u32, window_seconds: u32, now_ms: i64) -> Result<bool> {
        let store_key = self.store_key(key);
        // Unique per request so same-millisecond admits from different
        // instances are distinct set members
        let member = format!("{}-{}", now_ms, Uuid::new_v4());
        let window_ms = i64::from(window_seconds) * 1000;

        let admitted = self
            .bounded(
                "admit",
                &store_key,
                self.store.admit(&store_key, limit, window_ms, now_ms, &member),
            )
            .await?;

        trace!(
            key = %store_key,
            limit = limit,
            window_seconds = window_seconds,
            admitted = admitted,
            "Distributed window check"
        );
        Ok(admitted)
    }

    pub async fn remaining(&self, key: &RateLimitKey, limit: u32) -> Result<u32> {
        let store_key = self.store_key(key);
        let count = self
            .bounded("count", &store_key, self.store.count(&store_key))
            .await?;
        Ok(u64::from(limit).saturating_sub(count) as u32)
    }

    pub async fn wait_seconds(&self, key: &RateLimitKey, window_seconds: u32, now_ms: i64) -> Result<u64> {
        let store_key = self.store_key(key);
        let oldest = self
            .bounded("oldest", &store_key, self.store.oldest(&store_key))
            .await?;
        Ok(oldest.map_or(0, |ts| wait_from_oldest(ts, window_seconds, now_ms)))
    }
}

#[async_trait]
impl CounterBackend for DistributedCounter {
    async fn allow(&self, key: &RateLimitKey, limit: u32, window_seconds: u32, now_ms: i64) -> Result<bool> {
        DistributedCounter::allow(self, key, limit, window_seconds, now_ms).await
    }

    async fn remaining(&self, key: &RateLimitKey, limit: u32) -> Result<u32> {
        DistributedCounter::remaining(self, key, limit).await
    }

    async fn wait_seconds(&self, key: &RateLimitKey, window_seconds: u32, now_ms: i64) -> Result<u64> {
        DistributedCounter::wait_seconds(self, key, window_seconds, now_ms).await
    }

    fn name(&self) -> &'static str {
        "distributed"
    }
}
