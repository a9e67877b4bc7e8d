//! Redis window store using one Lua script per admission.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tracing::info;

use super::store::WindowStore;
use crate::config::RedisSettings;
use crate::error::{QuotaError, Result};

/// Purge, count, and conditional add in one server-side step.
///
/// KEYS[1] bucket key; ARGV: limit, window in ms, now in ms, member.
/// Returns 1 when the member was added, 0 otherwise.
const ADMIT_SCRIPT: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local now = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window_ms)
local count = redis.call('ZCARD', key)
if count < limit then
    redis.call('ZADD', key, now, ARGV[4])
    redis.call('PEXPIRE', key, window_ms)
    return 1
end
return 0
"#;

/// Redis-backed window store.
pub struct RedisWindowStore {
    conn: ConnectionManager,
    script: Script,
}

impl RedisWindowStore {
    /// Connect, giving up after the configured connect timeout.
    pub async fn connect(settings: &RedisSettings) -> Result<Self> {
        let client = Client::open(settings.url.as_str())?;

        let conn = tokio::time::timeout(settings.connect_timeout(), ConnectionManager::new(client))
            .await
            .map_err(|_| QuotaError::BackendTimeout(settings.connect_timeout()))??;

        info!(url = %settings.url, "Connected to Redis window store");

        Ok(Self {
            conn,
            script: Script::new(ADMIT_SCRIPT),
        })
    }
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn admit(&self, key: &str, limit: u32, window_ms: i64, now_ms: i64, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let added: i64 = self
            .script
            .key(key)
            .arg(limit)
            .arg(window_ms)
            .arg(now_ms)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;
        Ok(added == 1)
    }

    async fn count(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.zcard(key).await?;
        Ok(count)
    }

    async fn oldest(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.conn.clone();
        let entries: Vec<(String, f64)> = conn.zrange_withscores(key, 0, 0).await?;
        Ok(entries.first().map(|(_, score)| *score as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn get_test_store() -> Option<RedisWindowStore> {
        let settings = RedisSettings {
            enabled: true,
            url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            connect_timeout_ms: 500,
            ..Default::default()
        };
        let store = RedisWindowStore::connect(&settings).await.ok()?;
        // A manager can come up before the server answers; make sure it does
        let mut conn = store.conn.clone();
        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        pong.ok().map(|_| store)
    }

    #[tokio::test]
    async fn test_redis_admit_script() {
        let store = match get_test_store().await {
            Some(s) => s,
            None => return,
        };
        let key = format!("quotaguard_test:{}", uuid::Uuid::new_v4());
        let now = chrono::Utc::now().timestamp_millis();

        assert!(store.admit(&key, 2, 1_000, now, "a").await.unwrap());
        assert!(store.admit(&key, 2, 1_000, now, "b").await.unwrap());
        assert!(!store.admit(&key, 2, 1_000, now, "c").await.unwrap());
        assert_eq!(store.count(&key).await.unwrap(), 2);
        assert_eq!(store.oldest(&key).await.unwrap(), Some(now));

        assert!(store.admit(&key, 2, 1_000, now + 1_100, "d").await.unwrap());
        assert_eq!(store.count(&key).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_redis_key_expires() {
        let store = match get_test_store().await {
            Some(s) => s,
            None => return,
        };
        let key = format!("quotaguard_test:{}", uuid::Uuid::new_v4());
        let now = chrono::Utc::now().timestamp_millis();

        assert!(store.admit(&key, 1, 200, now, "a").await.unwrap());
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(store.count(&key).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_connect_unreachable() {
        let settings = RedisSettings {
            url: "redis://127.0.0.1:1".to_string(),
            connect_timeout_ms: 300,
            ..Default::default()
        };
        let result = RedisWindowStore::connect(&settings).await;
        assert!(matches!(
            result,
            Err(QuotaError::BackendUnavailable(_)) | Err(QuotaError::BackendTimeout(_))
        ));
    }
}
