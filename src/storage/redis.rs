//! Redis key-value storage implementation
//!
//! Expiry is delegated to Redis (`PSETEX`). The atomic consume runs as a
//! single Lua script so the read, the delete and the consumed marker are
//! applied in one server-side step. Every call is bounded by a deadline;
//! an elapsed deadline is reported as `StorageError::Timeout` and never
//! retried here.

use crate::errors::StorageError;
use crate::storage::traits::{Consumed, KeyValueStore};
use async_trait::async_trait;
use chrono::Duration;
use deadpool_redis::{Config as PoolConfig, Connection, Pool, Runtime};
use redis::{AsyncCommands, RedisError, Script};
use std::future::Future;

pub type Result<T> = std::result::Result<T, StorageError>;

const CONSUME_SCRIPT: &str = r#"
local value = redis.call('GET', KEYS[1])
if value then
  redis.call('DEL', KEYS[1])
  redis.call('SET', KEYS[2], '1', 'PX', ARGV[1])
  return {1, value}
end
if redis.call('EXISTS', KEYS[2]) == 1 then
  return {2, ''}
end
return {0, ''}
"#;

/// Redis-backed TTL store
pub struct RedisKeyValueStore {
    pool: Pool,
    timeout: std::time::Duration,
    consume_script: Script,
}

impl RedisKeyValueStore {
    pub fn new(pool: Pool, timeout: std::time::Duration) -> Self {
        Self {
            pool,
            timeout,
            consume_script: Script::new(CONSUME_SCRIPT),
        }
    }

    /// Build a connection pool for `redis_url`. Connections are opened lazily.
    pub fn connect(redis_url: &str, timeout: std::time::Duration) -> Result<Self> {
        let pool = PoolConfig::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| {
                StorageError::ConnectionFailed(format!("Redis pool creation failed: {}", e))
            })?;
        Ok(Self::new(pool, timeout))
    }

    async fn with_deadline<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout(self.timeout.as_millis())),
        }
    }

    async fn connection(&self) -> Result<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| StorageError::ConnectionFailed(format!("Redis connection error: {}", e)))
    }
}

fn marker_key(key: &str) -> String {
    format!("{}:consumed", key)
}

fn ttl_millis(ttl: Duration) -> u64 {
    ttl.num_milliseconds().max(1) as u64
}

fn map_redis_error(error: RedisError) -> StorageError {
    if error.is_io_error()
        || error.is_timeout()
        || error.is_connection_dropped()
        || error.is_connection_refusal()
    {
        StorageError::ConnectionFailed(error.to_string())
    } else {
        StorageError::QueryFailed(error.to_string())
    }
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.with_deadline(async {
            let mut conn = self.connection().await?;
            conn.pset_ex::<_, _, ()>(key, value, ttl_millis(ttl))
                .await
                .map_err(map_redis_error)
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_deadline(async {
            let mut conn = self.connection().await?;
            conn.get::<_, Option<String>>(key)
                .await
                .map_err(map_redis_error)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.with_deadline(async {
            let mut conn = self.connection().await?;
            let removed: usize = conn.del(key).await.map_err(map_redis_error)?;
            Ok(removed > 0)
        })
        .await
    }

    async fn consume(&self, key: &str, marker_ttl: Duration) -> Result<Consumed> {
        self.with_deadline(async {
            let mut conn = self.connection().await?;
            let (status, value): (i64, String) = self
                .consume_script
                .key(key)
                .key(marker_key(key))
                .arg(ttl_millis(marker_ttl))
                .invoke_async(&mut conn)
                .await
                .map_err(map_redis_error)?;

            match status {
                1 => Ok(Consumed::Value(value)),
                2 => Ok(Consumed::AlreadyConsumed),
                0 => Ok(Consumed::Missing),
                other => Err(StorageError::QueryFailed(format!(
                    "unexpected consume status {}",
                    other
                ))),
            }
        })
        .await
    }

    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_millis_never_zero() {
        assert_eq!(ttl_millis(Duration::minutes(10)), 600_000);
        assert_eq!(ttl_millis(Duration::zero()), 1);
        assert_eq!(ttl_millis(Duration::seconds(-5)), 1);
    }

    #[test]
    fn test_marker_key_is_distinct() {
        assert_eq!(marker_key("code:abc"), "code:abc:consumed");
    }
}
