//! Redis counter store for deployments where several processes share quotas.
//!
//! Each key is a hash holding `count` and `reset` (epoch milliseconds), expiring at `reset`.
//! Incrementing runs as a single server-side script so concurrent callers across processes
//! never under-report a count.

use std::{future::Future, sync::Arc, time::Duration};

use config::RedisConfig;
use redis::{RedisError, Script};

use super::{
    CounterStore, RateLimitRecord, StorageError,
    redis_pool::{Connection, Pool, create_pool},
};
use crate::clock::Clock;

// ARGV[1] is the reset time of a new window, ARGV[2] the caller's clock. A hash whose
// reset has passed on the caller's clock is restarted even if Redis has not expired it yet.
const INCREMENT_SCRIPT: &str = r#"
local reset = tonumber(redis.call('HGET', KEYS[1], 'reset'))
if reset == nil or reset <= tonumber(ARGV[2]) then
  redis.call('DEL', KEYS[1])
  redis.call('HSET', KEYS[1], 'count', 1, 'reset', ARGV[1])
  redis.call('PEXPIREAT', KEYS[1], ARGV[1])
  return {1, tonumber(ARGV[1])}
end
local count = redis.call('HINCRBY', KEYS[1], 'count', 1)
return {count, reset}
"#;

/// Redis-based counter store.
pub struct RedisStorage {
    pool: Pool,
    key_prefix: String,
    response_timeout: Duration,
    increment: Script,
    clock: Arc<dyn Clock>,
}

impl RedisStorage {
    /// Create the store and verify the server answers.
    pub async fn new(config: &RedisConfig, clock: Arc<dyn Clock>) -> Result<Self, StorageError> {
        let storage = Self::lazy(config, clock)?;

        let mut conn = storage
            .pool
            .get()
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to get Redis connection from pool: {e}")))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to ping Redis server: {e}")))?;

        Ok(storage)
    }

    /// Create the store without connecting. Connections are opened on first use.
    pub fn lazy(config: &RedisConfig, clock: Arc<dyn Clock>) -> Result<Self, StorageError> {
        Ok(Self {
            pool: create_pool(config)?,
            key_prefix: config.key_prefix.clone(),
            response_timeout: config.response_timeout,
            increment: Script::new(INCREMENT_SCRIPT),
            clock,
        })
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }

    async fn connection(&self) -> Result<Connection, StorageError> {
        self.pool
            .get()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    async fn with_timeout<T>(&self, operation: impl Future<Output = Result<T, RedisError>>) -> Result<T, StorageError> {
        match tokio::time::timeout(self.response_timeout, operation).await {
            Ok(result) => result.map_err(|e| StorageError::Query(e.to_string())),
            Err(_) => Err(StorageError::Query(format!(
                "Redis did not answer within {:?}",
                self.response_timeout
            ))),
        }
    }
}

impl CounterStore for RedisStorage {
    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>, StorageError> {
        let redis_key = self.redis_key(key);
        let mut conn = self.connection().await?;

        let (count, reset): (Option<u64>, Option<u64>) = self
            .with_timeout(
                redis::cmd("HMGET")
                    .arg(&redis_key)
                    .arg("count")
                    .arg("reset")
                    .query_async(&mut *conn),
            )
            .await?;

        let record = match (count, reset) {
            (Some(count), Some(window_reset_ms)) => RateLimitRecord { count, window_reset_ms },
            _ => return Ok(None),
        };

        // Redis expiry and our clock can disagree by a few milliseconds.
        Ok(record.is_live(self.clock.now_millis()).then_some(record))
    }

    async fn set(&self, key: &str, count: u64, window_reset_ms: u64) -> Result<(), StorageError> {
        let redis_key = self.redis_key(key);
        let mut conn = self.connection().await?;

        if window_reset_ms <= self.clock.now_millis() {
            return self
                .with_timeout(redis::cmd("DEL").arg(&redis_key).query_async::<()>(&mut *conn))
                .await;
        }

        self.with_timeout(
            redis::pipe()
                .atomic()
                .del(&redis_key)
                .ignore()
                .hset_multiple(&redis_key, &[("count", count), ("reset", window_reset_ms)])
                .ignore()
                .cmd("PEXPIREAT")
                .arg(&redis_key)
                .arg(window_reset_ms)
                .ignore()
                .query_async::<()>(&mut *conn),
        )
        .await
    }

    async fn increment(&self, key: &str, window_reset_ms: u64) -> Result<RateLimitRecord, StorageError> {
        let redis_key = self.redis_key(key);
        let mut conn = self.connection().await?;

        let (count, reset): (u64, u64) = self
            .with_timeout(
                self.increment
                    .key(&redis_key)
                    .arg(window_reset_ms)
                    .arg(self.clock.now_millis())
                    .invoke_async(&mut *conn),
            )
            .await?;

        Ok(RateLimitRecord {
            count,
            window_reset_ms: reset,
        })
    }

    async fn reset(&self, key: &str) -> Result<(), StorageError> {
        let redis_key = self.redis_key(key);
        let mut conn = self.connection().await?;

        self.with_timeout(redis::cmd("DEL").arg(&redis_key).query_async::<()>(&mut *conn))
            .await
    }
}
