//! Counter stores backing the fixed-window rate limiter.

use std::{sync::Arc, time::Duration};

use config::StorageConfig;

use crate::clock::Clock;

pub mod memory;
pub mod redis;
mod redis_pool;

pub use memory::InMemoryStorage;
pub use redis::RedisStorage;

/// The count observed for a key within its current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRecord {
    /// Requests observed in the current window.
    pub count: u64,
    /// Epoch milliseconds at which the window expires.
    pub window_reset_ms: u64,
}

impl RateLimitRecord {
    /// A record is only meaningful before its window has elapsed.
    pub fn is_live(&self, now_ms: u64) -> bool {
        now_ms < self.window_reset_ms
    }
}

/// Trait for rate limit counter stores.
///
/// Every operation is asynchronous, even for the in-memory store, so that a networked
/// store can replace it without touching call sites.
#[allow(async_fn_in_trait)]
pub trait CounterStore: Send + Sync {
    /// The live record for a key, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>, StorageError>;

    /// Unconditionally overwrite the record of a key.
    async fn set(&self, key: &str, count: u64, window_reset_ms: u64) -> Result<(), StorageError>;

    /// Atomically count one request for a key.
    ///
    /// When no live record exists a new window is opened with a count of one, ending at
    /// `window_reset_ms`. Otherwise the count is incremented and the existing reset time is
    /// kept, so rapid requests never push the window further out.
    async fn increment(&self, key: &str, window_reset_ms: u64) -> Result<RateLimitRecord, StorageError>;

    /// Delete the record of a key.
    async fn reset(&self, key: &str) -> Result<(), StorageError>;
}

/// Errors that can occur in storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Internal storage error.
    #[error("Storage error: {0}")]
    Internal(String),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query error.
    #[error("Query error: {0}")]
    Query(String),
}

/// The configured storage backend.
pub enum Storage {
    /// Process-local store.
    Memory(InMemoryStorage),
    /// Shared store for multi-process deployments.
    Redis(RedisStorage),
}

impl Storage {
    /// Build the backend selected in the configuration.
    ///
    /// The in-memory store starts its expiry sweep on the current tokio runtime.
    pub async fn from_config(
        config: &StorageConfig,
        sweep_interval: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StorageError> {
        match config {
            StorageConfig::Memory => Ok(Storage::Memory(InMemoryStorage::with_sweeper(clock, sweep_interval))),
            StorageConfig::Redis(redis_config) => Ok(Storage::Redis(RedisStorage::new(redis_config, clock).await?)),
        }
    }

    /// Stop background work owned by the store.
    pub fn shutdown(&self) {
        match self {
            Storage::Memory(storage) => storage.shutdown(),
            Storage::Redis(_) => (),
        }
    }
}

impl CounterStore for Storage {
    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>, StorageError> {
        match self {
            Storage::Memory(storage) => storage.get(key).await,
            Storage::Redis(storage) => storage.get(key).await,
        }
    }

    async fn set(&self, key: &str, count: u64, window_reset_ms: u64) -> Result<(), StorageError> {
        match self {
            Storage::Memory(storage) => storage.set(key, count, window_reset_ms).await,
            Storage::Redis(storage) => storage.set(key, count, window_reset_ms).await,
        }
    }

    async fn increment(&self, key: &str, window_reset_ms: u64) -> Result<RateLimitRecord, StorageError> {
        match self {
            Storage::Memory(storage) => storage.increment(key, window_reset_ms).await,
            Storage::Redis(storage) => storage.increment(key, window_reset_ms).await,
        }
    }

    async fn reset(&self, key: &str) -> Result<(), StorageError> {
        match self {
            Storage::Memory(storage) => storage.reset(key).await,
            Storage::Redis(storage) => storage.reset(key).await,
        }
    }
}
