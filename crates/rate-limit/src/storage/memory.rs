//! In-memory counter store backed by a concurrent map.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{CounterStore, RateLimitRecord, StorageError};
use crate::clock::Clock;

type Records = DashMap<String, RateLimitRecord>;

/// In-memory counter store for single-process deployments.
///
/// Expired records are dropped lazily when read and eagerly by an optional background
/// sweep. The sweep lives as long as the store, or until [`InMemoryStorage::shutdown`].
pub struct InMemoryStorage {
    records: Arc<Records>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
}

impl InMemoryStorage {
    /// Create a store without a background sweep.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            clock,
            shutdown: CancellationToken::new(),
        }
    }

    /// Create a store that drops expired records every `interval`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_sweeper(clock: Arc<dyn Clock>, interval: Duration) -> Self {
        let storage = Self::new(clock);

        let records = storage.records.clone();
        let clock = storage.clock.clone();
        let shutdown = storage.shutdown.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        log::debug!("Rate limit store sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = sweep(&records, clock.now_millis());

                        if removed > 0 {
                            log::debug!("Swept {removed} expired rate limit windows");
                        }
                    }
                }
            }
        });

        storage
    }

    /// Drop every expired record now, returning how many were removed.
    pub fn sweep(&self) -> usize {
        sweep(&self.records, self.clock.now_millis())
    }

    /// Number of records currently held, live or not yet swept.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Stop the background sweep.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for InMemoryStorage {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn sweep(records: &Records, now_ms: u64) -> usize {
    let before = records.len();
    records.retain(|_, record| record.is_live(now_ms));

    before.saturating_sub(records.len())
}

impl CounterStore for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>, StorageError> {
        let now = self.clock.now_millis();

        // Removing under the shard lock keeps a concurrent increment from being dropped.
        if self.records.remove_if(key, |_, record| !record.is_live(now)).is_some() {
            return Ok(None);
        }

        Ok(self.records.get(key).map(|record| *record))
    }

    async fn set(&self, key: &str, count: u64, window_reset_ms: u64) -> Result<(), StorageError> {
        self.records.insert(
            key.to_string(),
            RateLimitRecord {
                count,
                window_reset_ms,
            },
        );

        Ok(())
    }

    async fn increment(&self, key: &str, window_reset_ms: u64) -> Result<RateLimitRecord, StorageError> {
        let now = self.clock.now_millis();

        // The entry guard holds the shard write lock, making read-modify-write atomic.
        let mut record = self.records.entry(key.to_string()).or_insert(RateLimitRecord {
            count: 0,
            window_reset_ms,
        });

        if !record.is_live(now) {
            *record = RateLimitRecord {
                count: 0,
                window_reset_ms,
            };
        }

        record.count += 1;

        Ok(*record)
    }

    async fn reset(&self, key: &str) -> Result<(), StorageError> {
        self.records.remove(key);
        Ok(())
    }
}
