//! Cache Store Module
//!
//! The storage contract used by the caching middleware and its in-process
//! implementation.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::cache::{CacheEntry, CacheKey, CacheStats, CachedResponse, StatsRecorder};
use crate::error::{CacheError, Result};

// == Store Contract ==
/// Key-value storage with per-entry expiration.
///
/// Implementations must be safe to call from many in-flight requests at once
/// and must never expose a partially written entry.
#[async_trait]
pub trait CacheStore: Send + Sync + Debug {
    /// Returns the entry if present and fresh. An expired entry counts as
    /// absent and is dropped as a side effect of the lookup.
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Inserts or overwrites. A zero TTL is rejected with `InvalidTtl`.
    async fn set(&self, key: CacheKey, value: Arc<CachedResponse>, ttl: Duration) -> Result<()>;

    /// Removes the entry; absent keys are a no-op.
    async fn delete(&self, key: &CacheKey) -> Result<()>;

    /// Removes every entry.
    async fn clear(&self) -> Result<()>;

    /// Current counters.
    fn stats(&self) -> CacheStats;

    /// Proactively drops expired entries, returning how many were removed.
    /// Stores that expire on their own can keep the default.
    fn purge_expired(&self) -> usize {
        0
    }
}

// == Memory Store ==
/// In-process store backed by a sharded concurrent map.
///
/// Operations on different keys only contend when the keys land in the same
/// shard, and every insert replaces the entry atomically.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<CacheKey, CacheEntry>,
    stats: StatsRecorder,
}

impl MemoryStore {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    // == Length ==
    /// Number of entries held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        // Clone out so the shard guard is released before any removal.
        let entry = self.entries.get(key).map(|entry| entry.value().clone());

        match entry {
            Some(entry) if !entry.is_expired() => {
                self.stats.record_hit();
                Ok(Some(entry))
            }
            Some(_) => {
                // Re-check under the shard lock so a concurrent fresh write survives.
                if self
                    .entries
                    .remove_if(key, |_, entry| entry.is_expired())
                    .is_some()
                {
                    self.stats.record_expirations(1);
                    debug!(key = %key, "Dropped expired entry on read");
                }
                self.stats.record_miss();
                Ok(None)
            }
            None => {
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    async fn set(&self, key: CacheKey, value: Arc<CachedResponse>, ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            return Err(CacheError::InvalidTtl(
                "TTL must be greater than zero".to_string(),
            ));
        }

        self.entries.insert(key, CacheEntry::new(value, ttl));
        self.stats.record_write();
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.entries.len())
    }

    // == Cleanup Expired ==
    fn purge_expired(&self) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            if entry.is_expired() {
                removed += 1;
                false
            } else {
                true
            }
        });

        self.stats.record_expirations(removed as u64);
        removed
    }
}
