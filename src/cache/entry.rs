//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::cache::CachedResponse;

// == Cache Entry ==
/// A stored response together with the moment it was written and its TTL.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The stored response
    pub value: Arc<CachedResponse>,
    /// When the entry was written
    pub stored_at: Instant,
    /// How long the entry stays fresh
    pub ttl: Duration,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry stamped with the current time.
    pub fn new(value: Arc<CachedResponse>, ttl: Duration) -> Self {
        Self {
            value,
            stored_at: Instant::now(),
            ttl,
        }
    }

    /// Instant at which the entry stops being served.
    pub fn expires_at(&self) -> Instant {
        self.stored_at + self.ttl
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the current time is greater than or equal to
    /// `stored_at + ttl`, so it is never served after its TTL has fully elapsed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at()
    }

    // == Time To Live ==
    /// Remaining freshness; zero once expired.
    pub fn ttl_remaining(&self) -> Duration {
        self.expires_at().saturating_duration_since(Instant::now())
    }
}
