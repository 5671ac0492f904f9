//! Cache Policy
//!
//! Per-view caching configuration.

use std::collections::BTreeSet;
use std::time::Duration;

use axum::http::{HeaderName, StatusCode};

use crate::config::Config;
use crate::error::{CacheError, Result};

/// Default TTL applied to a cached view.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default upper bound on a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(100);

/// Default largest response body, in bytes, that will be stored.
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct CachePolicy {
    ttl: Duration,
    pub vary_headers: Vec<HeaderName>,
    pub cacheable_status_codes: BTreeSet<u16>,
    pub key_prefix: String,
    pub store_timeout: Duration,
    pub single_flight: bool,
    pub max_body_size: usize,
}

impl CachePolicy {
    /// Creates a policy with the given TTL and default settings otherwise.
    ///
    /// # Errors
    /// `InvalidTtl` when `ttl` is zero.
    pub fn new(ttl: Duration) -> Result<Self> {
        if ttl.is_zero() {
            return Err(CacheError::InvalidTtl(
                "TTL must be greater than zero".to_string(),
            ));
        }

        Ok(Self::unchecked(ttl))
    }

    fn unchecked(ttl: Duration) -> Self {
        Self {
            ttl,
            vary_headers: Vec::new(),
            cacheable_status_codes: BTreeSet::from([StatusCode::OK.as_u16()]),
            key_prefix: String::new(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            single_flight: false,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Builds the policy described by the environment configuration.
    ///
    /// # Errors
    /// - `InvalidTtl` when `cache_ttl` is zero or negative
    /// - `InvalidRequest` when a vary header name is not a valid header name
    pub fn from_config(config: &Config) -> Result<Self> {
        let ttl = u64::try_from(config.cache_ttl)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .ok_or_else(|| {
                CacheError::InvalidTtl(format!(
                    "CACHE_TTL must be a positive number of seconds, got {}",
                    config.cache_ttl
                ))
            })?;

        let vary_headers = config
            .vary_headers
            .iter()
            .map(|name| {
                HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes()).map_err(|_| {
                    CacheError::InvalidRequest(format!("invalid vary header name {:?}", name))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut policy = Self::new(ttl)?
            .with_vary_headers(vary_headers)
            .with_key_prefix(config.key_prefix.clone())
            .with_store_timeout(Duration::from_millis(config.store_timeout_ms))
            .with_single_flight(config.single_flight)
            .with_max_body_size(config.max_body_bytes);

        if !config.cacheable_status_codes.is_empty() {
            policy = policy.with_status_codes(config.cacheable_status_codes.iter().copied());
        }

        Ok(policy)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn with_vary_headers(mut self, headers: impl IntoIterator<Item = HeaderName>) -> Self {
        self.vary_headers = headers.into_iter().collect();
        self
    }

    pub fn with_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.cacheable_status_codes = codes.into_iter().collect();
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    pub fn with_max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    pub fn is_cacheable_status(&self, status: StatusCode) -> bool {
        self.cacheable_status_codes.contains(&status.as_u16())
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::unchecked(DEFAULT_TTL)
    }
}
