//! Configuration Module
//!
//! Handles loading and managing server and cache configuration from environment variables.

use std::env;
use std::str::FromStr;

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// TTL in seconds for cached views. Kept signed so that a negative
    /// value reaches policy validation instead of being silently dropped.
    pub cache_ttl: i64,
    /// Request headers folded into the cache key
    pub vary_headers: Vec<String>,
    /// Response statuses eligible for caching
    pub cacheable_status_codes: Vec<u16>,
    /// Namespace prepended to every cache key
    pub key_prefix: String,
    /// Upper bound on a single store operation, in milliseconds
    pub store_timeout_ms: u64,
    /// Collapse concurrent misses for one key into a single handler run
    pub single_flight: bool,
    /// Largest response body stored, in bytes
    pub max_body_bytes: usize,
    /// Background expiry sweep interval in seconds
    pub cleanup_interval: u64,
    /// Simulated latency of the demo view's upstream call, in milliseconds
    pub upstream_delay_ms: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CACHE_TTL` - View TTL in seconds (default: 300)
    /// - `CACHE_VARY_HEADERS` - Comma-separated header names (default: none)
    /// - `CACHE_STATUS_CODES` - Comma-separated cacheable statuses (default: 200)
    /// - `CACHE_KEY_PREFIX` - Key namespace (default: empty)
    /// - `CACHE_STORE_TIMEOUT_MS` - Store operation timeout (default: 100)
    /// - `CACHE_SINGLE_FLIGHT` - `true`/`1` to enable (default: false)
    /// - `CACHE_MAX_BODY_BYTES` - Largest stored body (default: 1048576)
    /// - `CLEANUP_INTERVAL` - Sweep frequency in seconds (default: 60)
    /// - `UPSTREAM_DELAY_MS` - Demo upstream latency (default: 2000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            server_port: parse_var("SERVER_PORT").unwrap_or(defaults.server_port),
            cache_ttl: parse_var("CACHE_TTL").unwrap_or(defaults.cache_ttl),
            vary_headers: env::var("CACHE_VARY_HEADERS")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.vary_headers),
            cacheable_status_codes: env::var("CACHE_STATUS_CODES")
                .ok()
                .map(|v| {
                    split_list(&v)
                        .iter()
                        .filter_map(|code| code.parse().ok())
                        .collect::<Vec<u16>>()
                })
                .filter(|codes| !codes.is_empty())
                .unwrap_or(defaults.cacheable_status_codes),
            key_prefix: env::var("CACHE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            store_timeout_ms: parse_var("CACHE_STORE_TIMEOUT_MS")
                .unwrap_or(defaults.store_timeout_ms),
            single_flight: env::var("CACHE_SINGLE_FLIGHT")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.single_flight),
            max_body_bytes: parse_var("CACHE_MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            cleanup_interval: parse_var("CLEANUP_INTERVAL").unwrap_or(defaults.cleanup_interval),
            upstream_delay_ms: parse_var("UPSTREAM_DELAY_MS")
                .unwrap_or(defaults.upstream_delay_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            cache_ttl: 300,
            vary_headers: Vec::new(),
            cacheable_status_codes: vec![200],
            key_prefix: String::new(),
            store_timeout_ms: 100,
            single_flight: false,
            max_body_bytes: 1024 * 1024,
            cleanup_interval: 60,
            upstream_delay_ms: 2000,
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
