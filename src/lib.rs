//! Page Cache - per-view HTTP response caching
//!
//! Stores rendered responses under keys derived from the request and serves
//! them until their TTL elapses or the cache is cleared.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod tasks;

pub use api::AppState;
pub use cache::{CacheRegistry, CacheStore, KeyBuilder, MemoryStore};
pub use config::Config;
pub use error::{CacheError, Result};
pub use middleware::{cache_page, CachePolicy, CachingMiddleware};
pub use tasks::spawn_cleanup_task;
