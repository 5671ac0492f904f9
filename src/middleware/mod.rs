//! Middleware Module
//!
//! The caching middleware, its per-view policy, the axum adapter that mounts
//! it on routes, and request timing.

mod caching;
mod layer;
mod policy;
mod timing;

pub use caching::{CacheOutcome, CachingMiddleware, Served};
pub use layer::{cache_page, X_CACHE};
pub use policy::{CachePolicy, DEFAULT_MAX_BODY_SIZE, DEFAULT_STORE_TIMEOUT, DEFAULT_TTL};
pub use timing::log_request_time;
