//! API Module
//!
//! HTTP handlers and routing for the demo site and the cache admin API.
//!
//! # Endpoints
//! - `GET /` - Cached results view
//! - `GET /uncached/` - Uncached results view
//! - `DELETE /cache` - Clear the default cache
//! - `DELETE /cache/:name` - Clear a named cache
//! - `GET /stats` - Per-cache statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
