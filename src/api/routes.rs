//! API Routes
//!
//! Configures the Axum router: the cached and uncached demo views plus the
//! cache admin endpoints.

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_default_handler, clear_handler, health_handler, results_handler, stats_handler,
    AppState,
};
use crate::middleware::{cache_page, log_request_time};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /` - Results view, served through the page cache
/// - `GET /uncached/` - Same view without caching
/// - `DELETE /cache` - Clear the default cache
/// - `DELETE /cache/:name` - Clear a named cache
/// - `GET /stats` - Per-cache statistics
/// - `GET /health` - Health check endpoint
///
/// # Middleware
/// - Page cache: only on the cached view
/// - Request timing: logs total time of every request
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let cached = Router::new()
        .route("/", get(results_handler))
        .route_layer(from_fn_with_state(state.page_cache.clone(), cache_page));

    Router::new()
        .merge(cached)
        .route("/uncached/", get(results_handler))
        .route("/cache", delete(clear_default_handler))
        .route("/cache/:name", delete(clear_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(from_fn(log_request_time))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
