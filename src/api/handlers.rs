//! API Handlers
//!
//! The demo view and the cache admin endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    response::Html,
    Json,
};
use tracing::info;

use crate::cache::{CacheRegistry, DEFAULT_CACHE};
use crate::config::Config;
use crate::error::Result;
use crate::middleware::{CachePolicy, CachingMiddleware};
use crate::models::{ClearResponse, HealthResponse, StatsResponse};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Named stores, shared with the expiry sweep
    pub registry: CacheRegistry,
    /// Caching middleware mounted on the cached view
    pub page_cache: Arc<CachingMiddleware>,
    /// Latency of the view's upstream call
    pub upstream_delay: Duration,
}

impl AppState {
    /// Creates a new AppState from already built parts.
    pub fn new(
        registry: CacheRegistry,
        page_cache: Arc<CachingMiddleware>,
        upstream_delay: Duration,
    ) -> Self {
        Self {
            registry,
            page_cache,
            upstream_delay,
        }
    }

    /// Creates a new AppState from configuration.
    ///
    /// The cached view stores into the default in-memory cache.
    ///
    /// # Errors
    /// Fails on an invalid cache policy (non-positive TTL, bad vary header).
    pub fn from_config(config: &Config) -> Result<Self> {
        let registry = CacheRegistry::with_default_memory_store();
        let policy = CachePolicy::from_config(config)?;
        let page_cache = Arc::new(CachingMiddleware::new(registry.default_store()?, policy));

        Ok(Self::new(
            registry,
            page_cache,
            Duration::from_millis(config.upstream_delay_ms),
        ))
    }
}

/// Handler for GET / and GET /uncached/
///
/// Waits on the (simulated) upstream API, then renders the results page.
pub async fn results_handler(State(state): State<AppState>) -> Html<String> {
    tokio::time::sleep(state.upstream_delay).await;

    Html(format!(
        "<!DOCTYPE html>\n<html>\n<head><title>API calls</title></head>\n<body>\n\
         <h1>Results received!</h1>\n<p>Rendered at {}</p>\n</body>\n</html>\n",
        chrono::Utc::now().to_rfc3339()
    ))
}

/// Handler for DELETE /cache
pub async fn clear_default_handler(State(state): State<AppState>) -> Result<Json<ClearResponse>> {
    clear(&state.registry, DEFAULT_CACHE).await
}

/// Handler for DELETE /cache/:name
pub async fn clear_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ClearResponse>> {
    clear(&state.registry, &name).await
}

async fn clear(registry: &CacheRegistry, name: &str) -> Result<Json<ClearResponse>> {
    registry.get(name)?.clear().await?;
    info!(cache = name, "Cache cleared");

    Ok(Json(ClearResponse::new(name)))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let caches = state
        .registry
        .iter()
        .map(|(name, store)| (name.to_string(), store.stats().into()))
        .collect();

    Json(StatsResponse { caches })
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
