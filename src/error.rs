//! Error types for the response cache
//!
//! Provides unified error handling using thiserror.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the caching layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Request method is not eligible for caching (routing decision, not a failure)
    #[error("Method not cacheable: {0}")]
    NotCacheable(String),

    /// Malformed input to key construction
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Non-positive TTL
    #[error("Invalid TTL: {0}")]
    InvalidTtl(String),

    /// Backing store could not be reached
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Backing store did not answer in time
    #[error("Store timed out after {0:?}")]
    StoreTimeout(Duration),

    /// No cache registered under this name
    #[error("Unknown cache: {0}")]
    UnknownCache(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Store-side failures that the middleware absorbs instead of failing the request.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            CacheError::StoreUnavailable(_) | CacheError::StoreTimeout(_)
        )
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotCacheable(_) => StatusCode::METHOD_NOT_ALLOWED,
            CacheError::InvalidRequest(_) | CacheError::InvalidTtl(_) => StatusCode::BAD_REQUEST,
            CacheError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::StoreTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            CacheError::UnknownCache(_) => StatusCode::NOT_FOUND,
            CacheError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the caching layer.
pub type Result<T> = std::result::Result<T, CacheError>;
