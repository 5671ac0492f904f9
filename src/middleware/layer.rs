//! Axum Adapter
//!
//! Mounts a [`CachingMiddleware`] on axum routes:
//!
//! ```ignore
//! Router::new()
//!     .route("/", get(view))
//!     .route_layer(axum::middleware::from_fn_with_state(page_cache, cache_page));
//! ```

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, error};

use crate::cache::{Buffered, CachedResponse, KeyBuilder, RequestIdentity};
use crate::middleware::{CacheOutcome, CachingMiddleware, Served};

/// Response header reporting `HIT`, `MISS` or `BYPASS`.
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// A handler result that is not handed to the store.
enum Unbuffered {
    /// Ineligible for storage; returned to the client as produced.
    Passthrough(Response),
    Body(axum::Error),
}

/// Function middleware serving the wrapped route through the cache.
///
/// Methods that are never cached go straight to the route. For the rest,
/// only responses the policy would store are buffered.
pub async fn cache_page(
    State(cache): State<Arc<CachingMiddleware>>,
    request: Request,
    next: Next,
) -> Response {
    if !KeyBuilder::is_cacheable_method(request.method()) {
        debug!(method = %request.method(), path = request.uri().path(), "Method not cacheable, bypassing cache");
        let mut response = next.run(request).await;
        set_outcome(&mut response, CacheOutcome::Bypass);
        return response;
    }

    let (parts, body) = request.into_parts();
    let identity = RequestIdentity::from_parts(&parts);
    let max_body_size = cache.policy().max_body_size;

    let served = cache
        .handle(&identity, || async {
            let response = next.run(Request::from_parts(parts, body)).await;
            if !cache.admits(response.status(), response.headers()) {
                return Err(Unbuffered::Passthrough(response));
            }
            match CachedResponse::buffer(response, max_body_size).await {
                Ok(Buffered::Complete(cached)) => Ok(cached),
                Ok(Buffered::Oversized(response)) => {
                    debug!(uri = %identity.uri, limit = max_body_size, "Response body too large to cache");
                    Err(Unbuffered::Passthrough(response))
                }
                Err(err) => Err(Unbuffered::Body(err)),
            }
        })
        .await;

    match served {
        Ok(served) => served.into_response(),
        Err(Unbuffered::Passthrough(mut response)) => {
            set_outcome(&mut response, CacheOutcome::Miss);
            response
        }
        Err(Unbuffered::Body(err)) => {
            error!(error = %err, uri = %identity.uri, "Failed to buffer response body");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn set_outcome(response: &mut Response, outcome: CacheOutcome) {
    response
        .headers_mut()
        .insert(X_CACHE, HeaderValue::from_static(outcome.as_str()));
}

impl IntoResponse for Served {
    fn into_response(self) -> Response {
        let mut response = self.response.to_response();
        set_outcome(&mut response, self.outcome);
        let headers = response.headers_mut();

        if let Some(max_age) = self.max_age {
            if !headers.contains_key(header::CACHE_CONTROL) {
                if let Ok(value) = HeaderValue::from_str(&format!("max-age={}", max_age.as_secs())) {
                    headers.insert(header::CACHE_CONTROL, value);
                }
            }
        }

        response
    }
}
