//! Request timing middleware.

use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::info;

/// Logs how long each request took to produce a response.
pub async fn log_request_time(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let total = start.elapsed();
    info!(
        %method,
        %path,
        status = response.status().as_u16(),
        "Total time: {:.2}s",
        total.as_secs_f64()
    );

    response
}
