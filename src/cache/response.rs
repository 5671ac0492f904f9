//! Cached Response Module
//!
//! Immutable snapshot of a rendered HTTP response.

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
};
use bytes::{Bytes, BytesMut};
use futures::{stream, StreamExt};

// == Cached Response ==
/// A fully buffered response: status, headers and body.
///
/// Once handed to a store it is shared behind an `Arc` and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CachedResponse {
    /// Creates a response with the given status and body and no headers.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Adds a header, replacing any previous value for the same name.
    pub fn with_header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Buffers an axum response whose body is at most `limit` bytes.
    ///
    /// A larger body is handed back as a response that streams the already
    /// read chunks followed by the rest, so nothing is lost. A declared
    /// `Content-Length` over the limit skips buffering altogether.
    pub async fn buffer(response: Response, limit: usize) -> Result<Buffered, axum::Error> {
        let (parts, body) = response.into_parts();
        if content_length(&parts.headers).is_some_and(|len| len > limit as u64) {
            return Ok(Buffered::Oversized(Response::from_parts(parts, body)));
        }

        let mut chunks = body.into_data_stream();
        let mut buffered = BytesMut::new();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            if buffered.len() + chunk.len() > limit {
                let head = stream::iter([Ok::<_, axum::Error>(buffered.freeze()), Ok(chunk)]);
                let body = Body::from_stream(head.chain(chunks));
                return Ok(Buffered::Oversized(Response::from_parts(parts, body)));
            }
            buffered.extend_from_slice(&chunk);
        }

        Ok(Buffered::Complete(Self {
            status: parts.status,
            headers: parts.headers,
            body: buffered.freeze(),
        }))
    }

    /// Builds a fresh axum response from this snapshot.
    pub fn to_response(&self) -> Response {
        let mut response = Response::new(Body::from(self.body.clone()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }

    /// Whether the response forbids shared storage via `Cache-Control`.
    pub fn forbids_storage(&self) -> bool {
        forbids_storage(&self.headers)
    }
}

/// Outcome of [`CachedResponse::buffer`].
#[derive(Debug)]
pub enum Buffered {
    Complete(CachedResponse),
    /// Body exceeds the limit; the response is intact but was not buffered.
    Oversized(Response),
}

/// Whether `Cache-Control` carries `no-store` or `private`.
pub fn forbids_storage(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|directive| directive.trim().to_ascii_lowercase())
        .any(|directive| directive == "no-store" || directive == "private")
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}
