//! Cache Key Module
//!
//! Derives deterministic cache keys from request identity.

use std::collections::BTreeMap;
use std::fmt;

use axum::http::{request::Parts, HeaderMap, HeaderName, Method, Uri};
use serde::Serialize;

use crate::error::{CacheError, Result};

// == Cache Key ==
/// Opaque lookup key for a cached response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// == Request Identity ==
/// The parts of a request that decide whether two requests share a response.
#[derive(Debug, Clone)]
pub struct RequestIdentity {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl RequestIdentity {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap) -> Self {
        Self {
            method,
            uri,
            headers,
        }
    }

    pub fn from_parts(parts: &Parts) -> Self {
        Self::new(parts.method.clone(), parts.uri.clone(), parts.headers.clone())
    }
}

/// Serialized form of a request identity. JSON keeps the encoding injective,
/// so no choice of path, parameter or header value can forge another key.
#[derive(Serialize)]
struct CanonicalRequest<'a> {
    prefix: &'a str,
    method: &'a str,
    path: &'a str,
    query: BTreeMap<&'a str, Vec<Option<&'a str>>>,
    vary: Vec<(&'a str, Option<&'a str>)>,
}

// == Key Builder ==
/// Builds cache keys for one view configuration.
///
/// Query parameters are ordered by name, so `?a=1&b=2` and `?b=2&a=1` share a
/// key; repeated parameters keep the order of their values. Each configured
/// vary header contributes its value, or an explicit "absent" marker.
///
/// Request query strings are keyed in their raw, percent-encoded form:
/// `?a=%41` and `?a=A` get separate entries, and `?a` differs from `?a=`.
#[derive(Debug, Clone, Default)]
pub struct KeyBuilder {
    prefix: String,
    vary_headers: Vec<HeaderName>,
}

impl KeyBuilder {
    pub fn new(prefix: impl Into<String>, vary_headers: impl IntoIterator<Item = HeaderName>) -> Self {
        let mut vary_headers: Vec<HeaderName> = vary_headers.into_iter().collect();
        vary_headers.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        vary_headers.dedup();

        Self {
            prefix: prefix.into(),
            vary_headers,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn vary_headers(&self) -> &[HeaderName] {
        &self.vary_headers
    }

    /// Only GET and HEAD responses are ever cached.
    pub fn is_cacheable_method(method: &Method) -> bool {
        method == Method::GET || method == Method::HEAD
    }

    /// Builds the key for an explicit method, path, query list and header set.
    ///
    /// # Errors
    /// - `NotCacheable` for any method other than GET or HEAD
    /// - `InvalidRequest` for an empty or relative path, or a vary header
    ///   value that is not valid UTF-8
    pub fn build(
        &self,
        method: &Method,
        path: &str,
        query: &[(String, String)],
        headers: &HeaderMap,
    ) -> Result<CacheKey> {
        if !Self::is_cacheable_method(method) {
            return Err(CacheError::NotCacheable(method.to_string()));
        }

        let mut sorted: BTreeMap<&str, Vec<Option<&str>>> = BTreeMap::new();
        for (name, value) in query {
            sorted.entry(name.as_str()).or_default().push(Some(value.as_str()));
        }

        self.canonical(method, path, sorted, headers)
    }

    /// Builds the key for a request from its raw query string.
    pub fn build_for(&self, identity: &RequestIdentity) -> Result<CacheKey> {
        // Method first: a POST with a garbled query is a routing decision, not bad input.
        if !Self::is_cacheable_method(&identity.method) {
            return Err(CacheError::NotCacheable(identity.method.to_string()));
        }

        let query = raw_query_pairs(identity.uri.query().unwrap_or_default());
        self.canonical(&identity.method, identity.uri.path(), query, &identity.headers)
    }

    fn canonical(
        &self,
        method: &Method,
        path: &str,
        query: BTreeMap<&str, Vec<Option<&str>>>,
        headers: &HeaderMap,
    ) -> Result<CacheKey> {
        if !path.starts_with('/') {
            return Err(CacheError::InvalidRequest(format!(
                "path must be absolute, got {:?}",
                path
            )));
        }

        let values = self
            .vary_headers
            .iter()
            .map(|name| header_value(headers, name))
            .collect::<Result<Vec<_>>>()?;
        let vary = self
            .vary_headers
            .iter()
            .zip(&values)
            .map(|(name, value)| (name.as_str(), value.as_deref()))
            .collect();

        let canonical = CanonicalRequest {
            prefix: &self.prefix,
            method: method.as_str(),
            path,
            query,
            vary,
        };

        serde_json::to_string(&canonical)
            .map(CacheKey)
            .map_err(|e| CacheError::Internal(format!("key serialization failed: {}", e)))
    }
}

/// Splits a query string into `name -> values` without decoding it. A pair
/// with no `=` has no value, which keeps `?a` apart from `?a=`.
fn raw_query_pairs(query: &str) -> BTreeMap<&str, Vec<Option<&str>>> {
    let mut pairs: BTreeMap<&str, Vec<Option<&str>>> = BTreeMap::new();
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (name, value) = match pair.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (pair, None),
        };
        pairs.entry(name).or_default().push(value);
    }
    pairs
}

fn header_value(headers: &HeaderMap, name: &HeaderName) -> Result<Option<String>> {
    let values = headers
        .get_all(name)
        .iter()
        .map(|value| {
            std::str::from_utf8(value.as_bytes()).map_err(|_| {
                CacheError::InvalidRequest(format!("header {} is not valid UTF-8", name))
            })
        })
        .collect::<Result<Vec<&str>>>()?;

    if values.is_empty() {
        Ok(None)
    } else {
        Ok(Some(values.join(", ")))
    }
}
