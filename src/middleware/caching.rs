//! Caching Middleware
//!
//! Wraps a handler: serves a stored response on a hit, otherwise runs the
//! handler once and stores what it produced.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use axum::http::{HeaderMap, StatusCode};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::cache::{
    forbids_storage, CacheKey, CacheStore, CachedResponse, KeyBuilder, RequestIdentity,
};
use crate::error::CacheError;
use crate::middleware::CachePolicy;

// == Outcome ==
/// How a response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served from the store; the handler did not run.
    Hit,
    /// The handler ran for a cacheable request.
    Miss,
    /// Caching did not apply to this request.
    Bypass,
}

impl CacheOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOutcome::Hit => "HIT",
            CacheOutcome::Miss => "MISS",
            CacheOutcome::Bypass => "BYPASS",
        }
    }
}

/// A response together with how it was obtained.
#[derive(Debug, Clone)]
pub struct Served {
    pub response: Arc<CachedResponse>,
    pub outcome: CacheOutcome,
    /// Remaining freshness when the response is (now) held by the store.
    pub max_age: Option<Duration>,
}

// == Caching Middleware ==
#[derive(Debug)]
pub struct CachingMiddleware {
    store: Arc<dyn CacheStore>,
    keys: KeyBuilder,
    policy: CachePolicy,
    in_flight: DashMap<CacheKey, Arc<Mutex<()>>>,
}

impl CachingMiddleware {
    pub fn new(store: Arc<dyn CacheStore>, policy: CachePolicy) -> Self {
        let keys = KeyBuilder::new(policy.key_prefix.clone(), policy.vary_headers.clone());

        Self {
            store,
            keys,
            policy,
            in_flight: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn key_builder(&self) -> &KeyBuilder {
        &self.keys
    }

    /// Number of keys with a handler run currently in progress (single-flight only).
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Produces the response for one request.
    ///
    /// The handler runs at most once. Its error is returned unchanged and
    /// nothing is stored for it. Store failures never fail the request: a
    /// failed or timed out read is a miss, a failed write is logged.
    pub async fn handle<F, Fut, E>(
        &self,
        identity: &RequestIdentity,
        handler: F,
    ) -> std::result::Result<Served, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<CachedResponse, E>>,
    {
        let key = match self.keys.build_for(identity) {
            Ok(key) => key,
            Err(CacheError::NotCacheable(method)) => {
                debug!(%method, path = identity.uri.path(), "Method not cacheable, bypassing cache");
                return bypass(handler).await;
            }
            Err(err) => {
                warn!(error = %err, uri = %identity.uri, "Cannot derive cache key, bypassing cache");
                return bypass(handler).await;
            }
        };

        if let Some(served) = self.lookup(&key).await {
            return Ok(served);
        }

        if !self.policy.single_flight {
            return self.fill(key, handler).await;
        }

        let _flight = self.join_flight(&key).await;
        // Whoever held the flight before us may have filled the entry.
        if let Some(served) = self.lookup(&key).await {
            return Ok(served);
        }
        self.fill(key, handler).await
    }

    async fn lookup(&self, key: &CacheKey) -> Option<Served> {
        match timeout(self.policy.store_timeout, self.store.get(key)).await {
            Ok(Ok(Some(entry))) => {
                debug!(key = %key, "Cache hit");
                Some(Served {
                    max_age: Some(entry.ttl_remaining()),
                    response: entry.value,
                    outcome: CacheOutcome::Hit,
                })
            }
            Ok(Ok(None)) => {
                debug!(key = %key, "Cache miss");
                None
            }
            Ok(Err(err)) => {
                warn!(key = %key, error = %err, "Cache read failed, falling through to handler");
                None
            }
            Err(_) => {
                let err = CacheError::StoreTimeout(self.policy.store_timeout);
                warn!(key = %key, error = %err, "Cache read timed out, falling through to handler");
                None
            }
        }
    }

    async fn fill<F, Fut, E>(&self, key: CacheKey, handler: F) -> std::result::Result<Served, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<CachedResponse, E>>,
    {
        let response = Arc::new(handler().await?);

        let max_age = if self.should_store(&response) {
            self.write(key, response.clone())
                .await
                .then(|| self.policy.ttl())
        } else {
            debug!(key = %key, status = %response.status, "Response not cacheable, not storing");
            None
        };

        Ok(Served {
            response,
            outcome: CacheOutcome::Miss,
            max_age,
        })
    }

    /// Whether a response with this status and these headers may be stored.
    /// Lets callers skip buffering a body that would never be kept.
    pub fn admits(&self, status: StatusCode, headers: &HeaderMap) -> bool {
        self.policy.is_cacheable_status(status) && !forbids_storage(headers)
    }

    fn should_store(&self, response: &CachedResponse) -> bool {
        self.admits(response.status, &response.headers)
            && response.body.len() <= self.policy.max_body_size
    }

    async fn write(&self, key: CacheKey, response: Arc<CachedResponse>) -> bool {
        let label = key.to_string();
        match timeout(
            self.policy.store_timeout,
            self.store.set(key, response, self.policy.ttl()),
        )
        .await
        {
            Ok(Ok(())) => {
                debug!(key = %label, ttl = ?self.policy.ttl(), "Stored response");
                true
            }
            Ok(Err(err)) => {
                warn!(key = %label, error = %err, "Cache write failed, response served uncached");
                false
            }
            Err(_) => {
                let err = CacheError::StoreTimeout(self.policy.store_timeout);
                warn!(key = %label, error = %err, "Cache write timed out, response served uncached");
                false
            }
        }
    }

    async fn join_flight(&self, key: &CacheKey) -> Flight<'_> {
        let lock = Arc::clone(self.in_flight.entry(key.clone()).or_default().value());
        let mut flight = Flight {
            in_flight: &self.in_flight,
            key: key.clone(),
            lock,
            guard: None,
        };
        // Built before awaiting so a cancelled waiter still releases the marker.
        flight.guard = Some(flight.lock.clone().lock_owned().await);
        flight
    }
}

async fn bypass<F, Fut, E>(handler: F) -> std::result::Result<Served, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<CachedResponse, E>>,
{
    let response = handler().await?;
    Ok(Served {
        response: Arc::new(response),
        outcome: CacheOutcome::Bypass,
        max_age: None,
    })
}

// == Single Flight ==
/// Membership in the set of requests working on one key. Dropping it releases
/// the lock and removes the marker once nobody else holds or awaits it.
struct Flight<'a> {
    in_flight: &'a DashMap<CacheKey, Arc<Mutex<()>>>,
    key: CacheKey,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Two references left means only the map and this flight know the lock.
        self.in_flight.remove_if(&self.key, |_, lock| {
            Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2
        });
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheEntry, CacheStats, MemoryStore};
    use crate::error::Result;
    use async_trait::async_trait;
    use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BODY: &str = "Results received!";

    fn get(uri: &str) -> RequestIdentity {
        RequestIdentity::new(Method::GET, uri.parse().unwrap(), HeaderMap::new())
    }

    async fn render(calls: Arc<AtomicUsize>, status: StatusCode) -> std::result::Result<CachedResponse, Infallible> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(CachedResponse::new(status, BODY))
    }

    fn middleware(policy: CachePolicy) -> (CachingMiddleware, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (CachingMiddleware::new(store.clone(), policy), store)
    }

    /// Store whose transport is down.
    #[derive(Debug)]
    struct UnavailableStore;

    #[async_trait]
    impl CacheStore for UnavailableStore {
        async fn get(&self, _key: &CacheKey) -> Result<Option<CacheEntry>> {
            Err(CacheError::StoreUnavailable("connection refused".into()))
        }
        async fn set(&self, _key: CacheKey, _value: Arc<CachedResponse>, _ttl: Duration) -> Result<()> {
            Err(CacheError::StoreUnavailable("connection refused".into()))
        }
        async fn delete(&self, _key: &CacheKey) -> Result<()> {
            Err(CacheError::StoreUnavailable("connection refused".into()))
        }
        async fn clear(&self) -> Result<()> {
            Err(CacheError::StoreUnavailable("connection refused".into()))
        }
        fn stats(&self) -> CacheStats {
            CacheStats::default()
        }
    }

    /// Store that never answers within any sane timeout.
    #[derive(Debug)]
    struct StalledStore;

    #[async_trait]
    impl CacheStore for StalledStore {
        async fn get(&self, _key: &CacheKey) -> Result<Option<CacheEntry>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }
        async fn set(&self, _key: CacheKey, _value: Arc<CachedResponse>, _ttl: Duration) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
        async fn delete(&self, _key: &CacheKey) -> Result<()> {
            Ok(())
        }
        async fn clear(&self) -> Result<()> {
            Ok(())
        }
        fn stats(&self) -> CacheStats {
            CacheStats::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_view_cached_until_ttl_elapses() {
        let (mw, _store) = middleware(CachePolicy::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let a = mw.handle(&get("/view"), || render(calls.clone(), StatusCode::OK)).await.unwrap();
        assert_eq!(a.outcome, CacheOutcome::Miss);
        assert_eq!(a.max_age, Some(Duration::from_secs(300)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let b = mw.handle(&get("/view"), || render(calls.clone(), StatusCode::OK)).await.unwrap();
        assert_eq!(b.outcome, CacheOutcome::Hit);
        assert_eq!(b.response.status, StatusCode::OK);
        assert_eq!(b.response.body, BODY);
        assert_eq!(calls.load(Ordering::SeqCst), 1, "Handler must not run on a hit");

        tokio::time::advance(Duration::from_secs(301)).await;

        let c = mw.handle(&get("/view"), || render(calls.clone(), StatusCode::OK)).await.unwrap();
        assert_eq!(c.outcome, CacheOutcome::Miss);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reordered_query_shares_entry() {
        let (mw, _store) = middleware(CachePolicy::default());
        let calls = Arc::new(AtomicUsize::new(0));

        mw.handle(&get("/view?x=1&y=2"), || render(calls.clone(), StatusCode::OK)).await.unwrap();
        let served = mw.handle(&get("/view?y=2&x=1"), || render(calls.clone(), StatusCode::OK)).await.unwrap();
        assert_eq!(served.outcome, CacheOutcome::Hit);

        let served = mw.handle(&get("/view?x=2"), || render(calls.clone(), StatusCode::OK)).await.unwrap();
        assert_eq!(served.outcome, CacheOutcome::Miss);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_error_status_is_not_stored() {
        let (mw, store) = middleware(CachePolicy::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let identity = get("/view");

        let served = mw
            .handle(&identity, || render(calls.clone(), StatusCode::INTERNAL_SERVER_ERROR))
            .await
            .unwrap();
        assert_eq!(served.response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(served.response.body, BODY);
        assert_eq!(served.max_age, None);

        let key = mw.key_builder().build_for(&identity).unwrap();
        assert!(store.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_configured_status_codes() {
        let policy = CachePolicy::default().with_status_codes([200, 404]);
        let (mw, _store) = middleware(policy);
        let calls = Arc::new(AtomicUsize::new(0));

        mw.handle(&get("/gone"), || render(calls.clone(), StatusCode::NOT_FOUND)).await.unwrap();
        let served = mw.handle(&get("/gone"), || render(calls.clone(), StatusCode::NOT_FOUND)).await.unwrap();
        assert_eq!(served.outcome, CacheOutcome::Hit);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_error_propagates_unchanged() {
        let (mw, store) = middleware(CachePolicy::default());

        let result = mw
            .handle(&get("/view"), || async { Err::<CachedResponse, _>("upstream returned 502") })
            .await;
        assert_eq!(result.unwrap_err(), "upstream returned 502");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_no_store_response_is_not_cached() {
        let (mw, store) = middleware(CachePolicy::default());

        let served = mw
            .handle(&get("/me"), || async {
                Ok::<_, Infallible>(
                    CachedResponse::new(StatusCode::OK, "private data")
                        .with_header(header::CACHE_CONTROL, HeaderValue::from_static("private")),
                )
            })
            .await
            .unwrap();
        assert_eq!(served.outcome, CacheOutcome::Miss);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_body_over_size_limit_is_not_stored() {
        let policy = CachePolicy::default().with_max_body_size(BODY.len() - 1);
        let (mw, store) = middleware(policy);
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let served = mw.handle(&get("/view"), || render(calls.clone(), StatusCode::OK)).await.unwrap();
            assert_eq!(served.outcome, CacheOutcome::Miss);
            assert_eq!(served.response.body, BODY);
            assert_eq!(served.max_age, None);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn test_admits_checks_status_and_cache_control() {
        let (mw, _store) = middleware(CachePolicy::default());
        let mut private = HeaderMap::new();
        private.insert(header::CACHE_CONTROL, HeaderValue::from_static("private"));

        assert!(mw.admits(StatusCode::OK, &HeaderMap::new()));
        assert!(!mw.admits(StatusCode::INTERNAL_SERVER_ERROR, &HeaderMap::new()));
        assert!(!mw.admits(StatusCode::OK, &private));
    }

    #[tokio::test]
    async fn test_post_bypasses_cache() {
        let (mw, store) = middleware(CachePolicy::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let post = RequestIdentity::new(Method::POST, "/view".parse().unwrap(), HeaderMap::new());

        for _ in 0..2 {
            let served = mw.handle(&post, || render(calls.clone(), StatusCode::OK)).await.unwrap();
            assert_eq!(served.outcome, CacheOutcome::Bypass);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_identity_bypasses_cache() {
        let policy = CachePolicy::default().with_vary_headers([header::ACCEPT_LANGUAGE]);
        let (mw, store) = middleware(policy);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_bytes(&[0xff]).unwrap());
        let identity = RequestIdentity::new(Method::GET, "/view".parse().unwrap(), headers);

        let served = mw.handle(&identity, || render(calls.clone(), StatusCode::OK)).await.unwrap();
        assert_eq!(served.outcome, CacheOutcome::Bypass);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_vary_header_splits_entries() {
        let policy = CachePolicy::default().with_vary_headers([header::ACCEPT_LANGUAGE]);
        let (mw, store) = middleware(policy);
        let calls = Arc::new(AtomicUsize::new(0));

        for lang in ["en", "fr", "en"] {
            let mut headers = HeaderMap::new();
            headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static(lang));
            let identity = RequestIdentity::new(Method::GET, "/view".parse().unwrap(), headers);
            mw.handle(&identity, || render(calls.clone(), StatusCode::OK)).await.unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_open() {
        let mw = CachingMiddleware::new(Arc::new(UnavailableStore), CachePolicy::default());
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let served = mw.handle(&get("/view"), || render(calls.clone(), StatusCode::OK)).await.unwrap();
            assert_eq!(served.outcome, CacheOutcome::Miss);
            assert_eq!(served.response.body, BODY);
            assert_eq!(served.max_age, None);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_store_times_out_to_handler() {
        let policy = CachePolicy::default().with_store_timeout(Duration::from_millis(50));
        let mw = CachingMiddleware::new(Arc::new(StalledStore), policy);
        let calls = Arc::new(AtomicUsize::new(0));

        let served = mw.handle(&get("/view"), || render(calls.clone(), StatusCode::OK)).await.unwrap();
        assert_eq!(served.outcome, CacheOutcome::Miss);
        assert_eq!(served.max_age, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    async fn concurrent_misses(single_flight: bool) -> (usize, Arc<CachingMiddleware>) {
        let policy = CachePolicy::default().with_single_flight(single_flight);
        let mw = Arc::new(CachingMiddleware::new(Arc::new(MemoryStore::new()), policy));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut tasks = tokio::task::JoinSet::new();

        for _ in 0..8 {
            let mw = mw.clone();
            let calls = calls.clone();
            tasks.spawn(async move {
                mw.handle(&get("/slow"), || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, Infallible>(CachedResponse::new(StatusCode::OK, BODY))
                })
                .await
                .unwrap()
            });
        }

        while let Some(served) = tasks.join_next().await {
            assert_eq!(served.unwrap().response.body, BODY);
        }
        (calls.load(Ordering::SeqCst), mw)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_all_run_without_single_flight() {
        let (calls, _) = concurrent_misses(false).await;
        assert_eq!(calls, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight_collapses_concurrent_misses() {
        let (calls, mw) = concurrent_misses(true).await;
        assert_eq!(calls, 1);
        assert_eq!(mw.in_flight(), 0, "Flight markers must be released");
    }

    #[tokio::test]
    async fn test_single_flight_releases_marker_on_error() {
        let policy = CachePolicy::default().with_single_flight(true);
        let (mw, _store) = middleware(policy);

        let result = mw
            .handle(&get("/view"), || async { Err::<CachedResponse, _>("boom") })
            .await;
        assert!(result.is_err());
        assert_eq!(mw.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight_releases_marker_on_cancel() {
        let policy = CachePolicy::default().with_single_flight(true);
        let (mw, store) = middleware(policy);
        let identity = get("/view");

        let pending = mw.handle(&identity, || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, Infallible>(CachedResponse::new(StatusCode::OK, BODY))
        });
        let cancelled = tokio::time::timeout(Duration::from_secs(1), pending).await;

        assert!(cancelled.is_err());
        assert_eq!(mw.in_flight(), 0);
        assert!(store.is_empty(), "Cancelled run must not leave an entry behind");
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(CacheOutcome::Hit.as_str(), "HIT");
        assert_eq!(CacheOutcome::Miss.as_str(), "MISS");
        assert_eq!(CacheOutcome::Bypass.as_str(), "BYPASS");
    }
}
