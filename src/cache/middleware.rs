//! Response cache middleware.
//!
//! A request is served from the store when a live entry exists under its key.
//! Otherwise the wrapped handler runs on a spawned task, its response is
//! returned to the caller as soon as it is ready, and the same task then
//! stores it. Dropping the inbound request never aborts that task, so a miss
//! that started computing always gets a chance to populate the cache.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use dashmap::DashMap;
use metrics::{counter, histogram};
use tokio::sync::{Mutex, Notify, OwnedMutexGuard, oneshot};
use tracing::{debug, error, instrument, warn};

use super::config::CacheConfig;
use super::error::CacheError;
use super::invalidation::{self, Generation, InvalidationTarget};
use super::keys::{CacheKey, key_for_request};
use super::object::ObjectCache;
use super::metrics::{
    METRIC_HANDLER_MS, METRIC_RESPONSE_BYPASS, METRIC_RESPONSE_HIT, METRIC_RESPONSE_MISS,
    METRIC_STORE_UNAVAILABLE, METRIC_STORE_WRITE_DROPPED,
};
use super::policy::{CachePolicy, DefaultCachePolicy};
use super::response::{Buffered, CachedResponse, buffer_response};
use super::store::EntryStore;

/// Page-level response cache shared by every route it wraps.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<Inner>,
}

struct Inner {
    config: CacheConfig,
    store: Arc<dyn EntryStore>,
    policy: Arc<dyn CachePolicy>,
    in_flight: DashMap<CacheKey, Arc<Mutex<()>>>,
    /// A miss only stores its result if no invalidation started while it
    /// was computing.
    generation: Generation,
    pending: AtomicUsize,
    drained: Notify,
}

enum Lookup {
    Hit(CachedResponse),
    Miss,
    Unavailable,
}

impl ResponseCache {
    pub fn new(config: CacheConfig, store: Arc<dyn EntryStore>) -> Self {
        let policy = Arc::new(DefaultCachePolicy::from_config(&config));
        Self::with_policy(config, store, policy)
    }

    pub fn with_policy(
        config: CacheConfig,
        store: Arc<dyn EntryStore>,
        policy: Arc<dyn CachePolicy>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                policy,
                in_flight: DashMap::new(),
                generation: Generation::default(),
                pending: AtomicUsize::new(0),
                drained: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn EntryStore> {
        &self.inner.store
    }

    /// An object cache over the same store and namespace. Invalidations
    /// through either cache stop in-flight writes of both.
    pub fn objects(&self) -> ObjectCache {
        ObjectCache::sharing(
            &self.inner.config,
            Arc::clone(&self.inner.store),
            self.inner.generation.clone(),
        )
    }

    /// Attach the cache to a route. `ttl` overrides the configured default.
    pub fn for_route(&self, ttl: Option<Duration>) -> RouteCache {
        RouteCache {
            cache: self.clone(),
            ttl,
        }
    }

    /// Serve `request` from the cache, or through `handler` on a miss.
    ///
    /// The store is never allowed to turn a request into an error: lookups
    /// that fail count as misses and failed writes are dropped.
    pub async fn serve<H, Fut>(
        &self,
        request: Request<Body>,
        route_ttl: Option<Duration>,
        handler: H,
    ) -> Response
    where
        H: FnOnce(Request<Body>) -> Fut + Send + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        if !self.inner.config.enabled || !self.inner.policy.is_request_cacheable(&request) {
            counter!(METRIC_RESPONSE_BYPASS).increment(1);
            debug!(cache = "response", outcome = "bypass", "request is not cacheable");
            return handler(request).await;
        }

        let key = match key_for_request(&request, &self.inner.config) {
            Ok(key) => key,
            Err(err) => {
                counter!(METRIC_RESPONSE_BYPASS).increment(1);
                warn!(
                    cache = "response",
                    outcome = "bypass",
                    error = %CacheError::from(err),
                    "cache key derivation failed"
                );
                return handler(request).await;
            }
        };
        let ttl = self.inner.config.ttl_for(route_ttl);

        let guard = match self.lookup(&key).await {
            Lookup::Hit(cached) => return self.hit(&key, cached),
            Lookup::Miss if self.inner.config.coalesce_misses => {
                let lock = self.inner.in_flight.entry(key.clone()).or_default().value().clone();
                let guard = lock.lock_owned().await;
                // Whoever held the lock before us may have stored the page.
                if let Lookup::Hit(cached) = self.lookup(&key).await {
                    drop(guard);
                    self.inner.release(&key);
                    return self.hit(&key, cached);
                }
                Some(guard)
            }
            Lookup::Miss | Lookup::Unavailable => None,
        };

        counter!(METRIC_RESPONSE_MISS).increment(1);
        debug!(cache = "response", outcome = "miss", key = %key, "cache miss, executing handler");
        self.compute(key, request, ttl, handler, guard).await
    }

    /// Remove `target` from the store and stop in-flight misses from
    /// writing results computed before this call.
    pub async fn invalidate(&self, target: InvalidationTarget) -> Result<u64, CacheError> {
        self.inner.generation.advance();
        invalidation::invalidate(self.inner.store.as_ref(), &self.inner.config, &target).await
    }

    /// Wait until every spawned miss has finished its write.
    pub async fn drain(&self) {
        loop {
            let drained = self.inner.drained.notified();
            if self.inner.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            drained.await;
        }
    }

    fn hit(&self, key: &CacheKey, cached: CachedResponse) -> Response {
        counter!(METRIC_RESPONSE_HIT).increment(1);
        debug!(cache = "response", outcome = "hit", key = %key, "serving cached response");
        cached.into_response()
    }

    async fn lookup(&self, key: &CacheKey) -> Lookup {
        match self.inner.store.get(key).await {
            Ok(Some(entry)) => match CachedResponse::decode(&entry.value) {
                Ok(cached) => Lookup::Hit(cached),
                Err(err) => {
                    warn!(cache = "response", key = %key, error = %err, "discarding undecodable entry");
                    Lookup::Miss
                }
            },
            Ok(None) => Lookup::Miss,
            Err(err) => {
                let err = CacheError::from(err);
                if matches!(err, CacheError::StoreUnavailable(_)) {
                    counter!(METRIC_STORE_UNAVAILABLE).increment(1);
                }
                warn!(cache = "response", key = %key, error = %err, "cache lookup failed, serving uncached");
                Lookup::Unavailable
            }
        }
    }

    async fn compute<H, Fut>(
        &self,
        key: CacheKey,
        request: Request<Body>,
        ttl: Option<Duration>,
        handler: H,
        guard: Option<OwnedMutexGuard<()>>,
    ) -> Response
    where
        H: FnOnce(Request<Body>) -> Fut + Send + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let generation = self.inner.generation.current();
        let in_flight = InFlight::new(Arc::clone(&self.inner), key, guard);
        let cache = self.clone();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let started_at = Instant::now();
            let response = handler(request).await;
            histogram!(METRIC_HANDLER_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

            let (response, payload) = cache.prepare(response).await;
            if tx.send(response).is_err() {
                debug!(cache = "response", key = %in_flight.key, "requester went away before the response was ready");
            }
            if let Some(payload) = payload {
                cache.write(&in_flight.key, payload, ttl, generation).await;
            }
            drop(in_flight);
        });

        match rx.await {
            Ok(response) => response,
            Err(_) => {
                error!(cache = "response", "handler task ended without a response");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }

    /// Buffer a cacheable response and encode it for the store.
    async fn prepare(&self, response: Response) -> (Response, Option<Bytes>) {
        if !self.inner.policy.is_response_cacheable(&response) {
            debug!(cache = "response", status = %response.status(), "response is not cacheable");
            return (response, None);
        }

        let limit = self.inner.config.max_body_bytes;
        let (response, captured) = match buffer_response(response, limit).await {
            Ok(Buffered::Captured(response, captured)) => (response, captured),
            Ok(Buffered::Oversized(response)) => {
                debug!(cache = "response", limit, "response body too large to cache");
                return (response, None);
            }
            Err((_, err)) => {
                error!(cache = "response", error = %err, "failed to buffer handler response");
                return (StatusCode::INTERNAL_SERVER_ERROR.into_response(), None);
            }
        };

        match captured.encode() {
            Ok(payload) => (response, Some(payload)),
            Err(err) => {
                warn!(cache = "response", error = %err, "response could not be encoded for the store");
                (response, None)
            }
        }
    }

    /// Best-effort store write with bounded, linearly backed-off retries.
    async fn write(&self, key: &CacheKey, payload: Bytes, ttl: Option<Duration>, generation: u64) {
        let config = &self.inner.config;
        let attempts = config.write_attempts.get();

        for attempt in 1..=attempts {
            if self.inner.generation.moved_since(generation) {
                debug!(cache = "response", key = %key, "invalidated while computing, not storing");
                return;
            }

            match self.inner.store.set(key, payload.clone(), ttl).await {
                Ok(()) => {
                    if self.inner.generation.moved_since(generation) {
                        // An invalidation started while the write was in flight.
                        let retracted = invalidation::retract(
                            self.inner.store.as_ref(),
                            key,
                            config.write_attempts,
                            config.write_backoff,
                        )
                        .await;
                        if let Err(err) = retracted {
                            error!(cache = "response", key = %key, error = %err, "failed to retract stale write");
                        }
                        return;
                    }
                    debug!(cache = "response", key = %key, ttl_secs = ttl.map(|ttl| ttl.as_secs()), "response stored");
                    return;
                }
                Err(err) if err.is_unavailable() && attempt < attempts => {
                    counter!(METRIC_STORE_UNAVAILABLE).increment(1);
                    debug!(cache = "response", key = %key, attempt, error = %err, "store write failed, retrying");
                    tokio::time::sleep(config.write_backoff * attempt).await;
                }
                Err(err) => {
                    if err.is_unavailable() {
                        counter!(METRIC_STORE_UNAVAILABLE).increment(1);
                    }
                    counter!(METRIC_STORE_WRITE_DROPPED).increment(1);
                    warn!(cache = "response", key = %key, attempt, error = %err, "dropping cache write");
                    return;
                }
            }
        }
    }
}

impl Inner {
    fn release(&self, key: &CacheKey) {
        self.in_flight
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// One spawned miss. Dropping it releases the per-key lock and marks the
/// write as settled, also when the handler panics.
struct InFlight {
    inner: Arc<Inner>,
    key: CacheKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl InFlight {
    fn new(inner: Arc<Inner>, key: CacheKey, guard: Option<OwnedMutexGuard<()>>) -> Self {
        inner.pending.fetch_add(1, Ordering::SeqCst);
        Self { inner, key, guard }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let held = self.guard.take();
        let coalesced = held.is_some();
        drop(held);
        if coalesced {
            self.inner.release(&self.key);
        }

        if self.inner.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.drained.notify_waiters();
        }
    }
}

/// A [`ResponseCache`] bound to one route's TTL, used as middleware state.
#[derive(Clone)]
pub struct RouteCache {
    cache: ResponseCache,
    ttl: Option<Duration>,
}

impl RouteCache {
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }
}

/// Middleware entry point.
///
/// ```ignore
/// let page = cache.for_route(Some(Duration::from_secs(900)));
/// Router::new()
///     .route("/cookbook/", get(recipes))
///     .route_layer(middleware::from_fn_with_state(page, response_cache_layer));
/// ```
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(route): State<RouteCache>,
    request: Request<Body>,
    next: Next,
) -> Response {
    route
        .cache
        .serve(request, route.ttl, move |request| next.run(request))
        .await
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::sync::atomic::AtomicU32;

    use axum::http::{Method, header};
    use http_body_util::BodyExt;

    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::config::Namespace;
    use crate::cache::store::MemoryStore;

    fn setup(config: CacheConfig) -> (ResponseCache, Arc<MemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::with_clock(
            NonZeroUsize::new(64).expect("capacity"),
            clock.clone(),
        ));
        (ResponseCache::new(config, store.clone()), store, clock)
    }

    fn config() -> CacheConfig {
        CacheConfig {
            namespace: Namespace::new(Some("example".to_string()), 1).expect("ns"),
            ..CacheConfig::default()
        }
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    async fn call(cache: &ResponseCache, request: Request<Body>, calls: &Arc<AtomicU32>) -> String {
        let calls = calls.clone();
        let response = cache
            .serve(request, None, move |_| async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                ([(header::CONTENT_TYPE, "text/plain")], format!("R{n}")).into_response()
            })
            .await;
        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        String::from_utf8(bytes.to_vec()).expect("utf8")
    }

    #[tokio::test]
    async fn second_request_is_served_from_the_store() {
        let (cache, store, _clock) = setup(config());
        let calls = Arc::new(AtomicU32::new(0));

        assert_eq!(call(&cache, get("/cookbook/"), &calls).await, "R1");
        cache.drain().await;
        assert_eq!(store.len(), 1);

        assert_eq!(call(&cache, get("/cookbook/"), &calls).await, "R1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_cache_always_calls_the_handler() {
        let (cache, store, _clock) = setup(CacheConfig {
            enabled: false,
            ..config()
        });
        let calls = Arc::new(AtomicU32::new(0));

        call(&cache, get("/cookbook/"), &calls).await;
        call(&cache, get("/cookbook/"), &calls).await;
        cache.drain().await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn uncacheable_responses_are_not_stored() {
        let (cache, store, _clock) = setup(config());

        let response = cache
            .serve(get("/missing"), None, |_| async {
                StatusCode::NOT_FOUND.into_response()
            })
            .await;
        cache.drain().await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn invalidating_a_route_forces_recomputation() {
        let (cache, _store, _clock) = setup(config());
        let calls = Arc::new(AtomicU32::new(0));

        call(&cache, get("/cookbook/"), &calls).await;
        cache.drain().await;
        cache
            .invalidate(InvalidationTarget::Route("/cookbook/".to_string()))
            .await
            .expect("invalidated");

        assert_eq!(call(&cache, get("/cookbook/"), &calls).await, "R2");
    }

    #[tokio::test]
    async fn route_ttl_overrides_the_default() {
        let (cache, _store, clock) = setup(CacheConfig {
            default_ttl: Some(Duration::from_secs(5)),
            ..config()
        });
        let calls = Arc::new(AtomicU32::new(0));
        let route = cache.for_route(Some(Duration::from_secs(60)));
        assert_eq!(route.ttl(), Some(Duration::from_secs(60)));

        let counter = calls.clone();
        route
            .cache()
            .serve(get("/cookbook/"), route.ttl(), move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                "R1".into_response()
            })
            .await;
        cache.drain().await;

        clock.advance(Duration::from_secs(30));
        assert_eq!(call(&cache, get("/cookbook/"), &calls).await, "R1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
