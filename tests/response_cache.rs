//! Behaviour of the response cache against in-process stores.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use common::{FlakyStore, body_text, config, get, memory_store, request};
use futures::StreamExt;
use futures::future::join_all;
use pagecache::cache::{
    CacheConfig, EntryStore, InvalidationTarget, ManualClock, ResponseCache, RouteIdentity,
    VariationInputs, build_key,
};
use tokio::sync::{Notify, oneshot};

/// Serve `request` with a handler that answers `R{n}` on its n-th call.
async fn serve_counting(
    cache: &ResponseCache,
    request: Request<Body>,
    calls: &Arc<AtomicU32>,
) -> Response {
    let calls = calls.clone();
    cache
        .serve(request, None, move |_| async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            (
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                format!("R{n}"),
            )
                .into_response()
        })
        .await
}

async fn text(cache: &ResponseCache, request: Request<Body>, calls: &Arc<AtomicU32>) -> String {
    body_text(serve_counting(cache, request, calls).await).await
}

#[tokio::test]
async fn hits_replay_the_first_response() {
    let clock = Arc::new(ManualClock::default());
    let cache = ResponseCache::new(config("example"), memory_store(&clock));
    let calls = Arc::new(AtomicU32::new(0));

    let first = serve_counting(&cache, get("/cookbook/"), &calls).await;
    cache.drain().await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(body_text(first).await, "R1");

    for _ in 0..3 {
        let response = serve_counting(&cache, get("/cookbook/"), &calls).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).expect("content type"),
            "text/html; charset=utf-8"
        );
        assert_eq!(body_text(response).await, "R1");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn entries_expire_strictly_after_their_ttl() {
    let clock = Arc::new(ManualClock::default());
    let cache = ResponseCache::new(
        CacheConfig {
            default_ttl: Some(Duration::from_secs(10)),
            ..config("example")
        },
        memory_store(&clock),
    );
    let calls = Arc::new(AtomicU32::new(0));

    assert_eq!(text(&cache, get("/cookbook/"), &calls).await, "R1");
    cache.drain().await;

    clock.advance(Duration::from_secs(10));
    assert_eq!(text(&cache, get("/cookbook/"), &calls).await, "R1");

    clock.advance(Duration::from_millis(1));
    assert_eq!(text(&cache, get("/cookbook/"), &calls).await, "R2");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn namespaces_sharing_a_store_do_not_see_each_other() {
    let clock = Arc::new(ManualClock::default());
    let store = memory_store(&clock);
    let example = ResponseCache::new(config("example"), store.clone());
    let other = ResponseCache::new(config("other"), store.clone());
    let calls = Arc::new(AtomicU32::new(0));

    assert_eq!(text(&example, get("/cookbook/"), &calls).await, "R1");
    example.drain().await;
    assert_eq!(text(&other, get("/cookbook/"), &calls).await, "R2");
    other.drain().await;

    assert_eq!(
        store.keys("*").await.expect("keys"),
        vec![
            "example:1:/cookbook/".to_string(),
            "other:1:/cookbook/".to_string()
        ]
    );

    example
        .invalidate(InvalidationTarget::Namespace)
        .await
        .expect("namespace invalidated");
    assert_eq!(
        store.keys("*").await.expect("keys"),
        vec!["other:1:/cookbook/".to_string()]
    );
    assert_eq!(text(&other, get("/cookbook/"), &calls).await, "R2");
}

#[tokio::test]
async fn version_bump_retires_previous_entries() {
    let clock = Arc::new(ManualClock::default());
    let store = memory_store(&clock);
    let v1 = ResponseCache::new(config("example"), store.clone());
    let mut bumped = config("example");
    bumped.namespace = pagecache::cache::Namespace::new(Some("example".to_string()), 2)
        .expect("valid namespace");
    let v2 = ResponseCache::new(bumped, store);
    let calls = Arc::new(AtomicU32::new(0));

    assert_eq!(text(&v1, get("/cookbook/"), &calls).await, "R1");
    v1.drain().await;
    assert_eq!(text(&v2, get("/cookbook/"), &calls).await, "R2");
}

#[tokio::test]
async fn an_unreachable_store_never_fails_the_request() {
    let clock = Arc::new(ManualClock::default());
    let store = Arc::new(FlakyStore::new(clock));
    store.set_down(true);
    let cache = ResponseCache::new(config("example"), store.clone());
    let calls = Arc::new(AtomicU32::new(0));

    for expected in ["R1", "R2"] {
        let response = serve_counting(&cache, get("/cookbook/"), &calls).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, expected);
    }
    cache.drain().await;
    assert_eq!(store.sets(), 0);

    store.set_down(false);
    assert_eq!(text(&cache, get("/cookbook/"), &calls).await, "R3");
    cache.drain().await;
    assert_eq!(text(&cache, get("/cookbook/"), &calls).await, "R3");
    assert_eq!(store.sets(), 1);
}

#[tokio::test]
async fn invalidation_makes_the_next_request_a_miss() {
    let clock = Arc::new(ManualClock::default());
    let store = memory_store(&clock);
    let cache = ResponseCache::new(config("example"), store.clone());
    let calls = Arc::new(AtomicU32::new(0));

    text(&cache, get("/cookbook/"), &calls).await;
    cache.drain().await;

    let key = build_key(
        &RouteIdentity::get("/cookbook/"),
        &VariationInputs::new(),
        &cache.config().namespace,
    )
    .expect("key");
    assert!(store.get(&key).await.expect("get").is_some());

    let removed = cache
        .invalidate(InvalidationTarget::Key(key.clone()))
        .await
        .expect("invalidated");
    assert_eq!(removed, 1);
    assert!(store.get(&key).await.expect("get").is_none());
    assert_eq!(text(&cache, get("/cookbook/"), &calls).await, "R2");
}

#[tokio::test]
async fn route_invalidation_covers_query_variations() {
    let clock = Arc::new(ManualClock::default());
    let store = memory_store(&clock);
    let cache = ResponseCache::new(config("example"), store.clone());
    let calls = Arc::new(AtomicU32::new(0));

    for uri in ["/cookbook/", "/cookbook/?page=2", "/cookbook/?page=3"] {
        text(&cache, get(uri), &calls).await;
    }
    cache.drain().await;
    assert_eq!(store.len(), 3);

    // Parameter order does not matter.
    text(&cache, get("/cookbook/?b=2&a=1"), &calls).await;
    cache.drain().await;
    assert_eq!(
        text(&cache, get("/cookbook/?a=1&b=2"), &calls).await,
        "R4"
    );

    let removed = cache
        .invalidate(InvalidationTarget::Route("/cookbook/".to_string()))
        .await
        .expect("invalidated");
    assert_eq!(removed, 4);
    assert!(store.is_empty());
}

#[tokio::test]
async fn non_cacheable_requests_bypass_lookup_and_write() {
    let clock = Arc::new(ManualClock::default());
    let store = Arc::new(FlakyStore::new(clock));
    let cache = ResponseCache::new(config("example"), store.clone());
    let calls = Arc::new(AtomicU32::new(0));

    text(&cache, request(Method::POST, "/cookbook/"), &calls).await;
    text(&cache, request(Method::POST, "/cookbook/"), &calls).await;

    let authorized = || {
        Request::builder()
            .uri("/cookbook/")
            .header(header::AUTHORIZATION, "Bearer secret")
            .body(Body::empty())
            .expect("request")
    };
    text(&cache, authorized(), &calls).await;
    text(&cache, authorized(), &calls).await;
    cache.drain().await;

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(store.sets(), 0);
    assert!(store.inner().is_empty());
}

#[tokio::test]
async fn server_errors_are_never_stored() {
    let clock = Arc::new(ManualClock::default());
    let store = memory_store(&clock);
    let cache = ResponseCache::new(config("example"), store.clone());
    let calls = Arc::new(AtomicU32::new(0));

    for _ in 0..2 {
        let calls = calls.clone();
        let response = cache
            .serve(get("/cookbook/"), None, move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        cache.drain().await;
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(store.is_empty());
}

#[tokio::test]
async fn private_and_cookie_setting_responses_are_not_stored() {
    let clock = Arc::new(ManualClock::default());
    let store = memory_store(&clock);
    let cache = ResponseCache::new(config("example"), store.clone());

    let private = cache
        .serve(get("/private"), None, |_| async {
            ([(header::CACHE_CONTROL, "private, max-age=60")], "mine").into_response()
        })
        .await;
    let cookie = cache
        .serve(get("/session"), None, |_| async {
            ([(header::SET_COOKIE, "session=1")], "hello").into_response()
        })
        .await;
    cache.drain().await;

    assert_eq!(body_text(private).await, "mine");
    assert_eq!(body_text(cookie).await, "hello");
    assert!(store.is_empty());
}

#[tokio::test]
async fn oversized_bodies_pass_through_uncached() {
    let clock = Arc::new(ManualClock::default());
    let store = memory_store(&clock);
    let cache = ResponseCache::new(
        CacheConfig {
            max_body_bytes: 4,
            ..config("example")
        },
        store.clone(),
    );

    let response = cache
        .serve(get("/big"), None, |_| async {
            axum::body::Body::from("0123456789").into_response()
        })
        .await;
    cache.drain().await;

    assert_eq!(body_text(response).await, "0123456789");
    assert!(store.is_empty());
}

#[tokio::test]
async fn unsized_streams_are_not_buffered_past_the_limit() {
    let clock = Arc::new(ManualClock::default());
    let store = memory_store(&clock);
    let cache = ResponseCache::new(
        CacheConfig {
            max_body_bytes: 8,
            ..config("example")
        },
        store.clone(),
    );
    let tail_released = Arc::new(Notify::new());

    let gate = tail_released.clone();
    let response = tokio::time::timeout(
        Duration::from_secs(5),
        cache.serve(get("/feed"), None, move |_| async move {
            let head = futures::stream::iter(["<li>Guacamole</li>", "<li>Pico de gallo</li>"])
                .map(|chunk| Ok::<_, std::io::Error>(chunk.to_string()));
            let tail = futures::stream::once(async move {
                gate.notified().await;
                Ok::<_, std::io::Error>("<li>Vinaigrette</li>".to_string())
            });
            Body::from_stream(head.chain(tail)).into_response()
        }),
    )
    .await
    .expect("response arrives before the whole body is read");

    tail_released.notify_one();
    assert_eq!(
        body_text(response).await,
        "<li>Guacamole</li><li>Pico de gallo</li><li>Vinaigrette</li>"
    );
    cache.drain().await;
    assert!(store.is_empty());
}

async fn slow_herd(coalesce_misses: bool) -> u32 {
    let clock = Arc::new(ManualClock::default());
    let cache = ResponseCache::new(
        CacheConfig {
            coalesce_misses,
            ..config("example")
        },
        memory_store(&clock),
    );
    let calls = Arc::new(AtomicU32::new(0));

    let requests = (0..8).map(|_| {
        let calls = calls.clone();
        let cache = cache.clone();
        async move {
            let response = cache
                .serve(get("/cookbook/"), None, move |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    "page".into_response()
                })
                .await;
            body_text(response).await
        }
    });
    let bodies = join_all(requests).await;
    cache.drain().await;

    assert!(bodies.iter().all(|body| body == "page"));
    calls.load(Ordering::SeqCst)
}

#[tokio::test]
async fn concurrent_misses_each_run_the_handler_by_default() {
    assert_eq!(slow_herd(false).await, 8);
}

#[tokio::test]
async fn coalesced_misses_run_the_handler_once() {
    assert_eq!(slow_herd(true).await, 1);
}

#[tokio::test]
async fn dropping_the_request_does_not_cancel_population() {
    let clock = Arc::new(ManualClock::default());
    let store = memory_store(&clock);
    let cache = ResponseCache::new(config("example"), store.clone());
    let release = Arc::new(Notify::new());
    let (started_tx, started_rx) = oneshot::channel();

    let inflight = {
        let cache = cache.clone();
        let release = release.clone();
        tokio::spawn(async move {
            cache
                .serve(get("/cookbook/"), None, move |_| async move {
                    let _ = started_tx.send(());
                    release.notified().await;
                    "R1".into_response()
                })
                .await
        })
    };

    started_rx.await.expect("handler started");
    inflight.abort();
    assert!(inflight.await.is_err_and(|err| err.is_cancelled()));

    release.notify_one();
    cache.drain().await;
    assert_eq!(store.len(), 1);

    let calls = Arc::new(AtomicU32::new(0));
    assert_eq!(text(&cache, get("/cookbook/"), &calls).await, "R1");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn misses_computed_before_an_invalidation_are_not_stored() {
    let clock = Arc::new(ManualClock::default());
    let store = memory_store(&clock);
    let cache = ResponseCache::new(config("example"), store.clone());
    let release = Arc::new(Notify::new());
    let (started_tx, started_rx) = oneshot::channel();

    let inflight = {
        let cache = cache.clone();
        let release = release.clone();
        tokio::spawn(async move {
            let response = cache
                .serve(get("/cookbook/"), None, move |_| async move {
                    let _ = started_tx.send(());
                    release.notified().await;
                    "stale".into_response()
                })
                .await;
            body_text(response).await
        })
    };

    started_rx.await.expect("handler started");
    cache
        .invalidate(InvalidationTarget::Route("/cookbook/".to_string()))
        .await
        .expect("invalidated");
    release.notify_one();

    assert_eq!(inflight.await.expect("task"), "stale");
    cache.drain().await;
    assert!(store.is_empty());

    let calls = Arc::new(AtomicU32::new(0));
    assert_eq!(text(&cache, get("/cookbook/"), &calls).await, "R1");
}

#[tokio::test]
async fn store_outage_during_invalidation_is_reported() {
    let clock = Arc::new(ManualClock::default());
    let store = Arc::new(FlakyStore::new(clock));
    let cache = ResponseCache::new(config("example"), store.clone());

    store.set_down(true);
    let err = cache
        .invalidate(InvalidationTarget::Namespace)
        .await
        .expect_err("outage surfaces");
    assert!(matches!(
        err,
        pagecache::cache::CacheError::InvalidationFailure { .. }
    ));
}
