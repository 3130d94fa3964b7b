#![allow(dead_code)]

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, Response},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use pagecache::cache::{
    CacheConfig, CacheEntry, CacheKey, EntryStore, ManualClock, MemoryStore, Namespace, StoreError,
};

/// Memory store that can be switched off to simulate an unreachable backend.
pub struct FlakyStore {
    inner: MemoryStore,
    down: AtomicBool,
    sets: AtomicUsize,
}

impl FlakyStore {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            inner: MemoryStore::with_clock(capacity(64), clock),
            down: AtomicBool::new(false),
            sets: AtomicUsize::new(0),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Successful writes so far.
    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::unavailable("connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EntryStore for FlakyStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(
        &self,
        key: &CacheKey,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set(key, value, ttl).await?;
        self.sets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.delete_prefix(prefix).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.check()?;
        self.inner.keys(pattern).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }

    async fn flush_all(&self) -> Result<(), StoreError> {
        self.check()?;
        self.inner.flush_all().await
    }
}

pub fn capacity(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).expect("non-zero capacity")
}

pub fn memory_store(clock: &Arc<ManualClock>) -> Arc<MemoryStore> {
    Arc::new(MemoryStore::with_clock(capacity(64), clock.clone()))
}

pub fn namespace(prefix: &str) -> Namespace {
    Namespace::new(Some(prefix.to_string()), 1).expect("valid namespace")
}

pub fn config(prefix: &str) -> CacheConfig {
    CacheConfig {
        namespace: namespace(prefix),
        write_backoff: Duration::from_millis(1),
        ..CacheConfig::default()
    }
}

pub fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build")
}

pub fn get(uri: &str) -> Request<Body> {
    request(Method::GET, uri)
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should collect")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("body should be utf-8")
}
