//! Named application objects cached as JSON.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use super::config::CacheConfig;
use super::error::CacheError;
use super::invalidation::{self, Generation, InvalidationTarget};
use super::keys::{CacheKey, object_key};
use super::metrics::{METRIC_OBJECT_HIT, METRIC_OBJECT_MISS, METRIC_STORE_UNAVAILABLE};
use super::store::EntryStore;

/// Low-level cache for query results and other serializable values.
///
/// Shares the store and namespace of the response cache, so a namespace
/// version bump retires both.
#[derive(Clone)]
pub struct ObjectCache {
    config: CacheConfig,
    store: Arc<dyn EntryStore>,
    generation: Generation,
}

impl ObjectCache {
    /// A standalone object cache. Prefer [`super::ResponseCache::objects`]
    /// when pages and objects share a store.
    pub fn new(config: &CacheConfig, store: Arc<dyn EntryStore>) -> Self {
        Self::sharing(config, store, Generation::default())
    }

    pub(crate) fn sharing(
        config: &CacheConfig,
        store: Arc<dyn EntryStore>,
        generation: Generation,
    ) -> Self {
        Self {
            config: config.clone(),
            store,
            generation,
        }
    }

    pub fn key(&self, name: &str) -> Result<CacheKey, CacheError> {
        Ok(object_key(name, &self.config.namespace)?)
    }

    /// Fetch `name`. Store failures and undecodable payloads read as `None`.
    pub async fn get<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        if !self.config.enabled {
            return None;
        }
        let key = match self.key(name) {
            Ok(key) => key,
            Err(err) => {
                warn!(cache = "object", name, error = %err, "object key derivation failed");
                return None;
            }
        };

        let entry = match self.store.get(&key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                counter!(METRIC_OBJECT_MISS).increment(1);
                return None;
            }
            Err(err) => {
                if err.is_unavailable() {
                    counter!(METRIC_STORE_UNAVAILABLE).increment(1);
                }
                counter!(METRIC_OBJECT_MISS).increment(1);
                warn!(cache = "object", key = %key, error = %err, "object lookup failed");
                return None;
            }
        };

        match serde_json::from_slice(&entry.value) {
            Ok(value) => {
                counter!(METRIC_OBJECT_HIT).increment(1);
                debug!(cache = "object", outcome = "hit", key = %key);
                Some(value)
            }
            Err(err) => {
                counter!(METRIC_OBJECT_MISS).increment(1);
                warn!(cache = "object", key = %key, error = %err, "discarding undecodable object");
                None
            }
        }
    }

    /// Store `value` under `name`. `ttl = None` uses the configured default.
    pub async fn set<T: Serialize>(
        &self,
        name: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        if !self.config.enabled {
            return Ok(());
        }
        let key = self.key(name)?;
        let payload =
            serde_json::to_vec(value).map_err(|err| CacheError::serialization(err.to_string()))?;
        self.store
            .set(&key, Bytes::from(payload), self.config.ttl_for(ttl))
            .await?;
        debug!(cache = "object", key = %key, "object stored");
        Ok(())
    }

    /// Return the cached value, or compute, store and return it.
    ///
    /// Errors from `compute` propagate; cache errors are logged and ignored.
    /// A value computed while an invalidation ran is returned but not kept.
    pub async fn get_or_insert_with<T, E, F, Fut>(
        &self,
        name: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let generation = self.generation.current();
        if let Some(value) = self.get(name).await {
            return Ok(value);
        }

        let value = compute().await?;
        if let Err(err) = self.store_computed(name, &value, ttl, generation).await {
            warn!(cache = "object", name, error = %err, "failed to store computed object");
        }
        Ok(value)
    }

    async fn store_computed<T: Serialize>(
        &self,
        name: &str,
        value: &T,
        ttl: Option<Duration>,
        generation: u64,
    ) -> Result<(), CacheError> {
        if self.generation.moved_since(generation) {
            debug!(cache = "object", name, "invalidated while computing, not storing");
            return Ok(());
        }
        self.set(name, value, ttl).await?;

        if self.generation.moved_since(generation) {
            let key = self.key(name)?;
            invalidation::retract(
                self.store.as_ref(),
                &key,
                self.config.write_attempts,
                self.config.write_backoff,
            )
            .await?;
            debug!(cache = "object", key = %key, "retracted object computed before an invalidation");
        }
        Ok(())
    }

    /// Delete `name` and confirm it is gone.
    pub async fn invalidate(&self, name: &str) -> Result<u64, CacheError> {
        let key = self.key(name)?;
        self.generation.advance();
        invalidation::invalidate(
            self.store.as_ref(),
            &self.config,
            &InvalidationTarget::Key(key),
        )
        .await
    }
}
