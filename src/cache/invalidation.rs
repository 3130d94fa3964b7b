//! Explicit cache busting.
//!
//! Invalidation is delete-then-confirm: after the first deletion pass, further
//! passes run until one removes nothing. A pass that still finds something
//! means a concurrent writer repopulated the key, so the pass counts as a
//! retry. Running out of attempts is reported, never swallowed.

use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::http::Method;
use metrics::counter;
use thiserror::Error;
use tracing::{info, warn};

use super::config::CacheConfig;
use super::error::CacheError;
use super::keys::{CacheKey, KeyError, RouteIdentity, VariationInputs, build_key};
use super::metrics::METRIC_INVALIDATION;
use super::store::{EntryStore, StoreError};

/// What to remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationTarget {
    /// One exact key.
    Key(CacheKey),
    /// Every cached variation of `{path}` under each cacheable method.
    Route(String),
    /// Every key of the configured namespace.
    Namespace,
}

impl fmt::Display for InvalidationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, "key `{key}`"),
            Self::Route(path) => write!(f, "route `{path}`"),
            Self::Namespace => f.write_str("namespace"),
        }
    }
}

/// Invalidation counter shared by every cache writing to one store.
///
/// Advanced before each invalidation deletes anything. A value computed
/// while the generation moved must not be stored.
#[derive(Debug, Clone, Default)]
pub(crate) struct Generation(Arc<AtomicU64>);

impl Generation {
    pub(crate) fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn advance(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn moved_since(&self, seen: u64) -> bool {
        self.current() != seen
    }
}

/// Delete an entry whose write raced an invalidation.
///
/// Unavailable stores are retried with the same linear backoff as writes.
pub(crate) async fn retract(
    store: &dyn EntryStore,
    key: &CacheKey,
    attempts: NonZeroU32,
    backoff: Duration,
) -> Result<(), StoreError> {
    let attempts = attempts.get();
    let mut attempt = 1;
    loop {
        match store.delete(key).await {
            Ok(_) => return Ok(()),
            Err(err) if err.is_unavailable() && attempt < attempts => {
                tokio::time::sleep(backoff * attempt).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Remove `target` and confirm it stays removed. Returns the number of
/// entries deleted across all passes.
pub(crate) async fn invalidate(
    store: &dyn EntryStore,
    config: &CacheConfig,
    target: &InvalidationTarget,
) -> Result<u64, CacheError> {
    let result = run(store, config, target).await;

    match &result {
        Ok(removed) => {
            counter!(METRIC_INVALIDATION, "outcome" => "confirmed").increment(1);
            info!(cache = "invalidation", target = %target, removed, "cache invalidated");
        }
        Err(error) => {
            counter!(METRIC_INVALIDATION, "outcome" => "failed").increment(1);
            warn!(cache = "invalidation", target = %target, error = %error, "invalidation failed");
        }
    }

    result
}

async fn run(
    store: &dyn EntryStore,
    config: &CacheConfig,
    target: &InvalidationTarget,
) -> Result<u64, CacheError> {
    let attempts = config.invalidate_attempts.get();
    let failure = |err: RemovalError| CacheError::invalidation(target.to_string(), err.to_string());

    let mut total = remove(store, config, target).await.map_err(failure)?;

    for _ in 0..attempts {
        let straggling = remove(store, config, target).await.map_err(failure)?;
        if straggling == 0 {
            return Ok(total);
        }
        total += straggling;
    }

    Err(CacheError::invalidation(
        target.to_string(),
        format!("entries kept reappearing after {attempts} attempts"),
    ))
}

async fn remove(
    store: &dyn EntryStore,
    config: &CacheConfig,
    target: &InvalidationTarget,
) -> Result<u64, RemovalError> {
    match target {
        InvalidationTarget::Key(key) => Ok(u64::from(store.delete(key).await?)),
        InvalidationTarget::Route(path) => {
            let mut removed = 0;
            for method in &config.cacheable_methods {
                removed += remove_route(store, config, method, path).await?;
            }
            Ok(removed)
        }
        InvalidationTarget::Namespace => {
            Ok(store.delete_prefix(&config.namespace.key_prefix()).await?)
        }
    }
}

async fn remove_route(
    store: &dyn EntryStore,
    config: &CacheConfig,
    method: &Method,
    path: &str,
) -> Result<u64, RemovalError> {
    let route = RouteIdentity::new(method.clone(), path);
    let key = build_key(&route, &VariationInputs::new(), &config.namespace)?;
    let exact = u64::from(store.delete(&key).await?);
    let varied = store.delete_prefix(&key.variations_prefix()).await?;
    Ok(exact + varied)
}

#[derive(Debug, Error)]
enum RemovalError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Key(#[from] KeyError),
}
