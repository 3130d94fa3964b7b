//! Entry stores.
//!
//! [`EntryStore`] is the narrow interface the caches talk to. Expiry is
//! logical: an entry whose TTL has elapsed is reported absent on read even if
//! the backend still holds it.

mod memory;
#[cfg(feature = "redis-store")]
mod redis;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use time::OffsetDateTime;

use super::keys::CacheKey;

pub use memory::MemoryStore;
#[cfg(feature = "redis-store")]
pub use redis::RedisStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached or did not answer in time.
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
    /// The backend answered but refused the operation.
    #[error("cache store rejected the operation: {0}")]
    Backend(String),
    #[error("entry under `{key}` is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// A stored value with its validity window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub value: Bytes,
    pub created_at: OffsetDateTime,
    /// `None` never expires.
    pub ttl: Option<Duration>,
}

impl CacheEntry {
    pub fn new(value: Bytes, created_at: OffsetDateTime, ttl: Option<Duration>) -> Self {
        Self {
            value,
            created_at,
            ttl,
        }
    }

    /// `None` when the entry has no TTL or the deadline is past the calendar.
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        let ttl = time::Duration::try_from(self.ttl?).ok()?;
        self.created_at.checked_add(ttl)
    }

    /// An entry is gone once `now > created_at + ttl`.
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at().is_some_and(|deadline| now > deadline)
    }
}

/// Key-value backend with TTL semantics.
///
/// `set` and `delete` are idempotent and may race freely; the last writer
/// wins.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Fetch a live entry. Expired and unknown keys are both `Ok(None)`.
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError>;

    /// Store `value`, replacing any previous entry.
    async fn set(
        &self,
        key: &CacheKey,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// Remove one key. Returns whether something was removed.
    async fn delete(&self, key: &CacheKey) -> Result<bool, StoreError>;

    /// Remove every key starting with `prefix`. Returns the number removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError>;

    /// List keys matching a glob pattern (`*` and `?`). Diagnostics only.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Drop everything, including other namespaces. Operations and tests only.
    async fn flush_all(&self) -> Result<(), StoreError>;
}

/// Match `text` against a glob supporting `*` (any run) and `?` (one char).
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut star: Option<usize> = None;
    let mut resume = 0;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            resume = t;
            p += 1;
        } else if let Some(star_at) = star {
            p = star_at + 1;
            resume += 1;
            t = resume;
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}
