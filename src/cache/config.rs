//! Cache configuration.
//!
//! Built once at startup from the validated [`crate::config::Settings`] and
//! handed to [`super::ResponseCache::new`]; nothing here is read from global
//! state afterwards.

use std::num::NonZeroU32;
use std::time::Duration;

use axum::http::{HeaderName, Method, StatusCode};
use thiserror::Error;

pub(crate) const DEFAULT_NAMESPACE_VERSION: u32 = 1;
pub(crate) const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
pub(crate) const DEFAULT_WRITE_ATTEMPTS: u32 = 3;
pub(crate) const DEFAULT_WRITE_BACKOFF_MS: u64 = 50;
pub(crate) const DEFAULT_INVALIDATE_ATTEMPTS: u32 = 3;

/// Separator between the namespace prefix, the version and the route key.
pub const KEY_SEPARATOR: char = ':';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NamespaceError {
    #[error("prefix `{0}` must not contain `:`")]
    PrefixSeparator(String),
    #[error("version must be at least 1")]
    ZeroVersion,
}

/// Scopes every key of one deployment: `{prefix}:{version}:`.
///
/// Bumping the version orphans the whole previous key space; the old entries
/// simply age out of the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    prefix: Option<String>,
    version: u32,
}

impl Namespace {
    pub fn new(prefix: Option<String>, version: u32) -> Result<Self, NamespaceError> {
        if version == 0 {
            return Err(NamespaceError::ZeroVersion);
        }
        let prefix = prefix.filter(|value| !value.is_empty());
        if let Some(value) = prefix.as_ref()
            && value.contains(KEY_SEPARATOR)
        {
            return Err(NamespaceError::PrefixSeparator(value.clone()));
        }
        Ok(Self { prefix, version })
    }

    /// The configured prefix, or the empty string when none is set.
    pub fn prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or("")
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// The leading part shared by every key in this namespace.
    pub fn key_prefix(&self) -> String {
        format!(
            "{prefix}{KEY_SEPARATOR}{version}{KEY_SEPARATOR}",
            prefix = self.prefix(),
            version = self.version
        )
    }

    /// Scope an application-level key into this namespace.
    pub fn scope(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix())
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self {
            prefix: None,
            version: DEFAULT_NAMESPACE_VERSION,
        }
    }
}

/// Runtime configuration of the response and object caches.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// When false every request goes straight to its handler.
    pub enabled: bool,
    pub namespace: Namespace,
    /// TTL for routes without an override. `None` keeps entries until evicted.
    pub default_ttl: Option<Duration>,
    /// Include the sorted query parameters in the key.
    pub vary_on_query: bool,
    /// Request headers whose values are part of the key.
    pub vary_headers: Vec<HeaderName>,
    pub cacheable_methods: Vec<Method>,
    pub cacheable_statuses: Vec<StatusCode>,
    /// Responses with larger bodies are passed through uncached.
    pub max_body_bytes: usize,
    /// Attempts per store write before the write is dropped.
    pub write_attempts: NonZeroU32,
    /// Linear backoff unit between write attempts.
    pub write_backoff: Duration,
    /// Delete-and-verify rounds before an invalidation is reported failed.
    pub invalidate_attempts: NonZeroU32,
    /// Let one request per key compute a miss while the others wait.
    pub coalesce_misses: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: Namespace::default(),
            default_ttl: None,
            vary_on_query: true,
            vary_headers: Vec::new(),
            cacheable_methods: vec![Method::GET],
            cacheable_statuses: vec![StatusCode::OK],
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            write_attempts: NonZeroU32::new(DEFAULT_WRITE_ATTEMPTS).unwrap_or(NonZeroU32::MIN),
            write_backoff: Duration::from_millis(DEFAULT_WRITE_BACKOFF_MS),
            invalidate_attempts: NonZeroU32::new(DEFAULT_INVALIDATE_ATTEMPTS)
                .unwrap_or(NonZeroU32::MIN),
            coalesce_misses: false,
        }
    }
}

impl CacheConfig {
    /// Resolve the TTL for a route, falling back to the global default.
    pub fn ttl_for(&self, route_ttl: Option<Duration>) -> Option<Duration> {
        route_ttl.or(self.default_ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.namespace.prefix(), "");
        assert_eq!(config.namespace.version(), 1);
        assert_eq!(config.default_ttl, None);
        assert_eq!(config.cacheable_methods, vec![Method::GET]);
        assert_eq!(config.cacheable_statuses, vec![StatusCode::OK]);
        assert_eq!(config.write_attempts.get(), 3);
        assert!(!config.coalesce_misses);
    }

    #[test]
    fn namespace_key_prefix_includes_version() {
        let ns = Namespace::new(Some("example".to_string()), 1).expect("valid namespace");
        assert_eq!(ns.key_prefix(), "example:1:");
        assert_eq!(ns.scope("recipes"), "example:1:recipes");
    }

    #[test]
    fn unset_prefix_keeps_leading_separator() {
        assert_eq!(Namespace::default().scope("recipes"), ":1:recipes");
        let blank = Namespace::new(Some(String::new()), 2).expect("valid namespace");
        assert_eq!(blank.key_prefix(), ":2:");
    }

    #[test]
    fn namespace_rejects_separator_and_zero_version() {
        assert_eq!(
            Namespace::new(Some("a:b".to_string()), 1),
            Err(NamespaceError::PrefixSeparator("a:b".to_string()))
        );
        assert_eq!(Namespace::new(None, 0), Err(NamespaceError::ZeroVersion));
    }

    #[test]
    fn route_ttl_overrides_default() {
        let config = CacheConfig {
            default_ttl: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        assert_eq!(
            config.ttl_for(Some(Duration::from_secs(900))),
            Some(Duration::from_secs(900))
        );
        assert_eq!(config.ttl_for(None), Some(Duration::from_secs(60)));
    }
}
