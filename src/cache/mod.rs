//! Page-level response caching over a TTL key-value store.
//!
//! - [`ResponseCache`] wraps a request handler: build the key, look it up,
//!   serve a hit, or run the handler and store what it returned.
//! - [`ObjectCache`] caches named application values (query results) in the
//!   same store and namespace.
//! - [`EntryStore`] is the narrow get/set/delete interface to the backend.
//!   [`MemoryStore`] is always available; `RedisStore` needs the
//!   `redis-store` feature.
//!
//! Keys live in a [`Namespace`] of `prefix` and schema `version`. Bumping the
//! version retires every earlier key without deleting anything.
//!
//! ```toml
//! [cache]
//! prefix = "example"
//! version = 1
//! default_ttl_seconds = 900
//! vary_headers = ["accept-language"]
//! ```

mod clock;
mod config;
mod error;
mod invalidation;
mod keys;
mod lock;
pub mod metrics;
mod middleware;
mod object;
mod policy;
mod response;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, KEY_SEPARATOR, Namespace, NamespaceError};
pub use error::CacheError;
pub use invalidation::InvalidationTarget;
pub use keys::{
    CacheKey, KeyError, MAX_KEY_LEN, RouteIdentity, VariationInputs, build_key, key_for_request,
    object_key,
};
pub use middleware::{ResponseCache, RouteCache, response_cache_layer};
pub use object::ObjectCache;
pub use policy::{CachePolicy, DefaultCachePolicy};
pub use response::{BufferError, Buffered, CachedResponse, buffer_response};
#[cfg(feature = "redis-store")]
pub use store::RedisStore;
pub use store::{CacheEntry, EntryStore, MemoryStore, StoreError};
