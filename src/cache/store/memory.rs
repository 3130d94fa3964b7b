//! In-process entry store.

use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use metrics::counter;

use super::{CacheEntry, EntryStore, StoreError, glob_match};
use crate::cache::clock::{Clock, SystemClock};
use crate::cache::keys::CacheKey;
use crate::cache::lock::{rw_read, rw_write};
use crate::cache::metrics::METRIC_STORE_EVICT;

const SOURCE: &str = "cache::store::memory";

/// Bounded LRU map with lazy expiry.
///
/// When full, the least recently used entry is dropped before its TTL runs
/// out; callers see that as an ordinary miss.
pub struct MemoryStore {
    entries: RwLock<LruCache<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self::with_clock(capacity, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: NonZeroUsize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            clock,
        }
    }

    /// Number of physically held entries, expired ones included.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EntryStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        let now = self.clock.now();
        let mut entries = rw_write(&self.entries, SOURCE, "get");

        match entries.get(key.as_str()) {
            Some(entry) if !entry.is_expired_at(now) => return Ok(Some(entry.clone())),
            Some(_) => {}
            None => return Ok(None),
        }
        // Lazy purge of an entry that outlived its TTL.
        entries.pop(key.as_str());
        Ok(None)
    }

    async fn set(
        &self,
        key: &CacheKey,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let entry = CacheEntry::new(value, self.clock.now(), ttl);
        let displaced = rw_write(&self.entries, SOURCE, "set").push(key.as_str().to_string(), entry);

        if let Some((displaced_key, _)) = displaced
            && displaced_key != key.as_str()
        {
            counter!(METRIC_STORE_EVICT).increment(1);
        }
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool, StoreError> {
        Ok(rw_write(&self.entries, SOURCE, "delete")
            .pop(key.as_str())
            .is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let mut entries = rw_write(&self.entries, SOURCE, "delete_prefix");
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            entries.pop(key);
        }
        Ok(doomed.len() as u64)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = self.clock.now();
        let entries = rw_read(&self.entries, SOURCE, "keys");
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired_at(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn flush_all(&self) -> Result<(), StoreError> {
        rw_write(&self.entries, SOURCE, "flush_all").clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::config::Namespace;
    use crate::cache::keys::object_key;

    fn key(name: &str) -> CacheKey {
        object_key(name, &Namespace::default()).expect("valid key")
    }

    fn store_with_clock(capacity: usize) -> (MemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let capacity = NonZeroUsize::new(capacity).expect("non-zero capacity");
        (MemoryStore::with_clock(capacity, clock.clone()), clock)
    }

    #[tokio::test]
    async fn set_then_get_returns_entry() {
        let (store, clock) = store_with_clock(8);
        let k = key("recipes");

        assert!(store.get(&k).await.expect("get").is_none());
        store
            .set(&k, Bytes::from("R1"), Some(Duration::from_secs(60)))
            .await
            .expect("set");

        let entry = store.get(&k).await.expect("get").expect("present");
        assert_eq!(entry.value, Bytes::from("R1"));
        assert_eq!(entry.created_at, clock.now());
        assert_eq!(entry.ttl, Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn expired_entries_are_absent_and_purged_on_read() {
        let (store, clock) = store_with_clock(8);
        let k = key("recipes");
        store
            .set(&k, Bytes::from("R1"), Some(Duration::from_secs(10)))
            .await
            .expect("set");

        clock.advance(Duration::from_secs(10));
        assert!(store.get(&k).await.expect("get").is_some());

        clock.advance(Duration::from_millis(1));
        assert!(store.get(&k).await.expect("get").is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn set_overwrites_unconditionally() {
        let (store, _clock) = store_with_clock(8);
        let k = key("recipes");
        store.set(&k, Bytes::from("R1"), None).await.expect("set");
        store.set(&k, Bytes::from("R2"), None).await.expect("set");

        let entry = store.get(&k).await.expect("get").expect("present");
        assert_eq!(entry.value, Bytes::from("R2"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn capacity_pressure_evicts_least_recent() {
        let (store, _clock) = store_with_clock(2);
        store.set(&key("a"), Bytes::from("a"), None).await.expect("set");
        store.set(&key("b"), Bytes::from("b"), None).await.expect("set");
        store.get(&key("a")).await.expect("get");
        store.set(&key("c"), Bytes::from("c"), None).await.expect("set");

        assert!(store.get(&key("a")).await.expect("get").is_some());
        assert!(store.get(&key("b")).await.expect("get").is_none());
        assert!(store.get(&key("c")).await.expect("get").is_some());
    }

    #[tokio::test]
    async fn delete_prefix_only_touches_matching_keys() {
        let (store, _clock) = store_with_clock(8);
        let example = Namespace::new(Some("example".to_string()), 1).expect("ns");
        let other = Namespace::new(Some("other".to_string()), 1).expect("ns");

        for ns in [&example, &other] {
            for name in ["/cookbook/", "recipes"] {
                let k = object_key(name, ns).expect("key");
                store.set(&k, Bytes::from("v"), None).await.expect("set");
            }
        }

        let removed = store
            .delete_prefix(&example.key_prefix())
            .await
            .expect("delete_prefix");
        assert_eq!(removed, 2);
        assert_eq!(
            store.keys("*").await.expect("keys"),
            vec!["other:1:/cookbook/".to_string(), "other:1:recipes".to_string()]
        );
    }

    #[tokio::test]
    async fn delete_and_flush() {
        let (store, _clock) = store_with_clock(8);
        let k = key("recipes");
        store.set(&k, Bytes::from("v"), None).await.expect("set");

        assert!(store.delete(&k).await.expect("delete"));
        assert!(!store.delete(&k).await.expect("delete"));

        store.set(&k, Bytes::from("v"), None).await.expect("set");
        store.flush_all().await.expect("flush");
        assert!(store.is_empty());
        store.ping().await.expect("ping");
    }

    #[tokio::test]
    async fn keys_skips_expired_entries() {
        let (store, clock) = store_with_clock(8);
        store
            .set(&key("short"), Bytes::new(), Some(Duration::from_secs(1)))
            .await
            .expect("set");
        store.set(&key("long"), Bytes::new(), None).await.expect("set");

        clock.advance(Duration::from_secs(2));
        assert_eq!(store.keys(":1:*").await.expect("keys"), vec![":1:long".to_string()]);
    }

    #[tokio::test]
    async fn store_recovers_from_poisoned_lock() {
        let (store, _clock) = store_with_clock(8);

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store
                .entries
                .write()
                .expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        store.set(&key("recipes"), Bytes::from("v"), None).await.expect("set");
        assert!(store.get(&key("recipes")).await.expect("get").is_some());
    }
}
