//! Entry store bootstrap.

use std::sync::Arc;

use tracing::info;

use crate::cache::{EntryStore, MemoryStore};
use crate::config::StoreSettings;

use super::error::InfraError;

/// Build the configured store. A redis store must answer `PING` before the
/// process starts serving.
pub async fn connect_store(settings: &StoreSettings) -> Result<Arc<dyn EntryStore>, InfraError> {
    match settings {
        StoreSettings::Memory { capacity } => {
            info!(target = "pagecache::store", backend = "memory", capacity = capacity.get(), "cache store ready");
            Ok(Arc::new(MemoryStore::new(*capacity)))
        }
        StoreSettings::Redis { url, timeout } => connect_redis(url, *timeout).await,
    }
}

#[cfg(feature = "redis-store")]
async fn connect_redis(
    url: &str,
    timeout: std::time::Duration,
) -> Result<Arc<dyn EntryStore>, InfraError> {
    use crate::cache::RedisStore;

    let store = RedisStore::connect(url, timeout)
        .await
        .map_err(|err| InfraError::store(err.to_string()))?;
    store
        .ping()
        .await
        .map_err(|err| InfraError::store(err.to_string()))?;
    info!(target = "pagecache::store", backend = "redis", "cache store ready");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis-store"))]
async fn connect_redis(
    _url: &str,
    _timeout: std::time::Duration,
) -> Result<Arc<dyn EntryStore>, InfraError> {
    Err(InfraError::configuration(
        "store.backend = \"redis\" requires building with the `redis-store` feature",
    ))
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;

    #[tokio::test]
    async fn memory_store_is_always_available() {
        let settings = StoreSettings::Memory {
            capacity: NonZeroUsize::new(4).expect("capacity"),
        };
        let store = connect_store(&settings).await.expect("store");
        store.ping().await.expect("ping");
    }

    #[cfg(not(feature = "redis-store"))]
    #[tokio::test]
    async fn redis_without_the_feature_is_a_configuration_error() {
        let settings = StoreSettings::Redis {
            url: "redis://127.0.0.1:6379".to_string(),
            timeout: std::time::Duration::from_millis(100),
        };
        assert!(matches!(
            connect_store(&settings).await,
            Err(InfraError::Configuration { .. })
        ));
    }
}
