//! Redis-backed entry store.
//!
//! Expiry is delegated to the server (`SET .. PX`) and re-checked against the
//! envelope on read. Every round trip is bounded by the configured timeout;
//! an elapsed timeout or a broken connection is [`StoreError::Unavailable`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use redis::{Client, RedisError, RedisResult, aio::ConnectionManager};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{CacheEntry, EntryStore, StoreError};
use crate::cache::clock::{Clock, SystemClock};
use crate::cache::keys::CacheKey;

const SCAN_BATCH: usize = 200;

pub struct RedisStore {
    manager: ConnectionManager,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    value: String,
    created_at: OffsetDateTime,
    ttl_ms: Option<u64>,
}

impl RedisStore {
    /// Connect to `url` (`redis://host:port/db`).
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|err| StoreError::Backend(err.to_string()))?;
        let manager = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::unavailable(format!("timed out connecting to {url}")))?
            .map_err(map_redis_error)?;

        Ok(Self {
            manager,
            clock: Arc::new(SystemClock),
            timeout,
        })
    }

    async fn run<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(map_redis_error),
            Err(_) => Err(StoreError::unavailable(format!(
                "{op} timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let mut conn = self.manager.clone();
            let (next, batch): (u64, Vec<String>) = self
                .run("scan", async move {
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await
                })
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

fn map_redis_error(err: RedisError) -> StoreError {
    if err.is_io_error()
        || err.is_timeout()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
    {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Backend(err.to_string())
    }
}

/// Escape glob metacharacters so a literal prefix can be used in `MATCH`.
fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn encode(entry: &CacheEntry) -> Result<Vec<u8>, StoreError> {
    let envelope = Envelope {
        value: STANDARD.encode(&entry.value),
        created_at: entry.created_at,
        ttl_ms: entry.ttl.map(|ttl| ttl.as_millis().min(u128::from(u64::MAX)) as u64),
    };
    serde_json::to_vec(&envelope).map_err(|err| StoreError::Backend(err.to_string()))
}

fn decode(key: &CacheKey, raw: &[u8]) -> Result<CacheEntry, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        key: key.to_string(),
        reason,
    };
    let envelope: Envelope = serde_json::from_slice(raw).map_err(|err| corrupt(err.to_string()))?;
    let value = STANDARD
        .decode(envelope.value)
        .map_err(|err| corrupt(err.to_string()))?;
    Ok(CacheEntry::new(
        Bytes::from(value),
        envelope.created_at,
        envelope.ttl_ms.map(Duration::from_millis),
    ))
}

#[async_trait]
impl EntryStore for RedisStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        let mut conn = self.manager.clone();
        let raw: Option<Vec<u8>> = self
            .run("get", async move {
                redis::cmd("GET").arg(key.as_str()).query_async(&mut conn).await
            })
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        let entry = decode(key, &raw)?;
        if entry.is_expired_at(self.clock.now()) {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn set(
        &self,
        key: &CacheKey,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let entry = CacheEntry::new(value, self.clock.now(), ttl);
        let payload = encode(&entry)?;
        let mut conn = self.manager.clone();
        self.run("set", async move {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key.as_str()).arg(payload);
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg((ttl.as_millis() as u64).max(1));
            }
            cmd.query_async(&mut conn).await
        })
        .await
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let removed: i64 = self
            .run("del", async move {
                redis::cmd("DEL").arg(key.as_str()).query_async(&mut conn).await
            })
            .await?;
        Ok(removed > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let keys = self.scan(&format!("{}*", escape_glob(prefix))).await?;
        let mut removed: u64 = 0;
        for chunk in keys.chunks(SCAN_BATCH) {
            let mut conn = self.manager.clone();
            let count: i64 = self
                .run("del", async move {
                    redis::cmd("DEL").arg(chunk).query_async(&mut conn).await
                })
                .await?;
            removed += count.max(0) as u64;
        }
        Ok(removed)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.scan(pattern).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let reply: String = self
            .run("ping", async move {
                redis::cmd("PING").query_async(&mut conn).await
            })
            .await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Backend(format!("unexpected PING reply `{reply}`")))
        }
    }

    async fn flush_all(&self) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        self.run("flushall", async move {
            redis::cmd("FLUSHALL").query_async(&mut conn).await
        })
        .await
    }
}
