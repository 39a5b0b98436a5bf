//! Narrow capability traits for durable state. Concrete backends (DynamoDB,
//! Redis, an in-memory map for tests) are injected; the core only calls
//! through these traits.

mod memory;
#[cfg(feature = "cache")]
mod redis;

pub use memory::{MemoryConnectionStore, MemoryKvStore};
#[cfg(feature = "cache")]
pub use redis::RedisKvStore;

use crate::error::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

/// The key-value store backing rate-limit and idempotency records.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;
    /// Writes only if absent. Returns `true` if this call created the
    /// record, `false` if a record already existed (the caller lost the
    /// race and should treat the existing record as authoritative).
    async fn conditional_put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<bool>;
    async fn delete(&self, key: &str) -> Result<()>;

    /// Atomically adds `delta` to the integer stored at `key` (treating an
    /// absent key as zero), resets its TTL to `ttl`, and returns the new
    /// value. Concurrent callers never observe or clobber each other's
    /// increment — this is what rate limiting's counters are built on.
    async fn incr(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64>;

    /// Atomically replaces the value at `key` with `new_value` if and only
    /// if the current value equals `expected` (`None` meaning "the key must
    /// be absent"). Returns whether the swap happened; a `false` means the
    /// caller lost the race and should re-read and retry.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool>;
}

/// Convenience helpers layered on [`KvStore`] for JSON-serializable records.
#[async_trait]
pub trait JsonKvStore: KvStore {
    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).map_err(|e| crate::error::Error::Store(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn put_json<T: Serialize + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| crate::error::Error::Store(e.to_string()))?;
        self.put(key, bytes, ttl).await
    }

    async fn conditional_put_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<bool> {
        let bytes = serde_json::to_vec(value).map_err(|e| crate::error::Error::Store(e.to_string()))?;
        self.conditional_put(key, bytes, ttl).await
    }
}

impl<T: KvStore + ?Sized> JsonKvStore for T {}

/// A WebSocket connection record.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConnectionRecord {
    pub connection_id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_active_at: chrono::DateTime<chrono::Utc>,
    pub attributes: std::collections::HashMap<String, serde_json::Value>,
}

/// Capability consumed by the WebSocket subsystem. `count_active` must be
/// O(1) against the store — no full scan.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn save(&self, record: ConnectionRecord) -> Result<()>;
    async fn get(&self, connection_id: &str) -> Result<Option<ConnectionRecord>>;
    async fn delete(&self, connection_id: &str) -> Result<()>;
    async fn list_by_tenant(&self, tenant_id: &str) -> Result<Vec<ConnectionRecord>>;
    async fn count_active(&self) -> Result<u64>;
}
