//! Redis-backed `KvStore`, built on `deadpool-redis` pooling: `GET`/`SET ...
//! EX`/`SET ... NX EX` for opaque values, `INCRBY`+`EXPIRE` for counters, and
//! a small Lua script (via `redis::Script`) for atomic compare-and-swap,
//! since Redis has no single command for "set only if the current value
//! matches".

use super::KvStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use deadpool_redis::Pool;
use std::ops::DerefMut;
use std::time::Duration;

pub struct RedisKvStore {
    pool: Pool,
}

impl RedisKvStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.pool.get().await.map_err(|e| Error::Store(e.to_string()))?;
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(conn.deref_mut())
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(|e| Error::Store(e.to_string()))?;
        let seconds = ttl.as_secs().max(1);
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(seconds)
            .query_async(conn.deref_mut())
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    async fn conditional_put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<bool> {
        let mut conn = self.pool.get().await.map_err(|e| Error::Store(e.to_string()))?;
        let seconds = ttl.as_secs().max(1);
        // SET key value NX EX seconds returns OK on success, nil if already set.
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(seconds)
            .query_async(conn.deref_mut())
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(result.is_some())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(|e| Error::Store(e.to_string()))?;
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(conn.deref_mut())
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    async fn incr(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64> {
        let mut conn = self.pool.get().await.map_err(|e| Error::Store(e.to_string()))?;
        let seconds = ttl.as_secs().max(1);
        let value: i64 = redis::cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .query_async(conn.deref_mut())
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        let _: () = redis::cmd("EXPIRE")
            .arg(key)
            .arg(seconds)
            .query_async(conn.deref_mut())
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(value)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool> {
        let mut conn = self.pool.get().await.map_err(|e| Error::Store(e.to_string()))?;
        let seconds = ttl.as_secs().max(1);
        let expect_absent = expected.is_none();
        let expected_bytes = expected.unwrap_or_default();

        let swapped: i32 = CAS_SCRIPT
            .key(key)
            .arg(if expect_absent { 1 } else { 0 })
            .arg(expected_bytes)
            .arg(new_value)
            .arg(seconds)
            .invoke_async(conn.deref_mut())
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(swapped == 1)
    }
}

/// `KEYS[1]` is the target key; `ARGV` is `[expect_absent, expected, new_value,
/// ttl_seconds]`. GET returns Lua `false` for a missing key, which is why
/// absence is signaled by a separate flag rather than an empty `expected`.
static CAS_SCRIPT: std::sync::LazyLock<redis::Script> = std::sync::LazyLock::new(|| {
    redis::Script::new(
        r#"
        local current = redis.call('GET', KEYS[1])
        local expect_absent = ARGV[1] == '1'
        local matches
        if expect_absent then
            matches = (current == false)
        else
            matches = (current == ARGV[2])
        end
        if matches then
            redis.call('SET', KEYS[1], ARGV[3], 'EX', ARGV[4])
            return 1
        end
        return 0
        "#,
    )
});
