//! An in-memory reference `KvStore`/`ConnectionStore`, for local development
//! and tests. Uses the same `DashMap<String, ...>` per-key idiom as the
//! rate-limit and circuit-breaker state maps.

use super::{ConnectionRecord, ConnectionStore, KvStore};
use crate::clock::{Clock, SharedClock};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Entry {
    value: Vec<u8>,
    expires_at: chrono::DateTime<chrono::Utc>,
}

/// Dashmap-backed store. Expired entries are treated as absent on read and
/// lazily removed; there is no background sweeper.
pub struct MemoryKvStore {
    entries: DashMap<String, Entry>,
    clock: SharedClock,
}

impl MemoryKvStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Ok(Some(entry.value.clone()));
            }
        }
        self.entries.remove(key);
        Ok(None)
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let expires_at = self.clock.now() + chrono::Duration::from_std(ttl).unwrap_or_default();
        self.entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn conditional_put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<bool> {
        let now = self.clock.now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or_default();

        let mut created = false;
        self.entries
            .entry(key.to_string())
            .and_modify(|existing| {
                if existing.expires_at <= now {
                    *existing = Entry {
                        value: value.clone(),
                        expires_at,
                    };
                    created = true;
                }
            })
            .or_insert_with(|| {
                created = true;
                Entry { value, expires_at }
            });

        Ok(created)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64> {
        let now = self.clock.now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or_default();

        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: 0i64.to_string().into_bytes(),
            expires_at,
        });

        let current = if entry.expires_at > now {
            std::str::from_utf8(&entry.value)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(0)
        } else {
            0
        };
        let updated = current + delta;
        entry.value = updated.to_string().into_bytes();
        entry.expires_at = expires_at;
        Ok(updated)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool> {
        let now = self.clock.now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or_default();

        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occ) => {
                let current = if occ.get().expires_at > now {
                    Some(occ.get().value.clone())
                } else {
                    None
                };
                if current == expected {
                    occ.insert(Entry { value: new_value, expires_at });
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            MapEntry::Vacant(vac) => {
                if expected.is_none() {
                    vac.insert(Entry { value: new_value, expires_at });
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }
}

/// In-memory `ConnectionStore` with an O(1) active counter maintained
/// alongside the record map.
pub struct MemoryConnectionStore {
    connections: DashMap<String, ConnectionRecord>,
    active_count: AtomicU64,
}

impl Default for MemoryConnectionStore {
    fn default() -> Self {
        Self {
            connections: DashMap::new(),
            active_count: AtomicU64::new(0),
        }
    }
}

impl MemoryConnectionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl ConnectionStore for MemoryConnectionStore {
    async fn save(&self, record: ConnectionRecord) -> Result<()> {
        if self.connections.insert(record.connection_id.clone(), record).is_none() {
            self.active_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn get(&self, connection_id: &str) -> Result<Option<ConnectionRecord>> {
        Ok(self.connections.get(connection_id).map(|r| r.clone()))
    }

    async fn delete(&self, connection_id: &str) -> Result<()> {
        if self.connections.remove(connection_id).is_some() {
            self.active_count.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn list_by_tenant(&self, tenant_id: &str) -> Result<Vec<ConnectionRecord>> {
        Ok(self
            .connections
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .map(|e| e.clone())
            .collect())
    }

    async fn count_active(&self) -> Result<u64> {
        Ok(self.active_count.load(Ordering::SeqCst))
    }
}
