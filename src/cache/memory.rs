//! In-process cache backend.

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::cache::CacheBackend;
use crate::error::ChartistError;

struct Entry {
    value: Bytes,
    expires: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires
    }
}

/// Cache held in process memory. Entries are lost on restart.
///
/// Expiry is checked on read, expired entries are only dropped by
/// [purge_expired](CacheBackend::purge_expired) or when overwritten.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn put(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), ChartistError> {
        let entry = Entry {
            value,
            expires: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, ChartistError> {
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .await
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<(), ChartistError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, ChartistError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        Ok(before - entries.len())
    }
}
