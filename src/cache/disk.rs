//! Persistent cache backend on a sled database, through the `cached` disk store.

use async_trait::async_trait;
use bytes::Bytes;
use cached::stores::{DiskCache as DiskStore, DiskCacheBuilder};
use cached::IOCached;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::cache::CacheBackend;
use crate::error::ChartistError;

/// A stored value and the time it expires.
///
/// The disk store only supports a single lifespan for all of its entries, so each entry carries
/// its own expiry.
#[derive(Debug, Deserialize, Serialize)]
struct Envelope {
    /// Seconds after the unix epoch
    expires: u64,
    value: Bytes,
}

impl Envelope {
    fn is_live(&self, now: u64) -> bool {
        now < self.expires
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

fn cache_error<E: std::fmt::Debug>(err: E) -> ChartistError {
    ChartistError::Cache {
        error: format!("{:?}", err),
    }
}

/// Cache persisted on local disk, surviving restarts.
pub struct DiskCache {
    store: Arc<DiskStore<String, Envelope>>,
}

impl DiskCache {
    /// Open or create a disk cache.
    ///
    /// # Arguments
    ///
    /// * `directory`: Directory holding the cache database
    /// * `lifespan`: Upper bound on the time to live of any entry
    pub fn new(directory: &Path, lifespan: Duration) -> Result<Self, ChartistError> {
        let store = DiskCacheBuilder::new("chartist")
            .set_disk_directory(directory)
            .set_lifespan(lifespan.as_secs())
            .build()
            .map_err(cache_error)?;
        Ok(Self {
            store: Arc::new(store),
        })
    }

    /// Run a store operation on the blocking thread pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, ChartistError>
    where
        F: FnOnce(&DiskStore<String, Envelope>) -> Result<T, ChartistError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(cache_error)?
    }
}

#[async_trait]
impl CacheBackend for DiskCache {
    async fn put(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), ChartistError> {
        let key = key.to_string();
        let envelope = Envelope {
            expires: unix_now().saturating_add(ttl.as_secs()),
            value,
        };
        self.blocking(move |store| {
            store.cache_set(key, envelope).map_err(cache_error)?;
            Ok(())
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, ChartistError> {
        let key = key.to_string();
        self.blocking(move |store| {
            match store.cache_get(&key).map_err(cache_error)? {
                Some(envelope) if envelope.is_live(unix_now()) => Ok(Some(envelope.value)),
                Some(_) => {
                    store.cache_remove(&key).map_err(cache_error)?;
                    Ok(None)
                }
                None => Ok(None),
            }
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), ChartistError> {
        let key = key.to_string();
        self.blocking(move |store| {
            store.cache_remove(&key).map_err(cache_error)?;
            Ok(())
        })
        .await
    }

    async fn purge_expired(&self) -> Result<usize, ChartistError> {
        self.blocking(|store| {
            let db = store.connection();
            let before = db.len();
            // Entries past the store lifespan.
            store.remove_expired_entries().map_err(cache_error)?;
            // Entries past their own expiry.
            let now = unix_now();
            let keys: Vec<String> = db
                .iter()
                .keys()
                .filter_map(|key| key.ok())
                .filter_map(|key| std::str::from_utf8(key.as_ref()).ok().map(String::from))
                .collect();
            for key in keys {
                if let Some(envelope) = store.cache_get(&key).map_err(cache_error)? {
                    if !envelope.is_live(now) {
                        store.cache_remove(&key).map_err(cache_error)?;
                    }
                }
            }
            Ok(before.saturating_sub(db.len()))
        })
        .await
    }
}
