//! Section cache
//!
//! Each section owns four independently expiring entries:
//!
//! * `section:{id}`: the raw [GroupedDataset]
//! * `section:{id}:formatted`: the formatted chart data
//! * `section:{id}:is_running`: set while a load job materialises the section
//! * `section:{id}:last_run_duration`: seconds taken by the last completed load
//!
//! Values are stored as JSON through a [CacheBackend].

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use strum_macros::Display;
use tracing::{event, Level};

use crate::error::ChartistError;
use crate::metrics::record_cache_lookup;
use crate::types::{ChartEntry, GroupedDataset};

pub mod disk;
pub mod memory;

pub use disk::DiskCache;
pub use memory::MemoryCache;

/// A key-value store with per-entry time to live.
///
/// Concurrent writes to the same key are not coordinated: the last write wins.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Store `value` under `key` for `ttl`, replacing any previous value.
    async fn put(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), ChartistError>;

    /// Return the value under `key`, unless it is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, ChartistError>;

    /// Remove the value under `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), ChartistError>;

    /// Drop expired entries, returning how many were dropped.
    async fn purge_expired(&self) -> Result<usize, ChartistError>;
}

/// Kind of a section cache entry
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[strum(serialize_all = "snake_case")]
pub enum EntryKind {
    Raw,
    Formatted,
    Running,
    LastDuration,
}

impl EntryKind {
    /// Cache key of this entry for a section
    pub fn key(self, section_id: u64) -> String {
        match self {
            EntryKind::Raw => format!("section:{section_id}"),
            EntryKind::Formatted => format!("section:{section_id}:formatted"),
            EntryKind::Running => format!("section:{section_id}:is_running"),
            EntryKind::LastDuration => format!("section:{section_id}:last_run_duration"),
        }
    }
}

/// Typed access to the cache entries of sections
#[derive(Clone)]
pub struct SectionCache {
    backend: Arc<dyn CacheBackend>,
    /// Lifetime of data and duration entries
    data_ttl: Duration,
    /// Lifetime of the running flag, bounding how long a lost job can block a section
    running_ttl: Duration,
}

impl SectionCache {
    pub fn new(backend: Arc<dyn CacheBackend>, data_ttl: Duration, running_ttl: Duration) -> Self {
        Self {
            backend,
            data_ttl,
            running_ttl,
        }
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    async fn put_json<T: Serialize + ?Sized>(
        &self,
        kind: EntryKind,
        section_id: u64,
        value: &T,
        ttl: Duration,
    ) -> Result<(), ChartistError> {
        let bytes = Bytes::from(serde_json::to_vec(value)?);
        self.backend.put(&kind.key(section_id), bytes, ttl).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        kind: EntryKind,
        section_id: u64,
    ) -> Result<Option<T>, ChartistError> {
        let bytes = self.backend.get(&kind.key(section_id)).await?;
        record_cache_lookup(&kind.to_string(), bytes.is_some());
        bytes
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()
            .map_err(ChartistError::from)
    }

    /// Store the raw grouped data of a section.
    pub async fn put_raw(
        &self,
        section_id: u64,
        grouped: &GroupedDataset,
    ) -> Result<(), ChartistError> {
        self.put_json(EntryKind::Raw, section_id, grouped, self.data_ttl)
            .await
    }

    pub async fn get_raw(&self, section_id: u64) -> Result<Option<GroupedDataset>, ChartistError> {
        self.get_json(EntryKind::Raw, section_id).await
    }

    /// Store the formatted chart data of a section.
    pub async fn put_formatted(
        &self,
        section_id: u64,
        entries: &[ChartEntry],
    ) -> Result<(), ChartistError> {
        self.put_json(EntryKind::Formatted, section_id, entries, self.data_ttl)
            .await
    }

    pub async fn get_formatted(
        &self,
        section_id: u64,
    ) -> Result<Option<Vec<ChartEntry>>, ChartistError> {
        self.get_json(EntryKind::Formatted, section_id).await
    }

    /// Set or clear the running flag of a section.
    pub async fn set_running(&self, section_id: u64, running: bool) -> Result<(), ChartistError> {
        if running {
            self.put_json(EntryKind::Running, section_id, &true, self.running_ttl)
                .await
        } else {
            self.backend
                .delete(&EntryKind::Running.key(section_id))
                .await
        }
    }

    pub async fn is_running(&self, section_id: u64) -> Result<bool, ChartistError> {
        Ok(self
            .get_json::<bool>(EntryKind::Running, section_id)
            .await?
            .unwrap_or(false))
    }

    /// Record how many seconds the last load of a section took.
    pub async fn set_last_run_duration(
        &self,
        section_id: u64,
        seconds: u64,
    ) -> Result<(), ChartistError> {
        self.put_json(EntryKind::LastDuration, section_id, &seconds, self.data_ttl)
            .await
    }

    pub async fn last_run_duration(&self, section_id: u64) -> Result<Option<u64>, ChartistError> {
        self.get_json(EntryKind::LastDuration, section_id).await
    }

    /// Remove every cache entry of a section.
    pub async fn clear_section(&self, section_id: u64) -> Result<(), ChartistError> {
        let raw = EntryKind::Raw.key(section_id);
        let formatted = EntryKind::Formatted.key(section_id);
        let running = EntryKind::Running.key(section_id);
        let duration = EntryKind::LastDuration.key(section_id);
        tokio::try_join!(
            self.backend.delete(&raw),
            self.backend.delete(&formatted),
            self.backend.delete(&running),
            self.backend.delete(&duration),
        )?;
        event!(Level::DEBUG, section_id, "cleared section cache");
        Ok(())
    }
}

/// Periodically purge expired entries from a cache backend.
pub fn spawn_pruning(backend: Arc<dyn CacheBackend>, period: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match backend.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => event!(Level::DEBUG, purged, "purged expired cache entries"),
                Err(err) => event!(Level::WARN, "failed to purge cache: {err}"),
            }
        }
    });
}
