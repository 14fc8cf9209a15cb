//! Cache storage.
//!
//! `CacheStore` is the key-value collaborator the engine reads and writes
//! through. `MemoryStore` is the in-process adapter: LRU bounded, with
//! per-entry expiry.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use thiserror::Error;
use tokio::time::Instant;

use super::config::BlockCacheConfig;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

/// Failure reported by a store or option adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed state: {0}")]
    Malformed(String),
}

impl StoreError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Key-value store with expiry.
///
/// `ttl_seconds == 0` stores without expiry. Keys arrive already namespaced
/// by the generation stamp, so adapters never need prefix deletes.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    async fn set(&self, key: &str, value: Bytes, ttl_seconds: u64) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Clone)]
struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-process store. Expired entries are dropped lazily on read; stale
/// generations age out through LRU eviction.
pub struct MemoryStore {
    entries: RwLock<LruCache<String, Entry>>,
}

impl MemoryStore {
    pub fn new(config: &BlockCacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.store_capacity_non_zero())),
        }
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(&BlockCacheConfig::default())
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        match entries.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
        }
        entries.pop(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl_seconds: u64) -> Result<(), StoreError> {
        // A TTL past the clock's range never expires.
        let expires_at = (ttl_seconds > 0)
            .then(|| Instant::now().checked_add(Duration::from_secs(ttl_seconds)))
            .flatten();
        rw_write(&self.entries, SOURCE, "set")
            .put(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        rw_write(&self.entries, SOURCE, "delete").pop(key);
        Ok(())
    }
}
