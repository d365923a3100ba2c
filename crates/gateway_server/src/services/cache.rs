//! Keyed blob cache with expiry and load-once semantics.

use crate::error::ServerError;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Arbitrary keyed blobs with optional expiry.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<u8>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>);

    /// Returns true if the key existed.
    async fn delete(&self, key: &str) -> bool;

    /// Returns the cached value or runs `loader` to produce it.
    ///
    /// For any key at most one loader runs at a time; concurrent callers wait
    /// for it and then read its result from the cache. Loader failures are
    /// not cached.
    async fn get_or_load(
        &self,
        key: &str,
        ttl: Option<Duration>,
        loader: BoxFuture<'_, Result<Vec<u8>, ServerError>>,
    ) -> Result<Vec<u8>, ServerError>;
}

struct CacheEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |deadline| now >= deadline)
    }
}

/// In-process [`KeyValueStore`] backed by `DashMap`.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, CacheEntry>,
    loading: DashMap<String, Arc<Mutex<()>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn read(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        if self
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some()
        {
            return None;
        }
        self.entries.get(key).map(|entry| entry.value.clone())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.read(key)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    async fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    async fn get_or_load(
        &self,
        key: &str,
        ttl: Option<Duration>,
        loader: BoxFuture<'_, Result<Vec<u8>, ServerError>>,
    ) -> Result<Vec<u8>, ServerError> {
        if let Some(value) = self.read(key) {
            return Ok(value);
        }

        let gate = self
            .loading
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = gate.lock().await;

        // Another caller may have filled the key while we waited.
        let result = match self.read(key) {
            Some(value) => Ok(value),
            None => {
                debug!("Cache miss for '{}', loading", key);
                let result = loader.await;
                if let Ok(value) = &result {
                    self.set(key, value.clone(), ttl).await;
                }
                result
            }
        };

        // Waiters already queued on this gate hold a clone; keep it for them so
        // a newcomer cannot start a second gate and a parallel loader.
        self.loading.remove_if(key, |_, current| {
            Arc::ptr_eq(current, &gate) && Arc::strong_count(current) <= 2
        });
        result
    }
}
