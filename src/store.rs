//! Persistence Layer
//!
//! Health records and final-response caching both go through one
//! [`StateStore`] trait so the surrounding application can plug in its own
//! durable key-value store. [`MemoryStore`] is the default in-process
//! implementation.
//!
//! Store failures are optimizations lost, not correctness lost: callers log
//! and continue. Health-record writes additionally go through [`Persister`],
//! a bounded background queue, so the query path never blocks on a write.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::{mpsc, Mutex as TokioMutex};

use crate::error::ScoutError;
use crate::health::ModelHealth;
use crate::types::CachedResponse;

/// Durable state consumed by the orchestrator: per-model health records and
/// the final-response cache.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the persisted health record for a model, if any.
    async fn get_state(&self, model_id: &str) -> Result<Option<ModelHealth>, ScoutError>;

    /// Write a model's health record, superseding any previous value.
    async fn set_state(&self, model_id: &str, health: &ModelHealth) -> Result<(), ScoutError>;

    /// Load a cached response. Implementations must not return expired
    /// entries.
    async fn get_cached(&self, key: &str) -> Result<Option<CachedResponse>, ScoutError>;

    /// Cache a response under `key` for `ttl`.
    async fn set_cached(
        &self,
        key: &str,
        response: &CachedResponse,
        ttl: Duration,
    ) -> Result<(), ScoutError>;
}

/// Cache entry with TTL support
struct CacheEntry {
    response: CachedResponse,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

/// In-process [`StateStore`] backed by a `HashMap` of health records and an
/// LRU response cache.
pub struct MemoryStore {
    states: TokioMutex<HashMap<String, ModelHealth>>,
    cache: TokioMutex<LruCache<String, CacheEntry>>,
}

impl MemoryStore {
    /// Default capacity of the response cache.
    pub const DEFAULT_CACHE_ENTRIES: usize = 256;

    pub fn new() -> Self {
        Self::with_cache_capacity(Self::DEFAULT_CACHE_ENTRIES)
    }

    pub fn with_cache_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        Self {
            states: TokioMutex::new(HashMap::new()),
            cache: TokioMutex::new(LruCache::new(capacity)),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get_state(&self, model_id: &str) -> Result<Option<ModelHealth>, ScoutError> {
        Ok(self.states.lock().await.get(model_id).cloned())
    }

    async fn set_state(&self, model_id: &str, health: &ModelHealth) -> Result<(), ScoutError> {
        self.states
            .lock()
            .await
            .insert(model_id.to_string(), health.clone());
        Ok(())
    }

    async fn get_cached(&self, key: &str) -> Result<Option<CachedResponse>, ScoutError> {
        let mut cache = self.cache.lock().await;
        if let Some(entry) = cache.get(key) {
            if !entry.is_expired() {
                return Ok(Some(entry.response.clone()));
            }
            cache.pop(key);
        }
        Ok(None)
    }

    async fn set_cached(
        &self,
        key: &str,
        response: &CachedResponse,
        ttl: Duration,
    ) -> Result<(), ScoutError> {
        self.cache.lock().await.put(
            key.to_string(),
            CacheEntry {
                response: response.clone(),
                created_at: Instant::now(),
                ttl,
            },
        );
        Ok(())
    }
}

/// Bounded background queue for health-record writes.
///
/// `save` never blocks: the write is handed to a single worker task that
/// performs the store round-trip. A full queue or a failed write is logged
/// and dropped; the record is re-persisted on the model's next transition.
#[derive(Clone)]
pub struct Persister {
    tx: mpsc::Sender<(String, ModelHealth)>,
}

impl std::fmt::Debug for Persister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persister").finish_non_exhaustive()
    }
}

impl Persister {
    /// Queue capacity before writes start being dropped.
    pub const QUEUE_CAPACITY: usize = 256;

    /// Spawn the worker task. Requires a running tokio runtime.
    pub fn spawn(store: Arc<dyn StateStore>) -> Self {
        let (tx, mut rx) = mpsc::channel::<(String, ModelHealth)>(Self::QUEUE_CAPACITY);
        tokio::spawn(async move {
            while let Some((model_id, health)) = rx.recv().await {
                if let Err(err) = store.set_state(&model_id, &health).await {
                    tracing::warn!(model_id = %model_id, error = %err, "failed to persist model health");
                }
            }
        });
        Self { tx }
    }

    /// Enqueue a health-record write without blocking.
    pub fn save(&self, model_id: &str, health: &ModelHealth) {
        if let Err(err) = self.tx.try_send((model_id.to_string(), health.clone())) {
            tracing::warn!(model_id = %model_id, error = %err, "health persistence queue full, dropping write");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProviderKind, SlugSelection};
    use chrono::Utc;

    fn response(query: &str) -> CachedResponse {
        CachedResponse {
            query: query.to_string(),
            selection: SlugSelection {
                selected_slugs: vec!["gcal".to_string()],
                reasoning: "calendar tools".to_string(),
                confidence: 0.9,
            },
            timestamp: Utc::now(),
            provider: ProviderKind::Groq,
            model_id: "llama-3.3-70b-versatile".to_string(),
            cost: 0.0,
            latency_ms: 420,
        }
    }

    #[tokio::test]
    async fn expired_cache_entry_is_absent() {
        let store = MemoryStore::new();
        store
            .set_cached("k", &response("calendar"), Duration::from_millis(10))
            .await
            .unwrap();
        assert!(store.get_cached("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.get_cached("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn later_write_supersedes() {
        let store = MemoryStore::new();
        store
            .set_cached("k", &response("a"), Duration::from_secs(60))
            .await
            .unwrap();
        store
            .set_cached("k", &response("b"), Duration::from_secs(60))
            .await
            .unwrap();
        let got = store.get_cached("k").await.unwrap().unwrap();
        assert_eq!(got.query, "b");
    }

    #[tokio::test]
    async fn persister_writes_through_worker() {
        let store = Arc::new(MemoryStore::new());
        let persister = Persister::spawn(store.clone());

        persister.save("groq:llama-3.3-70b-versatile", &ModelHealth::default());

        // Give the worker a moment to drain the queue.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let loaded = store
            .get_state("groq:llama-3.3-70b-versatile")
            .await
            .unwrap();
        assert!(loaded.is_some());
    }
}
