//! Read-through document caching.
//!
//! [`CachedStore`] wraps any [`PathStore`] and serves exact-path reads from
//! a [`DocumentCache`]. Wildcard reads always go to the wrapped store. Writes
//! and removes keep the cache in step with the store.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;

use crate::config::CacheConfig;
use crate::document::{RemoveResult, StoredDocument, UpsertOutcome};
use crate::error::{CacheError, ProviderResult};
use crate::path::{is_wildcard, prepare_path};
use crate::store::{
    CountTarget, FindOptions, FindParameters, PathStore, UpsertOptions, UpsertPayload,
};

/// A path-keyed document cache.
#[async_trait]
pub trait DocumentCache: Send + Sync {
    /// Returns the cached document at `key`.
    async fn get(&self, key: &str) -> Result<Option<StoredDocument>, CacheError>;

    /// Caches a document at `key`.
    async fn set(&self, key: &str, document: StoredDocument) -> Result<(), CacheError>;

    /// Evicts `key`.
    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    document: StoredDocument,
    stored_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| self.stored_at.elapsed() > ttl)
    }
}

/// In-process LRU cache with optional time-to-live.
pub struct LruDocumentCache {
    id: String,
    inner: Mutex<LruCache<String, CacheEntry>>,
    ttl: Option<Duration>,
}

impl std::fmt::Debug for LruDocumentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruDocumentCache")
            .field("id", &self.id)
            .field("len", &self.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl LruDocumentCache {
    /// Creates a cache named `id`.
    pub fn new(id: impl Into<String>, config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            id: id.into(),
            inner: Mutex::new(LruCache::new(capacity)),
            ttl: (config.ttl_ms > 0).then(|| Duration::from_millis(config.ttl_ms)),
        }
    }

    /// The cache id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of entries, expired ones included until they are touched.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns true if the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `key` is cached, without touching its recency.
    pub fn contains(&self, key: &str) -> bool {
        self.inner
            .lock()
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(self.ttl))
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

#[async_trait]
impl DocumentCache for LruDocumentCache {
    async fn get(&self, key: &str) -> Result<Option<StoredDocument>, CacheError> {
        let mut inner = self.inner.lock();
        match inner.get(key) {
            Some(entry) if !entry.is_expired(self.ttl) => return Ok(Some(entry.document.clone())),
            Some(_) => {}
            None => return Ok(None),
        }
        inner.pop(key);
        Ok(None)
    }

    async fn set(&self, key: &str, document: StoredDocument) -> Result<(), CacheError> {
        self.inner.lock().put(
            key.to_string(),
            CacheEntry {
                document,
                stored_at: Instant::now(),
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.inner.lock().pop(key);
        Ok(())
    }
}

/// A [`PathStore`] that serves exact-path reads from a cache.
#[derive(Debug)]
pub struct CachedStore<S, C> {
    inner: S,
    cache: C,
}

impl<S: PathStore, C: DocumentCache> CachedStore<S, C> {
    /// Wraps `inner` with `cache`.
    pub fn new(inner: S, cache: C) -> Self {
        Self { inner, cache }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// The cache.
    pub fn cache(&self) -> &C {
        &self.cache
    }

    async fn evict(&self, path: &str) {
        if let Err(e) = self.cache.remove(path).await {
            tracing::warn!(path, error = %e, "failed to evict cached document");
        }
    }
}

#[async_trait]
impl<S: PathStore, C: DocumentCache> PathStore for CachedStore<S, C> {
    async fn initialize(&self) -> ProviderResult<()> {
        self.inner.initialize().await
    }

    async fn upsert(
        &self,
        path: &str,
        payload: UpsertPayload,
        options: UpsertOptions,
    ) -> ProviderResult<UpsertOutcome> {
        let outcome = self.inner.upsert(path, payload, options).await?;
        match &outcome {
            UpsertOutcome::Document(write) => {
                self.cache
                    .set(&write.stored.path, write.stored.clone())
                    .await?;
            }
            UpsertOutcome::Bulk(write) => {
                for item in &write.items {
                    self.evict(&item.path).await;
                }
            }
        }
        Ok(outcome)
    }

    async fn find(
        &self,
        path: &str,
        parameters: FindParameters,
    ) -> ProviderResult<Vec<StoredDocument>> {
        let path = prepare_path(path);
        // criteria, projections and paging change the result, so only bare
        // reads hit
        if is_wildcard(&path)
            || parameters.criteria.is_some()
            || !parameters.options.keeps_exact_match()
        {
            return self.inner.find(&path, parameters).await;
        }

        if let Some(cached) = self.cache.get(&path).await? {
            tracing::debug!(path = %path, "cache hit");
            return Ok(vec![cached]);
        }

        let documents = self.inner.find(&path, parameters).await?;
        if let Some(first) = documents.first() {
            self.cache.set(&path, first.clone()).await?;
        }
        Ok(documents)
    }

    async fn find_one(
        &self,
        criteria: Value,
        options: FindOptions,
    ) -> ProviderResult<Option<StoredDocument>> {
        let bare =
            criteria.as_object().is_some_and(|c| c.len() == 1) && options.keeps_exact_match();
        let exact = criteria
            .get("path")
            .and_then(Value::as_str)
            .filter(|path| bare && !is_wildcard(path))
            .map(str::to_string);

        if let Some(ref path) = exact {
            if let Some(cached) = self.cache.get(path).await? {
                tracing::debug!(path = %path, "cache hit");
                return Ok(Some(cached));
            }
        }
        self.inner.find_one(criteria, options).await
    }

    async fn count(&self, target: CountTarget, criteria: Option<Value>) -> ProviderResult<u64> {
        self.inner.count(target, criteria).await
    }

    async fn remove(&self, path: &str) -> ProviderResult<RemoveResult> {
        let prepared = prepare_path(path);
        if is_wildcard(&prepared) {
            let parameters = FindParameters {
                criteria: None,
                options: FindOptions {
                    fields: vec!["path".to_string()],
                    ..Default::default()
                },
            };
            for document in self.inner.find(&prepared, parameters).await? {
                self.evict(&document.path).await;
            }
        } else {
            self.evict(&prepared).await;
        }
        self.inner.remove(path).await
    }

    async fn stop(&self) -> ProviderResult<()> {
        self.inner.stop().await
    }

    async fn start_compacting(&self, interval: Duration) -> ProviderResult<()> {
        self.inner.start_compacting(interval).await
    }

    async fn stop_compacting(&self) -> ProviderResult<()> {
        self.inner.stop_compacting().await
    }

    async fn compact(&self) -> ProviderResult<()> {
        self.inner.compact().await
    }
}
