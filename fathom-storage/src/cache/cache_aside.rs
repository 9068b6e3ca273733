//! Cache-aside reads for aggregate queries.
//!
//! A read first asks the backend whether the key exists, then fetches it.
//! On a miss the caller's computation runs against storage and the result
//! is written back with the configured time-to-live. A failed computation
//! leaves the cache untouched.
//!
//! Misses can optionally be coalesced per key so that concurrent readers of
//! the same cold key run the computation once.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use fathom_core::{CacheError, FathomResult};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::cache_read::{CacheRead, CachedValue};
use super::query_key::QueryKey;
use super::traits::CacheBackend;

/// Configuration for the cache-aside layer.
#[derive(Debug, Clone)]
pub struct CacheAsideConfig {
    /// Time-to-live applied to every entry written on a miss.
    pub expiration: Duration,
    /// Serialize concurrent misses on the same key.
    pub coalesce_misses: bool,
}

impl Default for CacheAsideConfig {
    fn default() -> Self {
        Self {
            expiration: Duration::from_secs(60),
            coalesce_misses: false,
        }
    }
}

impl CacheAsideConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn with_coalescing(mut self, enabled: bool) -> Self {
        self.coalesce_misses = enabled;
        self
    }
}

/// Counters kept by [`CacheAside`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheAsideStats {
    pub hits: u64,
    pub misses: u64,
    /// Misses resolved by a computation another reader ran.
    pub coalesced: u64,
    /// Write-backs the backend rejected.
    pub write_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    write_failures: AtomicU64,
}

/// Cache-aside front for aggregate queries.
pub struct CacheAside {
    backend: Arc<dyn CacheBackend>,
    config: CacheAsideConfig,
    in_flight: Arc<DashMap<String, Arc<Mutex<()>>>>,
    counters: Arc<Counters>,
}

impl Clone for CacheAside {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
            in_flight: Arc::clone(&self.in_flight),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl std::fmt::Debug for CacheAside {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheAside")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl CacheAside {
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheAsideConfig) -> Self {
        Self {
            backend,
            config,
            in_flight: Arc::new(DashMap::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn with_defaults(backend: Arc<dyn CacheBackend>) -> Self {
        Self::new(backend, CacheAsideConfig::default())
    }

    pub fn config(&self) -> &CacheAsideConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn stats(&self) -> CacheAsideStats {
        CacheAsideStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            write_failures: self.counters.write_failures.load(Ordering::Relaxed),
        }
    }

    /// Serve `key` from the cache, or run `compute` and cache its result.
    ///
    /// Errors from `compute` propagate unchanged. Backend failures on any of
    /// `exists`, `get` or `set` surface as errors with no fallback.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &QueryKey,
        compute: F,
    ) -> FathomResult<CacheRead<T>>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut,
        Fut: Future<Output = FathomResult<T>>,
    {
        if let Some(read) = self.lookup(key).await? {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(read);
        }

        if !self.config.coalesce_misses {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return self.compute_and_store(key, compute).await;
        }

        let gate = self
            .in_flight
            .entry(key.as_str().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _guard = gate.lock().await;
            // Another reader may have filled the key while we waited.
            match self.lookup(key).await {
                Ok(Some(read)) => {
                    self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                    Ok(read)
                }
                Ok(None) => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    self.compute_and_store(key, compute).await
                }
                Err(e) => Err(e),
            }
        };
        // Drop the gate once no other reader holds it.
        self.in_flight
            .remove_if(key.as_str(), |_, g| Arc::strong_count(g) <= 2);
        drop(gate);
        result
    }

    /// Existence check followed by a fetch.
    ///
    /// An entry that expires between the two calls counts as a miss.
    async fn lookup<T>(&self, key: &QueryKey) -> FathomResult<Option<CacheRead<T>>>
    where
        T: DeserializeOwned,
    {
        if !self.backend.exists(key.as_str()).await? {
            return Ok(None);
        }
        let Some(raw) = self.backend.get(key.as_str()).await? else {
            debug!(key = %key, "cache entry expired between exists and get");
            return Ok(None);
        };
        let envelope: CachedValue<T> =
            serde_json::from_str(&raw).map_err(|e| CacheError::Decode {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Some(CacheRead::from_cache(envelope.value, envelope.cached_at)))
    }

    async fn compute_and_store<T, F, Fut>(
        &self,
        key: &QueryKey,
        compute: F,
    ) -> FathomResult<CacheRead<T>>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = FathomResult<T>>,
    {
        let value = compute().await?;
        let computed_at = Utc::now();

        let envelope = CachedValue {
            cached_at: computed_at,
            value,
        };
        let encoded = serde_json::to_string(&envelope).map_err(|e| CacheError::Encode {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        if let Err(e) = self
            .backend
            .set(key.as_str(), &encoded, self.config.expiration)
            .await
        {
            self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
            warn!(key = %key, error = %e, "failed to write computed value to cache");
            return Err(e);
        }

        Ok(CacheRead::from_storage(envelope.value, computed_at))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::InMemoryCacheBackend;
    use crate::cache::traits::CacheStats;
    use async_trait::async_trait;
    use fathom_core::{FathomError, StorageError};
    use std::sync::atomic::AtomicUsize;

    fn cache_with(config: CacheAsideConfig) -> (CacheAside, Arc<InMemoryCacheBackend>) {
        let backend = Arc::new(InMemoryCacheBackend::new());
        (CacheAside::new(backend.clone(), config), backend)
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let (cache, _) = cache_with(CacheAsideConfig::default());
        let key = QueryKey::average_temperature("alpha");
        let calls = AtomicUsize::new(0);

        let first = cache
            .get_or_compute(&key, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(14.25_f64)
            })
            .await
            .unwrap();
        assert!(!first.was_cache_hit());

        let second = cache
            .get_or_compute(&key, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(99.0_f64)
            })
            .await
            .unwrap();
        assert!(second.was_cache_hit());
        assert_eq!(*second.value(), 14.25);
        assert_eq!(second.cached_at(), first.cached_at());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recomputes_after_expiration() {
        let (cache, _) =
            cache_with(CacheAsideConfig::new().with_expiration(Duration::from_secs(60)));
        let key = QueryKey::species("beta");

        cache
            .get_or_compute(&key, || async { Ok(vec!["Tuna".to_string()]) })
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;

        let read = cache
            .get_or_compute(&key, || async { Ok(vec!["Marlin".to_string()]) })
            .await
            .unwrap();
        assert!(!read.was_cache_hit());
        assert_eq!(read.into_value(), vec!["Marlin".to_string()]);
    }

    #[tokio::test]
    async fn test_compute_error_leaves_cache_untouched() {
        let (cache, backend) = cache_with(CacheAsideConfig::default());
        let key = QueryKey::average_transparency("gamma");

        let err = cache
            .get_or_compute::<f64, _, _>(&key, || async {
                Err(StorageError::QueryFailed {
                    operation: "get_transparency".into(),
                    reason: "connection reset".into(),
                }
                .into())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FathomError::Storage(_)));
        assert!(!backend.exists(key.as_str()).await.unwrap());
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_an_error() {
        let (cache, backend) = cache_with(CacheAsideConfig::default());
        let key = QueryKey::average_temperature("alpha");
        backend
            .set(key.as_str(), "not json", Duration::from_secs(60))
            .await
            .unwrap();

        let err = cache
            .get_or_compute(&key, || async { Ok(1.0_f64) })
            .await
            .unwrap_err();
        assert!(matches!(err, FathomError::Cache(CacheError::Decode { .. })));
    }

    /// Reports every key as present but never returns a value.
    struct VanishingBackend {
        reject_writes: bool,
    }

    #[async_trait]
    impl CacheBackend for VanishingBackend {
        async fn exists(&self, _key: &str) -> FathomResult<bool> {
            Ok(true)
        }
        async fn get(&self, _key: &str) -> FathomResult<Option<String>> {
            Ok(None)
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> FathomResult<()> {
            if self.reject_writes {
                return Err(CacheError::Backend {
                    operation: "set".into(),
                    reason: "read-only".into(),
                }
                .into());
            }
            Ok(())
        }
        async fn delete(&self, _key: &str) -> FathomResult<bool> {
            Ok(false)
        }
        async fn stats(&self) -> FathomResult<CacheStats> {
            Ok(CacheStats::default())
        }
    }

    #[tokio::test]
    async fn test_expiry_between_exists_and_get_is_a_miss() {
        let cache = CacheAside::with_defaults(Arc::new(VanishingBackend {
            reject_writes: false,
        }));
        let key = QueryKey::average_temperature("alpha");

        let read = cache
            .get_or_compute(&key, || async { Ok(3.5_f64) })
            .await
            .unwrap();
        assert!(!read.was_cache_hit());
        assert_eq!(*read.value(), 3.5);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_write_back_failure_is_surfaced() {
        let cache = CacheAside::with_defaults(Arc::new(VanishingBackend {
            reject_writes: true,
        }));
        let key = QueryKey::species("alpha");

        let err = cache
            .get_or_compute(&key, || async { Ok(Vec::<String>::new()) })
            .await
            .unwrap_err();
        assert!(matches!(err, FathomError::Cache(CacheError::Backend { .. })));
        assert_eq!(cache.stats().write_failures, 1);
    }

    #[tokio::test]
    async fn test_coalesced_misses_compute_once() {
        let (cache, _) = cache_with(CacheAsideConfig::new().with_coalescing(true));
        let key = QueryKey::average_temperature("alpha");
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let key = key.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(&key, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(7.0_f64)
                    })
                    .await
                    .map(CacheRead::into_value)
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 7.0);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits + stats.coalesced, 7);
        assert!(cache.in_flight.is_empty());
    }
}
