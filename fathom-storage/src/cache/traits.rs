//! Cache backend trait.
//!
//! Backends store opaque strings under string keys with a time-to-live.
//! Encoding of values is the caller's concern.

use std::time::Duration;

use async_trait::async_trait;
use fathom_core::FathomResult;

/// Cache backend trait for pluggable cache implementations.
///
/// This trait abstracts over the cache store (in-memory, LMDB, or a
/// networked key-value server). Implementations must be thread-safe.
///
/// An entry whose time-to-live has elapsed behaves as absent for both
/// `exists` and `get`.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Whether a live entry is stored under `key`.
    async fn exists(&self, key: &str) -> FathomResult<bool>;

    /// The live value stored under `key`, if any.
    async fn get(&self, key: &str) -> FathomResult<Option<String>>;

    /// Store `value` under `key`, replacing any previous entry.
    ///
    /// The entry expires `ttl` after this call.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> FathomResult<()>;

    /// Remove the entry under `key`. Returns whether one was removed.
    async fn delete(&self, key: &str) -> FathomResult<bool>;

    /// Get cache statistics.
    async fn stats(&self) -> FathomResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of `get` calls that found a live entry.
    pub hits: u64,
    /// Number of `get` calls that found nothing.
    pub misses: u64,
    /// Number of entries currently stored, expired ones included until
    /// they are next touched.
    pub entry_count: u64,
    /// Number of entries dropped because their time-to-live elapsed.
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
