//! In-process cache backend.
//!
//! An entry past its deadline is removed the next time it is touched. Writes
//! also sweep the whole table once per purge interval, so keys that are never
//! read again do not accumulate. Deadlines use `tokio::time::Instant` so
//! paused-clock tests can advance time deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use fathom_core::FathomResult;
use tokio::time::Instant;

use super::traits::{CacheBackend, CacheStats};

/// Minimum time between two full sweeps triggered by writes.
pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(30);

/// Longest deadline handed out. Larger TTLs are clamped to it.
const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// DashMap-backed cache with per-entry time-to-live.
#[derive(Debug)]
pub struct InMemoryCacheBackend {
    entries: DashMap<String, MemoryEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    purge_interval: Duration,
    created_at: Instant,
    /// Milliseconds after `created_at` of the last sweep.
    last_purge_ms: AtomicU64,
}

impl Default for InMemoryCacheBackend {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            purge_interval: DEFAULT_PURGE_INTERVAL,
            created_at: Instant::now(),
            last_purge_ms: AtomicU64::new(0),
        }
    }
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_purge_interval(mut self, interval: Duration) -> Self {
        self.purge_interval = interval;
        self
    }

    /// Sweep expired entries if the purge interval has passed since the last sweep.
    fn maybe_purge(&self, now: Instant) {
        let elapsed =
            u64::try_from(now.duration_since(self.created_at).as_millis()).unwrap_or(u64::MAX);
        let interval = u64::try_from(self.purge_interval.as_millis()).unwrap_or(u64::MAX);
        let last = self.last_purge_ms.load(Ordering::Relaxed);
        if elapsed.saturating_sub(last) < interval {
            return;
        }
        // Only one writer sweeps per interval
        if self
            .last_purge_ms
            .compare_exchange(last, elapsed, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            let purged = self.purge_expired();
            if purged > 0 {
                tracing::debug!(
                    purged,
                    remaining = self.entries.len(),
                    "Purged expired cache entries"
                );
            }
        }
    }

    /// Live value under `key`, dropping it if expired.
    fn live_value(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired
            && self
                .entries
                .remove_if(key, |_, entry| entry.is_expired(now))
                .is_some()
        {
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    /// Remove every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> u64 {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let purged = before.saturating_sub(self.entries.len()) as u64;
        self.expirations.fetch_add(purged, Ordering::Relaxed);
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn deadline(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl.min(MAX_TTL)).unwrap_or(now)
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn exists(&self, key: &str) -> FathomResult<bool> {
        Ok(self.live_value(key).is_some())
    }

    async fn get(&self, key: &str) -> FathomResult<Option<String>> {
        let value = self.live_value(key);
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> FathomResult<()> {
        let now = Instant::now();
        self.maybe_purge(now);
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: deadline(now, ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> FathomResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn stats(&self) -> FathomResult<CacheStats> {
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.entries.len() as u64,
            expirations: self.expirations.load(Ordering::Relaxed),
        })
    }
}
