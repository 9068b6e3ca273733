//! Cache port and cache-aside layer for aggregate queries.
//!
//! Backends speak a small Redis-like vocabulary: `exists`, `get` and
//! `set` with a time-to-live. [`CacheAside`] builds on that to serve
//! aggregate reads from the cache and fall back to a computation on a miss.
//!
//! Every read returns a [`CacheRead<T>`] so callers can tell a hit from a
//! fresh computation and see how old a cached value is.
//!
//! # Example
//!
//! ```ignore
//! let cache = CacheAside::new(Arc::new(InMemoryCacheBackend::new()), CacheAsideConfig::default());
//! let key = QueryKey::average_temperature("alpha");
//! let read = cache
//!     .get_or_compute(&key, || async { store.get_temperature("alpha").await })
//!     .await?;
//! if read.was_cache_hit() {
//!     tracing::debug!(staleness_ms = read.staleness().as_millis() as u64, "served from cache");
//! }
//! ```

pub mod cache_aside;
pub mod cache_read;
pub mod lmdb_backend;
pub mod memory;
pub mod query_key;
pub mod traits;

pub use cache_aside::{CacheAside, CacheAsideConfig, CacheAsideStats};
pub use cache_read::{CacheRead, CachedValue};
pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory::InMemoryCacheBackend;
pub use query_key::{QueryKey, QueryKind};
pub use traits::{CacheBackend, CacheStats};
