//! Cache read results and the stored value envelope.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Serialized form of a cached aggregate.
///
/// The computation time travels with the value so a hit can report its age.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedValue<T> {
    pub cached_at: DateTime<Utc>,
    pub value: T,
}

/// Result of a cache-aside read, carrying staleness metadata.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    /// When the value was computed from storage.
    cached_at: DateTime<Utc>,
    was_cache_hit: bool,
}

impl<T> CacheRead<T> {
    /// A value served from the cache.
    pub fn from_cache(value: T, cached_at: DateTime<Utc>) -> Self {
        Self {
            value,
            cached_at,
            was_cache_hit: true,
        }
    }

    /// A value just computed from storage.
    pub fn from_storage(value: T, computed_at: DateTime<Utc>) -> Self {
        Self {
            value,
            cached_at: computed_at,
            was_cache_hit: false,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }

    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    /// Age of the value. Zero if the clock moved backwards.
    pub fn staleness(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.cached_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Transform the value, keeping the metadata.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> CacheRead<U> {
        CacheRead {
            value: f(self.value),
            cached_at: self.cached_at,
            was_cache_hit: self.was_cache_hit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_storage_is_miss() {
        let read = CacheRead::from_storage(1.5, Utc::now());
        assert!(!read.was_cache_hit());
        assert!(read.staleness() < Duration::from_secs(1));
    }

    #[test]
    fn test_from_cache_reports_age() {
        let cached_at = Utc::now() - chrono::Duration::seconds(30);
        let read = CacheRead::from_cache(vec!["Tuna"], cached_at);
        assert!(read.was_cache_hit());
        assert!(read.staleness() >= Duration::from_secs(30));
    }

    #[test]
    fn test_future_timestamp_has_zero_staleness() {
        let read = CacheRead::from_cache((), Utc::now() + chrono::Duration::hours(1));
        assert_eq!(read.staleness(), Duration::ZERO);
    }

    #[test]
    fn test_map_keeps_metadata() {
        let cached_at = Utc::now();
        let read = CacheRead::from_cache(2, cached_at).map(|v| v * 10);
        assert_eq!(*read.value(), 20);
        assert_eq!(read.cached_at(), cached_at);
        assert!(read.was_cache_hit());
    }

    #[test]
    fn test_envelope_json_shape() {
        let envelope = CachedValue {
            cached_at: DateTime::from_timestamp(0, 0).unwrap(),
            value: 12.25,
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["value"], 12.25);
        assert_eq!(json["cached_at"], "1970-01-01T00:00:00Z");
    }
}
