//! Aggregation Service
//!
//! Aggregate queries over the sensor fleet, served through the cache-aside
//! layer. Every operation validates its input first; a rejected query never
//! touches the cache or the store.

use std::collections::BTreeSet;
use std::sync::Arc;

use fathom_core::{
    round3, Codename, FathomError, FathomResult, Region, RegionExtreme, SpeciesCount, StorageError,
    TimeWindow, ValidationError,
};
use fathom_storage::{CacheAside, CacheRead, QueryKey, SensorStore};
use serde::{Deserialize, Serialize};

use crate::telemetry::metrics::with_metrics;

/// Ranked species plus a description of the window they were counted in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopSpecies {
    pub species: Vec<SpeciesCount>,
    /// `period from .. till ..` when a window was applied.
    pub period: Option<String>,
}

/// Cache-aside front for the aggregate reads of [`SensorStore`].
#[derive(Clone)]
pub struct AggregationService {
    store: Arc<dyn SensorStore>,
    cache: CacheAside,
    groups: Arc<BTreeSet<String>>,
}

impl AggregationService {
    /// `groups` is the configured group set. Names are matched lowercased.
    pub fn new<I, S>(store: Arc<dyn SensorStore>, cache: CacheAside, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let groups = groups
            .into_iter()
            .map(|g| g.as_ref().trim().to_lowercase())
            .collect();
        Self {
            store,
            cache,
            groups: Arc::new(groups),
        }
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(String::as_str)
    }

    pub fn cache(&self) -> &CacheAside {
        &self.cache
    }

    /// Normalize `group` and check it is configured.
    pub fn validate_group(&self, group: &str) -> Result<String, ValidationError> {
        let normalized = group.trim().to_lowercase();
        if self.groups.contains(&normalized) {
            Ok(normalized)
        } else {
            Err(ValidationError::UnknownGroup {
                group: group.to_string(),
            })
        }
    }

    async fn cached<T, F, Fut>(&self, key: QueryKey, compute: F) -> FathomResult<CacheRead<T>>
    where
        T: Serialize + serde::de::DeserializeOwned + Send,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = FathomResult<T>>,
    {
        let read = self.cache.get_or_compute(&key, compute).await?;
        let hit = read.was_cache_hit();
        with_metrics(|m| m.record_cache_lookup(key.kind().as_str(), hit));
        tracing::debug!(key = %key, hit, "aggregate served");
        Ok(read)
    }

    /// Average transparency of a group, in percent.
    pub async fn average_transparency(&self, group: &str) -> FathomResult<CacheRead<f64>> {
        let group = self.validate_group(group)?;
        let key = QueryKey::average_transparency(&group);
        self.cached(key, || async { self.store.get_transparency(&group).await })
            .await
    }

    /// Average temperature of a group, rounded to three decimals.
    pub async fn average_temperature(&self, group: &str) -> FathomResult<CacheRead<f64>> {
        let group = self.validate_group(group)?;
        let key = QueryKey::average_temperature(&group);
        self.cached(key, || async {
            self.store.get_temperature(&group).await.map(round3)
        })
        .await
    }

    /// Species reported by the latest tick of every sensor in a group.
    pub async fn species(&self, group: &str) -> FathomResult<CacheRead<Vec<SpeciesCount>>> {
        let group = self.validate_group(group)?;
        let key = QueryKey::species(&group);
        self.cached(key, || async { self.store.get_species(&group).await })
            .await
    }

    /// At most `top` species of a group counted inside `window`.
    pub async fn top_species(
        &self,
        group: &str,
        top: usize,
        window: TimeWindow,
    ) -> FathomResult<CacheRead<TopSpecies>> {
        let group = self.validate_group(group)?;
        if top == 0 {
            return Err(ValidationError::InvalidValue {
                field: "top".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }

        let key = QueryKey::top_species(&group, top, &window);
        let read = self
            .cached(key, || async {
                self.store.get_top_species(&group, &window, top).await
            })
            .await?;
        Ok(read.map(|species| TopSpecies {
            species,
            period: window.describe(),
        }))
    }

    /// Lowest or highest current temperature inside `region`.
    ///
    /// An empty region is reported as [`StorageError::NoData`] and is not cached.
    pub async fn region_temperature(
        &self,
        region: Region,
        extreme: RegionExtreme,
    ) -> FathomResult<CacheRead<f64>> {
        region.validate()?;
        let key = QueryKey::region_temperature(&region, extreme);
        self.cached(key, || async {
            self.store
                .get_region_temperature(&region, extreme)
                .await?
                .ok_or_else(|| {
                    FathomError::from(StorageError::NoData {
                        query: format!("{} temperature in region", extreme.as_str()),
                    })
                })
        })
        .await
    }

    /// Average temperature recorded by one sensor inside `window`, rounded
    /// to three decimals.
    pub async fn sensor_average_temperature(
        &self,
        codename: &Codename,
        window: TimeWindow,
    ) -> FathomResult<CacheRead<f64>> {
        let group = self.validate_group(&codename.group)?;
        if codename.ordinal == 0 {
            return Err(ValidationError::InvalidCodename {
                codename: codename.to_string(),
            }
            .into());
        }

        let codename = Codename::new(group, codename.ordinal);
        let key = QueryKey::sensor_average_temperature(&codename, &window);
        self.cached(key, || async {
            self.store
                .get_sensor_average_temperature(&codename, &window)
                .await?
                .map(round3)
                .ok_or_else(|| {
                    FathomError::from(StorageError::NoData {
                        query: format!("temperature of sensor {codename}"),
                    })
                })
        })
        .await
    }
}

impl std::fmt::Debug for AggregationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregationService")
            .field("groups", &self.groups)
            .field("cache", &self.cache)
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use fathom_storage::{CacheAsideConfig, MockSensorStore, StoreOperation};
    use fathom_test_utils::assertions::*;
    use fathom_test_utils::{seeded_store, CountingCacheBackend};
    use std::time::Duration;

    struct Harness {
        store: MockSensorStore,
        cache: Arc<CountingCacheBackend>,
        service: AggregationService,
    }

    async fn harness(expiration: Duration) -> Harness {
        let (store, _) = seeded_store(&["alpha", "beta"], 5).await;
        let cache = Arc::new(CountingCacheBackend::new());
        let aside = CacheAside::new(
            cache.clone(),
            CacheAsideConfig::new().with_expiration(expiration),
        );
        let service =
            AggregationService::new(Arc::new(store.clone()), aside, ["alpha", "beta"]);
        Harness {
            store,
            cache,
            service,
        }
    }

    #[tokio::test]
    async fn test_second_read_is_cache_hit() -> FathomResult<()> {
        let h = harness(Duration::from_secs(60)).await;

        let first = h.service.average_temperature("alpha").await?;
        let second = h.service.average_temperature("alpha").await?;

        assert!(!first.was_cache_hit());
        assert!(second.was_cache_hit());
        assert_eq!(first.value(), second.value());
        assert_eq!(h.store.call_count(StoreOperation::GetTemperature), 1);

        h.service.average_transparency("alpha").await?;
        h.service.average_transparency("alpha").await?;
        assert_eq!(h.store.call_count(StoreOperation::GetTransparency), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_group_name_is_case_insensitive() -> FathomResult<()> {
        let h = harness(Duration::from_secs(60)).await;
        h.service.average_temperature("ALPHA").await?;
        let read = h.service.average_temperature(" alpha ").await?;
        assert!(read.was_cache_hit());
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_group_touches_nothing() {
        let h = harness(Duration::from_secs(60)).await;

        assert_unknown_group(&h.service.average_temperature("delta").await, "delta");
        assert_unknown_group(&h.service.species("delta").await, "delta");
        assert_unknown_group(
            &h.service.top_species("delta", 3, TimeWindow::all_time()).await,
            "delta",
        );
        assert_unknown_group(
            &h.service
                .sensor_average_temperature(&Codename::new("delta", 1), TimeWindow::all_time())
                .await,
            "delta",
        );

        assert_eq!(h.cache.total_calls(), 0);
        assert_eq!(h.store.aggregate_read_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_top_is_rejected() {
        let h = harness(Duration::from_secs(60)).await;
        assert_validation_error(&h.service.top_species("alpha", 0, TimeWindow::all_time()).await);
        assert_eq!(h.cache.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_average_temperature_is_rounded() -> FathomResult<()> {
        let h = harness(Duration::from_secs(60)).await;
        let value = *h.service.average_temperature("beta").await?.value();
        assert_eq!(value, round3(value));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_recomputed() -> FathomResult<()> {
        let h = harness(Duration::from_secs(5)).await;
        h.service.species("alpha").await?;
        tokio::time::sleep(Duration::from_secs(6)).await;
        let read = h.service.species("alpha").await?;
        assert!(!read.was_cache_hit());
        assert_eq!(h.store.call_count(StoreOperation::GetSpecies), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_storage_failure_leaves_cache_untouched() {
        let h = harness(Duration::from_secs(60)).await;
        h.store.fail_operation(StoreOperation::GetTemperature);

        assert_storage_error(&h.service.average_temperature("alpha").await);
        assert_eq!(h.cache.set_calls(), 0);

        h.store.restore_operation(StoreOperation::GetTemperature);
        let read = h.service.average_temperature("alpha").await;
        assert!(matches!(read, Ok(ref r) if !r.was_cache_hit()));
    }

    #[tokio::test]
    async fn test_cache_failure_is_surfaced() {
        let h = harness(Duration::from_secs(60)).await;
        h.cache.fail_reads(true);
        assert_cache_error(&h.service.average_transparency("alpha").await);
        assert_eq!(h.store.aggregate_read_count(), 0);

        h.cache.fail_reads(false);
        h.cache.fail_writes(true);
        assert_cache_error(&h.service.average_transparency("alpha").await);
    }

    #[tokio::test]
    async fn test_top_species_describes_window() -> FathomResult<()> {
        let h = harness(Duration::from_secs(60)).await;

        let all_time = h
            .service
            .top_species("alpha", 3, TimeWindow::all_time())
            .await?;
        assert_eq!(all_time.value().period, None);

        let window = TimeWindow::from_unix(Some(0), Some(60))?;
        let bounded = h.service.top_species("alpha", 3, window).await?;
        assert_eq!(
            bounded.value().period.as_deref(),
            Some("period from 1970-01-01 00:00:00.000000 till 1970-01-01 00:01:00.000000")
        );
        assert!(bounded.value().species.is_empty());

        // Different windows never share an entry.
        assert_eq!(h.store.call_count(StoreOperation::GetTopSpecies), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_region_is_no_data_and_not_cached() {
        let h = harness(Duration::from_secs(60)).await;
        let far = Region::new((500.0, 600.0), (500.0, 600.0), (-1.0, 0.0))
            .map_err(FathomError::from);
        let Ok(far) = far else {
            panic!("region should be valid");
        };

        assert_no_data(&h.service.region_temperature(far, RegionExtreme::Min).await);
        assert_no_data(&h.service.region_temperature(far, RegionExtreme::Min).await);
        assert_eq!(h.store.call_count(StoreOperation::GetRegionTemperature), 2);
        assert_eq!(h.cache.set_calls(), 0);
    }

    #[tokio::test]
    async fn test_region_extremes_are_ordered() -> FathomResult<()> {
        let h = harness(Duration::from_secs(60)).await;
        let everywhere = Region::new((-100.0, 100.0), (-100.0, 100.0), (-100.0, 0.0))?;
        let min = *h
            .service
            .region_temperature(everywhere, RegionExtreme::Min)
            .await?
            .value();
        let max = *h
            .service
            .region_temperature(everywhere, RegionExtreme::Max)
            .await?
            .value();
        assert!(min <= max);
        Ok(())
    }

    #[tokio::test]
    async fn test_sensor_average() -> FathomResult<()> {
        let h = harness(Duration::from_secs(60)).await;
        let codename: Codename = "Beta2".parse()?;
        let read = h
            .service
            .sensor_average_temperature(&codename, TimeWindow::all_time())
            .await?;
        assert_eq!(*read.value(), round3(*read.value()));

        let missing = Codename::new("beta", 99);
        assert_no_data(
            &h.service
                .sensor_average_temperature(&missing, TimeWindow::all_time())
                .await,
        );
        Ok(())
    }
}
