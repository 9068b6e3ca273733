//! Fathom Test Utilities
//!
//! Shared test infrastructure for the Fathom workspace:
//! - A counting cache backend with failure injection
//! - Proptest generators for query parameters
//! - Fixtures for seeded fleets and failing stores
//! - Assertions on `FathomResult` error variants

// Re-export mock storage from its source crate
pub use fathom_storage::{MockSensorStore, StoreOperation};

// Re-export core types for convenience
pub use fathom_core::{
    Codename, Coordinates, FathomError, FathomResult, NewSensor, Region, RegionExtreme, Sensor,
    StorageError, TimeWindow, ValidationError,
};

pub use fixtures::{failing_store, sample_sensor, seeded_store};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fathom_core::CacheError;
use fathom_storage::{CacheBackend, CacheStats, InMemoryCacheBackend};

// ============================================================================
// COUNTING CACHE BACKEND
// ============================================================================

/// In-memory cache backend that counts calls and can be told to fail.
#[derive(Debug, Default)]
pub struct CountingCacheBackend {
    inner: InMemoryCacheBackend,
    exists_calls: AtomicU64,
    get_calls: AtomicU64,
    set_calls: AtomicU64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl CountingCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exists_calls(&self) -> u64 {
        self.exists_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> u64 {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> u64 {
        self.set_calls.load(Ordering::SeqCst)
    }

    /// Total calls of any kind.
    pub fn total_calls(&self) -> u64 {
        self.exists_calls() + self.get_calls() + self.set_calls()
    }

    /// Make `exists` and `get` fail until reset.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make `set` fail until reset.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn injected(operation: &str) -> FathomError {
        CacheError::Backend {
            operation: operation.to_string(),
            reason: "injected failure".to_string(),
        }
        .into()
    }
}

#[async_trait]
impl CacheBackend for CountingCacheBackend {
    async fn exists(&self, key: &str) -> FathomResult<bool> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::injected("exists"));
        }
        self.inner.exists(key).await
    }

    async fn get(&self, key: &str) -> FathomResult<Option<String>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::injected("get"));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> FathomResult<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::injected("set"));
        }
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> FathomResult<bool> {
        self.inner.delete(key).await
    }

    async fn stats(&self) -> FathomResult<CacheStats> {
        self.inner.stats().await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Fathom query parameters.

    use super::*;
    use proptest::prelude::*;

    /// Lowercase group name that parses back out of a codename.
    pub fn arb_group_name() -> impl Strategy<Value = String> {
        "[a-z]{1,12}"
    }

    pub fn arb_codename() -> impl Strategy<Value = Codename> {
        (arb_group_name(), 1u32..10_000).prop_map(|(group, ordinal)| Codename::new(group, ordinal))
    }

    /// Region with ordered, finite bounds on every axis.
    pub fn arb_region() -> impl Strategy<Value = Region> {
        let axis = || (-50.0f64..50.0, 0.0f64..50.0).prop_map(|(min, span)| (min, min + span));
        (axis(), axis(), axis()).prop_map(|(x, y, z)| Region {
            x_min: x.0,
            x_max: x.1,
            y_min: y.0,
            y_max: y.1,
            z_min: z.0,
            z_max: z.1,
        })
    }

    pub fn arb_extreme() -> impl Strategy<Value = RegionExtreme> {
        prop_oneof![Just(RegionExtreme::Min), Just(RegionExtreme::Max)]
    }

    /// Window with optional bounds between 2020 and 2030; `from <= till`.
    pub fn arb_time_window() -> impl Strategy<Value = TimeWindow> {
        let bound = || proptest::option::of(1_577_836_800i64..1_893_456_000i64);
        (bound(), bound()).prop_map(|(a, b)| {
            let (from, till) = match (a, b) {
                (Some(a), Some(b)) if a > b => (Some(b), Some(a)),
                other => other,
            };
            TimeWindow::from_unix(from, till).unwrap_or_default()
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fleets and stores for common testing scenarios.

    use super::*;
    use chrono::Utc;
    use fathom_core::{
        bootstrap_coordinates, initial_transparency, next_temperature, pick_output_rate,
    };
    use fathom_storage::SensorStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use uuid::Uuid;

    /// Seed used by every fixture so fleets are reproducible.
    pub const FIXTURE_SEED: u64 = 0x5EA5_0F15;

    /// A standalone sensor at `(ordinal, 0, -1)` with the given output rate.
    pub fn sample_sensor(group: &str, ordinal: u32, data_output_rate: u32) -> Sensor {
        Sensor {
            id: Uuid::now_v7(),
            codename: Codename::new(group, ordinal),
            coordinates: Coordinates::new(f64::from(ordinal), 0.0, -1.0),
            data_output_rate,
            temperature: 6.5,
            transparency: 50,
            detected_fish: Vec::new(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    /// Mock store holding `per_group` sensors for each of `groups`.
    ///
    /// Group ids follow the slice order, starting at 0. Returns the store and
    /// the created sensors in creation order.
    pub async fn seeded_store(groups: &[&str], per_group: u32) -> (MockSensorStore, Vec<Sensor>) {
        let store = MockSensorStore::new();
        let mut rng = StdRng::seed_from_u64(FIXTURE_SEED);
        let mut new_sensors = Vec::new();

        for (index, name) in groups.iter().enumerate() {
            let group_id = index as i32;
            store
                .create_sensor_group(group_id, name)
                .await
                .expect("fixture group insert");
            for ordinal in 1..=per_group {
                let coordinates = bootstrap_coordinates(index, &mut rng);
                new_sensors.push(NewSensor {
                    group_id,
                    codename: Codename::new(*name, ordinal),
                    coordinates,
                    data_output_rate: pick_output_rate(&mut rng),
                    transparency: initial_transparency(&mut rng),
                    temperature: next_temperature(coordinates.z, &mut rng),
                });
            }
        }

        let sensors = store
            .create_sensors(&new_sensors)
            .await
            .expect("fixture sensor insert");
        store.reset_call_counts();
        (store, sensors)
    }

    /// Seeded store where every call to `operation` fails.
    pub async fn failing_store(
        groups: &[&str],
        per_group: u32,
        operation: StoreOperation,
    ) -> (MockSensorStore, Vec<Sensor>) {
        let (store, sensors) = seeded_store(groups, per_group).await;
        store.fail_operation(operation);
        (store, sensors)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on Fathom error variants.

    use super::*;

    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &FathomResult<T>) {
        match result {
            Err(FathomError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_unknown_group<T: std::fmt::Debug>(result: &FathomResult<T>, group: &str) {
        match result {
            Err(FathomError::Validation(ValidationError::UnknownGroup { group: g })) => {
                assert_eq!(g, group, "Wrong group in UnknownGroup error");
            }
            other => panic!("Expected UnknownGroup({}), got: {:?}", group, other),
        }
    }

    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &FathomResult<T>) {
        match result {
            Err(FathomError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_no_data<T: std::fmt::Debug>(result: &FathomResult<T>) {
        match result {
            Err(FathomError::Storage(StorageError::NoData { .. })) => {}
            other => panic!("Expected NoData error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_cache_error<T: std::fmt::Debug>(result: &FathomResult<T>) {
        match result {
            Err(FathomError::Cache(_)) => {}
            other => panic!("Expected Cache error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::generators::*;
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_generated_regions_are_valid(region in arb_region()) {
            prop_assert!(region.validate().is_ok());
        }

        #[test]
        fn prop_generated_codenames_parse(codename in arb_codename()) {
            let parsed: Codename = codename.to_string().parse().map_err(|e| {
                TestCaseError::fail(format!("{e}"))
            })?;
            prop_assert_eq!(parsed, codename);
        }
    }
}
