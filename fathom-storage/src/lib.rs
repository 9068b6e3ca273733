//! Fathom Storage - Storage Port, Cache Port and Mock Implementation
//!
//! Defines the storage abstraction for sensor and detection records and the
//! cache-aside layer that fronts aggregate queries. The PostgreSQL
//! implementation lives in fathom-api.

pub mod cache;
pub mod mock;

pub use cache::{
    CacheAside, CacheAsideConfig, CacheAsideStats, CacheBackend, CacheRead, CacheStats,
    InMemoryCacheBackend, LmdbCacheBackend, LmdbCacheError, QueryKey, QueryKind,
};
pub use mock::{MockSensorStore, StoreOperation};

use async_trait::async_trait;
use fathom_core::{
    Codename, DetectedFish, FathomResult, NewSensor, Region, RegionExtreme, Sensor,
    SensorSnapshot, SpeciesCount, TimeWindow,
};

// ============================================================================
// STORAGE PORT
// ============================================================================

/// Storage port for sensor, group and detection records.
///
/// Implementations must be safe to share across the scheduler loops and the
/// request handlers.
#[async_trait]
pub trait SensorStore: Send + Sync {
    // ========================================================================
    // SIMULATION
    // ========================================================================

    /// Load every sensor with its current readings.
    async fn get_all_sensors(&self) -> FathomResult<Vec<Sensor>>;

    /// Append one detection. Returns the stored record.
    async fn save_detected_fish(&self, fish: &DetectedFish) -> FathomResult<DetectedFish>;

    /// Replace the mutable fields of one sensor in a single write.
    async fn update_sensor_data(&self, snapshot: &SensorSnapshot) -> FathomResult<()>;

    // ========================================================================
    // AGGREGATES
    // ========================================================================

    /// Average transparency of a group's sensors.
    async fn get_transparency(&self, group: &str) -> FathomResult<f64>;

    /// Average temperature of a group's sensors.
    async fn get_temperature(&self, group: &str) -> FathomResult<f64>;

    /// Species currently reported by a group, summed per name.
    async fn get_species(&self, group: &str) -> FathomResult<Vec<SpeciesCount>>;

    /// At most `top` species of a group inside `window`, by descending total.
    async fn get_top_species(
        &self,
        group: &str,
        window: &TimeWindow,
        top: usize,
    ) -> FathomResult<Vec<SpeciesCount>>;

    /// Lowest or highest current temperature inside `region`.
    /// `None` when no sensor lies in the region.
    async fn get_region_temperature(
        &self,
        region: &Region,
        extreme: RegionExtreme,
    ) -> FathomResult<Option<f64>>;

    /// Average temperature recorded by one sensor inside `window`.
    /// `None` when the sensor has no reading in the window.
    async fn get_sensor_average_temperature(
        &self,
        codename: &Codename,
        window: &TimeWindow,
    ) -> FathomResult<Option<f64>>;

    // ========================================================================
    // BOOTSTRAP
    // ========================================================================

    /// Create a group. Repeating an existing `(id, name)` pair is a no-op so an
    /// interrupted seed can be retried. Any other clash is an insert failure.
    async fn create_sensor_group(&self, id: i32, name: &str) -> FathomResult<()>;

    /// Insert sensors and attach them to their groups.
    async fn create_sensors(&self, sensors: &[NewSensor]) -> FathomResult<Vec<Sensor>>;

    async fn count_sensors(&self) -> FathomResult<u64>;

    /// Cheap connectivity probe for readiness checks.
    async fn health_check(&self) -> FathomResult<()>;
}
