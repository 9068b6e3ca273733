//! In-memory storage for tests and local runs.
//!
//! Every port call is counted per operation so tests can assert that a
//! cache hit never reached storage. Failures and latency can be injected.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fathom_core::{
    Codename, DetectedFish, FathomResult, NewSensor, Region, RegionExtreme, Sensor, SensorGroup,
    SensorId, SensorSnapshot, SpeciesCount, StorageError, TimeWindow,
};
use uuid::Uuid;

use crate::SensorStore;

// ============================================================================
// OPERATIONS
// ============================================================================

/// Port operations, used for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    GetAllSensors,
    SaveDetectedFish,
    UpdateSensorData,
    GetTransparency,
    GetTemperature,
    GetSpecies,
    GetTopSpecies,
    GetRegionTemperature,
    GetSensorAverageTemperature,
    CreateSensorGroup,
    CreateSensors,
    CountSensors,
    HealthCheck,
}

impl StoreOperation {
    pub const ALL: [StoreOperation; 13] = [
        Self::GetAllSensors,
        Self::SaveDetectedFish,
        Self::UpdateSensorData,
        Self::GetTransparency,
        Self::GetTemperature,
        Self::GetSpecies,
        Self::GetTopSpecies,
        Self::GetRegionTemperature,
        Self::GetSensorAverageTemperature,
        Self::CreateSensorGroup,
        Self::CreateSensors,
        Self::CountSensors,
        Self::HealthCheck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetAllSensors => "get_all_sensors",
            Self::SaveDetectedFish => "save_detected_fish",
            Self::UpdateSensorData => "update_sensor_data",
            Self::GetTransparency => "get_transparency",
            Self::GetTemperature => "get_temperature",
            Self::GetSpecies => "get_species",
            Self::GetTopSpecies => "get_top_species",
            Self::GetRegionTemperature => "get_region_temperature",
            Self::GetSensorAverageTemperature => "get_sensor_average_temperature",
            Self::CreateSensorGroup => "create_sensor_group",
            Self::CreateSensors => "create_sensors",
            Self::CountSensors => "count_sensors",
            Self::HealthCheck => "health_check",
        }
    }

    /// Aggregate reads served through the cache-aside layer.
    pub fn is_aggregate_read(&self) -> bool {
        matches!(
            self,
            Self::GetTransparency
                | Self::GetTemperature
                | Self::GetSpecies
                | Self::GetTopSpecies
                | Self::GetRegionTemperature
                | Self::GetSensorAverageTemperature
        )
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// One temperature sample kept for windowed averages.
#[derive(Debug, Clone, Copy)]
struct TemperatureReading {
    sensor_id: SensorId,
    temperature: f64,
    recorded_at: DateTime<Utc>,
}

// ============================================================================
// MOCK STORAGE
// ============================================================================

/// In-memory mock storage for testing.
#[derive(Debug, Default)]
pub struct MockSensorStore {
    groups: Arc<RwLock<BTreeMap<i32, SensorGroup>>>,
    sensors: Arc<RwLock<HashMap<SensorId, Sensor>>>,
    detections: Arc<RwLock<Vec<DetectedFish>>>,
    readings: Arc<RwLock<Vec<TemperatureReading>>>,
    calls: Arc<[AtomicU64; 13]>,
    failing_operations: Arc<RwLock<HashSet<StoreOperation>>>,
    failing_updates: Arc<RwLock<HashSet<SensorId>>>,
    latency: Arc<RwLock<Option<Duration>>>,
}

impl Clone for MockSensorStore {
    fn clone(&self) -> Self {
        Self {
            groups: Arc::clone(&self.groups),
            sensors: Arc::clone(&self.sensors),
            detections: Arc::clone(&self.detections),
            readings: Arc::clone(&self.readings),
            calls: Arc::clone(&self.calls),
            failing_operations: Arc::clone(&self.failing_operations),
            failing_updates: Arc::clone(&self.failing_updates),
            latency: Arc::clone(&self.latency),
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StorageError> {
    lock.read().map_err(|_| StorageError::LockPoisoned)
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StorageError> {
    lock.write().map_err(|_| StorageError::LockPoisoned)
}

fn average(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0u64), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Sum counts per species, ordered by descending total then name.
fn rank_species<'a>(fish: impl Iterator<Item = &'a DetectedFish>) -> Vec<SpeciesCount> {
    let mut totals: HashMap<&str, i64> = HashMap::new();
    for f in fish {
        *totals.entry(f.name.as_str()).or_default() += i64::from(f.count);
    }
    let mut ranked: Vec<SpeciesCount> = totals
        .into_iter()
        .map(|(name, count)| SpeciesCount::new(name, count))
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    ranked
}

impl MockSensorStore {
    /// Create a new mock storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls made to `operation` so far.
    pub fn call_count(&self, operation: StoreOperation) -> u64 {
        self.calls[operation.index()].load(Ordering::SeqCst)
    }

    /// Number of aggregate reads made so far.
    pub fn aggregate_read_count(&self) -> u64 {
        StoreOperation::ALL
            .iter()
            .filter(|op| op.is_aggregate_read())
            .map(|op| self.call_count(*op))
            .sum()
    }

    /// Reset every call counter to zero.
    pub fn reset_call_counts(&self) {
        for counter in self.calls.iter() {
            counter.store(0, Ordering::SeqCst);
        }
    }

    /// Make every subsequent call to `operation` fail.
    pub fn fail_operation(&self, operation: StoreOperation) {
        if let Ok(mut failing) = self.failing_operations.write() {
            failing.insert(operation);
        }
    }

    /// Stop failing `operation`.
    pub fn restore_operation(&self, operation: StoreOperation) {
        if let Ok(mut failing) = self.failing_operations.write() {
            failing.remove(&operation);
        }
    }

    /// Make `update_sensor_data` fail for one sensor only.
    pub fn fail_updates_for(&self, sensor_id: SensorId) {
        if let Ok(mut failing) = self.failing_updates.write() {
            failing.insert(sensor_id);
        }
    }

    /// Delay every aggregate read by `latency`.
    pub fn set_read_latency(&self, latency: Option<Duration>) {
        if let Ok(mut slot) = self.latency.write() {
            *slot = latency;
        }
    }

    /// Insert a fully formed sensor, bypassing bootstrap.
    pub fn insert_sensor(&self, sensor: Sensor) -> Result<(), StorageError> {
        let mut readings = write(&self.readings)?;
        readings.push(TemperatureReading {
            sensor_id: sensor.id,
            temperature: sensor.temperature,
            recorded_at: sensor.updated_at.unwrap_or(sensor.created_at),
        });
        write(&self.sensors)?.insert(sensor.id, sensor);
        Ok(())
    }

    /// Look up one sensor.
    pub fn sensor(&self, id: SensorId) -> Option<Sensor> {
        self.sensors.read().ok()?.get(&id).cloned()
    }

    /// All detections recorded for one sensor.
    pub fn detections_for(&self, sensor_id: SensorId) -> Vec<DetectedFish> {
        self.detections
            .read()
            .map(|all| {
                all.iter()
                    .filter(|f| f.sensor_id == sensor_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of stored detections.
    pub fn detection_count(&self) -> usize {
        self.detections.read().map(|d| d.len()).unwrap_or(0)
    }

    /// Snapshot of stored groups, ordered by id.
    pub fn groups(&self) -> Vec<SensorGroup> {
        self.groups
            .read()
            .map(|g| g.values().cloned().collect())
            .unwrap_or_default()
    }

    async fn enter(&self, operation: StoreOperation) -> FathomResult<()> {
        self.calls[operation.index()].fetch_add(1, Ordering::SeqCst);

        let injected = read(&self.failing_operations)?.contains(&operation);
        if injected {
            return Err(StorageError::QueryFailed {
                operation: operation.as_str().to_string(),
                reason: "injected failure".to_string(),
            }
            .into());
        }

        if operation.is_aggregate_read() {
            let latency = *read(&self.latency)?;
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
        }
        Ok(())
    }

    fn group_sensors(&self, group: &str) -> Result<Vec<Sensor>, StorageError> {
        Ok(read(&self.sensors)?
            .values()
            .filter(|s| s.codename.group == group)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SensorStore for MockSensorStore {
    // === Simulation ===

    async fn get_all_sensors(&self) -> FathomResult<Vec<Sensor>> {
        self.enter(StoreOperation::GetAllSensors).await?;
        let mut sensors: Vec<Sensor> = read(&self.sensors)?.values().cloned().collect();
        sensors.sort_by(|a, b| {
            a.codename
                .group
                .cmp(&b.codename.group)
                .then(a.codename.ordinal.cmp(&b.codename.ordinal))
        });
        Ok(sensors)
    }

    async fn save_detected_fish(&self, fish: &DetectedFish) -> FathomResult<DetectedFish> {
        self.enter(StoreOperation::SaveDetectedFish).await?;
        if !read(&self.sensors)?.contains_key(&fish.sensor_id) {
            return Err(StorageError::InsertFailed {
                entity: "detected_fish".to_string(),
                reason: format!("sensor {} does not exist", fish.sensor_id),
            }
            .into());
        }
        write(&self.detections)?.push(fish.clone());
        Ok(fish.clone())
    }

    async fn update_sensor_data(&self, snapshot: &SensorSnapshot) -> FathomResult<()> {
        self.enter(StoreOperation::UpdateSensorData).await?;
        let injected = read(&self.failing_updates)?.contains(&snapshot.sensor_id);
        if injected {
            return Err(StorageError::QueryFailed {
                operation: StoreOperation::UpdateSensorData.as_str().to_string(),
                reason: format!("injected failure for sensor {}", snapshot.sensor_id),
            }
            .into());
        }

        // Lock order: readings before sensors, same as insert_sensor.
        let mut readings = write(&self.readings)?;
        let mut sensors = write(&self.sensors)?;
        let sensor = sensors
            .get_mut(&snapshot.sensor_id)
            .ok_or(StorageError::SensorNotFound {
                id: snapshot.sensor_id,
            })?;
        sensor.apply(snapshot);
        readings.push(TemperatureReading {
            sensor_id: snapshot.sensor_id,
            temperature: snapshot.temperature,
            recorded_at: snapshot.updated_at,
        });
        Ok(())
    }

    // === Aggregates ===

    async fn get_transparency(&self, group: &str) -> FathomResult<f64> {
        self.enter(StoreOperation::GetTransparency).await?;
        let sensors = self.group_sensors(group)?;
        average(sensors.iter().map(|s| f64::from(s.transparency))).ok_or_else(|| {
            StorageError::NoData {
                query: format!("transparency of group {group}"),
            }
            .into()
        })
    }

    async fn get_temperature(&self, group: &str) -> FathomResult<f64> {
        self.enter(StoreOperation::GetTemperature).await?;
        let sensors = self.group_sensors(group)?;
        average(sensors.iter().map(|s| s.temperature)).ok_or_else(|| {
            StorageError::NoData {
                query: format!("temperature of group {group}"),
            }
            .into()
        })
    }

    async fn get_species(&self, group: &str) -> FathomResult<Vec<SpeciesCount>> {
        self.enter(StoreOperation::GetSpecies).await?;
        let current: HashSet<Uuid> = self
            .group_sensors(group)?
            .into_iter()
            .flat_map(|s| s.detected_fish)
            .collect();
        let detections = read(&self.detections)?;
        Ok(rank_species(
            detections.iter().filter(|f| current.contains(&f.id)),
        ))
    }

    async fn get_top_species(
        &self,
        group: &str,
        window: &TimeWindow,
        top: usize,
    ) -> FathomResult<Vec<SpeciesCount>> {
        self.enter(StoreOperation::GetTopSpecies).await?;
        let members: HashSet<SensorId> =
            self.group_sensors(group)?.into_iter().map(|s| s.id).collect();
        let detections = read(&self.detections)?;
        let mut ranked = rank_species(
            detections
                .iter()
                .filter(|f| members.contains(&f.sensor_id) && window.contains(f.created_at)),
        );
        ranked.truncate(top);
        Ok(ranked)
    }

    async fn get_region_temperature(
        &self,
        region: &Region,
        extreme: RegionExtreme,
    ) -> FathomResult<Option<f64>> {
        self.enter(StoreOperation::GetRegionTemperature).await?;
        let sensors = read(&self.sensors)?;
        let inside = sensors
            .values()
            .filter(|s| region.contains(&s.coordinates))
            .map(|s| s.temperature);
        Ok(match extreme {
            RegionExtreme::Min => inside.reduce(f64::min),
            RegionExtreme::Max => inside.reduce(f64::max),
        })
    }

    async fn get_sensor_average_temperature(
        &self,
        codename: &Codename,
        window: &TimeWindow,
    ) -> FathomResult<Option<f64>> {
        self.enter(StoreOperation::GetSensorAverageTemperature).await?;
        let sensor_id = read(&self.sensors)?
            .values()
            .find(|s| &s.codename == codename)
            .map(|s| s.id);
        let Some(sensor_id) = sensor_id else {
            return Ok(None);
        };
        let readings = read(&self.readings)?;
        Ok(average(
            readings
                .iter()
                .filter(|r| r.sensor_id == sensor_id && window.contains(r.recorded_at))
                .map(|r| r.temperature),
        ))
    }

    // === Bootstrap ===

    async fn create_sensor_group(&self, id: i32, name: &str) -> FathomResult<()> {
        self.enter(StoreOperation::CreateSensorGroup).await?;
        let mut groups = write(&self.groups)?;
        if groups.get(&id).is_some_and(|g| g.name == name) {
            return Ok(());
        }
        if groups.contains_key(&id) || groups.values().any(|g| g.name == name) {
            return Err(StorageError::InsertFailed {
                entity: "sensor_group".to_string(),
                reason: format!("group {id} ({name}) already exists"),
            }
            .into());
        }
        groups.insert(
            id,
            SensorGroup {
                id,
                name: name.to_string(),
                sensors: Vec::new(),
            },
        );
        Ok(())
    }

    async fn create_sensors(&self, new_sensors: &[NewSensor]) -> FathomResult<Vec<Sensor>> {
        self.enter(StoreOperation::CreateSensors).await?;
        let mut groups = write(&self.groups)?;

        // Validate all rows first so a failure leaves nothing behind.
        for new in new_sensors {
            if !groups.contains_key(&new.group_id) {
                return Err(StorageError::InsertFailed {
                    entity: "sensor".to_string(),
                    reason: format!("group {} does not exist", new.group_id),
                }
                .into());
            }
        }

        let now = Utc::now();
        let mut created = Vec::with_capacity(new_sensors.len());
        for new in new_sensors {
            let sensor = Sensor {
                id: Uuid::now_v7(),
                codename: new.codename.clone(),
                coordinates: new.coordinates,
                data_output_rate: new.data_output_rate,
                temperature: new.temperature,
                transparency: new.transparency,
                detected_fish: Vec::new(),
                created_at: now,
                updated_at: None,
            };
            if let Some(group) = groups.get_mut(&new.group_id) {
                group.sensors.push(sensor.id);
            }
            self.insert_sensor(sensor.clone())?;
            created.push(sensor);
        }
        Ok(created)
    }

    async fn count_sensors(&self) -> FathomResult<u64> {
        self.enter(StoreOperation::CountSensors).await?;
        Ok(read(&self.sensors)?.len() as u64)
    }

    async fn health_check(&self) -> FathomResult<()> {
        self.enter(StoreOperation::HealthCheck).await
    }
}

// ============================================================================
// TESTS
// ============================================================================
