//! Fleet Bootstrap
//!
//! Seeds sensor groups and sensors on first start. A store that already
//! holds sensors is left untouched.

use fathom_core::{
    bootstrap_coordinates, initial_transparency, next_temperature, pick_output_rate, Codename,
    FathomResult, NewSensor, Sensor,
};
use fathom_storage::SensorStore;
use rand::Rng;

use crate::config::FleetConfig;

/// Build the bootstrap rows for every configured group.
///
/// Group ids follow the configured order starting at 0. Ordinals start at 1.
pub fn plan_fleet<R: Rng + ?Sized>(fleet: &FleetConfig, rng: &mut R) -> Vec<NewSensor> {
    let mut planned = Vec::with_capacity(fleet.group_names.len() * fleet.sensors_per_group as usize);
    for (index, group) in fleet.group_names.iter().enumerate() {
        for ordinal in 1..=fleet.sensors_per_group {
            let coordinates = bootstrap_coordinates(index, rng);
            planned.push(NewSensor {
                group_id: index as i32,
                codename: Codename::new(group.clone(), ordinal),
                coordinates,
                data_output_rate: pick_output_rate(rng),
                transparency: initial_transparency(rng),
                temperature: next_temperature(coordinates.depth(), rng),
            });
        }
    }
    planned
}

/// Create every group and its sensors.
pub async fn seed_fleet<R: Rng + ?Sized>(
    store: &dyn SensorStore,
    fleet: &FleetConfig,
    rng: &mut R,
) -> FathomResult<Vec<Sensor>> {
    for (index, group) in fleet.group_names.iter().enumerate() {
        store.create_sensor_group(index as i32, group).await?;
    }
    let planned = plan_fleet(fleet, rng);
    let created = store.create_sensors(&planned).await?;

    tracing::info!(
        groups = fleet.group_names.len(),
        sensors = created.len(),
        "Sensor fleet seeded"
    );
    Ok(created)
}

/// Seed the fleet only when the store holds no sensors.
///
/// Returns the number of sensors created, 0 when the fleet already existed.
pub async fn ensure_seeded<R: Rng + ?Sized>(
    store: &dyn SensorStore,
    fleet: &FleetConfig,
    rng: &mut R,
) -> FathomResult<usize> {
    let existing = store.count_sensors().await?;
    if existing > 0 {
        tracing::info!(sensors = existing, "Sensor fleet already present, skipping seed");
        return Ok(0);
    }
    Ok(seed_fleet(store, fleet, rng).await?.len())
}
