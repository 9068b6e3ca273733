#![cfg(feature = "db-tests")]
//! PostgreSQL storage round trips.
//!
//! Needs a reachable database configured through the `FATHOM_DB_*`
//! environment variables. Each test works in its own uniquely named group
//! placed at its own x offset, so region queries only see its sensors.

use chrono::{DateTime, Duration, Utc};
use fathom_api::{run_migrations, DbConfig, PgSensorStore};
use fathom_core::{
    Codename, Coordinates, DetectedFish, FathomResult, NewSensor, Region, RegionExtreme, Sensor,
    SensorSnapshot, SpeciesCount, TimeWindow,
};
use fathom_storage::SensorStore;
use rand::Rng;
use uuid::Uuid;

async fn test_store() -> FathomResult<PgSensorStore> {
    let pool = DbConfig::from_env().create_pool()?;
    run_migrations(&pool).await?;
    Ok(PgSensorStore::new(pool))
}

struct FreshGroup {
    id: i32,
    name: String,
    /// x coordinate of the group's sensors is `offset + ordinal`
    offset: f64,
    sensors: Vec<Sensor>,
}

/// Fresh group with two sensors at temperatures 5.0 and 6.0.
async fn fresh_group(store: &PgSensorStore) -> FathomResult<FreshGroup> {
    let mut rng = rand::rng();
    let group_id: i32 = rng.random_range(100_000..i32::MAX);
    let name = format!("t{}", group_id);
    let offset = f64::from(group_id) * 10.0;
    store.create_sensor_group(group_id, &name).await?;

    let planned: Vec<NewSensor> = (1..=2)
        .map(|ordinal| NewSensor {
            group_id,
            codename: Codename::new(name.clone(), ordinal),
            coordinates: Coordinates::new(offset + f64::from(ordinal), 0.0, -10.0),
            data_output_rate: 5,
            transparency: 40 + ordinal as u8 * 10,
            temperature: 4.0 + f64::from(ordinal),
        })
        .collect();
    let sensors = store.create_sensors(&planned).await?;
    Ok(FreshGroup {
        id: group_id,
        name,
        offset,
        sensors,
    })
}

async fn detect(
    store: &PgSensorStore,
    sensor: &Sensor,
    name: &str,
    count: u32,
    at: DateTime<Utc>,
) -> FathomResult<DetectedFish> {
    store
        .save_detected_fish(&DetectedFish {
            id: Uuid::now_v7(),
            sensor_id: sensor.id,
            name: name.to_string(),
            count,
            created_at: at,
        })
        .await
}

fn snapshot(sensor: &Sensor, temperature: f64, fish: Vec<Uuid>, at: DateTime<Utc>) -> SensorSnapshot {
    SensorSnapshot {
        sensor_id: sensor.id,
        temperature,
        transparency: 61,
        detected_fish: fish,
        updated_at: at,
    }
}

#[tokio::test]
async fn test_snapshot_round_trip() -> FathomResult<()> {
    let store = test_store().await?;
    let group = fresh_group(&store).await?;
    let sensor = &group.sensors[0];

    let fish = detect(&store, sensor, "cod", 3, Utc::now()).await?;
    store
        .update_sensor_data(&snapshot(sensor, 7.125, vec![fish.id], Utc::now()))
        .await?;

    let reloaded = store
        .get_all_sensors()
        .await?
        .into_iter()
        .find(|s| s.id == sensor.id)
        .expect("sensor reloaded");
    assert_eq!(reloaded.temperature, 7.125);
    assert_eq!(reloaded.transparency, 61);
    assert_eq!(reloaded.detected_fish, vec![fish.id]);
    assert!(reloaded.updated_at.is_some());
    Ok(())
}

#[tokio::test]
async fn test_create_sensor_group_is_repeatable() -> FathomResult<()> {
    let store = test_store().await?;
    let group = fresh_group(&store).await?;
    store.create_sensor_group(group.id, &group.name).await?;
    assert!(store.create_sensor_group(group.id, "renamed").await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_group_aggregates() -> FathomResult<()> {
    let store = test_store().await?;
    let group = fresh_group(&store).await?;

    assert_eq!(store.get_transparency(&group.name).await?, 55.0);
    assert_eq!(store.get_temperature(&group.name).await?, 5.5);

    let average = store
        .get_sensor_average_temperature(&group.sensors[1].codename, &TimeWindow::all_time())
        .await?;
    // The bootstrap temperature counts as the first reading
    assert_eq!(average, Some(6.0));
    Ok(())
}

#[tokio::test]
async fn test_species_follow_latest_tick_only() -> FathomResult<()> {
    let store = test_store().await?;
    let group = fresh_group(&store).await?;
    let (first, second) = (&group.sensors[0], &group.sensors[1]);
    let now = Utc::now();

    let stale = detect(&store, first, "cod", 30, now).await?;
    let cod = detect(&store, first, "cod", 4, now).await?;
    let sprat = detect(&store, first, "sprat", 2, now).await?;
    let more_cod = detect(&store, second, "cod", 3, now).await?;

    store
        .update_sensor_data(&snapshot(first, 5.0, vec![stale.id], now))
        .await?;
    store
        .update_sensor_data(&snapshot(first, 5.0, vec![cod.id, sprat.id], now))
        .await?;
    store
        .update_sensor_data(&snapshot(second, 6.0, vec![more_cod.id], now))
        .await?;

    assert_eq!(
        store.get_species(&group.name).await?,
        vec![SpeciesCount::new("cod", 7), SpeciesCount::new("sprat", 2)]
    );
    Ok(())
}

#[tokio::test]
async fn test_top_species_window_and_limit() -> FathomResult<()> {
    let store = test_store().await?;
    let group = fresh_group(&store).await?;
    let sensor = &group.sensors[0];
    let now = Utc::now();

    detect(&store, sensor, "cod", 10, now - Duration::hours(2)).await?;
    detect(&store, sensor, "herring", 4, now).await?;
    detect(&store, &group.sensors[1], "herring", 1, now).await?;
    detect(&store, sensor, "sprat", 2, now).await?;
    detect(&store, sensor, "eel", 1, now).await?;

    let all_time = store
        .get_top_species(&group.name, &TimeWindow::all_time(), 1)
        .await?;
    assert_eq!(all_time, vec![SpeciesCount::new("cod", 10)]);

    let last_hour = TimeWindow {
        from: Some(now - Duration::hours(1)),
        till: None,
    };
    let recent = store.get_top_species(&group.name, &last_hour, 2).await?;
    assert_eq!(
        recent,
        vec![SpeciesCount::new("herring", 5), SpeciesCount::new("sprat", 2)]
    );

    let before = TimeWindow {
        from: None,
        till: Some(now - Duration::hours(3)),
    };
    assert!(store.get_top_species(&group.name, &before, 5).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_region_extremes() -> FathomResult<()> {
    let store = test_store().await?;
    let group = fresh_group(&store).await?;
    let x = (group.offset + 0.5, group.offset + 2.5);

    let region = Region::new(x, (-1.0, 1.0), (-20.0, 0.0))?;
    assert_eq!(
        store.get_region_temperature(&region, RegionExtreme::Min).await?,
        Some(5.0)
    );
    assert_eq!(
        store.get_region_temperature(&region, RegionExtreme::Max).await?,
        Some(6.0)
    );

    // Boundaries are inclusive
    let edge = Region::new(
        (group.offset + 2.0, group.offset + 2.0),
        (0.0, 0.0),
        (-10.0, -10.0),
    )?;
    assert_eq!(
        store.get_region_temperature(&edge, RegionExtreme::Min).await?,
        Some(6.0)
    );

    let shallow = Region::new(x, (-1.0, 1.0), (-5.0, 0.0))?;
    assert_eq!(
        store.get_region_temperature(&shallow, RegionExtreme::Max).await?,
        None
    );
    Ok(())
}

#[tokio::test]
async fn test_sensor_average_within_window() -> FathomResult<()> {
    let store = test_store().await?;
    let group = fresh_group(&store).await?;
    let sensor = &group.sensors[0];
    let later = Utc::now() + Duration::hours(1);

    store
        .update_sensor_data(&snapshot(sensor, 10.0, vec![], later))
        .await?;
    store
        .update_sensor_data(&snapshot(sensor, 20.0, vec![], later + Duration::minutes(5)))
        .await?;

    let window = TimeWindow {
        from: Some(later - Duration::minutes(1)),
        till: None,
    };
    assert_eq!(
        store
            .get_sensor_average_temperature(&sensor.codename, &window)
            .await?,
        Some(15.0)
    );

    // Bootstrap reading 5.0 plus both snapshots
    assert_eq!(
        store
            .get_sensor_average_temperature(&sensor.codename, &TimeWindow::all_time())
            .await?,
        Some(35.0 / 3.0)
    );

    let unknown = Codename::new(group.name.clone(), 99);
    assert_eq!(
        store
            .get_sensor_average_temperature(&unknown, &TimeWindow::all_time())
            .await?,
        None
    );
    Ok(())
}
