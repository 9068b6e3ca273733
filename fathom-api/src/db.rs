//! PostgreSQL storage.
//!
//! `DbConfig` builds a deadpool pool, `connect_with_retry` waits for the
//! database at startup, and `PgSensorStore` implements the storage port
//! over the schema in `migrations/`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Object, Pool, PoolError, RecyclingMethod, Runtime};
use fathom_core::{
    Codename, ConfigError, Coordinates, DetectedFish, FathomError, FathomResult, NewSensor,
    Region, RegionExtreme, Sensor, SensorSnapshot, SpeciesCount, StorageError, TimeWindow,
};
use fathom_storage::SensorStore;
use serde::{Deserialize, Serialize};
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

use crate::config::env_parse;
use crate::constants::*;

const SCHEMA_MIGRATION: &str = include_str!("../migrations/V1__sensor_schema.sql");

// ============================================================================
// DATABASE CONFIGURATION
// ============================================================================

/// Database connection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Seconds to wait for a pooled connection
    pub timeout_secs: u64,
    /// Startup connection attempts
    pub connect_attempts: u32,
    /// Seconds between startup connection attempts
    pub connect_retry_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_DB_HOST.to_string(),
            port: DEFAULT_DB_PORT,
            dbname: DEFAULT_DB_NAME.to_string(),
            user: DEFAULT_DB_USER.to_string(),
            password: "".to_string(),
            max_size: DEFAULT_DB_POOL_SIZE,
            timeout_secs: DEFAULT_DB_TIMEOUT_SECS,
            connect_attempts: DEFAULT_DB_CONNECT_ATTEMPTS,
            connect_retry_secs: DEFAULT_DB_CONNECT_RETRY_SECS,
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        Self::default().apply_env(&|k: &str| std::env::var(k).ok())
    }

    pub fn apply_env<L: Fn(&str) -> Option<String>>(mut self, lookup: &L) -> Self {
        if let Some(host) = lookup("FATHOM_DB_HOST") {
            self.host = host;
        }
        if let Some(port) = env_parse(lookup, "FATHOM_DB_PORT") {
            self.port = port;
        }
        if let Some(dbname) = lookup("FATHOM_DB_NAME") {
            self.dbname = dbname;
        }
        if let Some(user) = lookup("FATHOM_DB_USER") {
            self.user = user;
        }
        if let Some(password) = lookup("FATHOM_DB_PASSWORD") {
            self.password = password;
        }
        if let Some(size) = env_parse(lookup, "FATHOM_DB_POOL_SIZE") {
            self.max_size = size;
        }
        if let Some(secs) = env_parse(lookup, "FATHOM_DB_TIMEOUT") {
            self.timeout_secs = secs;
        }
        if let Some(attempts) = env_parse(lookup, "FATHOM_DB_CONNECT_ATTEMPTS") {
            self.connect_attempts = attempts;
        }
        if let Some(secs) = env_parse(lookup, "FATHOM_DB_CONNECT_RETRY_SECS") {
            self.connect_retry_secs = secs;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "db.max_size".to_string(),
                value: "0".to_string(),
                reason: "pool needs at least one connection".to_string(),
            });
        }
        if self.connect_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "db.connect_attempts".to_string(),
                value: "0".to_string(),
                reason: "at least one connection attempt is required".to_string(),
            });
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> FathomResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout());
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StorageError::ConnectionFailed {
                attempts: 0,
                reason: format!("Failed to create pool: {}", e),
            })?;

        Ok(pool)
    }
}

// ============================================================================
// STARTUP
// ============================================================================

/// Wait until the database answers `SELECT 1`, retrying with a fixed delay.
pub async fn connect_with_retry(pool: &Pool, config: &DbConfig) -> FathomResult<()> {
    let attempts = config.connect_attempts.max(1);
    let delay = Duration::from_secs(config.connect_retry_secs);

    let mut last_error = String::new();
    for attempt in 1..=attempts {
        let probe = async {
            let conn = pool.get().await.map_err(|e| e.to_string())?;
            conn.query_one("SELECT 1", &[]).await.map_err(|e| e.to_string())?;
            Ok::<(), String>(())
        };

        match probe.await {
            Ok(()) => {
                tracing::info!(attempt, host = %config.host, "Connected to PostgreSQL");
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(
                    attempt,
                    max_attempts = attempts,
                    error = %e,
                    "PostgreSQL not reachable yet"
                );
                last_error = e;
            }
        }

        if attempt < attempts {
            tokio::time::sleep(delay).await;
        }
    }

    Err(StorageError::ConnectionFailed {
        attempts,
        reason: last_error,
    }
    .into())
}

/// Apply the schema. Idempotent.
pub async fn run_migrations(pool: &Pool) -> FathomResult<()> {
    let conn = pool.get().await.map_err(pool_error)?;
    conn.batch_execute(SCHEMA_MIGRATION)
        .await
        .map_err(|e| StorageError::MigrationFailed {
            reason: e.to_string(),
        })?;
    tracing::info!("Schema migration applied");
    Ok(())
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

fn pool_error(err: PoolError) -> FathomError {
    match err {
        PoolError::Timeout(_) => StorageError::PoolExhausted.into(),
        other => StorageError::ConnectionFailed {
            attempts: 1,
            reason: other.to_string(),
        }
        .into(),
    }
}

fn query_error(operation: &str, err: tokio_postgres::Error) -> FathomError {
    tracing::error!(operation, error = ?err, "Database error");
    StorageError::QueryFailed {
        operation: operation.to_string(),
        reason: err.to_string(),
    }
    .into()
}

fn insert_error(entity: &str, err: tokio_postgres::Error) -> FathomError {
    tracing::error!(entity, error = ?err, "Database insert failed");
    StorageError::InsertFailed {
        entity: entity.to_string(),
        reason: err.to_string(),
    }
    .into()
}

fn transaction_error(err: tokio_postgres::Error) -> FathomError {
    StorageError::TransactionFailed {
        reason: err.to_string(),
    }
    .into()
}

fn to_i32(field: &str, value: u32) -> FathomResult<i32> {
    i32::try_from(value).map_err(|_| {
        StorageError::InsertFailed {
            entity: "sensor".to_string(),
            reason: format!("{field} {value} does not fit in INTEGER"),
        }
        .into()
    })
}

// ============================================================================
// ROW DECODING
// ============================================================================

const SENSOR_COLUMNS: &str = "id, group_name, in_group_id, data_output_rate, x, y, z, \
     transparency, temperature, fishes, created_at, updated_at";

fn sensor_from_row(row: &Row) -> Result<Sensor, tokio_postgres::Error> {
    let in_group_id: i32 = row.try_get("in_group_id")?;
    let data_output_rate: i32 = row.try_get("data_output_rate")?;
    let transparency: i16 = row.try_get("transparency")?;

    Ok(Sensor {
        id: row.try_get("id")?,
        codename: Codename::new(
            row.try_get::<_, String>("group_name")?,
            u32::try_from(in_group_id).unwrap_or(0),
        ),
        coordinates: Coordinates::new(row.try_get("x")?, row.try_get("y")?, row.try_get("z")?),
        data_output_rate: u32::try_from(data_output_rate).unwrap_or(0),
        temperature: row.try_get("temperature")?,
        transparency: transparency.clamp(0, 100) as u8,
        detected_fish: row.try_get("fishes")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn species_from_rows(rows: &[Row]) -> Result<Vec<SpeciesCount>, tokio_postgres::Error> {
    rows.iter()
        .map(|row| Ok(SpeciesCount::new(row.try_get::<_, String>(0)?, row.try_get(1)?)))
        .collect()
}

// ============================================================================
// POSTGRES SENSOR STORE
// ============================================================================

/// Storage port backed by a deadpool PostgreSQL pool.
#[derive(Clone)]
pub struct PgSensorStore {
    pool: Pool,
}

impl PgSensorStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn get_conn(&self) -> FathomResult<Object> {
        self.pool.get().await.map_err(pool_error)
    }

    async fn group_average(&self, operation: &str, column: &str, group: &str) -> FathomResult<f64> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT AVG({column})::float8 FROM sensor WHERE group_name = $1");
        let row = conn
            .query_one(sql.as_str(), &[&group])
            .await
            .map_err(|e| query_error(operation, e))?;
        let average: Option<f64> = row.try_get(0).map_err(|e| query_error(operation, e))?;
        average.ok_or_else(|| {
            StorageError::NoData {
                query: format!("{column} of group {group}"),
            }
            .into()
        })
    }
}

#[async_trait]
impl SensorStore for PgSensorStore {
    async fn get_all_sensors(&self) -> FathomResult<Vec<Sensor>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {SENSOR_COLUMNS} FROM sensor ORDER BY group_name, in_group_id");
        let rows = conn
            .query(sql.as_str(), &[])
            .await
            .map_err(|e| query_error("get_all_sensors", e))?;
        rows.iter()
            .map(sensor_from_row)
            .collect::<Result<_, _>>()
            .map_err(|e| query_error("get_all_sensors", e))
    }

    async fn save_detected_fish(&self, fish: &DetectedFish) -> FathomResult<DetectedFish> {
        let conn = self.get_conn().await?;
        let count = i32::try_from(fish.count).map_err(|_| StorageError::InsertFailed {
            entity: "detected_fish".to_string(),
            reason: format!("count {} does not fit in INTEGER", fish.count),
        })?;
        let row = conn
            .query_one(
                "INSERT INTO detected_fish (id, name, count, sensorid, created_at) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING id, created_at",
                &[&fish.id, &fish.name, &count, &fish.sensor_id, &fish.created_at],
            )
            .await
            .map_err(|e| insert_error("detected_fish", e))?;

        let id: Uuid = row.try_get(0).map_err(|e| insert_error("detected_fish", e))?;
        let created_at: DateTime<Utc> =
            row.try_get(1).map_err(|e| insert_error("detected_fish", e))?;
        Ok(DetectedFish {
            id,
            created_at,
            ..fish.clone()
        })
    }

    async fn update_sensor_data(&self, snapshot: &SensorSnapshot) -> FathomResult<()> {
        let mut conn = self.get_conn().await?;
        let tx = conn.transaction().await.map_err(transaction_error)?;

        let transparency = i16::from(snapshot.transparency);
        let updated = tx
            .execute(
                "UPDATE sensor SET transparency = $1, temperature = $2, fishes = $3, updated_at = $4 \
                 WHERE id = $5",
                &[
                    &transparency,
                    &snapshot.temperature,
                    &snapshot.detected_fish,
                    &snapshot.updated_at,
                    &snapshot.sensor_id,
                ],
            )
            .await
            .map_err(|e| query_error("update_sensor_data", e))?;

        if updated == 0 {
            return Err(StorageError::SensorNotFound {
                id: snapshot.sensor_id,
            }
            .into());
        }

        tx.execute(
            "INSERT INTO temperature_reading (sensor_id, temperature, recorded_at) \
             VALUES ($1, $2, $3)",
            &[&snapshot.sensor_id, &snapshot.temperature, &snapshot.updated_at],
        )
        .await
        .map_err(|e| insert_error("temperature_reading", e))?;

        tx.commit().await.map_err(transaction_error)
    }

    async fn get_transparency(&self, group: &str) -> FathomResult<f64> {
        self.group_average("get_transparency", "transparency", group)
            .await
    }

    async fn get_temperature(&self, group: &str) -> FathomResult<f64> {
        self.group_average("get_temperature", "temperature", group)
            .await
    }

    async fn get_species(&self, group: &str) -> FathomResult<Vec<SpeciesCount>> {
        let conn = self.get_conn().await?;
        let rows = conn
            .query(
                "SELECT df.name, SUM(df.count)::bigint AS total \
                 FROM sensor s \
                 JOIN detected_fish df ON df.id = ANY(s.fishes) \
                 WHERE s.group_name = $1 \
                 GROUP BY df.name \
                 ORDER BY total DESC, df.name ASC",
                &[&group],
            )
            .await
            .map_err(|e| query_error("get_species", e))?;
        species_from_rows(&rows).map_err(|e| query_error("get_species", e))
    }

    async fn get_top_species(
        &self,
        group: &str,
        window: &TimeWindow,
        top: usize,
    ) -> FathomResult<Vec<SpeciesCount>> {
        let conn = self.get_conn().await?;
        let limit = i64::try_from(top).unwrap_or(i64::MAX);
        let rows = conn
            .query(
                "SELECT df.name, SUM(df.count)::bigint AS total \
                 FROM detected_fish df \
                 JOIN sensor s ON s.id = df.sensorid \
                 WHERE s.group_name = $1 \
                   AND ($2::timestamptz IS NULL OR df.created_at >= $2) \
                   AND ($3::timestamptz IS NULL OR df.created_at <= $3) \
                 GROUP BY df.name \
                 ORDER BY total DESC, df.name ASC \
                 LIMIT $4",
                &[&group, &window.from, &window.till, &limit],
            )
            .await
            .map_err(|e| query_error("get_top_species", e))?;
        species_from_rows(&rows).map_err(|e| query_error("get_top_species", e))
    }

    async fn get_region_temperature(
        &self,
        region: &Region,
        extreme: RegionExtreme,
    ) -> FathomResult<Option<f64>> {
        let conn = self.get_conn().await?;
        let aggregate = match extreme {
            RegionExtreme::Min => "MIN",
            RegionExtreme::Max => "MAX",
        };
        let sql = format!(
            "SELECT {aggregate}(temperature) FROM sensor \
             WHERE x BETWEEN $1 AND $2 AND y BETWEEN $3 AND $4 AND z BETWEEN $5 AND $6"
        );
        let row = conn
            .query_one(
                sql.as_str(),
                &[
                    &region.x_min,
                    &region.x_max,
                    &region.y_min,
                    &region.y_max,
                    &region.z_min,
                    &region.z_max,
                ],
            )
            .await
            .map_err(|e| query_error("get_region_temperature", e))?;
        row.try_get(0)
            .map_err(|e| query_error("get_region_temperature", e))
    }

    async fn get_sensor_average_temperature(
        &self,
        codename: &Codename,
        window: &TimeWindow,
    ) -> FathomResult<Option<f64>> {
        let conn = self.get_conn().await?;
        let ordinal = to_i32("in_group_id", codename.ordinal)?;
        let row = conn
            .query_one(
                "SELECT AVG(r.temperature)::float8 \
                 FROM temperature_reading r \
                 JOIN sensor s ON s.id = r.sensor_id \
                 WHERE s.group_name = $1 AND s.in_group_id = $2 \
                   AND ($3::timestamptz IS NULL OR r.recorded_at >= $3) \
                   AND ($4::timestamptz IS NULL OR r.recorded_at <= $4)",
                &[&codename.group, &ordinal, &window.from, &window.till],
            )
            .await
            .map_err(|e| query_error("get_sensor_average_temperature", e))?;
        row.try_get(0)
            .map_err(|e| query_error("get_sensor_average_temperature", e))
    }

    async fn create_sensor_group(&self, id: i32, name: &str) -> FathomResult<()> {
        let conn = self.get_conn().await?;
        let inserted = conn
            .execute(
                "INSERT INTO sensor_group (id, name) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING",
                &[&id, &name],
            )
            .await
            .map_err(|e| insert_error("sensor_group", e))?;
        if inserted == 1 {
            return Ok(());
        }

        // Left behind by an interrupted seed
        let row = conn
            .query_one("SELECT name FROM sensor_group WHERE id = $1", &[&id])
            .await
            .map_err(|e| query_error("create_sensor_group", e))?;
        let existing: String = row
            .try_get(0)
            .map_err(|e| query_error("create_sensor_group", e))?;
        if existing != name {
            return Err(StorageError::InsertFailed {
                entity: "sensor_group".to_string(),
                reason: format!("group {id} is already named {existing}"),
            }
            .into());
        }
        Ok(())
    }

    async fn create_sensors(&self, new_sensors: &[NewSensor]) -> FathomResult<Vec<Sensor>> {
        let mut conn = self.get_conn().await?;
        let tx = conn.transaction().await.map_err(transaction_error)?;
        let now = Utc::now();

        let mut created = Vec::with_capacity(new_sensors.len());
        for new in new_sensors {
            let id = Uuid::now_v7();
            let ordinal = to_i32("in_group_id", new.codename.ordinal)?;
            let rate = to_i32("data_output_rate", new.data_output_rate)?;
            let transparency = i16::from(new.transparency);

            tx.execute(
                "INSERT INTO sensor (id, group_id, group_name, in_group_id, data_output_rate, \
                 x, y, z, transparency, temperature, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
                &[
                    &id,
                    &new.group_id,
                    &new.codename.group,
                    &ordinal,
                    &rate,
                    &new.coordinates.x,
                    &new.coordinates.y,
                    &new.coordinates.z,
                    &transparency,
                    &new.temperature,
                    &now,
                ],
            )
            .await
            .map_err(|e| insert_error("sensor", e))?;

            tx.execute(
                "INSERT INTO temperature_reading (sensor_id, temperature, recorded_at) \
                 VALUES ($1, $2, $3)",
                &[&id, &new.temperature, &now],
            )
            .await
            .map_err(|e| insert_error("temperature_reading", e))?;

            created.push(Sensor {
                id,
                codename: new.codename.clone(),
                coordinates: new.coordinates,
                data_output_rate: new.data_output_rate,
                temperature: new.temperature,
                transparency: new.transparency,
                detected_fish: Vec::new(),
                created_at: now,
                updated_at: None,
            });
        }

        tx.execute(
            "UPDATE sensor_group SET sensors = ( \
                 SELECT COALESCE(ARRAY_AGG(id ORDER BY in_group_id), '{}') \
                 FROM sensor WHERE sensor.group_id = sensor_group.id)",
            &[],
        )
        .await
        .map_err(|e| query_error("create_sensors", e))?;

        tx.commit().await.map_err(transaction_error)?;
        Ok(created)
    }

    async fn count_sensors(&self) -> FathomResult<u64> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_one("SELECT COUNT(*) FROM sensor", &[])
            .await
            .map_err(|e| query_error("count_sensors", e))?;
        let count: i64 = row.try_get(0).map_err(|e| query_error("count_sensors", e))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn health_check(&self) -> FathomResult<()> {
        let conn = self.get_conn().await?;

        // Simple query to verify connectivity
        conn.query_one("SELECT 1", &[])
            .await
            .map_err(|e| query_error("health_check", e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = DbConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.dbname, "fathom");
        assert_eq!(config.connect_attempts, 5);
        assert_eq!(config.connect_retry_secs, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("FATHOM_DB_HOST", "db.internal"),
            ("FATHOM_DB_PORT", "6432"),
            ("FATHOM_DB_POOL_SIZE", "4"),
            ("FATHOM_DB_CONNECT_ATTEMPTS", "10"),
            ("FATHOM_DB_CONNECT_RETRY_SECS", "1"),
        ]
        .into_iter()
        .collect();
        let config = DbConfig::default().apply_env(&|k: &str| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 6432);
        assert_eq!(config.max_size, 4);
        assert_eq!(config.connect_attempts, 10);
        assert_eq!(config.connect_retry_secs, 1);
        assert_eq!(config.dbname, "fathom");
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let config = DbConfig {
            connect_attempts: 0,
            ..DbConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pool_error_mapping() {
        let err = pool_error(PoolError::Closed);
        assert!(matches!(
            err,
            FathomError::Storage(StorageError::ConnectionFailed { attempts: 1, .. })
        ));
    }

    #[test]
    fn test_migration_declares_every_table() {
        for table in ["sensor_group", "sensor", "detected_fish", "temperature_reading"] {
            assert!(
                SCHEMA_MIGRATION.contains(&format!("CREATE TABLE IF NOT EXISTS {table} ")),
                "missing table {table}"
            );
        }
    }

    #[tokio::test]
    async fn test_connect_with_retry_gives_up() {
        // Nothing listens on port 1.
        let config = DbConfig {
            port: 1,
            connect_attempts: 2,
            connect_retry_secs: 0,
            timeout_secs: 1,
            ..DbConfig::default()
        };
        let pool = config.create_pool().expect("pool creation is lazy");
        let err = connect_with_retry(&pool, &config)
            .await
            .expect_err("no database on port 1");
        assert!(matches!(
            err,
            FathomError::Storage(StorageError::ConnectionFailed { attempts: 2, .. })
        ));
    }
}
