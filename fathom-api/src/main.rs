//! Fathom API Server Entry Point
//!
//! Bootstraps configuration, prepares the database and the sensor fleet,
//! starts one generation loop per sensor and serves the Axum HTTP API.

use std::sync::Arc;

use axum::Router;
use fathom_api::{
    connect_with_retry, create_api_router, ensure_seeded, run_migrations, AggregationService,
    ApiError, ApiResult, AppConfig, AppState, PgSensorStore, SensorScheduler,
};
use fathom_core::FathomError;
use fathom_storage::{CacheAside, SensorStore};
use rand::rngs::StdRng;
use rand::SeedableRng;

use fathom_api::telemetry::{init_tracer, TelemetryConfig};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracer(&telemetry_config)?;

    let config = AppConfig::load().map_err(FathomError::from)?;

    // Startup failures below are fatal
    let pool = config.db.create_pool()?;
    connect_with_retry(&pool, &config.db).await?;
    run_migrations(&pool).await?;

    let store: Arc<dyn SensorStore> = Arc::new(PgSensorStore::new(pool));
    let mut rng = StdRng::from_os_rng();
    let seeded = ensure_seeded(store.as_ref(), &config.fleet, &mut rng).await?;
    let sensors = store.get_all_sensors().await?;
    tracing::info!(seeded, sensors = sensors.len(), "Sensor fleet loaded");

    let backend = config.cache.open_backend()?;
    let cache = CacheAside::new(
        backend,
        config
            .cache
            .cache_aside_config(config.fleet.cache_expiration()),
    );
    let aggregation = AggregationService::new(store.clone(), cache, &config.fleet.group_names);

    let scheduler = Arc::new(SensorScheduler::new(
        store.clone(),
        config.scheduler.clone(),
        config.fleet.species.clone(),
    ));
    let started = scheduler.start(&sensors).await;
    tracing::info!(
        started,
        fault_policy = ?config.scheduler.fault_policy,
        "Sensor scheduler started"
    );

    let state = AppState::new(store, aggregation, scheduler.clone());
    let app: Router = create_api_router(state, &config.api);

    let addr = config.api.bind_addr();
    tracing::info!(%addr, "Starting Fathom API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    let served = tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            Ok(())
        }
    };

    scheduler.shutdown().await;
    let summary = scheduler.summary();
    tracing::info!(
        ticks_completed = summary.counters.ticks_completed,
        faults_reported = summary.counters.faults_reported,
        "Sensor scheduler stopped"
    );
    served
}
