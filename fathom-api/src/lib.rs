//! Fathom API - Sensor Fleet Simulation and Query Service
//!
//! Runs one generation loop per sensor, persists readings through the
//! storage port and serves cache-aside aggregate queries over REST (Axum).
//!
//! Startup order lives in `main.rs`: telemetry, configuration, database,
//! migrations, fleet seeding, scheduler, HTTP server.

pub mod bootstrap;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod extractors;
pub mod jobs;
pub mod macros;
pub mod openapi;
pub mod routes;
pub mod services;
pub mod state;
pub mod telemetry;
pub mod types;

// Re-export commonly used types
pub use bootstrap::{ensure_seeded, plan_fleet, seed_fleet};
pub use config::{ApiConfig, AppConfig, CacheBackendKind, CacheSettings, FleetConfig};
pub use db::{connect_with_retry, run_migrations, DbConfig, PgSensorStore};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use jobs::{FaultPolicy, LoopState, SchedulerConfig, SensorScheduler};
pub use openapi::ApiDoc;
pub use routes::create_api_router;
pub use services::AggregationService;
pub use state::AppState;
pub use types::*;
