//! Background Jobs for the Fathom API
//!
//! - `sensor_scheduler`: one ticking simulation loop per sensor
//!
//! # Usage
//!
//! The scheduler is started during server startup, after bootstrap seeding:
//!
//! ```ignore
//! use fathom_api::jobs::{SchedulerConfig, SensorScheduler};
//!
//! let scheduler = SensorScheduler::new(Arc::clone(&store), SchedulerConfig::from_env(), catalog);
//! scheduler.start(&store.get_all_sensors().await?).await;
//!
//! // On shutdown
//! scheduler.shutdown().await;
//! ```

pub mod sensor_scheduler;

// Re-export commonly used types
pub use sensor_scheduler::{
    FaultKind, FaultPolicy, LoopState, SchedulerConfig, SchedulerMetricsSnapshot,
    SchedulerSummary, SensorFault, SensorLoop, SensorScheduler, TickOutcome,
};
