//! Fathom Core - sensor fleet entities, query types and reading generators.
//!
//! This crate has no I/O. Storage, caching and the HTTP surface live in
//! `fathom-storage` and `fathom-api`.

pub mod error;
pub mod generation;
pub mod query;
pub mod sensor;

pub use error::{CacheError, ConfigError, FathomError, FathomResult, StorageError, ValidationError};
pub use generation::{
    bootstrap_coordinates, initial_transparency, next_detected_fish, next_temperature,
    next_transparency, pick_output_rate, round3, temperature_floor, OUTPUT_RATES,
    SPECIES_CATALOG,
};
pub use query::{Region, RegionExtreme, TimeWindow, WINDOW_TIMESTAMP_FORMAT};
pub use sensor::{
    Codename, Coordinates, DetectedFish, DetectionId, NewSensor, Sensor, SensorGroup, SensorId,
    SensorSnapshot, SpeciesCount,
};
