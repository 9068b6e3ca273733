//! Error types for Fathom operations

use thiserror::Error;
use uuid::Uuid;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Sensor not found: {id}")]
    SensorNotFound { id: Uuid },

    #[error("No data for {query}")]
    NoData { query: String },

    #[error("Query failed during {operation}: {reason}")]
    QueryFailed { operation: String, reason: String },

    #[error("Insert failed for {entity}: {reason}")]
    InsertFailed { entity: String, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Connection failed after {attempts} attempt(s): {reason}")]
    ConnectionFailed { attempts: u32, reason: String },

    #[error("Connection pool exhausted")]
    PoolExhausted,

    #[error("Migration failed: {reason}")]
    MigrationFailed { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Cache layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend failed during {operation}: {reason}")]
    Backend { operation: String, reason: String },

    #[error("Failed to encode cache value for {key}: {reason}")]
    Encode { key: String, reason: String },

    #[error("Failed to decode cache value for {key}: {reason}")]
    Decode { key: String, reason: String },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("Unknown sensor group: {group}")]
    UnknownGroup { group: String },

    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid codename '{codename}': expected <group><ordinal>, e.g. alpha3")]
    InvalidCodename { codename: String },

    #[error("Invalid region on {axis} axis: min {min} exceeds max {max}")]
    InvalidRegion { axis: char, min: f64, max: f64 },

    #[error("Invalid time window: from {from} is after till {till}")]
    InvalidTimeWindow { from: i64, till: i64 },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read configuration file {path}: {reason}")]
    FileUnreadable { path: String, reason: String },
}

/// Master error type for all Fathom errors.
#[derive(Debug, Clone, Error)]
pub enum FathomError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl FathomError {
    /// Returns true for errors caused by caller input.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Result type alias for Fathom operations.
pub type FathomResult<T> = Result<T, FathomError>;

// =============================================================================
// TESTS
// =============================================================================
