//! Constants for Fathom API
//!
//! Default values for configuration. Every `DEFAULT_*` can be overridden by
//! the YAML config file or an environment variable.

// ============================================================================
// FLEET
// ============================================================================

/// Space-separated group names seeded at bootstrap.
pub const DEFAULT_GROUP_NAMES: &str = "alpha beta gamma";

/// Sensors created per group at bootstrap.
pub const DEFAULT_SENSORS_PER_GROUP: u32 = 5;

/// Time-to-live of cached aggregates in seconds.
pub const DEFAULT_CACHE_EXPIRATION_SECS: u64 = 60;

/// Upper bound accepted for the cache time-to-live (one week).
pub const MAX_CACHE_EXPIRATION_SECS: u64 = 7 * 24 * 60 * 60;

// ============================================================================
// CACHE BACKEND
// ============================================================================

/// Directory of the LMDB cache when that backend is selected.
pub const DEFAULT_LMDB_PATH: &str = "./data/cache";

/// LMDB map size in megabytes.
pub const DEFAULT_LMDB_MAP_SIZE_MB: usize = 64;

// ============================================================================
// SCHEDULER
// ============================================================================

/// Capacity of the fault log channel between sensor loops and the supervisor.
pub const DEFAULT_FAULT_LOG_CAPACITY: usize = 256;

/// Faults kept in memory for the readiness report.
pub const RECENT_FAULTS_KEPT: usize = 32;

// ============================================================================
// DATABASE
// ============================================================================

pub const DEFAULT_DB_HOST: &str = "localhost";
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_DB_NAME: &str = "fathom";
pub const DEFAULT_DB_USER: &str = "postgres";

/// Maximum pooled connections.
pub const DEFAULT_DB_POOL_SIZE: usize = 16;

/// Seconds to wait for a pooled connection.
pub const DEFAULT_DB_TIMEOUT_SECS: u64 = 30;

/// Connection attempts made at startup before giving up.
pub const DEFAULT_DB_CONNECT_ATTEMPTS: u32 = 5;

/// Fixed delay between startup connection attempts in seconds.
pub const DEFAULT_DB_CONNECT_RETRY_SECS: u64 = 5;

// ============================================================================
// HTTP
// ============================================================================

pub const DEFAULT_API_BIND: &str = "0.0.0.0";
pub const DEFAULT_API_PORT: u16 = 8080;

/// Per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default CORS max age in seconds (24 hours)
pub const DEFAULT_CORS_MAX_AGE_SECS: u64 = 86400;

// ============================================================================
// SERVER URLs
// ============================================================================

/// Development server URL
pub const DEV_SERVER_URL: &str = "http://localhost:8080";
