//! Configuration Module
//!
//! Settings for the fleet, the cache, the scheduler, the database and the
//! HTTP surface. Values come from, in order of precedence:
//! 1. Environment variables (`FATHOM_*`, plus `PORT`)
//! 2. An optional YAML file named by `FATHOM_CONFIG`
//! 3. Built-in defaults from [`crate::constants`]
//!
//! Every section exposes `from_env()` for the common case and
//! `apply_env(lookup)` so tests can feed variables without touching the
//! process environment.

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use fathom_core::{Codename, ConfigError, FathomResult, SPECIES_CATALOG};
use fathom_storage::{CacheAsideConfig, CacheBackend, InMemoryCacheBackend, LmdbCacheBackend};
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::db::DbConfig;
use crate::jobs::SchedulerConfig;

/// Environment variable naming the YAML config file.
pub const CONFIG_PATH_ENV: &str = "FATHOM_CONFIG";

// ============================================================================
// ENV HELPERS
// ============================================================================

/// Parse `key` from `lookup`. Unparsable values are logged and ignored.
pub(crate) fn env_parse<T, L>(lookup: &L, key: &str) -> Option<T>
where
    T: FromStr,
    L: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable configuration value");
            None
        }
    }
}

/// `true`/`false`, `1`/`0`, `yes`/`no`.
pub(crate) fn env_flag<L>(lookup: &L, key: &str) -> Option<bool>
where
    L: Fn(&str) -> Option<String>,
{
    lookup(key).map(|s| matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
}

fn split_list(raw: &str, separator: char) -> Vec<String> {
    raw.split(separator)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// ============================================================================
// FLEET
// ============================================================================

/// Groups, sensors and species simulated by this process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Lowercase group names. Group ids follow list order starting at 0.
    pub group_names: Vec<String>,
    pub sensors_per_group: u32,
    pub cache_expiration_secs: u64,
    /// Species a sensor can report.
    pub species: Vec<String>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            group_names: DEFAULT_GROUP_NAMES
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            sensors_per_group: DEFAULT_SENSORS_PER_GROUP,
            cache_expiration_secs: DEFAULT_CACHE_EXPIRATION_SECS,
            species: SPECIES_CATALOG.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl FleetConfig {
    /// Environment variables:
    /// - `FATHOM_GROUP_NAMES`: space-separated group names (default: "alpha beta gamma")
    /// - `FATHOM_SENSORS_PER_GROUP`: sensors seeded per group (default: 5)
    /// - `FATHOM_CACHE_EXPIRATION_SECS`: cached aggregate TTL (default: 60)
    /// - `FATHOM_SPECIES`: comma-separated species catalog
    pub fn from_env() -> Self {
        Self::default().apply_env(&|k: &str| std::env::var(k).ok())
    }

    pub fn apply_env<L: Fn(&str) -> Option<String>>(mut self, lookup: &L) -> Self {
        if let Some(raw) = lookup("FATHOM_GROUP_NAMES") {
            self.group_names = raw.split_whitespace().map(str::to_lowercase).collect();
        }
        if let Some(n) = env_parse(lookup, "FATHOM_SENSORS_PER_GROUP") {
            self.sensors_per_group = n;
        }
        if let Some(secs) = env_parse(lookup, "FATHOM_CACHE_EXPIRATION_SECS") {
            self.cache_expiration_secs = secs;
        }
        if let Some(raw) = lookup("FATHOM_SPECIES") {
            self.species = split_list(&raw, ',');
        }
        self
    }

    pub fn cache_expiration(&self) -> Duration {
        Duration::from_secs(self.cache_expiration_secs)
    }

    /// Names must be unique, lowercase and usable as a codename prefix.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.group_names.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "group_names".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for name in &self.group_names {
            let parsed = Codename::from_str(&format!("{name}1"));
            if !matches!(parsed, Ok(ref c) if c.group == *name) {
                return Err(ConfigError::InvalidValue {
                    field: "group_names".to_string(),
                    value: name.clone(),
                    reason: "group names must be lowercase and contain no digits".to_string(),
                });
            }
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "group_names".to_string(),
                    value: name.clone(),
                    reason: "duplicate group name".to_string(),
                });
            }
        }

        if self.sensors_per_group == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sensors_per_group".to_string(),
                value: "0".to_string(),
                reason: "each group needs at least one sensor".to_string(),
            });
        }
        if self.species.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "species".to_string(),
            });
        }
        if !(1..=MAX_CACHE_EXPIRATION_SECS).contains(&self.cache_expiration_secs) {
            return Err(ConfigError::InvalidValue {
                field: "cache_expiration_secs".to_string(),
                value: self.cache_expiration_secs.to_string(),
                reason: format!("must be between 1 and {MAX_CACHE_EXPIRATION_SECS} seconds"),
            });
        }
        Ok(())
    }
}

// ============================================================================
// CACHE BACKEND
// ============================================================================

/// Which cache backend fronts the aggregate queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// Process-local map, lost on restart.
    #[default]
    Memory,
    /// LMDB files on disk.
    Lmdb,
}

impl FromStr for CacheBackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "lmdb" => Ok(Self::Lmdb),
            other => Err(ConfigError::InvalidValue {
                field: "cache.backend".to_string(),
                value: other.to_string(),
                reason: "expected 'memory' or 'lmdb'".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub backend: CacheBackendKind,
    pub lmdb_path: PathBuf,
    pub lmdb_map_size_mb: usize,
    /// Run one storage computation per cold key under concurrent reads.
    pub coalesce_misses: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::default(),
            lmdb_path: PathBuf::from(DEFAULT_LMDB_PATH),
            lmdb_map_size_mb: DEFAULT_LMDB_MAP_SIZE_MB,
            coalesce_misses: false,
        }
    }
}

impl CacheSettings {
    /// Environment variables:
    /// - `FATHOM_CACHE_BACKEND`: "memory" or "lmdb" (default: memory)
    /// - `FATHOM_CACHE_PATH`: LMDB directory
    /// - `FATHOM_CACHE_MAP_SIZE_MB`: LMDB map size
    /// - `FATHOM_CACHE_COALESCE`: coalesce concurrent misses (default: false)
    pub fn from_env() -> Self {
        Self::default().apply_env(&|k: &str| std::env::var(k).ok())
    }

    pub fn apply_env<L: Fn(&str) -> Option<String>>(mut self, lookup: &L) -> Self {
        if let Some(kind) = env_parse(lookup, "FATHOM_CACHE_BACKEND") {
            self.backend = kind;
        }
        if let Some(path) = lookup("FATHOM_CACHE_PATH") {
            self.lmdb_path = PathBuf::from(path);
        }
        if let Some(size) = env_parse(lookup, "FATHOM_CACHE_MAP_SIZE_MB") {
            self.lmdb_map_size_mb = size;
        }
        if let Some(flag) = env_flag(lookup, "FATHOM_CACHE_COALESCE") {
            self.coalesce_misses = flag;
        }
        self
    }

    /// Open the configured backend.
    pub fn open_backend(&self) -> FathomResult<Arc<dyn CacheBackend>> {
        match self.backend {
            CacheBackendKind::Memory => Ok(Arc::new(InMemoryCacheBackend::new())),
            CacheBackendKind::Lmdb => {
                let backend = LmdbCacheBackend::new(&self.lmdb_path, self.lmdb_map_size_mb)?;
                Ok(Arc::new(backend))
            }
        }
    }

    pub fn cache_aside_config(&self, expiration: Duration) -> CacheAsideConfig {
        CacheAsideConfig::new()
            .with_expiration(expiration)
            .with_coalescing(self.coalesce_misses)
    }
}

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// HTTP listener, timeout and CORS settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
    pub port: u16,
    pub request_timeout_secs: u64,

    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    /// Whether to allow credentials in CORS requests.
    pub cors_allow_credentials: bool,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_API_BIND.to_string(),
            port: DEFAULT_API_PORT,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            cors_origins: Vec::new(),
            cors_allow_credentials: false,
            cors_max_age_secs: DEFAULT_CORS_MAX_AGE_SECS,
        }
    }
}

impl ApiConfig {
    /// Environment variables:
    /// - `FATHOM_API_BIND`: listen host (default: 0.0.0.0)
    /// - `PORT` or `FATHOM_API_PORT`: listen port (default: 8080)
    /// - `FATHOM_REQUEST_TIMEOUT_SECS`: per-request timeout (default: 30)
    /// - `FATHOM_CORS_ORIGINS`: comma-separated allowed origins (empty = allow all)
    /// - `FATHOM_CORS_ALLOW_CREDENTIALS`: "true" or "false" (default: false)
    /// - `FATHOM_CORS_MAX_AGE_SECS`: preflight cache duration (default: 86400)
    pub fn from_env() -> Self {
        Self::default().apply_env(&|k: &str| std::env::var(k).ok())
    }

    pub fn apply_env<L: Fn(&str) -> Option<String>>(mut self, lookup: &L) -> Self {
        if let Some(bind) = lookup("FATHOM_API_BIND") {
            self.bind = bind;
        }
        if let Some(port) =
            env_parse(lookup, "PORT").or_else(|| env_parse(lookup, "FATHOM_API_PORT"))
        {
            self.port = port;
        }
        if let Some(secs) = env_parse(lookup, "FATHOM_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = secs;
        }
        if let Some(raw) = lookup("FATHOM_CORS_ORIGINS") {
            self.cors_origins = split_list(&raw, ',');
        }
        if let Some(flag) = env_flag(lookup, "FATHOM_CORS_ALLOW_CREDENTIALS") {
            self.cors_allow_credentials = flag;
        }
        if let Some(secs) = env_parse(lookup, "FATHOM_CORS_MAX_AGE_SECS") {
            self.cors_max_age_secs = secs;
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// `host:port` for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Check if running in production mode (strict CORS).
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }
}

// ============================================================================
// APPLICATION CONFIGURATION
// ============================================================================

/// Every configuration section of the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub fleet: FleetConfig,
    pub cache: CacheSettings,
    pub scheduler: SchedulerConfig,
    pub db: DbConfig,
    pub api: ApiConfig,
}

impl AppConfig {
    /// Load the YAML file named by `FATHOM_CONFIG` (if set), apply the
    /// environment on top and validate the result.
    pub fn load() -> Result<Self, ConfigError> {
        let lookup = |k: &str| std::env::var(k).ok();
        let base = match lookup(CONFIG_PATH_ENV) {
            Some(path) => Self::from_yaml_file(&path)?,
            None => Self::default(),
        };
        let config = base.apply_env(&lookup);
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::FileUnreadable {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_yaml_str(&raw).map_err(|e| match e {
            ConfigError::InvalidValue { reason, .. } => ConfigError::FileUnreadable {
                path: path.to_string(),
                reason,
            },
            other => other,
        })
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(raw).map_err(|e| ConfigError::InvalidValue {
            field: "config".to_string(),
            value: "<yaml>".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn apply_env<L: Fn(&str) -> Option<String>>(self, lookup: &L) -> Self {
        Self {
            fleet: self.fleet.apply_env(lookup),
            cache: self.cache.apply_env(lookup),
            scheduler: self.scheduler.apply_env(lookup),
            db: self.db.apply_env(lookup),
            api: self.api.apply_env(lookup),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fleet.validate()?;
        self.db.validate()
    }
}
