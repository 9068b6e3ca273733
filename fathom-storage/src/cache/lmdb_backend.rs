//! LMDB-backed cache implementation.
//!
//! Uses the heed crate (Rust bindings for LMDB) so cached aggregates survive
//! a process restart. Each value is stored as
//! `[expires_at unix millis: 8 bytes LE][utf-8 value]`.
//!
//! Expired entries are removed lazily on the next read of their key.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use fathom_core::{CacheError, FathomError, FathomResult};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use super::traits::{CacheBackend, CacheStats};

const EXPIRY_PREFIX_LEN: usize = 8;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored bytes are not a valid entry.
    #[error("Corrupt entry: {0}")]
    Corrupt(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for FathomError {
    fn from(e: LmdbCacheError) -> Self {
        FathomError::Cache(CacheError::Backend {
            operation: "lmdb".to_string(),
            reason: e.to_string(),
        })
    }
}

/// Decoded entry: expiry and value.
fn decode_entry(bytes: &[u8]) -> Result<(i64, &str), LmdbCacheError> {
    if bytes.len() < EXPIRY_PREFIX_LEN {
        return Err(LmdbCacheError::Corrupt(format!(
            "entry is {} bytes, shorter than its expiry prefix",
            bytes.len()
        )));
    }
    let (prefix, body) = bytes.split_at(EXPIRY_PREFIX_LEN);
    let expiry_bytes: [u8; EXPIRY_PREFIX_LEN] = prefix
        .try_into()
        .map_err(|_| LmdbCacheError::Corrupt("invalid expiry prefix".into()))?;
    let value = std::str::from_utf8(body).map_err(|e| LmdbCacheError::Corrupt(e.to_string()))?;
    Ok((i64::from_le_bytes(expiry_bytes), value))
}

fn encode_entry(expires_at_millis: i64, value: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(EXPIRY_PREFIX_LEN + value.len());
    bytes.extend_from_slice(&expires_at_millis.to_le_bytes());
    bytes.extend_from_slice(value.as_bytes());
    bytes
}

/// LMDB-backed cache with per-entry time-to-live.
pub struct LmdbCacheBackend {
    env: Env,
    db: Database<Bytes, Bytes>,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
}

impl LmdbCacheBackend {
    /// Open (or create) a cache under `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            db,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        })
    }

    /// Live value under `key`, deleting it if expired.
    fn live_value(&self, key: &str) -> Result<Option<String>, LmdbCacheError> {
        let now_millis = Utc::now().timestamp_millis();

        let expired = {
            let rtxn = self
                .env
                .read_txn()
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            let Some(bytes) = self
                .db
                .get(&rtxn, key.as_bytes())
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
            else {
                return Ok(None);
            };
            let (expires_at, value) = decode_entry(bytes)?;
            if now_millis < expires_at {
                return Ok(Some(value.to_string()));
            }
            true
        };

        if expired {
            let mut wtxn = self
                .env
                .write_txn()
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            let deleted = self
                .db
                .delete(&mut wtxn, key.as_bytes())
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            wtxn.commit()
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            if deleted {
                self.expirations.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(None)
    }

    fn entry_count(&self) -> Result<u64, LmdbCacheError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        self.db
            .len(&rtxn)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))
    }
}

#[async_trait]
impl CacheBackend for LmdbCacheBackend {
    async fn exists(&self, key: &str) -> FathomResult<bool> {
        Ok(self.live_value(key)?.is_some())
    }

    async fn get(&self, key: &str) -> FathomResult<Option<String>> {
        let value = self.live_value(key)?;
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> FathomResult<()> {
        let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp_millis().saturating_add(ttl_millis);
        let bytes = encode_entry(expires_at, value);

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        self.db
            .put(&mut wtxn, key.as_bytes(), &bytes)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> FathomResult<bool> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let deleted = self
            .db
            .delete(&mut wtxn, key.as_bytes())
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        Ok(deleted)
    }

    async fn stats(&self) -> FathomResult<CacheStats> {
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.entry_count()?,
            expirations: self.expirations.load(Ordering::Relaxed),
        })
    }
}
