//! Request and response types for the REST API.

use chrono::{DateTime, Utc};
use fathom_core::{RegionExtreme, SpeciesCount};
use fathom_storage::CacheRead;
use serde::{Deserialize, Serialize};

// ============================================================================
// QUERY PARAMETERS
// ============================================================================

/// Optional `from`/`till` bounds in UNIX seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowQuery {
    pub from: Option<i64>,
    pub till: Option<i64>,
}

/// Bounding box of a regional query. Every bound is required.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionQuery {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub z_min: f64,
    pub z_max: f64,
}

// ============================================================================
// RESPONSES
// ============================================================================

/// Where a value came from and when it was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(utoipa::ToSchema)]
pub struct Freshness {
    /// True when served from the cache.
    pub cached: bool,
    pub computed_at: DateTime<Utc>,
}

impl<T> From<&CacheRead<T>> for Freshness {
    fn from(read: &CacheRead<T>) -> Self {
        Self {
            cached: read.was_cache_hit(),
            computed_at: read.cached_at(),
        }
    }
}

/// Average transparency or temperature of a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[derive(utoipa::ToSchema)]
pub struct GroupAverageResponse {
    pub group: String,
    pub value: f64,
    #[serde(flatten)]
    pub freshness: Freshness,
}

/// Species currently reported by a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[derive(utoipa::ToSchema)]
pub struct SpeciesResponse {
    pub group: String,
    pub species: Vec<SpeciesCount>,
    #[serde(flatten)]
    pub freshness: Freshness,
}

/// Top-N species of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[derive(utoipa::ToSchema)]
pub struct TopSpeciesResponse {
    pub group: String,
    pub top: usize,
    pub species: Vec<SpeciesCount>,
    /// Present when a time window was applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub freshness: Freshness,
}

/// Lowest or highest temperature inside a region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[derive(utoipa::ToSchema)]
pub struct RegionTemperatureResponse {
    pub extreme: RegionExtreme,
    pub value: f64,
    #[serde(flatten)]
    pub freshness: Freshness,
}

/// Average temperature of one sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[derive(utoipa::ToSchema)]
pub struct SensorTemperatureResponse {
    pub codename: String,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub freshness: Freshness,
}
