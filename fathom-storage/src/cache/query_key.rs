//! Deterministic cache keys for aggregate queries.
//!
//! A `QueryKey` can only be built through one constructor per query kind,
//! so every parameter that affects the result is part of the key and two
//! different queries never share an entry.
//!
//! # Format
//!
//! `fathom:v1:<kind>:<param>=<value>[:<param>=<value>...]`
//!
//! Open time-window bounds render as `*`. Floats use Rust's shortest
//! round-trip formatting with `-0` folded into `0`.

use std::fmt;

use fathom_core::{Codename, Region, RegionExtreme, TimeWindow};

/// Prefix shared by every key. Bump the version when the encoding changes.
const KEY_PREFIX: &str = "fathom:v1";

/// Aggregate query families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    AverageTemperature,
    AverageTransparency,
    Species,
    TopSpecies,
    RegionTemperature,
    SensorAverageTemperature,
}

impl QueryKind {
    pub const ALL: [QueryKind; 6] = [
        Self::AverageTemperature,
        Self::AverageTransparency,
        Self::Species,
        Self::TopSpecies,
        Self::RegionTemperature,
        Self::SensorAverageTemperature,
    ];

    /// Stable label, also used as a metrics label value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AverageTemperature => "temperature:avg",
            Self::AverageTransparency => "transparency:avg",
            Self::Species => "species",
            Self::TopSpecies => "species:top",
            Self::RegionTemperature => "region:temperature",
            Self::SensorAverageTemperature => "sensor:temperature:avg",
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache key for one aggregate query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    kind: QueryKind,
    encoded: String,
}

fn float_part(value: f64) -> String {
    // -0.0 and 0.0 describe the same bound.
    let value = if value == 0.0 { 0.0 } else { value };
    format!("{value}")
}

fn bound_part(bound: Option<i64>) -> String {
    bound.map_or_else(|| "*".to_string(), |s| s.to_string())
}

fn window_parts(window: &TimeWindow) -> String {
    let (from, till) = window.unix_bounds();
    format!("from={}:till={}", bound_part(from), bound_part(till))
}

impl QueryKey {
    fn build(kind: QueryKind, params: &str) -> Self {
        Self {
            kind,
            encoded: format!("{KEY_PREFIX}:{}:{params}", kind.as_str()),
        }
    }

    pub fn average_temperature(group: &str) -> Self {
        Self::build(QueryKind::AverageTemperature, &format!("group={group}"))
    }

    pub fn average_transparency(group: &str) -> Self {
        Self::build(QueryKind::AverageTransparency, &format!("group={group}"))
    }

    pub fn species(group: &str) -> Self {
        Self::build(QueryKind::Species, &format!("group={group}"))
    }

    pub fn top_species(group: &str, top: usize, window: &TimeWindow) -> Self {
        Self::build(
            QueryKind::TopSpecies,
            &format!("group={group}:top={top}:{}", window_parts(window)),
        )
    }

    pub fn region_temperature(region: &Region, extreme: RegionExtreme) -> Self {
        Self::build(
            QueryKind::RegionTemperature,
            &format!(
                "{}:x={},{}:y={},{}:z={},{}",
                extreme.as_str(),
                float_part(region.x_min),
                float_part(region.x_max),
                float_part(region.y_min),
                float_part(region.y_max),
                float_part(region.z_min),
                float_part(region.z_max),
            ),
        )
    }

    pub fn sensor_average_temperature(codename: &Codename, window: &TimeWindow) -> Self {
        Self::build(
            QueryKind::SensorAverageTemperature,
            &format!("sensor={codename}:{}", window_parts(window)),
        )
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl AsRef<str> for QueryKey {
    fn as_ref(&self) -> &str {
        &self.encoded
    }
}
