//! Sensor fleet entities.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Identifier of a sensor.
pub type SensorId = Uuid;

/// Identifier of a detection record.
pub type DetectionId = Uuid;

/// Group name is the leading non-digit run, the ordinal the trailing digits.
static CODENAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\D+)(\d+)$").expect("Invalid codename regex"));

// ============================================================================
// CODENAME
// ============================================================================

/// Group name plus in-group ordinal, rendered as `alpha3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Codename {
    pub group: String,
    /// 1-based position inside the group.
    pub ordinal: u32,
}

impl Codename {
    pub fn new(group: impl Into<String>, ordinal: u32) -> Self {
        Self {
            group: group.into(),
            ordinal,
        }
    }
}

impl fmt::Display for Codename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.group, self.ordinal)
    }
}

impl FromStr for Codename {
    type Err = ValidationError;

    /// Parse `alpha3` into `("alpha", 3)`. The group part is lowercased.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidCodename {
            codename: s.to_string(),
        };

        let captures = CODENAME_PATTERN.captures(s.trim()).ok_or_else(invalid)?;
        let group = captures.get(1).ok_or_else(invalid)?.as_str();
        let ordinal: u32 = captures
            .get(2)
            .ok_or_else(invalid)?
            .as_str()
            .parse()
            .map_err(|_| invalid())?;

        if ordinal == 0 {
            return Err(invalid());
        }

        Ok(Self::new(group.to_lowercase(), ordinal))
    }
}

// ============================================================================
// COORDINATES
// ============================================================================

/// Fixed position of a sensor. `z` is depth and is never positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coordinates {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn depth(&self) -> f64 {
        self.z
    }
}

// ============================================================================
// SENSOR
// ============================================================================

/// A simulated measurement device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Sensor {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub id: SensorId,
    pub codename: Codename,
    pub coordinates: Coordinates,
    /// Seconds between two readings.
    pub data_output_rate: u32,
    pub temperature: f64,
    /// Percentage in `0..=100`.
    pub transparency: u8,
    /// Detections produced by the latest tick.
    #[cfg_attr(feature = "openapi", schema(value_type = Vec<String>))]
    pub detected_fish: Vec<DetectionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Sensor {
    /// Tick period of this sensor. A zero rate is treated as one second.
    pub fn output_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.data_output_rate.max(1)))
    }

    /// Apply a snapshot written by the scheduler.
    pub fn apply(&mut self, snapshot: &SensorSnapshot) {
        self.temperature = snapshot.temperature;
        self.transparency = snapshot.transparency;
        self.detected_fish = snapshot.detected_fish.clone();
        self.updated_at = Some(snapshot.updated_at);
    }
}

/// Mutable fields persisted by one simulation tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub sensor_id: SensorId,
    pub temperature: f64,
    pub transparency: u8,
    pub detected_fish: Vec<DetectionId>,
    pub updated_at: DateTime<Utc>,
}

/// Sensor row created at bootstrap, before the store assigns an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSensor {
    /// Index of the owning group (0-based, matches `SensorGroup::id`).
    pub group_id: i32,
    pub codename: Codename,
    pub coordinates: Coordinates,
    pub data_output_rate: u32,
    pub transparency: u8,
    pub temperature: f64,
}

// ============================================================================
// GROUPS AND DETECTIONS
// ============================================================================

/// Named collection of sensors. Immutable after bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SensorGroup {
    pub id: i32,
    pub name: String,
    #[cfg_attr(feature = "openapi", schema(value_type = Vec<String>))]
    pub sensors: Vec<SensorId>,
}

/// One species observed by one sensor in one tick. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DetectedFish {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub id: DetectionId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub sensor_id: SensorId,
    pub name: String,
    /// Individuals observed, `1..=20` when generated.
    pub count: u32,
    pub created_at: DateTime<Utc>,
}

/// Aggregated species total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SpeciesCount {
    pub name: String,
    pub count: i64,
}

impl SpeciesCount {
    pub fn new(name: impl Into<String>, count: i64) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codename_parse() {
        let codename: Codename = "alpha3".parse().unwrap();
        assert_eq!(codename, Codename::new("alpha", 3));
        assert_eq!(codename.to_string(), "alpha3");
    }

    #[test]
    fn test_codename_parse_lowercases_group() {
        let codename: Codename = "Gamma12".parse().unwrap();
        assert_eq!(codename.group, "gamma");
        assert_eq!(codename.ordinal, 12);
    }

    #[test]
    fn test_codename_parse_rejects_malformed() {
        for input in ["alpha", "3", "", "alpha0", "al3pha", "alpha-"] {
            assert!(input.parse::<Codename>().is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn test_output_interval_never_zero() {
        let mut sensor = Sensor {
            id: Uuid::nil(),
            codename: Codename::new("alpha", 1),
            coordinates: Coordinates::new(0.0, 0.0, -1.0),
            data_output_rate: 0,
            temperature: 5.0,
            transparency: 50,
            detected_fish: vec![],
            created_at: Utc::now(),
            updated_at: None,
        };
        assert_eq!(sensor.output_interval(), Duration::from_secs(1));

        sensor.data_output_rate = 15;
        assert_eq!(sensor.output_interval(), Duration::from_secs(15));
    }

    #[test]
    fn test_apply_snapshot() {
        let mut sensor = Sensor {
            id: Uuid::now_v7(),
            codename: Codename::new("beta", 2),
            coordinates: Coordinates::new(1.0, 2.0, -3.0),
            data_output_rate: 5,
            temperature: 11.0,
            transparency: 40,
            detected_fish: vec![],
            created_at: Utc::now(),
            updated_at: None,
        };
        let fish = Uuid::now_v7();
        let snapshot = SensorSnapshot {
            sensor_id: sensor.id,
            temperature: 12.345,
            transparency: 47,
            detected_fish: vec![fish],
            updated_at: Utc::now(),
        };

        sensor.apply(&snapshot);
        assert_eq!(sensor.temperature, 12.345);
        assert_eq!(sensor.transparency, 47);
        assert_eq!(sensor.detected_fish, vec![fish]);
        assert_eq!(sensor.updated_at, Some(snapshot.updated_at));
    }
}
