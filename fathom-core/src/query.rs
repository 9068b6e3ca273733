//! Query parameter types shared by the storage port and the aggregation service.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::sensor::Coordinates;

/// Timestamp layout used in human-readable window descriptions.
pub const WINDOW_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

// ============================================================================
// REGION
// ============================================================================

/// Closed axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Region {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub z_min: f64,
    pub z_max: f64,
}

impl Region {
    /// Build a region and check that every axis is ordered.
    pub fn new(
        x: (f64, f64),
        y: (f64, f64),
        z: (f64, f64),
    ) -> Result<Self, ValidationError> {
        let region = Self {
            x_min: x.0,
            x_max: x.1,
            y_min: y.0,
            y_max: y.1,
            z_min: z.0,
            z_max: z.1,
        };
        region.validate()?;
        Ok(region)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for (axis, min, max) in [
            ('x', self.x_min, self.x_max),
            ('y', self.y_min, self.y_max),
            ('z', self.z_min, self.z_max),
        ] {
            if !min.is_finite() || !max.is_finite() {
                return Err(ValidationError::InvalidValue {
                    field: format!("{axis} bounds"),
                    reason: "must be finite numbers".to_string(),
                });
            }
            if min > max {
                return Err(ValidationError::InvalidRegion { axis, min, max });
            }
        }
        Ok(())
    }

    /// Inclusive on every bound.
    pub fn contains(&self, point: &Coordinates) -> bool {
        (self.x_min..=self.x_max).contains(&point.x)
            && (self.y_min..=self.y_max).contains(&point.y)
            && (self.z_min..=self.z_max).contains(&point.z)
    }
}

/// Which end of the temperature range a regional query asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum RegionExtreme {
    Min,
    Max,
}

impl RegionExtreme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

impl fmt::Display for RegionExtreme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// TIME WINDOW
// ============================================================================

/// Optional `[from, till]` bounds. Missing bounds are open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: Option<DateTime<Utc>>,
    pub till: Option<DateTime<Utc>>,
}

impl TimeWindow {
    /// A window covering all time.
    pub fn all_time() -> Self {
        Self::default()
    }

    /// Normalize UNIX-second bounds into UTC timestamps.
    pub fn from_unix(from: Option<i64>, till: Option<i64>) -> Result<Self, ValidationError> {
        if let (Some(from), Some(till)) = (from, till) {
            if from > till {
                return Err(ValidationError::InvalidTimeWindow { from, till });
            }
        }

        Ok(Self {
            from: from.map(|s| unix_to_utc("from", s)).transpose()?,
            till: till.map(|s| unix_to_utc("till", s)).transpose()?,
        })
    }

    pub fn is_all_time(&self) -> bool {
        self.from.is_none() && self.till.is_none()
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| ts >= from) && self.till.map_or(true, |till| ts <= till)
    }

    /// Bounds as UNIX seconds, used for deterministic cache keys.
    pub fn unix_bounds(&self) -> (Option<i64>, Option<i64>) {
        (
            self.from.map(|ts| ts.timestamp()),
            self.till.map(|ts| ts.timestamp()),
        )
    }

    /// `period from <start> till <end>`, or `None` for an all-time window.
    pub fn describe(&self) -> Option<String> {
        if self.is_all_time() {
            return None;
        }
        let render = |bound: Option<DateTime<Utc>>, open: &str| {
            bound
                .map(|ts| ts.format(WINDOW_TIMESTAMP_FORMAT).to_string())
                .unwrap_or_else(|| open.to_string())
        };
        Some(format!(
            "period from {} till {}",
            render(self.from, "the beginning"),
            render(self.till, "now")
        ))
    }
}

fn unix_to_utc(field: &str, seconds: i64) -> Result<DateTime<Utc>, ValidationError> {
    DateTime::from_timestamp(seconds, 0).ok_or_else(|| ValidationError::InvalidValue {
        field: field.to_string(),
        reason: format!("{seconds} is not a representable UNIX timestamp"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_rejects_inverted_axis() {
        let err = Region::new((0.0, 1.0), (5.0, -5.0), (-10.0, 0.0)).unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidRegion {
                axis: 'y',
                min: 5.0,
                max: -5.0
            }
        );
    }

    #[test]
    fn test_region_rejects_nan() {
        assert!(Region::new((f64::NAN, 1.0), (0.0, 1.0), (0.0, 1.0)).is_err());
    }

    #[test]
    fn test_region_contains_is_inclusive() {
        let region = Region::new((-1.0, 1.0), (-1.0, 1.0), (-5.0, 0.0)).unwrap();
        assert!(region.contains(&Coordinates::new(1.0, -1.0, 0.0)));
        assert!(region.contains(&Coordinates::new(0.0, 0.0, -5.0)));
        assert!(!region.contains(&Coordinates::new(0.0, 0.0, -5.1)));
    }

    #[test]
    fn test_time_window_from_unix() {
        let window = TimeWindow::from_unix(Some(1_700_000_000), Some(1_700_000_600)).unwrap();
        assert_eq!(window.unix_bounds(), (Some(1_700_000_000), Some(1_700_000_600)));
        assert!(!window.is_all_time());
    }

    #[test]
    fn test_time_window_rejects_reversed_bounds() {
        let err = TimeWindow::from_unix(Some(20), Some(10)).unwrap_err();
        assert_eq!(err, ValidationError::InvalidTimeWindow { from: 20, till: 10 });
    }

    #[test]
    fn test_time_window_open_ended_contains() {
        let window = TimeWindow::from_unix(Some(100), None).unwrap();
        let before = DateTime::from_timestamp(99, 0).unwrap();
        let after = DateTime::from_timestamp(1_000_000, 0).unwrap();
        assert!(!window.contains(before));
        assert!(window.contains(after));
        assert!(TimeWindow::all_time().contains(before));
    }

    #[test]
    fn test_time_window_describe() {
        assert_eq!(TimeWindow::all_time().describe(), None);

        let window = TimeWindow::from_unix(Some(0), Some(60)).unwrap();
        assert_eq!(
            window.describe().unwrap(),
            "period from 1970-01-01 00:00:00.000000 till 1970-01-01 00:01:00.000000"
        );
    }
}
