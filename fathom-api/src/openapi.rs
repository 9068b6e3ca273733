//! OpenAPI Specification for Fathom API
//!
//! Generated by utoipa from the route annotations and the response types.

use utoipa::OpenApi;

use crate::error::{ApiError, ErrorCode};
use crate::jobs::{SchedulerMetricsSnapshot, SchedulerSummary, SensorFault};
use crate::routes::health::{ComponentHealth, HealthDetails, HealthResponse, HealthStatus};
use crate::routes::{group, health, region, sensor};
use crate::telemetry::metrics;
use crate::types::*;

use fathom_core::{DetectedFish, RegionExtreme, Sensor, SensorGroup, SpeciesCount};

/// OpenAPI document for Fathom API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Fathom API",
        version = "0.1.0",
        description = "Aggregate queries over a simulated underwater sensor fleet",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:8080", description = "Local Development")
    ),
    tags(
        (name = "Groups", description = "Averages and species counts per sensor group"),
        (name = "Regions", description = "Temperature extremes inside a bounding box"),
        (name = "Sensors", description = "Per-sensor temperature history"),
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Observability", description = "Prometheus metrics")
    ),
    paths(
        group::average_transparency,
        group::average_temperature,
        group::species,
        group::top_species,
        region::min_temperature,
        region::max_temperature,
        sensor::average_temperature,
        health::ping,
        health::liveness,
        health::readiness,
        metrics::metrics_handler,
    ),
    components(schemas(
        ApiError,
        ErrorCode,
        Freshness,
        GroupAverageResponse,
        SpeciesResponse,
        TopSpeciesResponse,
        RegionTemperatureResponse,
        SensorTemperatureResponse,
        SpeciesCount,
        RegionExtreme,
        HealthResponse,
        HealthStatus,
        HealthDetails,
        ComponentHealth,
        SchedulerSummary,
        SchedulerMetricsSnapshot,
        SensorFault,
        Sensor,
        SensorGroup,
        DetectedFish,
    ))
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate OpenAPI spec as JSON string.
    pub fn to_json() -> Result<String, serde_json::Error> {
        let openapi = Self::openapi();
        serde_json::to_string_pretty(&openapi)
    }

    /// Generate OpenAPI spec as YAML string.
    #[cfg(feature = "openapi")]
    pub fn to_yaml() -> Result<String, String> {
        let openapi = Self::openapi();
        serde_yaml::to_string(&openapi).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_generation() -> Result<(), String> {
        let openapi = ApiDoc::openapi();

        assert_eq!(openapi.info.title, "Fathom API");
        assert_eq!(openapi.info.version, "0.1.0");

        let servers = openapi
            .servers
            .as_ref()
            .ok_or_else(|| "OpenAPI servers missing".to_string())?;
        assert_eq!(servers.len(), 1);

        assert!(openapi
            .paths
            .paths
            .contains_key("/api/v1/group/{group}/species/top/{top}"));
        assert!(openapi
            .paths
            .paths
            .contains_key("/api/v1/sensor/{codename}/temperature/average"));
        Ok(())
    }

    #[test]
    fn test_openapi_json_serialization() -> Result<(), String> {
        let json = ApiDoc::to_json().map_err(|e| format!("Failed to serialize OpenAPI: {}", e))?;
        let parsed: serde_json::Value =
            serde_json::from_str(&json).map_err(|e| format!("Invalid JSON: {}", e))?;
        assert!(parsed["components"]["schemas"]["TopSpeciesResponse"].is_object());
        Ok(())
    }

    #[test]
    fn test_identifiers_are_uuid_strings() -> Result<(), String> {
        let json = ApiDoc::to_json().map_err(|e| e.to_string())?;
        let parsed: serde_json::Value = serde_json::from_str(&json).map_err(|e| e.to_string())?;
        let schemas = &parsed["components"]["schemas"];

        for (schema, field) in [
            ("Sensor", "id"),
            ("DetectedFish", "id"),
            ("DetectedFish", "sensor_id"),
            ("SensorFault", "sensor_id"),
        ] {
            let property = &schemas[schema]["properties"][field];
            assert_eq!(property["type"], "string", "{schema}.{field}");
            assert_eq!(property["format"], "uuid", "{schema}.{field}");
        }
        assert_eq!(schemas["Sensor"]["properties"]["detected_fish"]["type"], "array");
        assert_eq!(schemas["SensorGroup"]["properties"]["sensors"]["type"], "array");
        Ok(())
    }

    #[cfg(feature = "openapi")]
    #[test]
    fn test_openapi_yaml_serialization() -> Result<(), String> {
        let yaml = ApiDoc::to_yaml()?;
        assert!(yaml.contains("Fathom API"));
        Ok(())
    }
}
