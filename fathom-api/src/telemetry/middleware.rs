//! Axum Middleware for HTTP Request Tracing and Metrics
//!
//! Wraps every request in a tracing span, records Prometheus metrics and
//! logs one line per completed request.

use axum::{extract::Request, middleware::Next, response::Response};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Instant;
use tracing::{info_span, Instrument};

use super::metrics::with_metrics;

/// Codename segment, e.g. `/sensor/alpha3/`.
static CODENAME_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/sensor/[^/]+(/|$)").expect("Invalid codename segment regex")
});

/// Group name segment, e.g. `/group/alpha/`.
static GROUP_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/group/[^/]+(/|$)").expect("Invalid group segment regex"));

/// Numeric segment, e.g. the `top` of `/species/top/3`.
static NUMERIC_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/\d+(/|$)").expect("Invalid ID regex"));

/// Normalize path for metrics/spans (replace path parameters with placeholders).
///
/// This prevents high-cardinality label explosion in Prometheus.
fn normalize_path(path: &str) -> String {
    let result = CODENAME_SEGMENT.replace_all(path, "/sensor/{codename}$1");
    let result = GROUP_SEGMENT.replace_all(&result, "/group/{group}$1");
    let result = NUMERIC_SEGMENT.replace_all(&result, "/{n}$1");
    result.to_string()
}

/// Observability middleware for Axum.
///
/// This middleware wraps every request with:
/// 1. A tracing span carrying method, target and route
/// 2. Prometheus metrics recording
/// 3. Request/response logging
pub async fn observability_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let normalized_path = normalize_path(&path);

    let span = info_span!(
        "http_request",
        http.method = %method,
        http.target = %path,
        http.route = %normalized_path,
    );

    let response = next.run(request).instrument(span).await;

    let duration = start.elapsed();
    let status = response.status();

    with_metrics(|m| {
        m.record_http_request(
            method.as_str(),
            &normalized_path,
            status.as_u16(),
            duration.as_secs_f64(),
        )
    });

    if status.is_server_error() {
        tracing::warn!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = duration.as_millis(),
            "Request failed"
        );
    } else {
        tracing::info!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = duration.as_millis(),
            "Request completed"
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_group() {
        assert_eq!(
            normalize_path("/api/v1/group/alpha/temperature/average"),
            "/api/v1/group/{group}/temperature/average"
        );
    }

    #[test]
    fn test_normalize_path_top_species() {
        assert_eq!(
            normalize_path("/api/v1/group/beta/species/top/3"),
            "/api/v1/group/{group}/species/top/{n}"
        );
    }

    #[test]
    fn test_normalize_path_codename() {
        assert_eq!(
            normalize_path("/api/v1/sensor/gamma12/temperature/average"),
            "/api/v1/sensor/{codename}/temperature/average"
        );
    }

    #[test]
    fn test_normalize_path_no_params() {
        assert_eq!(normalize_path("/health/ready"), "/health/ready");
        assert_eq!(
            normalize_path("/api/v1/region/temperature/min"),
            "/api/v1/region/temperature/min"
        );
    }
}
