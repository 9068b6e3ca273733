//! Prometheus Metrics Definitions
//!
//! Defines all Fathom metrics with appropriate labels and types.
//! Exposes a /metrics endpoint for Prometheus scraping.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<FathomMetrics>> = Lazy::new(FathomMetrics::new);

/// Container for all Fathom metrics.
#[derive(Clone)]
pub struct FathomMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Aggregate cache lookups - labels: query, result (hit/miss)
    pub cache_lookups_total: CounterVec,

    /// Completed scheduler ticks - labels: outcome
    pub scheduler_ticks_total: CounterVec,

    /// Faults reported by sensor loops - labels: kind
    pub scheduler_faults_total: CounterVec,

    /// Sensor loops currently running
    pub active_sensor_loops: Gauge,
}

impl FathomMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "fathom_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_requests_total: {}", e)))?,

            http_request_duration_seconds: register_histogram_vec!(
                "fathom_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_request_duration_seconds: {}", e)))?,

            cache_lookups_total: register_counter_vec!(
                "fathom_cache_lookups_total",
                "Aggregate query cache lookups",
                &["query", "result"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register cache_lookups_total: {}", e)))?,

            scheduler_ticks_total: register_counter_vec!(
                "fathom_scheduler_ticks_total",
                "Sensor ticks by outcome",
                &["outcome"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register scheduler_ticks_total: {}", e)))?,

            scheduler_faults_total: register_counter_vec!(
                "fathom_scheduler_faults_total",
                "Faults reported by sensor loops",
                &["kind"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register scheduler_faults_total: {}", e)))?,

            active_sensor_loops: register_gauge!(
                "fathom_active_sensor_loops",
                "Current number of running sensor loops"
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register active_sensor_loops: {}", e)))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, status_str.as_str()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Record a cache-aside lookup for one query kind.
    pub fn record_cache_lookup(&self, query: &str, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups_total
            .with_label_values(&[query, result])
            .inc();
    }

    pub fn record_tick(&self, outcome: &str) {
        self.scheduler_ticks_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_fault(&self, kind: &str) {
        self.scheduler_faults_total.with_label_values(&[kind]).inc();
    }

    pub fn loop_started(&self) {
        self.active_sensor_loops.inc();
    }

    pub fn loop_finished(&self) {
        self.active_sensor_loops.dec();
    }
}

/// Run `f` against the global metrics if they registered.
pub fn with_metrics(f: impl FnOnce(&FathomMetrics)) {
    if let Ok(metrics) = METRICS.as_ref() {
        f(metrics);
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "Observability",
    responses(
        (status = 200, description = "Prometheus metrics in text format", content_type = "text/plain"),
        (status = 500, description = "Failed to encode metrics"),
    ),
)]
pub async fn metrics_handler() -> impl IntoResponse {
    // Touch the registry so every family is present on the first scrape.
    Lazy::force(&METRICS);

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
