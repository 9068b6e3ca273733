//! Fathom Telemetry - Observability Infrastructure
//!
//! Structured JSON logging through `tracing-subscriber` and Prometheus
//! metrics for HTTP traffic, cache lookups and the sensor scheduler.

pub mod metrics;
pub mod middleware;
pub mod tracer;

pub use metrics::{metrics_handler, FathomMetrics, METRICS};
pub use middleware::observability_middleware;
pub use tracer::{init_tracer, LogFormat, TelemetryConfig};
