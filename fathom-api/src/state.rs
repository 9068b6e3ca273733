//! Shared application state for Axum routers.

use std::sync::Arc;

use fathom_storage::SensorStore;

use crate::jobs::SensorScheduler;
use crate::services::AggregationService;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Storage port, used directly only by readiness probes.
    pub store: Arc<dyn SensorStore>,
    /// Cache-aside aggregate queries.
    pub aggregation: AggregationService,
    pub scheduler: Arc<SensorScheduler>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        store: Arc<dyn SensorStore>,
        aggregation: AggregationService,
        scheduler: Arc<SensorScheduler>,
    ) -> Self {
        Self {
            store,
            aggregation,
            scheduler,
            start_time: std::time::Instant::now(),
        }
    }
}

crate::impl_from_ref!(Arc<dyn SensorStore>, store);
crate::impl_from_ref!(AggregationService, aggregation);
crate::impl_from_ref!(Arc<SensorScheduler>, scheduler);
crate::impl_from_ref!(std::time::Instant, start_time);
