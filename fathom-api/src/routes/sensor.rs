//! Per-sensor REST API Routes

use axum::{extract::State, response::IntoResponse, Json};
use fathom_core::TimeWindow;

use crate::error::{ApiError, ApiResult};
use crate::extractors::{ApiQuery, CodenamePath};
use crate::services::AggregationService;
use crate::state::AppState;
use crate::types::{Freshness, SensorTemperatureResponse, WindowQuery};

/// GET /api/v1/sensor/{codename}/temperature/average - Average over a window
#[utoipa::path(
    get,
    path = "/api/v1/sensor/{codename}/temperature/average",
    tag = "Sensors",
    params(
        ("codename" = String, Path, description = "Group name followed by ordinal, e.g. alpha3"),
        ("from" = Option<i64>, Query, description = "Window start, UNIX seconds"),
        ("till" = Option<i64>, Query, description = "Window end, UNIX seconds")
    ),
    responses(
        (status = 200, description = "Average temperature, three decimals", body = SensorTemperatureResponse),
        (status = 404, description = "No readings for the sensor in the window", body = ApiError),
        (status = 422, description = "Malformed codename, unknown group or bad window", body = ApiError),
    )
)]
pub async fn average_temperature(
    State(service): State<AggregationService>,
    CodenamePath(codename): CodenamePath,
    ApiQuery(query): ApiQuery<WindowQuery>,
) -> ApiResult<impl IntoResponse> {
    let window = TimeWindow::from_unix(query.from, query.till)?;
    let read = service.sensor_average_temperature(&codename, window).await?;
    Ok(Json(SensorTemperatureResponse {
        codename: codename.to_string(),
        value: *read.value(),
        message: window.describe(),
        freshness: Freshness::from(&read),
    }))
}

pub fn create_router() -> axum::Router<AppState> {
    axum::Router::new().route(
        "/:codename/temperature/average",
        axum::routing::get(average_temperature),
    )
}
