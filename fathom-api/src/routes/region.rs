//! Regional temperature extremes.

use axum::{extract::State, response::IntoResponse, Json};
use fathom_core::{Region, RegionExtreme};

use crate::error::{ApiError, ApiResult};
use crate::extractors::ApiQuery;
use crate::services::AggregationService;
use crate::state::AppState;
use crate::types::{Freshness, RegionQuery, RegionTemperatureResponse};

async fn region_extreme(
    service: &AggregationService,
    query: RegionQuery,
    extreme: RegionExtreme,
) -> ApiResult<RegionTemperatureResponse> {
    let region = Region::new(
        (query.x_min, query.x_max),
        (query.y_min, query.y_max),
        (query.z_min, query.z_max),
    )?;
    let read = service.region_temperature(region, extreme).await?;
    Ok(RegionTemperatureResponse {
        extreme,
        value: *read.value(),
        freshness: Freshness::from(&read),
    })
}

/// GET /api/v1/region/temperature/min - Lowest temperature in a box
#[utoipa::path(
    get,
    path = "/api/v1/region/temperature/min",
    tag = "Regions",
    params(
        ("xMin" = f64, Query, description = "Lower x bound"),
        ("xMax" = f64, Query, description = "Upper x bound"),
        ("yMin" = f64, Query, description = "Lower y bound"),
        ("yMax" = f64, Query, description = "Upper y bound"),
        ("zMin" = f64, Query, description = "Lower z bound (depth is negative)"),
        ("zMax" = f64, Query, description = "Upper z bound")
    ),
    responses(
        (status = 200, description = "Minimum temperature", body = RegionTemperatureResponse),
        (status = 404, description = "No sensor inside the region", body = ApiError),
        (status = 422, description = "Missing or unordered bounds", body = ApiError),
    )
)]
pub async fn min_temperature(
    State(service): State<AggregationService>,
    ApiQuery(query): ApiQuery<RegionQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(region_extreme(&service, query, RegionExtreme::Min).await?))
}

/// GET /api/v1/region/temperature/max - Highest temperature in a box
#[utoipa::path(
    get,
    path = "/api/v1/region/temperature/max",
    tag = "Regions",
    params(
        ("xMin" = f64, Query, description = "Lower x bound"),
        ("xMax" = f64, Query, description = "Upper x bound"),
        ("yMin" = f64, Query, description = "Lower y bound"),
        ("yMax" = f64, Query, description = "Upper y bound"),
        ("zMin" = f64, Query, description = "Lower z bound (depth is negative)"),
        ("zMax" = f64, Query, description = "Upper z bound")
    ),
    responses(
        (status = 200, description = "Maximum temperature", body = RegionTemperatureResponse),
        (status = 404, description = "No sensor inside the region", body = ApiError),
        (status = 422, description = "Missing or unordered bounds", body = ApiError),
    )
)]
pub async fn max_temperature(
    State(service): State<AggregationService>,
    ApiQuery(query): ApiQuery<RegionQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(region_extreme(&service, query, RegionExtreme::Max).await?))
}

pub fn create_router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/temperature/min", axum::routing::get(min_temperature))
        .route("/temperature/max", axum::routing::get(max_temperature))
}
