//! Group Aggregate REST API Routes
//!
//! Averages and species counts over every sensor of one group. Group names
//! are matched case-insensitively against the configured fleet.

use axum::{extract::State, response::IntoResponse, Json};
use fathom_core::TimeWindow;

use crate::error::{ApiError, ApiResult};
use crate::extractors::{ApiPath, ApiQuery};
use crate::services::AggregationService;
use crate::state::AppState;
use crate::types::{Freshness, GroupAverageResponse, SpeciesResponse, TopSpeciesResponse, WindowQuery};

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /api/v1/group/{group}/transparency/average - Average transparency
#[utoipa::path(
    get,
    path = "/api/v1/group/{group}/transparency/average",
    tag = "Groups",
    params(
        ("group" = String, Path, description = "Sensor group name")
    ),
    responses(
        (status = 200, description = "Average transparency in percent", body = GroupAverageResponse),
        (status = 404, description = "Group has no sensors", body = ApiError),
        (status = 422, description = "Unknown group", body = ApiError),
    )
)]
pub async fn average_transparency(
    State(service): State<AggregationService>,
    ApiPath(group): ApiPath<String>,
) -> ApiResult<impl IntoResponse> {
    let read = service.average_transparency(&group).await?;
    Ok(Json(GroupAverageResponse {
        group: group.to_lowercase(),
        value: *read.value(),
        freshness: Freshness::from(&read),
    }))
}

/// GET /api/v1/group/{group}/temperature/average - Average temperature
#[utoipa::path(
    get,
    path = "/api/v1/group/{group}/temperature/average",
    tag = "Groups",
    params(
        ("group" = String, Path, description = "Sensor group name")
    ),
    responses(
        (status = 200, description = "Average temperature, three decimals", body = GroupAverageResponse),
        (status = 404, description = "Group has no sensors", body = ApiError),
        (status = 422, description = "Unknown group", body = ApiError),
    )
)]
pub async fn average_temperature(
    State(service): State<AggregationService>,
    ApiPath(group): ApiPath<String>,
) -> ApiResult<impl IntoResponse> {
    let read = service.average_temperature(&group).await?;
    Ok(Json(GroupAverageResponse {
        group: group.to_lowercase(),
        value: *read.value(),
        freshness: Freshness::from(&read),
    }))
}

/// GET /api/v1/group/{group}/species - Species currently seen by a group
#[utoipa::path(
    get,
    path = "/api/v1/group/{group}/species",
    tag = "Groups",
    params(
        ("group" = String, Path, description = "Sensor group name")
    ),
    responses(
        (status = 200, description = "Species with summed counts", body = SpeciesResponse),
        (status = 422, description = "Unknown group", body = ApiError),
    )
)]
pub async fn species(
    State(service): State<AggregationService>,
    ApiPath(group): ApiPath<String>,
) -> ApiResult<impl IntoResponse> {
    let read = service.species(&group).await?;
    let freshness = Freshness::from(&read);
    Ok(Json(SpeciesResponse {
        group: group.to_lowercase(),
        species: read.into_value(),
        freshness,
    }))
}

/// GET /api/v1/group/{group}/species/top/{top} - Most detected species
#[utoipa::path(
    get,
    path = "/api/v1/group/{group}/species/top/{top}",
    tag = "Groups",
    params(
        ("group" = String, Path, description = "Sensor group name"),
        ("top" = usize, Path, description = "Number of species to return, at least 1"),
        ("from" = Option<i64>, Query, description = "Window start, UNIX seconds"),
        ("till" = Option<i64>, Query, description = "Window end, UNIX seconds")
    ),
    responses(
        (status = 200, description = "Species ranked by count", body = TopSpeciesResponse),
        (status = 422, description = "Unknown group, bad top or bad window", body = ApiError),
    )
)]
pub async fn top_species(
    State(service): State<AggregationService>,
    ApiPath((group, top)): ApiPath<(String, usize)>,
    ApiQuery(query): ApiQuery<WindowQuery>,
) -> ApiResult<impl IntoResponse> {
    let window = TimeWindow::from_unix(query.from, query.till)?;
    let read = service.top_species(&group, top, window).await?;
    let freshness = Freshness::from(&read);
    let ranked = read.into_value();
    Ok(Json(TopSpeciesResponse {
        group: group.to_lowercase(),
        top,
        species: ranked.species,
        message: ranked.period,
        freshness,
    }))
}

// ============================================================================
// ROUTER SETUP
// ============================================================================

/// Create the group routes router.
pub fn create_router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/:group/transparency/average", axum::routing::get(average_transparency))
        .route("/:group/temperature/average", axum::routing::get(average_temperature))
        .route("/:group/species", axum::routing::get(species))
        .route("/:group/species/top/:top", axum::routing::get(top_species))
}
