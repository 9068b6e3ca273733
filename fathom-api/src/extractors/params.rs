//! Path and query extractors with JSON error bodies.
//!
//! axum's stock `Path` and `Query` reject with plain-text 400 responses.
//! These wrappers reject with an [`ApiError`] carrying
//! [`ErrorCode::InvalidFormat`](crate::error::ErrorCode::InvalidFormat),
//! which renders as a 422 like every other input error.

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query},
    http::request::Parts,
};
use fathom_core::Codename;
use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// `Path<T>` rejecting with [`ApiError`].
///
/// # Example
///
/// ```rust,ignore
/// async fn top_species(
///     ApiPath((group, top)): ApiPath<(String, usize)>,
/// ) -> ApiResult<impl IntoResponse> {
///     // "/group/alpha/species/top/abc" never reaches this point
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ApiPath<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(ApiPath(value))
    }
}

/// `Query<T>` rejecting with [`ApiError`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(ApiQuery(value))
    }
}

/// Single `<group><ordinal>` path segment, e.g. `alpha3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodenamePath(pub Codename);

#[async_trait]
impl<S> FromRequestParts<S> for CodenamePath
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let ApiPath(raw) = ApiPath::<String>::from_request_parts(parts, state).await?;
        let codename: Codename = raw.parse()?;
        Ok(CodenamePath(codename))
    }
}
