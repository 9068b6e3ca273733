//! Request extractors that reject with [`ApiError`](crate::error::ApiError).

pub mod params;

pub use params::{ApiPath, ApiQuery, CodenamePath};
