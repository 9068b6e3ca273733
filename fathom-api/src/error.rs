//! API error responses.
//!
//! Every handler returns [`ApiResult`]. Domain errors from `fathom-core` are
//! mapped onto an [`ErrorCode`], which fixes the HTTP status, and rendered as
//! a JSON body by the axum `IntoResponse` impl.

use axum::{
    extract::rejection::{PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fathom_core::{FathomError, StorageError, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Category of an API error. Each code maps to one HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // 422
    /// A parameter parsed but breaks a constraint (region order, window order)
    ValidationFailed,
    /// Path or query parameter has the wrong shape
    InvalidFormat,
    /// Group name is not one of the configured groups
    UnknownGroup,

    // 404
    /// Sensor id does not exist
    EntityNotFound,
    /// Query matched no readings
    NoData,

    // 500, 503
    InternalError,
    DatabaseError,
    /// Cache backend failed or held an unreadable entry
    CacheError,
    ServiceUnavailable,
    ConnectionPoolExhausted,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationFailed | ErrorCode::InvalidFormat | ErrorCode::UnknownGroup => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ErrorCode::EntityNotFound | ErrorCode::NoData => StatusCode::NOT_FOUND,
            ErrorCode::ServiceUnavailable | ErrorCode::ConnectionPoolExhausted => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorCode::InternalError | ErrorCode::DatabaseError | ErrorCode::CacheError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[derive(utoipa::ToSchema)]
pub struct ApiError {
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Offending parameter values, for validation failures
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn unknown_group(group: &str) -> Self {
        Self::new(
            ErrorCode::UnknownGroup,
            format!("Unknown sensor group: {}", group),
        )
    }

    pub fn no_data(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NoData, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn cache_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CacheError, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

/// Malformed path segments, e.g. a non-numeric `top`.
impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::new(ErrorCode::InvalidFormat, rejection.body_text())
    }
}

/// Malformed query strings, e.g. `xMin=abc` or `from=yesterday`.
impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::new(ErrorCode::InvalidFormat, rejection.body_text())
    }
}

// ============================================================================
// CONVERSIONS FROM DOMAIN ERRORS
// ============================================================================

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        let message = err.to_string();
        match err {
            ValidationError::UnknownGroup { group } => ApiError::unknown_group(&group),
            ValidationError::InvalidCodename { codename } => {
                ApiError::new(ErrorCode::InvalidFormat, message)
                    .with_details(json!({ "codename": codename }))
            }
            ValidationError::InvalidRegion { axis, min, max } => {
                ApiError::new(ErrorCode::ValidationFailed, message)
                    .with_details(json!({ "axis": axis.to_string(), "min": min, "max": max }))
            }
            ValidationError::InvalidTimeWindow { from, till } => {
                ApiError::new(ErrorCode::ValidationFailed, message)
                    .with_details(json!({ "from": from, "till": till }))
            }
            ValidationError::InvalidValue { field, .. }
            | ValidationError::RequiredFieldMissing { field } => {
                ApiError::new(ErrorCode::ValidationFailed, message)
                    .with_details(json!({ "field": field }))
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::SensorNotFound { id } => ApiError::new(
                ErrorCode::EntityNotFound,
                format!("Sensor with id {} not found", id),
            ),
            StorageError::NoData { query } => ApiError::no_data(format!("No data for {}", query)),
            StorageError::PoolExhausted => ApiError::new(
                ErrorCode::ConnectionPoolExhausted,
                "Connection pool exhausted",
            ),
            StorageError::ConnectionFailed { .. } => {
                tracing::error!(error = %err, "storage unreachable");
                ApiError::new(ErrorCode::ServiceUnavailable, "Storage is unreachable")
            }
            other => {
                // Full error goes to the log only
                tracing::error!(error = %other, "storage error");
                ApiError::new(ErrorCode::DatabaseError, "Database operation failed")
            }
        }
    }
}

impl From<FathomError> for ApiError {
    fn from(err: FathomError) -> Self {
        match err {
            FathomError::Validation(e) => e.into(),
            FathomError::Storage(e) => e.into(),
            FathomError::Cache(e) => {
                tracing::error!(error = %e, "cache error");
                ApiError::cache_error(e.to_string())
            }
            FathomError::Config(e) => ApiError::internal_error(e.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use fathom_core::CacheError;
    use uuid::Uuid;

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(
            ErrorCode::InvalidFormat.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ErrorCode::UnknownGroup.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ErrorCode::NoData.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCode::CacheError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ErrorCode::ConnectionPoolExhausted.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_error_serialization() -> Result<(), serde_json::Error> {
        let err = ApiError::unknown_group("omega");
        let json = serde_json::to_string(&err)?;

        assert!(json.contains("UNKNOWN_GROUP"));
        assert!(json.contains("omega"));
        assert!(!json.contains("details"));

        let deserialized: ApiError = serde_json::from_str(&json)?;
        assert_eq!(deserialized, err);
        Ok(())
    }

    #[test]
    fn test_invalid_region_carries_details() {
        let err: ApiError = ValidationError::InvalidRegion {
            axis: 'x',
            min: 2.0,
            max: 1.0,
        }
        .into();
        assert_eq!(err.code, ErrorCode::ValidationFailed);
        assert_eq!(
            err.details,
            Some(json!({ "axis": "x", "min": 2.0, "max": 1.0 }))
        );
    }

    #[test]
    fn test_error_display() {
        let err = ApiError::internal_error("Failed to bind 0.0.0.0:8080");
        let display = format!("{}", err);
        assert!(display.contains("InternalError"));
        assert!(display.contains("0.0.0.0:8080"));
    }

    #[test]
    fn test_fathom_error_mapping() {
        let err: ApiError = FathomError::from(ValidationError::UnknownGroup {
            group: "delta".into(),
        })
        .into();
        assert_eq!(err.code, ErrorCode::UnknownGroup);
        assert!(err.details.is_none());

        let err: ApiError = FathomError::from(ValidationError::InvalidCodename {
            codename: "42".into(),
        })
        .into();
        assert_eq!(err.code, ErrorCode::InvalidFormat);

        let err: ApiError = FathomError::from(StorageError::SensorNotFound { id: Uuid::nil() }).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err: ApiError = FathomError::from(StorageError::NoData {
            query: "temperature of group alpha".into(),
        })
        .into();
        assert_eq!(err.code, ErrorCode::NoData);

        let err: ApiError = FathomError::from(StorageError::PoolExhausted).into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let err: ApiError = FathomError::from(StorageError::QueryFailed {
            operation: "get_temperature".into(),
            reason: "relation \"sensor\" does not exist".into(),
        })
        .into();
        assert_eq!(err.code, ErrorCode::DatabaseError);
        assert!(!err.message.contains("relation"));

        let err: ApiError = FathomError::from(CacheError::Backend {
            operation: "exists".into(),
            reason: "connection reset".into(),
        })
        .into();
        assert_eq!(err.code, ErrorCode::CacheError);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
