//! Service error types with HTTP status code mapping.
//!
//! [`ServiceError`] is the central error type surfaced to callers. Each
//! variant maps to a specific HTTP status code and structured JSON error
//! response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::persistence::StoreError;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 1002,
///     "message": "invalid grade: grade 150 exceeds maximum 100"
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code (see code ranges on [`ServiceError`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status               |
/// |-----------|-----------------|---------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request           |
/// | 2000–2999 | Not Found       | 404 Not Found             |
/// | 3000–3999 | Server          | 500 Internal Server Error |
/// | 5000–5999 | Access          | 401 / 403                 |
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Grade value rejected for its grade item.
    #[error("invalid grade: {0}")]
    InvalidGrade(String),

    /// Grade item with the given id does not exist.
    #[error("grade item not found: {0}")]
    GradeItemNotFound(i64),

    /// User with the given id does not exist.
    #[error("user not found: {0}")]
    UserNotFound(i64),

    /// Webhook delivery with the given id does not exist.
    #[error("webhook delivery not found: {0}")]
    DeliveryNotFound(i64),

    /// Caller could not be identified.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Caller lacks the required capability.
    #[error("forbidden: missing capability {0}")]
    Forbidden(String),

    /// Storage layer failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::InvalidGrade(_) => 1002,
            Self::GradeItemNotFound(_) => 2001,
            Self::UserNotFound(_) => 2002,
            Self::DeliveryNotFound(_) => 2003,
            Self::Internal(_) => 3000,
            Self::Storage(_) => 3001,
            Self::Unauthorized(_) => 5001,
            Self::Forbidden(_) => 5003,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::InvalidGrade(_) => StatusCode::BAD_REQUEST,
            Self::GradeItemNotFound(_) | Self::UserNotFound(_) | Self::DeliveryNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound {
                entity: "delivery",
                id,
            } => Self::DeliveryNotFound(id),
            StoreError::NotFound {
                entity: "grade item",
                id,
            } => Self::GradeItemNotFound(id),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
