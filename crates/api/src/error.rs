//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fulfillment::PlacementError;
use read_cache::CacheError;
use storage::StorageError;

use crate::correlation;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Missing or invalid credentials.
    Unauthorized(String),
    /// Order placement refused or failed.
    Placement(PlacementError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Placement(err) => placement_error_to_response(err),
            ApiError::Internal(msg) => internal(msg),
        };

        let mut body = serde_json::json!({ "error": message });
        if let Some(correlation_id) = correlation::current() {
            body["correlationId"] = serde_json::Value::String(correlation_id.to_string());
        }
        (status, axum::Json(body)).into_response()
    }
}

fn internal(msg: String) -> (StatusCode, String) {
    tracing::error!(error = %msg, "internal server error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "An internal error occurred".to_string(),
    )
}

fn placement_error_to_response(err: PlacementError) -> (StatusCode, String) {
    match &err {
        PlacementError::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        PlacementError::BuyerNotFound(_) | PlacementError::ProductNotFound(_) => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        PlacementError::ProductInactive(_) | PlacementError::InsufficientStock { .. } => {
            (StatusCode::CONFLICT, err.to_string())
        }
        PlacementError::Storage(_) => internal(err.to_string()),
    }
}

impl From<PlacementError> for ApiError {
    fn from(err: PlacementError) -> Self {
        ApiError::Placement(err)
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Internal(err.to_string())
    }
}
