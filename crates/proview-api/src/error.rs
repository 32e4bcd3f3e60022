//! API error types and JSON error response formatting.
//!
//! ApiError provides a consistent JSON error response format across all
//! endpoints, mapping core failure kinds to HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use proview_core::error::ProviewError;

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "validation_error", "not_found").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 401 - missing or wrong API key.
    Unauthorized(String),
    /// 429 - rate limit exceeded.
    TooManyRequests(String),
    /// Any failure from the coaching core.
    Core(ProviewError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Core(err) => match err {
                ProviewError::NotFound(_) => StatusCode::NOT_FOUND,
                ProviewError::Validation(_) => StatusCode::BAD_REQUEST,
                ProviewError::SchemaViolation { .. } => StatusCode::BAD_GATEWAY,
                ProviewError::BackendUnavailable(_) | ProviewError::Embedding(_) => StatusCode::SERVICE_UNAVAILABLE,
                ProviewError::BackendTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::TooManyRequests(_) => "too_many_requests",
            ApiError::Core(err) => err.kind(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = self.code().to_string();

        let message = match self {
            ApiError::Unauthorized(msg) | ApiError::TooManyRequests(msg) => msg,
            ApiError::Core(err) => {
                if status.is_server_error() {
                    tracing::error!(kind = err.kind(), error = %err, "Request failed");
                }
                match err {
                    // Storage and io details stay in the log.
                    ProviewError::Storage(_) | ProviewError::Io(_) => "Internal server error".to_string(),
                    other => other.to_string(),
                }
            }
        };

        (status, Json(ErrorBody { error, message })).into_response()
    }
}

impl From<ProviewError> for ApiError {
    fn from(err: ProviewError) -> Self {
        ApiError::Core(err)
    }
}
