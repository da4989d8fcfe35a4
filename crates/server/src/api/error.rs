//! Mapping of engine errors onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shrinkwrap_core::EngineError;
use tracing::error;

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Machine-readable category (`validation`, `not_found`, ...).
    pub kind: &'static str,
}

/// An error returned from a handler.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorResponse {
                error: message.into(),
                kind: "validation",
            },
        }
    }
}

/// HTTP status and category for an engine error.
pub fn classify(err: &EngineError) -> (StatusCode, &'static str) {
    match err {
        EngineError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
        EngineError::UnsupportedFormat(_) => {
            (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_format")
        }
        EngineError::UnsupportedTargetFormat { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "unsupported_target_format")
        }
        EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        EngineError::SignupRequired { .. } => (StatusCode::UNAUTHORIZED, "signup_required"),
        EngineError::InvalidState(_) => (StatusCode::CONFLICT, "invalid_state"),
        EngineError::NotRunning => (StatusCode::SERVICE_UNAVAILABLE, "not_running"),
        EngineError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let (status, kind) = classify(&err);
        if status.is_server_error() && !matches!(err, EngineError::NotRunning) {
            error!("Request failed: {}", err);
        }
        Self {
            status,
            body: ErrorResponse {
                error: err.to_string(),
                kind,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
