//! Shared HTTP API error handling
//!
//! Every CFP service returns errors as
//! `{ "error": { "code": "...", "message": "..." } }` with a status code
//! derived from the error taxonomy.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Conflict with current state (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Dependent task or service is gone (503)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Pipeline error, status chosen by variant
    #[error(transparent)]
    Common(#[from] crate::Error),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        use crate::Error as E;
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
            ApiError::Common(err) => match err {
                E::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
                E::Deserialization(_) => (StatusCode::BAD_REQUEST, "INVALID_PAYLOAD"),
                E::ScorerUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SCORER_UNAVAILABLE"),
                E::BroadcastUnavailable(_) => (StatusCode::BAD_GATEWAY, "BROADCAST_UNAVAILABLE"),
                E::Http(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
                E::MessageTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "MESSAGE_TIMEOUT"),
                E::Csv(_) => (StatusCode::BAD_REQUEST, "INVALID_SOURCE"),
                E::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
                E::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        self.parts().0
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.parts();
        let message = match &self {
            ApiError::NotFound(msg) | ApiError::Conflict(msg) | ApiError::Unavailable(msg) => {
                msg.clone()
            }
            ApiError::Common(err) => err.to_string(),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;
