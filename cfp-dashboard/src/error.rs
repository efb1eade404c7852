//! Error types for cfp-dashboard

use cfp_common::api::ApiError;
use thiserror::Error;

/// Session control errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// Source changes are refused while streaming
    #[error("stream is running; stop it before selecting a source")]
    Running,

    /// Session task is gone (cancelled or panicked)
    #[error("session has shut down")]
    Closed,
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Running => ApiError::Conflict(err.to_string()),
            SessionError::Closed => ApiError::Unavailable(err.to_string()),
        }
    }
}
