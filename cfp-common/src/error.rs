//! Common error types for CFP

use thiserror::Error;

/// Common result type for CFP operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across CFP services
///
/// The first five variants are the pipeline taxonomy. Only `ScorerUnavailable`
/// at startup is fatal; every other variant is recovered where it is raised.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or missing feature fields (rejected before scoring, never retried)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Model artifact missing or unusable
    #[error("Scorer unavailable: {0}")]
    ScorerUnavailable(String),

    /// Publish or subscribe against the broadcast channel failed
    #[error("Broadcast unavailable: {0}")]
    BroadcastUnavailable(String),

    /// No broadcast message arrived within the bounded wait
    #[error("No broadcast message within {0:?}")]
    MessageTimeout(std::time::Duration),

    /// Malformed broadcast payload
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Record file could not be parsed (bad header, bad row)
    #[error("CSV error: {0}")]
    Csv(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Upstream HTTP call failed (inference endpoint or broker)
    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http(err.to_string())
    }
}

impl Error {
    /// Whether this error should stop the whole service rather than a single call
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ScorerUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_only_scorer_unavailable_is_fatal() {
        assert!(Error::ScorerUnavailable("missing".into()).is_fatal());
        assert!(!Error::InvalidInput("cpu_request".into()).is_fatal());
        assert!(!Error::BroadcastUnavailable("down".into()).is_fatal());
        assert!(!Error::MessageTimeout(Duration::from_secs(3)).is_fatal());
    }

    #[test]
    fn test_deserialization_from_serde_json() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::Deserialization(_)));
        assert!(err.to_string().starts_with("Deserialization error"));
    }
}
