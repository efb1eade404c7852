//! # CFP Common Library
//!
//! Shared code for all CFP services including:
//! - Feature record and broadcast wire types
//! - Error taxonomy
//! - Topic bus (in-process broadcast channel) and the publish/subscribe traits
//! - HTTP broker client and SSE parsing
//! - Configuration loading
//! - HTTP error responses

pub mod api;
pub mod broker_client;
pub mod bus;
pub mod config;
pub mod error;
pub mod runtime;
pub mod sse;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    BroadcastMessage, FeatureVector, PredictRequest, PredictResponse, RiskLevel, ScoreResult,
    SourceMode, PREDICTIONS_TOPIC,
};
