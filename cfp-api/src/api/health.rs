//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::Ordering;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub model_version: String,
    pub uptime_seconds: i64,
    pub publish_attempts: u64,
    pub publish_failures: u64,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "cfp-api".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model_version: state.scorer.version().to_string(),
        uptime_seconds: (chrono::Utc::now() - state.startup_time).num_seconds(),
        publish_attempts: state.publish_attempts.load(Ordering::Relaxed),
        publish_failures: state.publish_failures.load(Ordering::Relaxed),
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
