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
    pub uptime_seconds: i64,
    pub topics: usize,
    pub buffer_capacity: usize,
    pub published_total: u64,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "cfp-broker".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: (chrono::Utc::now() - state.startup_time).num_seconds(),
        topics: state.bus.topics().len(),
        buffer_capacity: state.bus.capacity(),
        published_total: state.published_total.load(Ordering::Relaxed),
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
