//! cfp-api library - Inference Endpoint
//!
//! Scores feature vectors with the loaded model and publishes each scored
//! result, tagged with its request id, to the predictions topic.

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use cfp_common::bus::Publisher;

pub mod api;
pub mod scorer;

pub use scorer::{LogisticModel, Scorer};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Read-only model, shared by all concurrent requests
    pub scorer: Arc<dyn Scorer>,
    /// Broadcast channel for scored results (remote broker or in-process bus)
    pub publisher: Arc<dyn Publisher>,
    /// One per successfully scored request
    pub publish_attempts: Arc<AtomicU64>,
    pub publish_failures: Arc<AtomicU64>,
    /// Service startup timestamp for uptime reporting
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(scorer: Arc<dyn Scorer>, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            scorer,
            publisher,
            publish_attempts: Arc::new(AtomicU64::new(0)),
            publish_failures: Arc::new(AtomicU64::new(0)),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::predict_routes())
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
