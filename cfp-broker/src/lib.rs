//! cfp-broker library - Broadcast Channel service
//!
//! Named topics with HTTP publish and SSE subscribe. Delivery is at-most-once:
//! no persistence, no backlog for late subscribers, bounded per-subscriber
//! buffers that drop the oldest message on overflow.

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use cfp_common::bus::TopicBus;

pub mod api;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Topic fan-out
    pub bus: TopicBus,
    /// Messages accepted since startup
    pub published_total: Arc<AtomicU64>,
    /// Service startup timestamp for uptime reporting
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(bus: TopicBus) -> Self {
        Self {
            bus,
            published_total: Arc::new(AtomicU64::new(0)),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, post};

    Router::new()
        .route("/topics", get(api::list_topics))
        .route("/topics/:topic", post(api::publish))
        .route("/topics/:topic/events", get(api::subscribe))
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
