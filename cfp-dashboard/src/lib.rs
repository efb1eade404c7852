//! cfp-dashboard library
//!
//! Streams feature records through the inference endpoint on a fixed cadence
//! and folds the broadcast results into a live view:
//! - `source`: CSV datasets and append-only record lists
//! - `driver`: start/stop/tick state machine over a source
//! - `consumer`: history window and display status
//! - `session`: the task that owns one driver and one consumer
//! - `api`: HTTP control surface and SSE snapshot stream

use axum::Router;
use chrono::{DateTime, Utc};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod consumer;
pub mod driver;
pub mod error;
pub mod predictor;
pub mod session;
pub mod source;

pub use error::SessionError;
pub use session::{spawn_session, SessionConfig, SessionHandle, SessionSnapshot};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The dashboard's streaming session
    pub session: SessionHandle,
    /// Service startup timestamp for uptime reporting
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(session: SessionHandle) -> Self {
        Self {
            session,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::stream_routes())
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
