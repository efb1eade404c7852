//! Stream control surface
//!
//! - `POST /stream/start`, `POST /stream/stop`: idempotent, return the snapshot
//! - `POST /stream/source`: choose the record source (409 while running)
//! - `GET /stream/state`: current snapshot
//! - `GET /stream/events`: SSE, one `snapshot` event per state change

use axum::{
    extract::{rejection::JsonRejection, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use cfp_common::api::{ApiError, ApiResult};
use cfp_common::sse::KEEP_ALIVE_INTERVAL;
use cfp_common::{Error, SourceMode};

use crate::session::SessionSnapshot;
use crate::source::open_source;
use crate::AppState;

/// SSE event name for state updates
pub const SNAPSHOT_EVENT: &str = "snapshot";

/// `POST /stream/source` request body
#[derive(Debug, Deserialize)]
pub struct SelectSourceRequest {
    /// `one-shot` or `cyclic`
    pub mode: String,
    /// CSV file or JSON-lines record list
    pub path: PathBuf,
}

/// POST /stream/start
pub async fn start_stream(State(state): State<AppState>) -> ApiResult<Json<SessionSnapshot>> {
    Ok(Json(state.session.start().await?))
}

/// POST /stream/stop
pub async fn stop_stream(State(state): State<AppState>) -> ApiResult<Json<SessionSnapshot>> {
    Ok(Json(state.session.stop().await?))
}

/// POST /stream/source
///
/// **Request:** `{"mode": "cyclic", "path": "data/features.jsonl"}`
///
/// **Errors:**
/// - 400 Bad Request: unknown mode, unparseable file
/// - 404 Not Found: file does not exist
/// - 409 Conflict: stream is running
pub async fn select_source(
    State(state): State<AppState>,
    payload: Result<Json<SelectSourceRequest>, JsonRejection>,
) -> ApiResult<Json<SessionSnapshot>> {
    let Json(request) = payload.map_err(|e| Error::InvalidInput(e.body_text()))?;
    let mode: SourceMode = request.mode.parse()?;

    // Fail fast without reading the file
    if state.session.snapshot().state == crate::driver::DriverState::Running {
        return Err(crate::SessionError::Running.into());
    }

    let source = open_source(mode, &request.path).await.map_err(|e| match e {
        Error::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
            ApiError::NotFound(format!("{}", request.path.display()))
        }
        other => ApiError::from(other),
    })?;

    let snapshot = state.session.select_source(source).await?;
    info!(source = %snapshot.source, mode = %snapshot.mode, "Data source changed");
    Ok(Json(snapshot))
}

/// GET /stream/state
pub async fn stream_state(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.session.snapshot())
}

/// GET /stream/events - SSE stream of session snapshots
///
/// Sends the current snapshot immediately, then one event per change.
pub async fn snapshot_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("New SSE client connected to stream events");
    let mut rx = state.session.watch();

    let stream = async_stream::stream! {
        let initial = rx.borrow_and_update().clone();
        if let Some(event) = snapshot_event(&initial) {
            yield Ok(event);
        }

        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            if let Some(event) = snapshot_event(&snapshot) {
                yield Ok(event);
            }
        }

        debug!("Session ended; closing snapshot stream");
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}

fn snapshot_event(snapshot: &SessionSnapshot) -> Option<Event> {
    match Event::default().event(SNAPSHOT_EVENT).json_data(snapshot) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("SSE: Failed to serialize snapshot: {}", e);
            None
        }
    }
}

/// Build stream control routes
pub fn stream_routes() -> Router<AppState> {
    Router::new()
        .route("/stream/start", post(start_stream))
        .route("/stream/stop", post(stop_stream))
        .route("/stream/source", post(select_source))
        .route("/stream/state", get(stream_state))
        .route("/stream/events", get(snapshot_events))
}
