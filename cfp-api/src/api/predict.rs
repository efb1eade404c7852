//! Inference endpoint
//!
//! `POST /predict` scores one feature vector, publishes the correlated result
//! to the predictions topic and returns the probability.

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use std::sync::atomic::Ordering;
use tracing::{debug, warn};
use uuid::Uuid;

use cfp_common::api::ApiResult;
use cfp_common::{Error, PredictRequest, PredictResponse, ScoreResult, PREDICTIONS_TOPIC};

use crate::AppState;

/// POST /predict handler
///
/// **Request:** `{"cpu_request": 0.5, "memory_request": 0.2, "priority": 9, "scheduling_class": 2}`
/// plus optional `request_id` (UUID) and `seq`.
/// **Response:** `{"failure_probability": 0.73, "request_id": "..."}`
///
/// **Errors:**
/// - 400 Bad Request: malformed body, missing or non-finite fields
/// - 503 Service Unavailable: scorer failed
///
/// A failed publish is logged and counted but never fails the request.
pub async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> ApiResult<Json<PredictResponse>> {
    let Json(request) = payload.map_err(|e| Error::InvalidInput(e.body_text()))?;

    let features = request.features();
    features.validate()?;

    let probability = state.scorer.score(&features).map_err(|e| match e {
        Error::InvalidInput(_) => e,
        other => Error::ScorerUnavailable(other.to_string()),
    })?;

    let result = ScoreResult {
        request_id: request.request_id.unwrap_or_else(Uuid::new_v4),
        seq: request.seq,
        features,
        probability,
    };
    debug!(request_id = %result.request_id, seq = ?result.seq, probability, "Scored");

    publish_result(&state, &result).await;

    Ok(Json(PredictResponse {
        failure_probability: result.probability,
        request_id: result.request_id,
    }))
}

/// Exactly one publish attempt per scored result
async fn publish_result(state: &AppState, result: &ScoreResult) {
    state.publish_attempts.fetch_add(1, Ordering::Relaxed);

    let outcome = match result.to_message().encode() {
        Ok(payload) => state.publisher.publish(PREDICTIONS_TOPIC, payload).await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(subscribers) => {
            debug!(request_id = %result.request_id, subscribers, "Published prediction");
        }
        Err(e) => {
            state.publish_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                request_id = %result.request_id,
                error = %e,
                "Publish to {} failed; returning result anyway",
                PREDICTIONS_TOPIC
            );
        }
    }
}

/// Build prediction routes
pub fn predict_routes() -> Router<AppState> {
    Router::new().route("/predict", post(predict))
}
