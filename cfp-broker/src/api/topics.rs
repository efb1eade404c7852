//! Topic publish/subscribe endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    Json,
};
use futures::stream::Stream;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::atomic::Ordering;
use tracing::{debug, info};

use cfp_common::api::ApiResult;
use cfp_common::broker_client::PublishResponse;
use cfp_common::bus::{validate_payload, validate_topic};
use cfp_common::sse::topic_sse_stream;

use crate::AppState;

/// One entry of `GET /topics`
#[derive(Debug, Serialize)]
pub struct TopicInfo {
    pub name: String,
    pub subscribers: usize,
}

/// `GET /topics` response
#[derive(Debug, Serialize)]
pub struct TopicsResponse {
    pub topics: Vec<TopicInfo>,
}

/// POST /topics/:topic
///
/// Body is the opaque payload. Accepted even when nobody is subscribed, in
/// which case the message is dropped. Payloads with carriage returns are
/// rejected since they cannot be framed as SSE data.
pub async fn publish(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    payload: String,
) -> ApiResult<(StatusCode, Json<PublishResponse>)> {
    validate_topic(&topic)?;
    validate_payload(&payload)?;

    let subscribers = state.bus.publish_local(&topic, payload);
    state.published_total.fetch_add(1, Ordering::Relaxed);
    debug!(topic = %topic, subscribers, "Message published");

    Ok((
        StatusCode::ACCEPTED,
        Json(PublishResponse { topic, subscribers }),
    ))
}

/// GET /topics/:topic/events - SSE stream of messages published from now on
pub async fn subscribe(
    State(state): State<AppState>,
    Path(topic): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    validate_topic(&topic)?;

    let rx = state.bus.subscribe_local(&topic);
    info!(
        topic = %topic,
        subscribers = state.bus.subscriber_count(&topic),
        "New SSE subscriber"
    );

    Ok(topic_sse_stream(topic, rx))
}

/// GET /topics
pub async fn list_topics(State(state): State<AppState>) -> Json<TopicsResponse> {
    let topics = state
        .bus
        .topics()
        .into_iter()
        .map(|(name, subscribers)| TopicInfo { name, subscribers })
        .collect();
    Json(TopicsResponse { topics })
}
