//! Integration tests for cfp-broker API endpoints
//!
//! Tests cover:
//! - Health endpoint
//! - Publish with and without subscribers
//! - SSE fan-out to connected subscribers
//! - No backlog for late subscribers
//! - Topic name and payload validation

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::time::Duration;
use tower::util::ServiceExt; // for `oneshot` method

use cfp_broker::{build_router, AppState};
use cfp_common::bus::TopicBus;

/// Test helper: Create app with a small per-subscriber buffer
fn setup_app() -> Router {
    build_router(AppState::new(TopicBus::new(8)))
}

fn publish_request(topic: &str, payload: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/topics/{}", topic))
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Test helper: Extract JSON body from response
async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

/// Test helper: Read the next non-empty SSE frame as text
async fn next_frame(body: &mut Body) -> String {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), body.frame())
            .await
            .expect("SSE frame should arrive")
            .expect("SSE body should not end")
            .expect("SSE frame should not error");
        if let Ok(data) = frame.into_data() {
            if !data.is_empty() {
                return String::from_utf8_lossy(&data).into_owned();
            }
        }
    }
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = setup_app();

    let response = app.oneshot(get_request("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "cfp-broker");
    assert_eq!(body["buffer_capacity"], 8);
    assert!(body["version"].is_string());
}

// =============================================================================
// Publish
// =============================================================================

#[tokio::test]
async fn test_publish_without_subscribers_is_accepted() {
    let app = setup_app();

    let response = app
        .oneshot(publish_request("predictions", "{\"x\":1}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["topic"], "predictions");
    assert_eq!(body["subscribers"], 0);
}

#[tokio::test]
async fn test_publish_invalid_topic_rejected() {
    let app = setup_app();

    let response = app
        .oneshot(publish_request("bad%20topic", "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_carriage_return_payload_rejected_and_stream_survives() {
    let app = setup_app();

    let response = app
        .clone()
        .oneshot(get_request("/topics/predictions/events"))
        .await
        .unwrap();
    let mut body = response.into_body();

    let rejected = app
        .clone()
        .oneshot(publish_request("predictions", "a\rb"))
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
    let error = extract_json(rejected.into_body()).await;
    assert_eq!(error["error"]["code"], "INVALID_INPUT");

    let accepted = app
        .clone()
        .oneshot(publish_request("predictions", "good"))
        .await
        .unwrap();
    assert_eq!(accepted.status(), StatusCode::ACCEPTED);

    let frame = next_frame(&mut body).await;
    assert!(frame.contains("data: good"), "frame: {}", frame);
}

// =============================================================================
// Subscribe (SSE)
// =============================================================================

#[tokio::test]
async fn test_in_process_carriage_return_is_framed_as_lines() {
    let bus = TopicBus::new(8);
    let app = build_router(AppState::new(bus.clone()));

    let response = app
        .oneshot(get_request("/topics/predictions/events"))
        .await
        .unwrap();
    let mut body = response.into_body();

    bus.publish_local("predictions", "a\rb".to_string());
    bus.publish_local("predictions", "good".to_string());

    let mut text = next_frame(&mut body).await;
    while !text.contains("data: good") {
        text.push_str(&next_frame(&mut body).await);
    }
    assert!(text.contains("data: a\ndata: b\n"), "frames: {}", text);
}

#[tokio::test]
async fn test_subscriber_receives_published_message() {
    let app = setup_app();

    let response = app
        .clone()
        .oneshot(get_request("/topics/predictions/events"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/event-stream"
    );
    let mut body = response.into_body();

    let published = app
        .clone()
        .oneshot(publish_request("predictions", "{\"p\":0.5}"))
        .await
        .unwrap();
    let published = extract_json(published.into_body()).await;
    assert_eq!(published["subscribers"], 1);

    let frame = next_frame(&mut body).await;
    assert!(frame.contains("event: message"), "frame: {}", frame);
    assert!(frame.contains("data: {\"p\":0.5}"), "frame: {}", frame);
}

#[tokio::test]
async fn test_late_subscriber_gets_no_backlog() {
    let app = setup_app();

    // Published before anyone listens: dropped
    app.clone()
        .oneshot(publish_request("predictions", "early"))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(get_request("/topics/predictions/events"))
        .await
        .unwrap();
    let mut body = response.into_body();

    app.clone()
        .oneshot(publish_request("predictions", "late"))
        .await
        .unwrap();

    let frame = next_frame(&mut body).await;
    assert!(frame.contains("data: late"), "frame: {}", frame);
    assert!(!frame.contains("early"), "frame: {}", frame);
}

#[tokio::test]
async fn test_topics_lists_active_subscribers() {
    let app = setup_app();

    let sse = app
        .clone()
        .oneshot(get_request("/topics/predictions/events"))
        .await
        .unwrap();

    let response = app.clone().oneshot(get_request("/topics")).await.unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["topics"][0]["name"], "predictions");
    assert_eq!(body["topics"][0]["subscribers"], 1);

    drop(sse);
}
