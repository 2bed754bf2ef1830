//! API Endpoint Tests
//!
//! Tests for:
//! - Health and metrics endpoints
//! - Publishing onto publish queues
//! - Request status lookups
//! - Consume-one inspection

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tower::ServiceExt;

use qm_api::{create_router, AppState};
use qm_broker::{BrokerConnectionManager, InMemoryBroker, Publisher};
use qm_config::MediatorConfig;
use qm_relay::{PublishService, RequestDetails, RequestTracker};

struct TestApp {
    router: Router,
    broker: InMemoryBroker,
    tracker: Arc<RequestTracker>,
}

async fn create_test_app() -> TestApp {
    let broker = InMemoryBroker::new();
    let manager = Arc::new(BrokerConnectionManager::new(Arc::new(broker.clone())));
    manager.init("amqp://localhost").await.unwrap();

    let config = MediatorConfig {
        pub_queues: vec!["X".to_string()],
        ..Default::default()
    };
    let tracker = Arc::new(RequestTracker::default());
    let publish = Arc::new(PublishService::new(
        Arc::new(RwLock::new(config)),
        Publisher::new(Arc::new(broker.clone())),
        tracker.clone(),
    ));

    let router = create_router(AppState {
        publish,
        tracker: tracker.clone(),
        broker: manager,
        metrics: None,
    });

    TestApp { router, broker, tracker }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().method(Method::GET).uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ============================================================================
// Health Endpoint Tests
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app().await;
    let (status, body) = send(&app.router, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "UP");
}

#[tokio::test]
async fn test_metrics_without_recorder() {
    let app = create_test_app().await;
    let response = app.router.clone().oneshot(get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// ============================================================================
// Publish Endpoint Tests
// ============================================================================

#[tokio::test]
async fn test_publish_queues_request_and_tracks_it() {
    let app = create_test_app().await;
    let (status, body) = send(
        &app.router,
        post_json("/publish/X", json!({"data": {"requestId": "R1", "esbBody": {"amount": 5}}})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["success"], true);
    assert_eq!(body["data"]["esbBody"]["status"], "Your request is now queued for processing");
    assert_eq!(body["data"]["message"], "You will receive a response shortly");

    let sent = app.broker.sent_to("X");
    assert_eq!(sent.len(), 1);
    let queued: Value = serde_json::from_slice(&sent[0].0).unwrap();
    assert_eq!(queued, json!({"amount": 5, "requestId": "R1"}));

    let (status, body) = send(&app.router, get("/request-status/R1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "QUEUED");
    assert_eq!(body["data"]["queueName"], "X");
}

#[tokio::test]
async fn test_publish_without_esb_body_sends_whole_body() {
    let app = create_test_app().await;
    let (status, _) = send(&app.router, post_json("/publish/X", json!({"amount": 7}))).await;

    assert_eq!(status, StatusCode::OK);
    let queued: Value = serde_json::from_slice(&app.broker.sent_to("X")[0].0).unwrap();
    assert_eq!(queued, json!({"amount": 7}));
    assert!(app.tracker.is_empty());
}

#[tokio::test]
async fn test_publish_with_empty_request_id_is_untracked() {
    let app = create_test_app().await;
    let (status, _) = send(
        &app.router,
        post_json("/publish/X", json!({"data": {"requestId": "", "esbBody": {"amount": 3}}})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let queued: Value = serde_json::from_slice(&app.broker.sent_to("X")[0].0).unwrap();
    assert_eq!(queued, json!({"amount": 3}));
    assert!(app.tracker.is_empty());
}

#[tokio::test]
async fn test_publish_requires_json_content_type() {
    let app = create_test_app().await;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/publish/X")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("hello"))
        .unwrap();

    let (status, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid content type please use application/json");
    assert!(app.broker.sent_to("X").is_empty());
}

#[tokio::test]
async fn test_publish_unknown_queue_is_invalid_destination() {
    let app = create_test_app().await;
    let (status, body) = send(&app.router, post_json("/publish/NOPE", json!({}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["data"]["success"], false);
    assert_eq!(body["data"]["message"], "Invalid Destination");
    assert_eq!(body["data"]["esbBody"], "");
}

#[tokio::test]
async fn test_publish_with_unreachable_broker() {
    let app = create_test_app().await;
    app.broker.set_reachable(false);

    let (status, body) = send(
        &app.router,
        post_json("/publish/X", json!({"data": {"requestId": "R9"}})),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["data"]["message"], "Something went wrong while queueing your request");
    assert!(app.tracker.get("R9").is_none());
}

// ============================================================================
// Request Status Tests
// ============================================================================

#[tokio::test]
async fn test_unknown_request_id_is_not_found() {
    let app = create_test_app().await;
    let (status, body) = send(&app.router, get("/request-status/never-seen")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["requestId"], "never-seen");
    assert_eq!(
        body["message"],
        "Request ID not found in tracker. It may be expired or unknown."
    );
}

#[tokio::test]
async fn test_blank_request_id_is_bad_request() {
    let app = create_test_app().await;
    let (status, body) = send(&app.router, get("/request-status/%20%20")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Missing requestId");
}

#[tokio::test]
async fn test_tracker_lookup_by_nested_body_id() {
    let app = create_test_app().await;
    app.tracker
        .mark_forwarded("R7", RequestDetails::target("http://down/ok", "POST"));

    let (status, body) = send(
        &app.router,
        post_json("/tracker", json!({"data": {"esbBody": {"requestId": " R7 "}}})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "FORWARDED");
    assert_eq!(body["data"]["targetUrl"], "http://down/ok");
}

#[tokio::test]
async fn test_request_status_body_without_id() {
    let app = create_test_app().await;
    let (status, body) = send(&app.router, post_json("/request-status", json!({"other": 1}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Missing requestId in request body");
}

// ============================================================================
// Consume-One Tests
// ============================================================================

#[tokio::test]
async fn test_consume_one_empty_queue() {
    let app = create_test_app().await;
    let (status, body) = send(&app.router, get("/queue/X/consume-one")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "No messages available");
    assert!(body["esbBody"].is_null());
}

#[tokio::test]
async fn test_consume_one_returns_parsed_and_raw() {
    let app = create_test_app().await;
    app.broker.push("X", br#"{"requestId":"R1"}"#);
    app.broker.push("X", b"just text");

    let (_, first) = send(&app.router, get("/queue/X/consume-one")).await;
    assert_eq!(first["message"], "Message consumed");
    assert_eq!(first["esbBody"]["requestId"], "R1");
    assert_eq!(first["raw"], r#"{"requestId":"R1"}"#);

    let (_, second) = send(&app.router, get("/queue/X/consume-one")).await;
    assert_eq!(second["esbBody"], "just text");
}
