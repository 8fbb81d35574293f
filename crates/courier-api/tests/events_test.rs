//! Event intake endpoint tests.

mod common;

use axum::http::StatusCode;
use common::{body_json, TestApp};
use courier_broker::MemoryBroker;

#[tokio::test]
async fn accepted_event_is_published_with_origin() {
    let app = TestApp::connected().await;

    let response = app.post("/events/order-42", r#"{"total":99}"#).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = body_json(response).await;
    assert!(body["message_id"].is_string());
    assert_eq!(body["connection"], "ready");

    app.wait_for_published("success", 1).await;
    let published = app.broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].message.key(), "order-42");
    assert_eq!(published[0].message.header("origin"), Some("courier-api"));
    assert_eq!(published[0].message.header("content-type"), Some("application/json"));
    assert_eq!(published[0].message.id().to_string(), body["message_id"].as_str().unwrap());
}

#[tokio::test]
async fn event_is_accepted_and_skipped_while_broker_down() {
    let app = TestApp::new(MemoryBroker::unreachable());

    let response = app.post("/events/user-1", r#"{"n":1}"#).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["connection"], "disconnected");

    app.wait_for_published("skipped", 1).await;
    assert!(app.broker.published().is_empty());
}

#[tokio::test]
async fn non_json_body_is_rejected() {
    let app = TestApp::connected().await;

    let response = app.post("/events/user-1", "not-json").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "invalid_json");

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(app.broker.published().is_empty());
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let app = TestApp::connected().await;
    let payload = format!(r#"{{"blob":"{}"}}"#, "x".repeat(courier_api::handlers::events::MAX_PAYLOAD_SIZE));

    let response = app.post("/events/user-1", payload).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let app = TestApp::connected().await;

    let response = app.get("/events/user-1").await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let response = app.get("/nope").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
