//! Delivery against a mock collector over real HTTP.

use std::sync::Arc;
use std::time::Duration;

use activity_core::{TrackerConfig, TrackerError};
use activity_web_sdk::{
    ActivityEvent, ActivityTracker, DeliveryRequest, EventPayload, FlushOutcome, HttpTransport,
    PageContext, Transport,
};
use httpmock::prelude::*;

const TOKEN: &str = "secret-token";

fn page() -> PageContext {
    PageContext::new("https://peakpoint.example/braces").with_title("Braces | PeakPoint Ortho")
}

fn event(name: &str) -> ActivityEvent {
    ActivityEvent::new(
        EventPayload::custom(name, serde_json::Map::new()),
        "6b1f3b9e-2f0a-4b7e-8c11-0d6e1f2a3b4c",
        "https://peakpoint.example/braces",
        Some("peakpoint-ortho".into()),
    )
}

#[tokio::test]
async fn test_single_event_posts_to_track_activity() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/svc-dev-track_activity")
                .header("authorization", "Bearer secret-token")
                .header("content-type", "application/json")
                .json_body_partial(
                    r#"{"event_type": "custom", "demo_id": "peakpoint-ortho", "data": {"custom_type": "x-ray_viewed"}}"#,
                );
            then.status(200);
        })
        .await;

    let transport = HttpTransport::new(server.url("/svc-dev"), None).unwrap();
    let request = DeliveryRequest::for_events(vec![event("x-ray_viewed")]).unwrap();
    transport.deliver(&request, TOKEN).await.unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn test_multiple_events_post_to_batch_endpoint() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/svc-dev-track_activity_batch")
                .header("authorization", "Bearer secret-token")
                .body_contains(r#""events":["#);
            then.status(200);
        })
        .await;

    let transport = HttpTransport::new(server.url("/svc-dev"), None).unwrap();
    let request = DeliveryRequest::for_events(vec![event("a"), event("b"), event("c")]).unwrap();
    transport.deliver(&request, TOKEN).await.unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn test_error_status_is_retryable() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/svc-dev-track_activity");
            then.status(500);
        })
        .await;

    let transport = HttpTransport::new(server.url("/svc-dev"), None).unwrap();
    let request = DeliveryRequest::for_events(vec![event("a")]).unwrap();
    let err = transport.deliver(&request, TOKEN).await.unwrap_err();

    assert!(matches!(err, TrackerError::Status { status: 500, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_unreachable_collector_is_retryable() {
    let transport = HttpTransport::new(
        "http://127.0.0.1:1/svc-dev",
        Some(Duration::from_secs(2)),
    )
    .unwrap();
    let request = DeliveryRequest::for_events(vec![event("a")]).unwrap();
    let err = transport.deliver(&request, TOKEN).await.unwrap_err();

    assert!(matches!(err, TrackerError::Transport(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_tracker_retries_after_collector_outage() {
    let server = MockServer::start_async().await;
    let mut outage = server
        .mock_async(|when, then| {
            when.method(POST).path("/svc-dev-track_activity_batch");
            then.status(503);
        })
        .await;

    let config = TrackerConfig::new(server.url("/svc-dev"))
        .with_batch_interval(Duration::from_secs(60));
    let tracker = ActivityTracker::connect(config, page()).await.unwrap();
    assert_eq!(tracker.queued_len(), 2);

    tracker.set_token(TOKEN);
    tracker.track_error("payment widget failed to load", None).await;
    outage.assert_hits_async(1).await;
    assert_eq!(tracker.queued_len(), 3);

    outage.delete_async().await;
    let recovered = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/svc-dev-track_activity_batch")
                .header("authorization", "Bearer secret-token")
                .body_contains("session_start")
                .body_contains("page_view")
                .body_contains("payment widget failed to load");
            then.status(200);
        })
        .await;

    assert_eq!(tracker.flush().await, FlushOutcome::Delivered(3));
    recovered.assert_async().await;
    assert_eq!(tracker.queued_len(), 0);
}

#[tokio::test]
async fn test_unload_batch_is_sent_without_blocking() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/svc-dev-track_activity_batch")
                .body_contains("session_end");
            then.status(200);
        })
        .await;

    let config = TrackerConfig::new(server.url("/svc-dev"))
        .with_batch_interval(Duration::from_secs(60));
    let transport = Arc::new(HttpTransport::from_config(&config).unwrap());
    let tracker = ActivityTracker::init(config, page(), transport).await.unwrap();
    tracker.set_token(TOKEN);

    assert_eq!(tracker.handle_unload(), 3);

    for _ in 0..50 {
        if mock.hits_async().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    mock.assert_async().await;
}
