//! Delivery of queued events to the collector.
//!
//! A single event goes to `{base}-track_activity` as the request body; more
//! than one goes to `{base}-track_activity_batch` wrapped as `{"events": [...]}`.
//! Every request carries `Authorization: Bearer <token>`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use activity_core::{TrackerConfig, TrackerError, TrackerResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{header, Client};
use serde::Serialize;
use tracing::{debug, warn};

use crate::events::ActivityEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    TrackActivity,
    TrackActivityBatch,
}

impl Endpoint {
    pub fn function_name(self) -> &'static str {
        match self {
            Endpoint::TrackActivity => "track_activity",
            Endpoint::TrackActivityBatch => "track_activity_batch",
        }
    }

    /// Collector functions are addressed as `{base}-{function}`.
    pub fn url(self, base_url: &str) -> String {
        format!("{}-{}", base_url.trim(), self.function_name())
    }
}

/// One outgoing request worth of events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DeliveryRequest {
    Single(ActivityEvent),
    Batch { events: Vec<ActivityEvent> },
}

impl DeliveryRequest {
    /// Route `events` to the single or batch endpoint. `None` when empty.
    pub fn for_events(mut events: Vec<ActivityEvent>) -> Option<Self> {
        match events.len() {
            0 => None,
            1 => events.pop().map(DeliveryRequest::Single),
            _ => Some(DeliveryRequest::Batch { events }),
        }
    }

    /// Page-unload requests always use the batch endpoint.
    pub fn unload(events: Vec<ActivityEvent>) -> Self {
        DeliveryRequest::Batch { events }
    }

    pub fn endpoint(&self) -> Endpoint {
        match self {
            DeliveryRequest::Single(_) => Endpoint::TrackActivity,
            DeliveryRequest::Batch { .. } => Endpoint::TrackActivityBatch,
        }
    }

    pub fn events(&self) -> &[ActivityEvent] {
        match self {
            DeliveryRequest::Single(event) => std::slice::from_ref(event),
            DeliveryRequest::Batch { events } => events,
        }
    }

    pub fn len(&self) -> usize {
        self.events().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events().is_empty()
    }

    pub fn into_events(self) -> Vec<ActivityEvent> {
        match self {
            DeliveryRequest::Single(event) => vec![event],
            DeliveryRequest::Batch { events } => events,
        }
    }
}

/// Network delivery seam. `deliver` is awaited and its failures requeue the
/// events; `deliver_unload` must return immediately and never reports back.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, request: &DeliveryRequest, token: &str) -> TrackerResult<()>;

    fn deliver_unload(&self, request: DeliveryRequest, token: &str);
}

pub fn build_http_client(request_timeout: Option<Duration>) -> reqwest::Result<Client> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    let mut builder = Client::builder()
        .default_headers(headers)
        .user_agent(concat!("activity-tracker/", env!("CARGO_PKG_VERSION")));
    if let Some(timeout) = request_timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

/// HTTP transport backed by `reqwest`.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, request_timeout: Option<Duration>) -> TrackerResult<Self> {
        let client = build_http_client(request_timeout)
            .map_err(|e| TrackerError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn from_config(config: &TrackerConfig) -> TrackerResult<Self> {
        Self::new(config.api_base_url.clone(), config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

async fn post_events(
    client: &Client,
    endpoint: &str,
    token: &str,
    request: &DeliveryRequest,
) -> TrackerResult<()> {
    let body = serde_json::to_vec(request)?;
    let response = client
        .post(endpoint)
        .bearer_auth(token)
        .body(body)
        .send()
        .await
        .map_err(|e| TrackerError::Transport(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(TrackerError::Status {
            status: status.as_u16(),
            endpoint: endpoint.to_owned(),
        });
    }
    Ok(())
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, request: &DeliveryRequest, token: &str) -> TrackerResult<()> {
        let endpoint = request.endpoint().url(&self.base_url);
        debug!(endpoint = %endpoint, count = request.len(), "posting events");
        post_events(&self.client, &endpoint, token, request).await
    }

    fn deliver_unload(&self, request: DeliveryRequest, token: &str) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(count = request.len(), "no async runtime, unload batch dropped");
            metrics::counter!("activity_tracker.unload_errors").increment(1);
            return;
        };

        let client = self.client.clone();
        let endpoint = request.endpoint().url(&self.base_url);
        let token = token.to_owned();
        handle.spawn(async move {
            match post_events(&client, &endpoint, &token, &request).await {
                Ok(()) => {
                    metrics::counter!("activity_tracker.unload_sent").increment(request.len() as u64);
                }
                Err(e) => {
                    metrics::counter!("activity_tracker.unload_errors").increment(1);
                    warn!(error = %e, count = request.len(), "unload batch lost");
                }
            }
        });
    }
}

/// A request seen by [`CaptureTransport`].
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub endpoint: Endpoint,
    pub token: String,
    pub events: Vec<ActivityEvent>,
    pub succeeded: bool,
}

/// In-memory transport that records every request, for tests and dry runs.
#[derive(Default)]
pub struct CaptureTransport {
    attempts: Mutex<Vec<CapturedRequest>>,
    unloads: Mutex<Vec<CapturedRequest>>,
    failures_remaining: AtomicUsize,
    failing: AtomicBool,
}

impl CaptureTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` deliveries.
    pub fn fail_next(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Fail every delivery until switched off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every delivery attempt, successful or not.
    pub fn attempts(&self) -> Vec<CapturedRequest> {
        self.attempts.lock().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }

    /// Events acknowledged by the collector, in delivery order.
    pub fn delivered_events(&self) -> Vec<ActivityEvent> {
        self.attempts
            .lock()
            .iter()
            .filter(|r| r.succeeded)
            .flat_map(|r| r.events.iter().cloned())
            .collect()
    }

    pub fn unload_requests(&self) -> Vec<CapturedRequest> {
        self.unloads.lock().clone()
    }

    fn should_fail(&self) -> bool {
        if self.failing.load(Ordering::SeqCst) {
            return true;
        }
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Transport for CaptureTransport {
    async fn deliver(&self, request: &DeliveryRequest, token: &str) -> TrackerResult<()> {
        let fail = self.should_fail();
        self.attempts.lock().push(CapturedRequest {
            endpoint: request.endpoint(),
            token: token.to_owned(),
            events: request.events().to_vec(),
            succeeded: !fail,
        });
        if fail {
            return Err(TrackerError::Status {
                status: 503,
                endpoint: request.endpoint().function_name().to_owned(),
            });
        }
        Ok(())
    }

    fn deliver_unload(&self, request: DeliveryRequest, token: &str) {
        self.unloads.lock().push(CapturedRequest {
            endpoint: request.endpoint(),
            token: token.to_owned(),
            events: request.into_events(),
            succeeded: true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPayload;

    fn event(kind: &str) -> ActivityEvent {
        ActivityEvent::new(
            EventPayload::custom(kind, serde_json::Map::new()),
            "s-1",
            "https://example.com",
            None,
        )
    }

    #[test]
    fn test_endpoint_urls() {
        let base = "https://us-central1-demo.cloudfunctions.net/automatia-demo-dev";
        assert_eq!(
            Endpoint::TrackActivity.url(base),
            "https://us-central1-demo.cloudfunctions.net/automatia-demo-dev-track_activity"
        );
        assert_eq!(
            Endpoint::TrackActivityBatch.url(base),
            "https://us-central1-demo.cloudfunctions.net/automatia-demo-dev-track_activity_batch"
        );
    }

    #[test]
    fn test_routing_by_count() {
        assert!(DeliveryRequest::for_events(Vec::new()).is_none());

        let single = DeliveryRequest::for_events(vec![event("a")]).unwrap();
        assert_eq!(single.endpoint(), Endpoint::TrackActivity);

        let batch = DeliveryRequest::for_events(vec![event("a"), event("b")]).unwrap();
        assert_eq!(batch.endpoint(), Endpoint::TrackActivityBatch);
        assert_eq!(batch.len(), 2);

        let unload = DeliveryRequest::unload(vec![event("a")]);
        assert_eq!(unload.endpoint(), Endpoint::TrackActivityBatch);
    }

    #[test]
    fn test_body_shapes() {
        let single = DeliveryRequest::for_events(vec![event("a")]).unwrap();
        let value = serde_json::to_value(&single).unwrap();
        assert_eq!(value["event_type"], "custom");
        assert!(value.get("events").is_none());

        let batch = DeliveryRequest::for_events(vec![event("a"), event("b")]).unwrap();
        let value = serde_json::to_value(&batch).unwrap();
        let events = value["events"].as_array().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1]["data"]["custom_type"], "b");
    }

    #[tokio::test]
    async fn test_capture_transport_failures() {
        let transport = CaptureTransport::new();
        transport.fail_next(1);
        let request = DeliveryRequest::for_events(vec![event("a")]).unwrap();

        let err = transport.deliver(&request, "tok").await.unwrap_err();
        assert!(err.is_retryable());
        transport.deliver(&request, "tok").await.unwrap();

        assert_eq!(transport.attempt_count(), 2);
        assert_eq!(transport.delivered_events().len(), 1);
        assert_eq!(transport.attempts()[0].token, "tok");
    }
}
