//! The activity tracker instance: owns the queue, identity, transport and
//! batch scheduler, and exposes the tracking API used by page glue code.

use std::sync::Arc;

use activity_core::{TrackerConfig, TrackerResult};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::events::{ActivityEvent, ChatMessage, EventPayload, PageContext};
use crate::hooks::ScrollDepthTracker;
use crate::identity::SessionIdentity;
use crate::queue::EventQueue;
use crate::scheduler::BatchScheduler;
use crate::transport::{DeliveryRequest, HttpTransport, Transport};

/// Result of a single flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was queued.
    Empty,
    /// Events are queued but no bearer token is available.
    NoToken,
    /// The collector acknowledged this many events.
    Delivered(usize),
    /// Delivery failed; this many events went back to the head of the queue.
    Requeued(usize),
    /// Delivery failed in a way retrying cannot fix; the events were discarded.
    Dropped(usize),
}

/// Where the tracked page is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    Hidden,
    Terminated,
}

pub(crate) struct PageState {
    pub(crate) lifecycle: Lifecycle,
    pub(crate) loaded_at: Instant,
    pub(crate) scroll: ScrollDepthTracker,
}

impl PageState {
    fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Active,
            loaded_at: Instant::now(),
            scroll: ScrollDepthTracker::default(),
        }
    }

    /// Seconds on the page since load (or since the tab was last shown).
    pub(crate) fn elapsed_seconds(&self) -> u64 {
        let millis = self.loaded_at.elapsed().as_millis() as u64;
        (millis + 500) / 1000
    }
}

pub(crate) struct TrackerInner {
    pub(crate) config: TrackerConfig,
    demo_id: RwLock<Option<String>>,
    pub(crate) identity: SessionIdentity,
    page: RwLock<PageContext>,
    queue: Mutex<EventQueue>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) state: Mutex<PageState>,
    scheduler: Mutex<Option<BatchScheduler>>,
}

impl TrackerInner {
    pub(crate) fn enqueue(&self, payload: EventPayload) -> ActivityEvent {
        let event = ActivityEvent::new(
            payload,
            self.identity.session_id(),
            self.page.read().url.clone(),
            self.demo_id.read().clone(),
        );
        let event_type = event.event_type();

        let (evicted, queued) = {
            let mut queue = self.queue.lock();
            let evicted = queue.enqueue(event.clone());
            (evicted, queue.len())
        };
        metrics::counter!("activity_tracker.queued").increment(1);
        self.record_evictions(evicted);

        if self.config.debug {
            debug!(event_type = %event_type, queued, "queued event");
        }
        event
    }

    pub(crate) async fn flush(&self) -> FlushOutcome {
        if self.queue.lock().is_empty() {
            return FlushOutcome::Empty;
        }
        let Some(token) = self.identity.token() else {
            if self.config.debug {
                debug!("no auth token, holding queued events");
            }
            return FlushOutcome::NoToken;
        };

        let batch = self.queue.lock().dequeue_batch(self.config.batch_size);
        let Some(request) = DeliveryRequest::for_events(batch) else {
            return FlushOutcome::Empty;
        };
        let count = request.len();

        match self.transport.deliver(&request, &token).await {
            Ok(()) => {
                metrics::counter!("activity_tracker.delivered").increment(count as u64);
                if self.config.debug {
                    debug!(count, endpoint = request.endpoint().function_name(), "sent events");
                }
                FlushOutcome::Delivered(count)
            }
            Err(e) if e.is_retryable() => {
                metrics::counter!("activity_tracker.requeued").increment(count as u64);
                warn!(error = %e, count, "delivery failed, requeueing events");
                let evicted = self.queue.lock().requeue_front(request.into_events());
                self.record_evictions(evicted);
                FlushOutcome::Requeued(count)
            }
            Err(e) => {
                metrics::counter!("activity_tracker.dropped").increment(count as u64);
                error!(error = %e, count, "delivery failed permanently, dropping events");
                FlushOutcome::Dropped(count)
            }
        }
    }

    /// Hand everything still queued to the unload path. Returns how many
    /// events were handed over.
    pub(crate) fn flush_on_unload(&self) -> usize {
        let Some(token) = self.identity.token() else {
            warn!(queued = self.queue.lock().len(), "no auth token at unload, events lost");
            return 0;
        };
        let events = self.queue.lock().drain_all();
        if events.is_empty() {
            return 0;
        }
        let count = events.len();
        self.transport
            .deliver_unload(DeliveryRequest::unload(events), &token);
        count
    }

    pub(crate) fn stop_scheduler(&self) {
        if let Some(scheduler) = self.scheduler.lock().take() {
            scheduler.stop();
        }
    }

    fn record_evictions(&self, evicted: Vec<ActivityEvent>) {
        if evicted.is_empty() {
            return;
        }
        metrics::counter!("activity_tracker.evicted").increment(evicted.len() as u64);
        for event in &evicted {
            warn!(event_type = %event.event_type(), "queue full, evicted event");
        }
    }
}

/// Handle to a running tracker. Cloning is cheap; all clones share the same
/// queue and session.
#[derive(Clone)]
pub struct ActivityTracker {
    pub(crate) inner: Arc<TrackerInner>,
}

impl ActivityTracker {
    /// Validate `config`, start the batch timer and record the session start
    /// and initial page view. A missing or invalid collector address aborts
    /// initialization; nothing is installed in that case.
    pub async fn init(
        config: TrackerConfig,
        page: PageContext,
        transport: Arc<dyn Transport>,
    ) -> TrackerResult<Self> {
        Self::init_with_identity(config, page, SessionIdentity::default(), transport).await
    }

    /// Like [`ActivityTracker::init`], with caller-provided session storage.
    pub async fn init_with_identity(
        config: TrackerConfig,
        page: PageContext,
        identity: SessionIdentity,
        transport: Arc<dyn Transport>,
    ) -> TrackerResult<Self> {
        if let Err(e) = config.validate() {
            error!(error = %e, "activity tracker not initialized");
            return Err(e);
        }

        let interval = config.batch_interval();
        let retry_policy = config.retry_policy();
        let queue = config
            .max_queue_size
            .map_or_else(EventQueue::new, EventQueue::bounded);
        let inner = Arc::new(TrackerInner {
            demo_id: RwLock::new(config.demo_id.clone()),
            config,
            identity,
            page: RwLock::new(page),
            queue: Mutex::new(queue),
            transport,
            state: Mutex::new(PageState::new()),
            scheduler: Mutex::new(None),
        });
        let scheduler = BatchScheduler::start(Arc::downgrade(&inner), interval, retry_policy);
        *inner.scheduler.lock() = Some(scheduler);

        info!(
            api_base_url = %inner.config.api_base_url,
            demo_id = ?inner.config.demo_id,
            batch_size = inner.config.batch_size,
            batch_interval_ms = inner.config.batch_interval_ms,
            session_id = %inner.identity.session_id(),
            "activity tracker initialized"
        );

        let tracker = Self { inner };
        let page = tracker.page();
        tracker.track(EventPayload::session_start(&page)).await;
        tracker.track(EventPayload::page_view(&page)).await;
        Ok(tracker)
    }

    /// Initialize with an HTTP transport built from `config`.
    pub async fn connect(config: TrackerConfig, page: PageContext) -> TrackerResult<Self> {
        let transport = HttpTransport::from_config(&config)?;
        Self::init(config, page, Arc::new(transport)).await
    }

    /// Queue an event, flushing right away for the immediate kinds. Ignored
    /// once the page has terminated.
    pub async fn track(&self, payload: EventPayload) -> Option<ActivityEvent> {
        if self.lifecycle() == Lifecycle::Terminated {
            debug!(event_type = %payload.event_type(), "tracker terminated, event ignored");
            return None;
        }
        let event = self.inner.enqueue(payload);
        if event.event_type().flushes_immediately() {
            self.inner.flush().await;
        }
        Some(event)
    }

    /// Try to send up to one batch of queued events.
    pub async fn flush(&self) -> FlushOutcome {
        self.inner.flush().await
    }

    pub fn set_token(&self, token: &str) {
        self.inner.identity.set_token(token);
        if self.inner.config.debug {
            debug!("token set");
        }
    }

    pub fn clear_token(&self) {
        self.inner.identity.clear_token();
    }

    pub fn set_demo_id(&self, demo_id: impl Into<String>) {
        let demo_id = demo_id.into();
        if self.inner.config.debug {
            debug!(demo_id = %demo_id, "demo id set");
        }
        *self.inner.demo_id.write() = Some(demo_id);
    }

    /// Point subsequent events at a new page URL and title.
    pub fn set_page(&self, page: PageContext) {
        *self.inner.page.write() = page;
    }

    pub async fn track_custom_event(
        &self,
        name: impl Into<String>,
        data: Map<String, Value>,
    ) -> Option<ActivityEvent> {
        self.track(EventPayload::custom(name, data)).await
    }

    pub async fn track_error(&self, message: &str, stack: Option<&str>) -> Option<ActivityEvent> {
        self.track(EventPayload::error(message, stack)).await
    }

    pub async fn track_chat_message_sent(&self, text: &str) -> Option<ActivityEvent> {
        self.track(EventPayload::ChatMessageSent(ChatMessage::new(text)))
            .await
    }

    pub async fn track_chat_message_received(&self, text: &str) -> Option<ActivityEvent> {
        self.track(EventPayload::ChatMessageReceived(ChatMessage::new(text)))
            .await
    }

    pub async fn track_chat_opened(&self) -> Option<ActivityEvent> {
        self.track(EventPayload::ChatOpened {}).await
    }

    pub async fn track_chat_closed(&self, duration_seconds: u64) -> Option<ActivityEvent> {
        self.track(EventPayload::ChatClosed { duration_seconds })
            .await
    }

    pub async fn track_button_click(
        &self,
        button_id: Option<&str>,
        button_text: Option<&str>,
    ) -> Option<ActivityEvent> {
        self.track(EventPayload::button_click(button_id, button_text, None))
            .await
    }

    pub async fn track_link_click(
        &self,
        link_url: Option<&str>,
        link_text: Option<&str>,
    ) -> Option<ActivityEvent> {
        self.track(EventPayload::link_click(link_url, link_text, None))
            .await
    }

    pub async fn track_demo_launched(&self, demo_id: impl Into<String>) -> Option<ActivityEvent> {
        self.track(EventPayload::DemoLaunched {
            demo_id: demo_id.into(),
        })
        .await
    }

    pub fn session_id(&self) -> String {
        self.inner.identity.session_id().to_owned()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.state.lock().lifecycle
    }

    pub fn page(&self) -> PageContext {
        self.inner.page.read().clone()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    pub fn queued_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Snapshot of the queue, oldest first.
    pub fn queued_events(&self) -> Vec<ActivityEvent> {
        self.inner.queue.lock().iter().cloned().collect()
    }
}

impl std::fmt::Debug for ActivityTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityTracker")
            .field("api_base_url", &self.inner.config.api_base_url)
            .field("session_id", &self.inner.identity.session_id())
            .field("lifecycle", &self.lifecycle())
            .field("queued", &self.queued_len())
            .finish()
    }
}
