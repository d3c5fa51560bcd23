//! Chat widget integration.
//!
//! The tracker only depends on [`ChatObserver`]. [`ChatWidgetAdapter`] is a
//! best-effort bridge for widgets that expose no message callbacks: it
//! measures how long the widget stays open and classifies message nodes
//! added to the widget by their CSS class names.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::tracker::ActivityTracker;

#[async_trait]
pub trait ChatObserver: Send + Sync {
    async fn on_message_sent(&self, text: &str);
    async fn on_message_received(&self, text: &str);
    async fn on_opened(&self);
    async fn on_closed(&self, open_for: Duration);
}

#[async_trait]
impl ChatObserver for ActivityTracker {
    async fn on_message_sent(&self, text: &str) {
        self.track_chat_message_sent(text).await;
    }

    async fn on_message_received(&self, text: &str) {
        self.track_chat_message_received(text).await;
    }

    async fn on_opened(&self) {
        self.track_chat_opened().await;
    }

    async fn on_closed(&self, open_for: Duration) {
        let seconds = (open_for.as_millis() as u64 + 500) / 1000;
        self.track_chat_closed(seconds).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    Sent,
    Received,
}

/// Classify a message element by its `class` attribute.
pub fn classify_message(class_name: &str) -> Option<MessageDirection> {
    let classes: Vec<&str> = class_name.split_whitespace().collect();
    if classes
        .iter()
        .any(|c| *c == "user-message" || c.contains("agent-message--user"))
    {
        return Some(MessageDirection::Sent);
    }
    let agent_message = classes.contains(&"agent-message") && !class_name.contains("user");
    if agent_message || class_name.contains("agent-message--agent") {
        return Some(MessageDirection::Received);
    }
    None
}

/// An element added inside the chat widget, with its subtree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddedNode {
    pub class_name: String,
    pub text: String,
    pub children: Vec<AddedNode>,
}

impl AddedNode {
    pub fn new(class_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            text: text.into(),
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: AddedNode) -> Self {
        self.children.push(child);
        self
    }

    /// First node in this subtree (depth-first, self included) classified as `direction`.
    fn find(&self, direction: MessageDirection) -> Option<&AddedNode> {
        if classify_message(&self.class_name) == Some(direction) {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(direction))
    }
}

/// Bridges raw widget signals onto a [`ChatObserver`].
pub struct ChatWidgetAdapter<O: ChatObserver> {
    observer: O,
    opened_at: Mutex<Option<Instant>>,
}

impl<O: ChatObserver> ChatWidgetAdapter<O> {
    pub fn new(observer: O) -> Self {
        Self {
            observer,
            opened_at: Mutex::new(None),
        }
    }

    pub async fn widget_opened(&self) {
        *self.opened_at.lock() = Some(Instant::now());
        self.observer.on_opened().await;
    }

    /// Closing a widget never seen open reports a zero duration.
    pub async fn widget_closed(&self) {
        let opened_at = self.opened_at.lock().take();
        let open_for = opened_at.map(|t| t.elapsed()).unwrap_or_default();
        self.observer.on_closed(open_for).await;
    }

    /// Inspect nodes added to the widget and report the messages they carry.
    /// Returns how many messages were reported.
    pub async fn nodes_added(&self, nodes: &[AddedNode]) -> usize {
        let mut reported = 0;
        for node in nodes {
            if let Some(sent) = node.find(MessageDirection::Sent) {
                self.observer.on_message_sent(sent.text.trim()).await;
                reported += 1;
            }
            if let Some(received) = node.find(MessageDirection::Received) {
                self.observer.on_message_received(received.text.trim()).await;
                reported += 1;
            }
        }
        reported
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use activity_core::TrackerConfig;

    use crate::events::{ChatMessage, EventPayload, EventType, PageContext};
    use crate::transport::{CaptureTransport, Endpoint};

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatObserver for Recorder {
        async fn on_message_sent(&self, text: &str) {
            self.calls.lock().push(format!("sent:{text}"));
        }
        async fn on_message_received(&self, text: &str) {
            self.calls.lock().push(format!("received:{text}"));
        }
        async fn on_opened(&self) {
            self.calls.lock().push("opened".into());
        }
        async fn on_closed(&self, open_for: Duration) {
            self.calls.lock().push(format!("closed:{}", open_for.as_secs()));
        }
    }

    #[test]
    fn test_classify_message() {
        assert_eq!(classify_message("user-message"), Some(MessageDirection::Sent));
        assert_eq!(
            classify_message("chat-bubble agent-message--user"),
            Some(MessageDirection::Sent)
        );
        assert_eq!(classify_message("agent-message"), Some(MessageDirection::Received));
        assert_eq!(
            classify_message("bubble agent-message--agent"),
            Some(MessageDirection::Received)
        );
        assert_eq!(classify_message("agent-message user-avatar"), None);
        assert_eq!(classify_message("typing-indicator"), None);
    }

    #[tokio::test]
    async fn test_nodes_added_reports_messages() {
        let adapter = ChatWidgetAdapter::new(Recorder::default());
        let nodes = vec![
            AddedNode::new("message-wrap", "")
                .with_child(AddedNode::new("user-message", "  Do you take new patients? ")),
            AddedNode::new("message-wrap", "")
                .with_child(AddedNode::new("agent-message", "Yes, we do!")),
            AddedNode::new("typing-indicator", "..."),
        ];
        assert_eq!(adapter.nodes_added(&nodes).await, 2);
        assert_eq!(
            *adapter.observer().calls.lock(),
            vec![
                "sent:Do you take new patients?".to_string(),
                "received:Yes, we do!".to_string()
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_close_measures_duration() {
        let adapter = ChatWidgetAdapter::new(Recorder::default());
        adapter.widget_opened().await;
        tokio::time::advance(Duration::from_secs(42)).await;
        adapter.widget_closed().await;
        // A second close without an open reports zero.
        adapter.widget_closed().await;
        assert_eq!(
            *adapter.observer().calls.lock(),
            vec!["opened".to_string(), "closed:42".to_string(), "closed:0".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_widget_activity_reaches_tracker() {
        let transport = Arc::new(CaptureTransport::new());
        let config = TrackerConfig::new("https://collector.test/automatia-demo-dev")
            .with_batch_interval(Duration::from_secs(600));
        let tracker = ActivityTracker::init(
            config,
            PageContext::new("https://harborlight.example/contact"),
            transport.clone(),
        )
        .await
        .unwrap();
        let adapter = ChatWidgetAdapter::new(tracker.clone());

        adapter.widget_opened().await;
        tokio::time::advance(Duration::from_millis(41_600)).await;
        adapter.widget_closed().await;
        let nodes = vec![AddedNode::new("message-wrap", "")
            .with_child(AddedNode::new("agent-message", " Hi! How can we help? "))];
        assert_eq!(adapter.nodes_added(&nodes).await, 1);

        let queued: Vec<EventPayload> = tracker
            .queued_events()
            .into_iter()
            .map(|e| e.payload)
            .collect();
        assert_eq!(
            &queued[2..],
            &[
                EventPayload::ChatOpened {},
                EventPayload::ChatClosed {
                    duration_seconds: 42
                },
                EventPayload::ChatMessageReceived(ChatMessage::new("Hi! How can we help?")),
            ]
        );
        assert_eq!(transport.attempt_count(), 0);

        // A sent message is flushed right away along with everything queued.
        tracker.set_token("tok");
        let nodes = vec![AddedNode::new("user-message", "Do you take new patients?")];
        assert_eq!(adapter.nodes_added(&nodes).await, 1);

        let attempts = transport.attempts();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].endpoint, Endpoint::TrackActivityBatch);
        assert_eq!(attempts[0].events.len(), 6);
        assert_eq!(
            attempts[0].events[5].payload,
            EventPayload::ChatMessageSent(ChatMessage::new("Do you take new patients?"))
        );
        assert_eq!(attempts[0].events[5].event_type(), EventType::ChatMessageSent);
        assert_eq!(tracker.queued_len(), 0);
    }
}
