//! Activity event types: the wire record sent to the collector, its typed
//! per-kind payloads, and the page context events are stamped with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Longest visible element text kept on click events.
pub const MAX_ELEMENT_TEXT_CHARS: usize = 100;
/// Longest chat message or error message kept.
pub const MAX_MESSAGE_CHARS: usize = 500;
pub const MAX_ERROR_STACK_CHARS: usize = 1000;

/// Event kind tag, serialized as the `event_type` field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SessionStart,
    PageView,
    ButtonClick,
    LinkClick,
    ScrollDepth,
    ChatOpened,
    ChatClosed,
    ChatMessageSent,
    ChatMessageReceived,
    Custom,
    Error,
    SessionEnd,
    PageExit,
    DemoLaunched,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::SessionStart => "session_start",
            EventType::PageView => "page_view",
            EventType::ButtonClick => "button_click",
            EventType::LinkClick => "link_click",
            EventType::ScrollDepth => "scroll_depth",
            EventType::ChatOpened => "chat_opened",
            EventType::ChatClosed => "chat_closed",
            EventType::ChatMessageSent => "chat_message_sent",
            EventType::ChatMessageReceived => "chat_message_received",
            EventType::Custom => "custom",
            EventType::Error => "error",
            EventType::SessionEnd => "session_end",
            EventType::PageExit => "page_exit",
            EventType::DemoLaunched => "demo_launched",
        }
    }

    /// Kinds that skip the batch timer and are flushed as soon as they are queued.
    pub fn flushes_immediately(self) -> bool {
        matches!(
            self,
            EventType::SessionStart
                | EventType::SessionEnd
                | EventType::ChatMessageSent
                | EventType::Error
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chat message payload shared by the sent and received kinds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub message_text: Option<String>,
    /// Length of the full message, before truncation.
    pub message_length: usize,
}

impl ChatMessage {
    pub fn new(text: &str) -> Self {
        Self {
            message_text: non_empty(truncate_chars(text, MAX_MESSAGE_CHARS)),
            message_length: text.chars().count(),
        }
    }
}

/// Event-specific attributes, carried in the `data` field and tagged by
/// `event_type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    SessionStart {
        referrer: Option<String>,
        screen_width: u32,
        screen_height: u32,
        viewport_width: u32,
        viewport_height: u32,
        user_agent: String,
        language: String,
    },
    PageView {
        page_title: String,
        page_path: String,
    },
    ButtonClick {
        button_id: Option<String>,
        button_text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        button_class: Option<String>,
    },
    LinkClick {
        link_url: Option<String>,
        link_text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        link_target: Option<String>,
    },
    ScrollDepth {
        depth_percent: u8,
    },
    ChatOpened {},
    ChatClosed {
        duration_seconds: u64,
    },
    ChatMessageSent(ChatMessage),
    ChatMessageReceived(ChatMessage),
    Custom {
        custom_type: String,
        #[serde(flatten)]
        properties: Map<String, Value>,
    },
    Error {
        error_message: Option<String>,
        error_stack: Option<String>,
    },
    SessionEnd {
        duration_seconds: u64,
        max_scroll_depth: f64,
    },
    PageExit {
        duration_seconds: u64,
        max_scroll_depth: f64,
    },
    DemoLaunched {
        demo_id: String,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::SessionStart { .. } => EventType::SessionStart,
            EventPayload::PageView { .. } => EventType::PageView,
            EventPayload::ButtonClick { .. } => EventType::ButtonClick,
            EventPayload::LinkClick { .. } => EventType::LinkClick,
            EventPayload::ScrollDepth { .. } => EventType::ScrollDepth,
            EventPayload::ChatOpened {} => EventType::ChatOpened,
            EventPayload::ChatClosed { .. } => EventType::ChatClosed,
            EventPayload::ChatMessageSent(_) => EventType::ChatMessageSent,
            EventPayload::ChatMessageReceived(_) => EventType::ChatMessageReceived,
            EventPayload::Custom { .. } => EventType::Custom,
            EventPayload::Error { .. } => EventType::Error,
            EventPayload::SessionEnd { .. } => EventType::SessionEnd,
            EventPayload::PageExit { .. } => EventType::PageExit,
            EventPayload::DemoLaunched { .. } => EventType::DemoLaunched,
        }
    }

    pub fn session_start(page: &PageContext) -> Self {
        EventPayload::SessionStart {
            referrer: page.referrer.clone().and_then(non_empty),
            screen_width: page.screen_width,
            screen_height: page.screen_height,
            viewport_width: page.viewport_width,
            viewport_height: page.viewport_height,
            user_agent: page.user_agent.clone(),
            language: page.language.clone(),
        }
    }

    pub fn page_view(page: &PageContext) -> Self {
        EventPayload::PageView {
            page_title: page.title.clone(),
            page_path: page.path.clone(),
        }
    }

    pub fn button_click(id: Option<&str>, text: Option<&str>, class: Option<&str>) -> Self {
        EventPayload::ButtonClick {
            button_id: id.map(str::to_owned).and_then(non_empty),
            button_text: visible_text(text, MAX_ELEMENT_TEXT_CHARS),
            button_class: class.map(str::to_owned).and_then(non_empty),
        }
    }

    pub fn link_click(url: Option<&str>, text: Option<&str>, target: Option<&str>) -> Self {
        EventPayload::LinkClick {
            link_url: url.map(str::to_owned).and_then(non_empty),
            link_text: visible_text(text, MAX_ELEMENT_TEXT_CHARS),
            link_target: target.map(str::to_owned).and_then(non_empty),
        }
    }

    /// A custom event. A `custom_type` key inside `properties` is dropped in
    /// favour of `name`.
    pub fn custom(name: impl Into<String>, mut properties: Map<String, Value>) -> Self {
        properties.remove("custom_type");
        EventPayload::Custom {
            custom_type: name.into(),
            properties,
        }
    }

    pub fn error(message: &str, stack: Option<&str>) -> Self {
        EventPayload::Error {
            error_message: non_empty(truncate_chars(message, MAX_MESSAGE_CHARS)),
            error_stack: stack
                .map(|s| truncate_chars(s, MAX_ERROR_STACK_CHARS))
                .and_then(non_empty),
        }
    }
}

/// A single telemetry record, as posted to the collector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityEvent {
    #[serde(flatten)]
    pub payload: EventPayload,
    pub session_id: String,
    pub page_url: String,
    pub demo_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ActivityEvent {
    pub fn new(
        payload: EventPayload,
        session_id: impl Into<String>,
        page_url: impl Into<String>,
        demo_id: Option<String>,
    ) -> Self {
        Self {
            payload,
            session_id: session_id.into(),
            page_url: page_url.into(),
            demo_id,
            timestamp: Utc::now(),
        }
    }

    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }
}

/// Browser context of the page hosting the tracker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageContext {
    pub url: String,
    pub title: String,
    pub path: String,
    pub referrer: Option<String>,
    pub screen_width: u32,
    pub screen_height: u32,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub user_agent: String,
    pub language: String,
}

impl PageContext {
    /// Context for `url`, with the path derived from it.
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let path = url::Url::parse(&url)
            .map(|u| u.path().to_owned())
            .unwrap_or_else(|_| "/".to_owned());
        Self {
            url,
            title: String::new(),
            path,
            referrer: None,
            screen_width: 0,
            screen_height: 0,
            viewport_width: 0,
            viewport_height: 0,
            user_agent: String::new(),
            language: String::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }

    pub fn with_screen(mut self, width: u32, height: u32) -> Self {
        self.screen_width = width;
        self.screen_height = height;
        self
    }

    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport_width = width;
        self.viewport_height = height;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>, language: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self.language = language.into();
        self
    }
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn visible_text(text: Option<&str>, max_chars: usize) -> Option<String> {
    text.map(|t| truncate_chars(t.trim(), max_chars))
        .and_then(non_empty)
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
