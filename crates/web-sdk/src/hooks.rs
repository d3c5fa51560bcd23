//! Instrumentation hooks: translate raw page signals (clicks, scrolling,
//! visibility changes, unload) into tracked events.

use tracing::{debug, info};

use crate::events::{EventPayload, PageContext};
use crate::tracker::{ActivityTracker, Lifecycle};

/// Scroll depths, in percent, reported at most once per page lifetime.
pub const SCROLL_THRESHOLDS: [u8; 5] = [25, 50, 75, 90, 100];

/// An element on the path of a click, from the clicked node outwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClickTarget {
    pub tag_name: String,
    pub id: Option<String>,
    pub text: Option<String>,
    pub class_name: Option<String>,
    pub href: Option<String>,
    pub target: Option<String>,
    pub role: Option<String>,
    /// Carries a `data-track` attribute.
    pub data_track: bool,
}

impl ClickTarget {
    pub fn new(tag_name: impl Into<String>) -> Self {
        Self {
            tag_name: tag_name.into(),
            ..Self::default()
        }
    }

    pub fn link(href: impl Into<String>) -> Self {
        Self {
            href: Some(href.into()),
            ..Self::new("a")
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_class(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn tracked(mut self) -> Self {
        self.data_track = true;
        self
    }

    fn is_link(&self) -> bool {
        self.tag_name.eq_ignore_ascii_case("a")
    }

    /// Buttons, links, `role="button"`, `.btn`, and `[data-track]` elements.
    pub fn is_trackable(&self) -> bool {
        self.is_link()
            || self.tag_name.eq_ignore_ascii_case("button")
            || self.role.as_deref() == Some("button")
            || self
                .class_name
                .as_deref()
                .is_some_and(|c| c.split_whitespace().any(|cls| cls == "btn"))
            || self.data_track
    }

    pub fn to_payload(&self) -> EventPayload {
        if self.is_link() {
            EventPayload::link_click(
                self.href.as_deref(),
                self.text.as_deref(),
                self.target.as_deref(),
            )
        } else {
            EventPayload::button_click(
                self.id.as_deref(),
                self.text.as_deref(),
                self.class_name.as_deref(),
            )
        }
    }
}

/// Scroll geometry sampled from the document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollPosition {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub viewport_height: f64,
}

impl ScrollPosition {
    pub fn new(scroll_top: f64, scroll_height: f64, viewport_height: f64) -> Self {
        Self {
            scroll_top,
            scroll_height,
            viewport_height,
        }
    }

    /// Percent of the scrollable height covered, or `None` when the page
    /// does not scroll.
    pub fn depth_percent(&self) -> Option<f64> {
        let scrollable = self.scroll_height - self.viewport_height;
        if scrollable.is_nan() || scrollable <= 0.0 {
            return None;
        }
        let depth = self.scroll_top / scrollable * 100.0;
        depth.is_finite().then(|| depth.clamp(0.0, 100.0))
    }
}

/// Tracks the deepest scroll seen and which thresholds were already reported.
#[derive(Debug, Clone, Default)]
pub struct ScrollDepthTracker {
    max_depth: f64,
    reported: [bool; SCROLL_THRESHOLDS.len()],
}

impl ScrollDepthTracker {
    /// Record a depth sample and return the thresholds it newly reaches.
    pub fn observe(&mut self, depth: f64) -> Vec<u8> {
        if depth.is_nan() || depth <= self.max_depth {
            return Vec::new();
        }
        self.max_depth = depth;

        let floor = depth.floor();
        let mut crossed = Vec::new();
        for (i, threshold) in SCROLL_THRESHOLDS.iter().enumerate() {
            if !self.reported[i] && floor >= f64::from(*threshold) {
                self.reported[i] = true;
                crossed.push(*threshold);
            }
        }
        crossed
    }

    pub fn max_depth(&self) -> f64 {
        self.max_depth
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

impl ActivityTracker {
    /// Handle a click. `path` starts at the clicked element and walks up
    /// through its ancestors; the closest trackable element is recorded.
    pub async fn handle_click(&self, path: &[ClickTarget]) -> bool {
        let Some(target) = path.iter().find(|t| t.is_trackable()) else {
            return false;
        };
        self.track(target.to_payload()).await.is_some()
    }

    /// Handle a scroll sample, emitting any newly reached depth thresholds.
    pub async fn handle_scroll(&self, position: ScrollPosition) -> Vec<u8> {
        let Some(depth) = position.depth_percent() else {
            return Vec::new();
        };
        let crossed = {
            let mut state = self.inner.state.lock();
            if state.lifecycle == Lifecycle::Terminated {
                return Vec::new();
            }
            state.scroll.observe(depth)
        };
        for threshold in &crossed {
            self.track(EventPayload::ScrollDepth {
                depth_percent: *threshold,
            })
            .await;
        }
        crossed
    }

    /// Hidden: record the page exit and flush. Visible again: restart the
    /// page clock and record a fresh page view.
    pub async fn handle_visibility_change(&self, visibility: Visibility) {
        match visibility {
            Visibility::Hidden => {
                let exit = {
                    let mut state = self.inner.state.lock();
                    if state.lifecycle != Lifecycle::Active {
                        return;
                    }
                    state.lifecycle = Lifecycle::Hidden;
                    EventPayload::PageExit {
                        duration_seconds: state.elapsed_seconds(),
                        max_scroll_depth: state.scroll.max_depth(),
                    }
                };
                self.inner.enqueue(exit);
                self.inner.flush().await;
            }
            Visibility::Visible => {
                {
                    let mut state = self.inner.state.lock();
                    if state.lifecycle != Lifecycle::Hidden {
                        return;
                    }
                    state.lifecycle = Lifecycle::Active;
                    state.loaded_at = tokio::time::Instant::now();
                }
                let page: PageContext = self.page();
                self.inner.enqueue(EventPayload::page_view(&page));
            }
        }
    }

    /// Page is going away: record the session end and hand the whole queue
    /// to the transport's unload path. Never waits on the network. Returns
    /// how many events were handed over; without a token that is zero and
    /// the events stay queued.
    pub fn handle_unload(&self) -> usize {
        let session_end = {
            let mut state = self.inner.state.lock();
            if state.lifecycle == Lifecycle::Terminated {
                return 0;
            }
            state.lifecycle = Lifecycle::Terminated;
            EventPayload::SessionEnd {
                duration_seconds: state.elapsed_seconds(),
                max_scroll_depth: state.scroll.max_depth(),
            }
        };
        self.inner.stop_scheduler();
        self.inner.enqueue(session_end);

        let sent = self.inner.flush_on_unload();
        if sent > 0 {
            info!(count = sent, "unload batch handed to transport");
        } else {
            debug!(queued = self.queued_len(), "nothing sent at unload");
        }
        sent
    }
}
