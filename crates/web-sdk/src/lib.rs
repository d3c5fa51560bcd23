//! Browser activity tracking: session identity, an ordered event queue,
//! timed batch delivery with retry, and hooks that turn page signals into
//! events.
//!
//! # Modules
//!
//! - [`events`]: Event record, typed per-kind payloads, page context
//! - [`identity`]: Session identifier and bearer token lookup
//! - [`queue`]: FIFO of pending events with head requeueing
//! - [`transport`]: Collector delivery (HTTP and in-memory capture)
//! - [`tracker`]: The tracker instance and its public tracking API
//! - [`hooks`]: Click, scroll, visibility and unload instrumentation
//! - [`chat`]: Chat widget observer capability and adapter

pub mod chat;
pub mod events;
pub mod hooks;
pub mod identity;
pub mod queue;
mod scheduler;
pub mod tracker;
pub mod transport;

pub use chat::{ChatObserver, ChatWidgetAdapter};
pub use events::{ActivityEvent, EventPayload, EventType, PageContext};
pub use hooks::{ClickTarget, ScrollPosition, Visibility};
pub use identity::{MemoryStorage, SessionIdentity, Storage};
pub use queue::EventQueue;
pub use tracker::{ActivityTracker, FlushOutcome, Lifecycle};
pub use transport::{CaptureTransport, DeliveryRequest, Endpoint, HttpTransport, Transport};
