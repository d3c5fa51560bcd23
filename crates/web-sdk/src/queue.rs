//! In-memory FIFO of events waiting for delivery.

use std::collections::VecDeque;

use crate::events::ActivityEvent;

/// Ordered buffer of pending events. Failed batches go back to the front so
/// creation order survives retries.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<ActivityEvent>,
    max_len: Option<usize>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue that evicts once it holds more than `max_len` events.
    pub fn bounded(max_len: usize) -> Self {
        Self {
            events: VecDeque::new(),
            max_len: Some(max_len.max(1)),
        }
    }

    /// Append at the tail. Returns the events evicted to respect the bound.
    pub fn enqueue(&mut self, event: ActivityEvent) -> Vec<ActivityEvent> {
        self.events.push_back(event);
        self.enforce_bound()
    }

    /// Remove and return up to `max` of the oldest events.
    pub fn dequeue_batch(&mut self, max: usize) -> Vec<ActivityEvent> {
        let count = max.min(self.events.len());
        self.events.drain(..count).collect()
    }

    /// Put `events` back at the head, keeping their relative order.
    pub fn requeue_front(&mut self, events: Vec<ActivityEvent>) -> Vec<ActivityEvent> {
        for event in events.into_iter().rev() {
            self.events.push_front(event);
        }
        self.enforce_bound()
    }

    pub fn drain_all(&mut self) -> Vec<ActivityEvent> {
        self.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActivityEvent> {
        self.events.iter()
    }

    // Oldest non-critical events go first; critical ones only when nothing else is left.
    fn enforce_bound(&mut self) -> Vec<ActivityEvent> {
        let Some(max_len) = self.max_len else {
            return Vec::new();
        };
        let mut evicted = Vec::new();
        while self.events.len() > max_len {
            let idx = self
                .events
                .iter()
                .position(|e| !e.event_type().flushes_immediately())
                .unwrap_or(0);
            if let Some(event) = self.events.remove(idx) {
                evicted.push(event);
            }
        }
        evicted
    }
}
