//! Latency coalescing of raw events into batches.
//!
//! The first event after a quiet period opens a batch; everything that
//! arrives before `latency` has elapsed joins it. With no-defer, that first
//! event is delivered on its own right away and the events that follow it
//! coalesce as usual.

use std::time::{Duration, Instant};

use crate::types::{EventBatch, RawEvent};

#[derive(Debug)]
pub struct Coalescer {
    /// Events waiting for the open batch to expire.
    pending: Vec<RawEvent>,
    /// When the open batch started.
    opened_at: Option<Instant>,
    /// Most recent recorded event, for no-defer quiet detection.
    last_event_at: Option<Instant>,
    latency: Duration,
    no_defer: bool,
}

impl Coalescer {
    pub fn new(latency: Duration, no_defer: bool) -> Self {
        Self {
            pending: Vec::new(),
            opened_at: None,
            last_event_at: None,
            latency,
            no_defer,
        }
    }

    /// Record an event observed at `now`.
    ///
    /// Returns a batch only in no-defer mode, when the event ends a quiet
    /// period and must be delivered immediately.
    pub fn record(&mut self, event: RawEvent, now: Instant) -> Option<EventBatch> {
        let quiet = self
            .last_event_at
            .is_none_or(|last| now.duration_since(last) >= self.latency);
        self.last_event_at = Some(now);

        if self.no_defer && quiet && self.pending.is_empty() {
            return Some(EventBatch::new(vec![event]));
        }

        if self.opened_at.is_none() {
            self.opened_at = Some(now);
        }
        self.pending.push(event);
        None
    }

    /// When the open batch becomes deliverable.
    pub fn deadline(&self) -> Option<Instant> {
        self.opened_at.map(|opened| opened + self.latency)
    }

    /// Take the open batch if its latency has elapsed at `now`.
    pub fn take_ready(&mut self, now: Instant) -> Option<EventBatch> {
        match self.deadline() {
            Some(deadline) if now >= deadline => self.drain(),
            _ => None,
        }
    }

    /// Take whatever is pending regardless of latency.
    pub fn drain(&mut self) -> Option<EventBatch> {
        self.opened_at = None;
        if self.pending.is_empty() {
            return None;
        }
        Some(EventBatch::new(std::mem::take(&mut self.pending)))
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
