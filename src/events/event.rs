//! # Lifecycle events emitted by trackers, requesters and the registry.
//!
//! The [`EventKind`] enum classifies events into three groups:
//! - **Entry events**: what happened to one tracked id (accepted, restored, timed out, ...)
//! - **Persistence events**: best-effort store failures that were recovered locally
//! - **Runtime events**: instance start/stop, scope reconciliation, subscriber health
//!
//! The [`Event`] struct carries the instance id, entry id, reason and delay.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use ackvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::EntryAccepted)
//!     .with_tracker("n1")
//!     .with_entry("X1")
//!     .with_delay_ms(200);
//!
//! assert_eq!(ev.kind, EventKind::EntryAccepted);
//! assert_eq!(ev.entry.as_deref(), Some("X1"));
//! assert_eq!(ev.delay_ms, Some(200));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Entry events ===
    /// Fresh entry armed and sent on `accepted`.
    ///
    /// Sets: `tracker`, `entry`, `delay_ms` (ttl)
    EntryAccepted,

    /// Cached entry reloaded and sent on `restored`.
    ///
    /// Sets: `tracker`, `entry`, `delay_ms` (remaining, clamped at 0)
    EntryRestored,

    /// Submission for an id that is already armed; sent on `accepted` only.
    ///
    /// Sets: `tracker`, `entry`
    EntryDuplicate,

    /// Deadline passed without acknowledgment; sent on `timed-out`.
    ///
    /// Sets: `tracker`, `entry`
    EntryTimedOut,

    /// Acknowledgment cleared an armed entry.
    ///
    /// Sets: `tracker`, `entry`
    EntryAcknowledged,

    /// Submission or acknowledgment signal rejected (invalid id, invalid TTL).
    ///
    /// Sets: `tracker`, `entry` (if resolved), `reason`
    SubmissionRejected,

    // === Persistence events ===
    /// A store write or delete failed; the entry continues in memory only.
    ///
    /// Sets: `tracker`, `entry`, `reason`
    PersistFailed,

    /// A cached record could not be read at startup and was skipped.
    ///
    /// Sets: `tracker`, `entry` (record key), `reason`
    RestoreFailed,

    // === Request/response events ===
    /// Request forwarded and its deadline armed.
    ///
    /// Sets: `tracker` (requester id), `entry`, `delay_ms`
    RequestSent,

    /// Acknowledgment arrived before the request deadline.
    ///
    /// Sets: `tracker`, `entry`
    RequestAcked,

    /// Request deadline passed; failure signal published.
    ///
    /// Sets: `tracker`, `entry`
    RequestFailed,

    // === Runtime events ===
    /// Instance loop started (after cached entries were restored).
    ///
    /// Sets: `tracker`, `reason` (restored count)
    TrackerStarted,

    /// Instance loop stopped; armed timers were cancelled.
    ///
    /// Sets: `tracker`, `reason` (cancelled count)
    TrackerStopped,

    /// Orphaned scope removed at startup.
    ///
    /// Sets: `tracker` (scope id)
    ScopeReconciled,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `tracker` (subscriber name), `reason`
    SubscriberOverflow,

    /// Subscriber panicked during event processing.
    ///
    /// Sets: `tracker` (subscriber name), `reason`
    SubscriberPanicked,
}

/// Lifecycle event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Instance (tracker / requester / subscriber) the event belongs to.
    pub tracker: Option<Arc<str>>,
    /// Tracked id, if applicable.
    pub entry: Option<Arc<str>>,
    /// Human-readable reason (errors, counts).
    pub reason: Option<Arc<str>>,
    /// Armed delay in milliseconds.
    pub delay_ms: Option<u64>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            tracker: None,
            entry: None,
            reason: None,
            delay_ms: None,
        }
    }

    /// Attaches the owning instance id.
    #[inline]
    pub fn with_tracker(mut self, tracker: impl Into<Arc<str>>) -> Self {
        self.tracker = Some(tracker.into());
        self
    }

    /// Attaches the tracked id.
    #[inline]
    pub fn with_entry(mut self, entry: impl Into<Arc<str>>) -> Self {
        self.entry = Some(entry.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a delay; negative values are clamped to zero.
    #[inline]
    pub fn with_delay_ms(mut self, ms: i64) -> Self {
        self.delay_ms = Some(ms.max(0) as u64);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_tracker(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_tracker(subscriber)
            .with_reason(info)
    }

    /// True for events describing one tracked entry.
    pub fn is_entry_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::EntryAccepted
                | EventKind::EntryRestored
                | EventKind::EntryDuplicate
                | EventKind::EntryTimedOut
                | EventKind::EntryAcknowledged
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let a = Event::new(EventKind::TrackerStarted);
        let b = Event::new(EventKind::TrackerStopped);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn negative_delay_is_clamped() {
        let ev = Event::new(EventKind::EntryRestored).with_delay_ms(-40);
        assert_eq!(ev.delay_ms, Some(0));
        assert!(ev.is_entry_event());
        assert!(!Event::subscriber_overflow("log", "full").is_entry_event());
    }
}
