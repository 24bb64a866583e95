//! # LogWriter: lifecycle events as `tracing` records
//!
//! A subscriber that renders incoming [`Event`]s through `tracing`:
//! entry lifecycle at `debug`, timeouts and request failures at `info`,
//! recovered persistence failures and rejections at `warn`.
//!
//! ## Example output (fmt layer)
//! ```text
//! DEBUG ackvisor: accepted tracker="n1" entry="X1" delay_ms=200
//!  INFO ackvisor: timed out tracker="n1" entry="X1"
//!  WARN ackvisor: persist failed tracker="n1" entry="X2" reason="write rejected for \"X2\""
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let tracker = e.tracker.as_deref().unwrap_or("-");
        let entry = e.entry.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");

        match e.kind {
            EventKind::EntryAccepted => {
                tracing::debug!(target: "ackvisor", tracker, entry, delay_ms = ?e.delay_ms, "accepted");
            }
            EventKind::EntryRestored => {
                tracing::debug!(target: "ackvisor", tracker, entry, delay_ms = ?e.delay_ms, "restored");
            }
            EventKind::EntryDuplicate => {
                tracing::debug!(target: "ackvisor", tracker, entry, "duplicate");
            }
            EventKind::EntryAcknowledged => {
                tracing::debug!(target: "ackvisor", tracker, entry, "acknowledged");
            }
            EventKind::EntryTimedOut => {
                tracing::info!(target: "ackvisor", tracker, entry, "timed out");
            }
            EventKind::SubmissionRejected => {
                tracing::warn!(target: "ackvisor", tracker, entry, reason, "rejected");
            }
            EventKind::PersistFailed => {
                tracing::warn!(target: "ackvisor", tracker, entry, reason, "persist failed");
            }
            EventKind::RestoreFailed => {
                tracing::warn!(target: "ackvisor", tracker, entry, reason, "restore failed");
            }
            EventKind::RequestSent => {
                tracing::debug!(target: "ackvisor", tracker, entry, delay_ms = ?e.delay_ms, "request sent");
            }
            EventKind::RequestAcked => {
                tracing::debug!(target: "ackvisor", tracker, entry, "request acked");
            }
            EventKind::RequestFailed => {
                tracing::info!(target: "ackvisor", tracker, entry, "request failed");
            }
            EventKind::TrackerStarted => {
                tracing::info!(target: "ackvisor", tracker, reason, "started");
            }
            EventKind::TrackerStopped => {
                tracing::info!(target: "ackvisor", tracker, reason, "stopped");
            }
            EventKind::ScopeReconciled => {
                tracing::info!(target: "ackvisor", scope = tracker, "orphaned scope removed");
            }
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked => {
                tracing::warn!(target: "ackvisor", subscriber = tracker, reason, kind = ?e.kind, "subscriber");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
