//! # Wall-clock source for deadlines.
//!
//! Deadlines are stored as absolute epoch milliseconds so they survive restarts.
//! [`SystemClock`] reads the system time; [`TokioClock`] follows tokio's clock
//! (which can be paused and advanced in tests) from a fixed epoch origin.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of "now" in epoch milliseconds.
pub trait Clock: Send + Sync + 'static {
    /// Current time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;
}

/// Shared clock handle.
pub type ClockRef = Arc<dyn Clock>;

/// System wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Epoch clock driven by [`tokio::time::Instant`].
///
/// Shares one instance between trackers that must agree on "now" while time is paused.
#[derive(Clone, Copy, Debug)]
pub struct TokioClock {
    origin_ms: i64,
    origin: tokio::time::Instant,
}

impl TokioClock {
    /// Starts at the current system time.
    pub fn new() -> Self {
        Self::starting_at(SystemClock.now_millis())
    }

    /// Starts at an explicit epoch value.
    pub fn starting_at(origin_ms: i64) -> Self {
        Self {
            origin_ms,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_millis(&self) -> i64 {
        self.origin_ms + self.origin.elapsed().as_millis() as i64
    }
}
