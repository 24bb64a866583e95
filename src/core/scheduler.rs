//! # Deadline scheduler.
//!
//! Owns the `id → timer` map of one instance. Each armed timer is a spawned
//! sleep guarded by a child [`CancellationToken`]; when it elapses it hands an
//! [`Expiry`] to the fire callback, which normally forwards it to the owning
//! instance loop.
//!
//! ## Race resolution
//! A timer may elapse while an acknowledgment for the same id is already queued.
//! The loop therefore **claims** an expiry before acting on it: [`Scheduler::claim`]
//! removes the entry only if it is still the same arming (generation match).
//! Whichever of {cancel, claim} runs first in the loop wins; the other is a no-op.
//!
//! ```text
//! arm(id, d, f) ──► timers[id] = {generation g, token}
//!                    └─► spawn { select! { token.cancelled() => {}, sleep(d) => f(Expiry{id, g}) } }
//!
//! loop: Fire(expiry) ──► claim(expiry)? ── yes ─► expire
//!                                        └─ no ──► stale, ignore
//! ```

use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Token handed to the fire callback when a timer elapses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expiry {
    id: String,
    generation: u64,
}

impl Expiry {
    /// Id the timer was armed for.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// True for expiries produced by an arm with a non-positive delay.
    pub fn is_immediate(&self) -> bool {
        self.generation == 0
    }
}

struct TimerHandle {
    generation: u64,
    cancel: CancellationToken,
}

/// Per-instance timer map.
///
/// Dropping the scheduler cancels every armed timer.
pub struct Scheduler {
    timers: HashMap<String, TimerHandle>,
    next_generation: u64,
    root: CancellationToken,
}

impl Scheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self {
            timers: HashMap::new(),
            next_generation: 0,
            root: CancellationToken::new(),
        }
    }

    /// Schedules `on_fire` once after `delay_ms`.
    ///
    /// A previous timer for `id` is cancelled first. With `delay_ms <= 0` nothing
    /// is armed and `on_fire` runs immediately on the calling thread.
    /// Must be called within a tokio runtime.
    pub fn arm<F>(&mut self, id: &str, delay_ms: i64, on_fire: F)
    where
        F: FnOnce(Expiry) + Send + 'static,
    {
        self.cancel(id);
        if delay_ms <= 0 {
            on_fire(Expiry {
                id: id.to_string(),
                generation: 0,
            });
            return;
        }

        self.next_generation += 1;
        let expiry = Expiry {
            id: id.to_string(),
            generation: self.next_generation,
        };
        let token = self.root.child_token();
        let cancelled = token.clone();
        let delay = Duration::from_millis(delay_ms as u64);

        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(delay) => on_fire(expiry),
            }
        });

        self.timers.insert(
            id.to_string(),
            TimerHandle {
                generation: self.next_generation,
                cancel: token,
            },
        );
    }

    /// Stops and discards the timer for `id`; returns false if none was armed.
    pub fn cancel(&mut self, id: &str) -> bool {
        match self.timers.remove(id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// True if a timer is armed for `id`.
    pub fn is_armed(&self, id: &str) -> bool {
        self.timers.contains_key(id)
    }

    /// Check-and-clear for an elapsed timer.
    ///
    /// Returns true (and forgets the timer) if `expiry` belongs to the arming that is
    /// still current for its id. Returns false if that timer was cancelled or re-armed.
    /// Immediate expiries always claim.
    pub fn claim(&mut self, expiry: &Expiry) -> bool {
        if expiry.is_immediate() {
            return true;
        }
        match self.timers.get(&expiry.id) {
            Some(handle) if handle.generation == expiry.generation => {
                self.timers.remove(&expiry.id);
                true
            }
            _ => false,
        }
    }

    /// Cancels every armed timer; returns how many were cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let n = self.timers.len();
        for (_, handle) in self.timers.drain() {
            handle.cancel.cancel();
        }
        n
    }

    /// Number of armed timers.
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// True if no timer is armed.
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn forward(tx: &mpsc::UnboundedSender<Expiry>) -> impl FnOnce(Expiry) + Send + 'static {
        let tx = tx.clone();
        move |e| {
            let _ = tx.send(e);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut s = Scheduler::new();
        let start = tokio::time::Instant::now();

        s.arm("a", 200, forward(&tx));
        assert!(s.is_armed("a"));

        let e = rx.recv().await.unwrap();
        assert_eq!(e.id(), "a");
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert!(s.claim(&e));
        assert!(!s.is_armed("a"));
        assert!(!s.claim(&e), "second claim must fail");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_fire() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut s = Scheduler::new();
        s.arm("a", 100, forward(&tx));
        assert!(s.cancel("a"));
        assert!(!s.cancel("a"));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_expiry_is_not_claimed_after_rearm() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut s = Scheduler::new();
        s.arm("a", 50, forward(&tx));
        let first = rx.recv().await.unwrap();

        // Re-armed before the loop processed the first expiry.
        s.arm("a", 1_000, forward(&tx));
        assert!(!s.claim(&first));
        assert!(s.is_armed("a"));
        assert_eq!(s.len(), 1);
    }

    #[tokio::test]
    async fn non_positive_delay_fires_synchronously() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut s = Scheduler::new();
        s.arm("now", 0, forward(&tx));
        s.arm("past", -30, forward(&tx));

        let e = rx.try_recv().unwrap();
        assert!(e.is_immediate());
        assert!(s.claim(&e));
        assert!(rx.try_recv().is_ok());
        assert!(s.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_stops_everything() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut s = Scheduler::new();
        for id in ["a", "b", "c"] {
            s.arm(id, 100, forward(&tx));
        }
        assert_eq!(s.cancel_all(), 3);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());
    }
}
