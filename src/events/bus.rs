//! # Event bus for broadcasting lifecycle events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] that lets every
//! instance loop publish without blocking.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                    Subscriber (one):
//!   Tracker 1   ──┐
//!   Tracker N   ──┼──────► Bus ───────► Registry listener ────► SubscriberSet
//!   Requester   ──┤  (broadcast chan)
//!   Registry    ──┘
//! ```
//!
//! This is the observability channel only. Acknowledgment and failure signals
//! travel over the [`SignalBus`](crate::SignalBus), which is synchronous and named.
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks.
//! - **Bounded capacity**: one ring buffer shared by all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: events are lost if nobody is subscribed.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for lifecycle events.
///
/// Cheap to clone (internally holds an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<Event>(capacity);
        Self { tx }
    }

    /// Publishes an event to all active receivers; dropped if there are none.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a receiver that observes events sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn receivers_only_see_later_events() {
        let bus = Bus::new(0);
        bus.publish(Event::new(EventKind::TrackerStarted));
        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::EntryAccepted).with_entry("X1"));
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::EntryAccepted);
    }
}
