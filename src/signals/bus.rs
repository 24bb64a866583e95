//! # Named-channel signal bus.
//!
//! [`SignalBus`] correlates acknowledgment and failure signals with the
//! instances waiting for them. Unlike the lifecycle [`Bus`](crate::Bus) it is
//! synchronous and addressed by channel name.
//!
//! ## Rules
//! - `publish` calls every handler subscribed **at publish time**, in subscription order,
//!   on the publishing thread; a handler added during delivery is not called for that publish.
//! - Handlers run outside the registry lock, so they may subscribe, unsubscribe or publish.
//! - A channel exists while it has subscribers; the last unsubscribe removes it.
//! - [`Binding`] unsubscribes on drop, tying a registration to its owner's lifetime.
//!
//! ## Example
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use ackvisor::{Message, SignalBus};
//!
//! let bus = SignalBus::new();
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! let binding = bus.bind("node:clear-1", move |msg: &Message| {
//!     sink.lock().unwrap().push(msg.get("orderId").cloned());
//! });
//!
//! let msg = Message::new().with("orderId", "X1");
//! assert_eq!(bus.publish("node:clear-1", &msg), 1);
//! drop(binding);
//! assert_eq!(bus.publish("node:clear-1", &msg), 0);
//! assert_eq!(seen.lock().unwrap().len(), 1);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use crate::message::Message;

/// Signal handler.
pub type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Identifies one subscription for [`SignalBus::unsubscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Channels {
    next_id: u64,
    by_name: HashMap<String, Vec<(SubscriptionId, Handler)>>,
}

/// Process-wide named-channel publish/subscribe registry.
///
/// Cheap to clone; clones share the same channels.
#[derive(Clone, Default)]
pub struct SignalBus {
    inner: Arc<Mutex<Channels>>,
}

impl SignalBus {
    /// Creates an isolated bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide bus.
    pub fn global() -> &'static SignalBus {
        static GLOBAL: OnceLock<SignalBus> = OnceLock::new();
        GLOBAL.get_or_init(SignalBus::new)
    }

    /// Subscribes `handler` to `channel`, creating the channel if needed.
    pub fn subscribe<F>(&self, channel: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let mut ch = self.lock();
        ch.next_id += 1;
        let id = SubscriptionId(ch.next_id);
        ch.by_name
            .entry(channel.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Removes a subscription; returns false if it was not registered.
    pub fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> bool {
        let mut ch = self.lock();
        let Some(handlers) = ch.by_name.get_mut(channel) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(sid, _)| *sid != id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            ch.by_name.remove(channel);
        }
        removed
    }

    /// Delivers `msg` to every current subscriber of `channel`; returns how many were called.
    pub fn publish(&self, channel: &str, msg: &Message) -> usize {
        let snapshot: Vec<Handler> = match self.lock().by_name.get(channel) {
            Some(handlers) => handlers.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return 0,
        };
        for handler in &snapshot {
            handler(msg);
        }
        snapshot.len()
    }

    /// Subscribes and returns a guard that unsubscribes on drop.
    pub fn bind<F>(&self, channel: &str, handler: F) -> Binding
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let id = self.subscribe(channel, handler);
        Binding {
            bus: self.clone(),
            channel: channel.to_string(),
            id,
        }
    }

    /// Number of subscribers on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.lock().by_name.get(channel).map_or(0, Vec::len)
    }

    /// True if `channel` currently has subscribers.
    pub fn has_channel(&self, channel: &str) -> bool {
        self.lock().by_name.contains_key(channel)
    }

    fn lock(&self) -> MutexGuard<'_, Channels> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ch = self.lock();
        let mut names: Vec<&String> = ch.by_name.keys().collect();
        names.sort_unstable();
        f.debug_struct("SignalBus").field("channels", &names).finish()
    }
}

/// Subscription guard; unsubscribes on drop.
#[must_use = "dropping a Binding unsubscribes immediately"]
pub struct Binding {
    bus: SignalBus,
    channel: String,
    id: SubscriptionId,
}

impl Binding {
    /// Channel this binding listens on.
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.channel, self.id);
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn delivers_in_subscription_order() {
        let bus = SignalBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            bus.subscribe("c", move |_| order.lock().unwrap().push(n));
        }
        assert_eq!(bus.publish("c", &Message::new()), 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn handler_added_during_delivery_is_not_called_for_that_publish() {
        let bus = SignalBus::new();
        let late_calls = Arc::new(AtomicUsize::new(0));

        let inner_bus = bus.clone();
        let counter = late_calls.clone();
        bus.subscribe("c", move |_| {
            let counter = counter.clone();
            inner_bus.subscribe("c", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        assert_eq!(bus.publish("c", &Message::new()), 1);
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);
        assert_eq!(bus.subscriber_count("c"), 2);

        bus.publish("c", &Message::new());
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn last_unsubscribe_removes_channel() {
        let bus = SignalBus::new();
        let a = bus.subscribe("c", |_| {});
        let b = bus.subscribe("c", |_| {});
        assert!(bus.unsubscribe("c", a));
        assert!(!bus.unsubscribe("c", a));
        assert!(bus.has_channel("c"));
        assert!(bus.unsubscribe("c", b));
        assert!(!bus.has_channel("c"));
        assert_eq!(bus.publish("c", &Message::new()), 0);
    }

    #[test]
    fn binding_drop_unsubscribes() {
        let bus = SignalBus::new();
        let binding = bus.bind("node:x", |_| {});
        assert_eq!(binding.channel(), "node:x");
        assert_eq!(bus.subscriber_count("node:x"), 1);
        drop(binding);
        assert!(!bus.has_channel("node:x"));
    }

    #[test]
    fn global_is_shared() {
        let a = SignalBus::global().bind("global-test-channel", |_| {});
        assert!(SignalBus::global().has_channel("global-test-channel"));
        drop(a);
        assert!(!SignalBus::global().has_channel("global-test-channel"));
    }
}
