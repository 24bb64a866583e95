//! # Acknowledgment publisher (`ack-clear` / `ack`).
//!
//! An [`AckClear`] instance owns the channel `node:<id>`. Sending a message
//! through it stamps `_event` with that channel name and publishes it; every
//! tracker or requester listing this instance in its `links` then resolves the
//! id of the message with its own id-selector and clears the matching entry.

use crate::message::{EVENT_FIELD, Message};
use crate::signals::{SignalBus, node_channel};

/// Publishes acknowledgment signals on its own channel.
#[derive(Clone, Debug)]
pub struct AckClear {
    id: String,
    channel: String,
    signals: SignalBus,
}

impl AckClear {
    /// Acknowledger with instance id `id`.
    pub fn new(id: impl Into<String>, signals: SignalBus) -> Self {
        let id = id.into();
        let channel = node_channel(&id);
        Self {
            id,
            channel,
            signals,
        }
    }

    /// Instance id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Channel acknowledgments are published on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Publishes `msg` as an acknowledgment; returns the number of listeners reached.
    pub fn send(&self, mut msg: Message) -> usize {
        msg.insert(EVENT_FIELD, self.channel.clone());
        self.signals.publish(&self.channel, &msg)
    }
}
