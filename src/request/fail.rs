//! # Failure listener (`ack-fail`).
//!
//! Subscribes to the `fail:<id>` channel of every linked requester and re-injects
//! each failed request, unchanged, on its single output. The subscriptions live as
//! long as the listener.

use tokio::sync::mpsc;

use crate::config::FailListenerConfig;
use crate::message::Message;
use crate::signals::{Binding, SignalBus, fail_channel};

/// Live failure-channel subscriptions of one listener instance.
#[derive(Debug)]
pub struct FailListener {
    id: String,
    bindings: Vec<Binding>,
}

impl FailListener {
    /// Subscribes to the linked requesters; returns the listener and its output.
    pub fn new(
        config: &FailListenerConfig,
        signals: &SignalBus,
    ) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bindings = config
            .links
            .iter()
            .map(|link| {
                let tx = tx.clone();
                signals.bind(&fail_channel(link), move |msg: &Message| {
                    let _ = tx.send(msg.clone());
                })
            })
            .collect();

        let listener = Self {
            id: config.id.clone(),
            bindings,
        };
        (listener, rx)
    }

    /// Instance id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Channels this listener follows.
    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(Binding::channel)
    }
}
