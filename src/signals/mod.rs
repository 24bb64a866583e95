//! Acknowledgment and failure signaling between instances.
//!
//! ## Channel naming
//! - `node:<id>`: acknowledgments published by the [`AckClear`] instance `<id>`;
//!   trackers and requesters subscribe to the channels of the instances in their `links`.
//! - `fail:<id>`: failure signals published by the requester `<id>` when a request
//!   deadline passes; failure listeners subscribe to the requesters in their `links`.

mod bus;
mod clear;

pub use bus::{Binding, Handler, SignalBus, SubscriptionId};
pub use clear::AckClear;

/// Acknowledgment channel owned by instance `id`.
pub fn node_channel(id: &str) -> String {
    format!("node:{id}")
}

/// Failure channel owned by requester `id`.
pub fn fail_channel(id: &str) -> String {
    format!("fail:{id}")
}
