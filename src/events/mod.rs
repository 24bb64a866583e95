//! Lifecycle events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: tracker loops, requester loops, `Registry`, `SubscriberSet` workers.
//! - **Consumers**: the registry listener (fans out to `SubscriberSet`) and tests.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
