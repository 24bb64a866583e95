//! # ackvisor
//!
//! **Ackvisor** tracks per-message acknowledgment deadlines for message-flow hosts.
//!
//! A tracker arms a timer for every message it sees. An acknowledgment signal
//! for the same id clears it; otherwise the message is re-emitted as timed out.
//! Pending messages can be persisted so their deadlines survive a restart.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!          submit(msg)                      AckClear "clear1"
//!              │                                  │ send(msg) → _event = "node:clear1"
//!              ▼                                  ▼
//! ┌──────────────────────────┐        ┌──────────────────────┐
//! │  Tracker loop ("n1")     │◄─Signal─│ SignalBus            │◄── Requester ("req1")
//! │  - Resolver (id, ttl)    │        │  node:<id>  fail:<id>│        │ fail:req1
//! │  - Scheduler (timers)    │        └──────────┬───────────┘        ▼
//! │  - RecordStore (scope)   │                   └──────────► FailListener ──► re-inject
//! └──┬──────────┬─────────┬──┘
//!    ▼          ▼         ▼
//! accepted  timed-out  restored          (Outputs)
//!
//!    all instances ── publish(Event) ──► Bus ──► SubscriberSet ──► LogWriter / custom
//! ```
//!
//! ### Entry lifecycle
//! ```text
//! unseen ──submit──► armed ──ack────► acknowledged   (record deleted, no output)
//!                      │
//!                      └──deadline──► expired         (record deleted, timed-out)
//!
//! startup: load scope ─► sleep(restore_grace) ─► resubmit as restored ─► armed(remaining)
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                          |
//! |-------------------|---------------------------------------------------------------|---------------------------------------------|
//! | **Tracking**      | Deadlines per message, three outputs, restart recovery.       | [`TrackerBuilder`], [`TrackerHandle`]       |
//! | **Signals**       | Named-channel pub/sub for acknowledgments and failures.       | [`SignalBus`], [`AckClear`]                 |
//! | **Requests**      | Request/response deadlines with failure re-injection.         | [`RequesterBuilder`], [`FailListener`]      |
//! | **Persistence**   | Scoped record stores.                                         | [`RecordStore`], [`FsStore`], [`MemoryStore`] |
//! | **Hosting**       | Deploy by config, reconcile orphaned scopes.                  | [`Registry`]                                |
//! | **Subscriber API**| Hook into lifecycle events (logging, metrics).                | [`Subscribe`], [`Event`]                    |
//! | **Errors**        | Typed errors for submissions, stores and the registry.        | [`TrackerError`], [`StoreError`]            |
//!
//! ## Optional features
//! - `logging` (default): exports the built-in [`LogWriter`] subscriber.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use ackvisor::{MemoryStore, Message, Port, Registry, SignalBus, TrackerConfig, Units};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Registry::builder()
//!         .with_store(Arc::new(MemoryStore::new()))
//!         .with_signals(SignalBus::new())
//!         .build();
//!
//!     let cfg = TrackerConfig::new("orders")
//!         .with_ttl(5, Units::Seconds)
//!         .with_key("orderId")
//!         .with_link("shipped")
//!         .persistent(true);
//!     let mut outputs = registry.deploy_tracker(cfg).await;
//!     registry.flows_started().await?;
//!
//!     let orders = registry.tracker("orders").await.unwrap();
//!     orders.submit(Message::new().with("orderId", "X1")).await?;
//!     assert_eq!(outputs.recv().await.unwrap().port, Port::Accepted);
//!
//!     // The shipping step acknowledges the order before its deadline.
//!     registry.ack_clear("shipped").send(Message::new().with("orderId", "X1"));
//!     assert!(!orders.acknowledge("X1").await?, "already cleared by the signal");
//!
//!     registry.shutdown_all().await;
//!     Ok(())
//! }
//! ```
mod clock;
mod config;
mod core;
mod error;
mod eval;
mod events;
mod message;
mod request;
mod signals;
mod store;
mod subscribers;

// ---- Public re-exports ----

pub use crate::core::{
    Expiry, Outcome, Output, Outputs, Port, Registry, RegistryBuilder, Scheduler,
    TrackerBuilder, TrackerHandle,
};
pub use clock::{Clock, ClockRef, SystemClock, TokioClock};
pub use config::{
    DEFAULT_CACHE_DIR, DeadlineSettings, FailListenerConfig, RequesterConfig, RuntimeConfig,
    TrackerConfig, Units,
};
pub use error::{EvalError, Rejection, RegistryError, StoreError, TrackerError};
pub use eval::{
    Evaluate, EvaluatorRef, KeySelector, MessageIdSelector, PropertyEvaluator, SelectId,
    SelectorRef,
};
pub use events::{Bus, Event, EventKind};
pub use message::{EVENT_FIELD, MSG_ID, Message, RESTORE_MARKER};
pub use request::{FailListener, RequesterBuilder, RequesterHandle};
pub use signals::{
    AckClear, Binding, Handler, SignalBus, SubscriptionId, fail_channel, node_channel,
};
pub use store::{
    FsStore, MemoryStore, PersistedRecord, RecordStore, ScopeLoad, StoreRef, check_key, scope_id,
};
pub use subscribers::{Subscribe, SubscriberSet};

// Built-in logger subscriber.
// Disable with: `--no-default-features`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
