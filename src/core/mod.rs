//! Runtime core: deadline tracking and instance lifecycle.
//!
//! - [`scheduler`]: the per-instance `id → timer` map with check-and-clear firing;
//! - `resolve`: per-message id and TTL resolution;
//! - [`tracker`]: the tracker loop, its builder and handle;
//! - [`registry`]: deployed instances by id, scope reconciliation, subscriber wiring.

mod registry;
mod resolve;
mod scheduler;
mod tracker;

pub(crate) use resolve::Resolver;

pub use registry::{Registry, RegistryBuilder};
pub use scheduler::{Expiry, Scheduler};
pub use tracker::{Outcome, Output, Outputs, Port, TrackerBuilder, TrackerHandle};
