//! # Lifecycle event subscribers.
//!
//! ## Architecture
//! ```text
//! Tracker ── publish(Event) ──► Bus ──► Registry listener ──► SubscriberSet
//!                                                                  │
//!                                                    ┌─────────────┼─────────┐
//!                                                    ▼             ▼         ▼
//!                                                LogWriter      Metrics    Custom
//! ```

#[cfg(feature = "logging")]
mod embedded;
mod set;
mod subscriber;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
pub use set::SubscriberSet;
pub use subscriber::Subscribe;
