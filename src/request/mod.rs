//! Correlated request/response deadlines.
//!
//! - [`RequesterBuilder`] / [`RequesterHandle`]: forward a request and publish a failure
//!   signal if no acknowledgment arrives in time;
//! - [`FailListener`]: re-injects failed requests from linked requesters.

mod fail;
mod requester;

pub use fail::FailListener;
pub use requester::{RequesterBuilder, RequesterHandle};
