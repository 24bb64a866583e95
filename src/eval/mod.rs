//! Per-message expression evaluation and id selection.
//!
//! Trackers never interpret payloads themselves. They ask two collaborators:
//! - [`Evaluate`] turns a configured `(expr, type)` pair into a JSON value for a message
//!   (TTL, unit, id-property name);
//! - [`SelectId`] resolves the tracked id of a message.
//!
//! ## Contents
//! - [`PropertyEvaluator`] built-in evaluator for the common expression types
//! - [`KeySelector`] id = `msg[evaluate(key)]`, falling back to `_msgid`
//! - [`MessageIdSelector`] id = `_msgid` with `.` stripped

mod property;
mod select;

use std::sync::Arc;

use serde_json::Value;

use crate::{error::EvalError, message::Message};

pub use property::PropertyEvaluator;
pub(crate) use property::parse_number;
pub use select::{KeySelector, MessageIdSelector, SelectId};

/// Expression evaluation collaborator.
///
/// Implementations must be pure with respect to the message: evaluating the same
/// expression twice for the same message yields the same value.
pub trait Evaluate: Send + Sync + 'static {
    /// Evaluates `expr` of type `kind` against `msg`.
    ///
    /// A property that does not exist evaluates to `Value::Null`, not an error.
    fn evaluate(&self, expr: &str, kind: &str, msg: &Message) -> Result<Value, EvalError>;
}

/// Shared evaluator handle.
pub type EvaluatorRef = Arc<dyn Evaluate>;

/// Shared id selector handle.
pub type SelectorRef = Arc<dyn SelectId>;
