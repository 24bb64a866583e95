//! Error types used by trackers, stores and evaluators.
//!
//! This module defines the error enums of the crate:
//!
//! - [`TrackerError`]: why a submission (or an acknowledgment signal) was rejected.
//! - [`Rejection`]: a [`TrackerError`] together with the offending message.
//! - [`StoreError`]: failures of a [`RecordStore`](crate::RecordStore) backend.
//! - [`EvalError`]: failures of the expression evaluator.
//! - [`RegistryError`]: failures of host-side deployment through the [`Registry`](crate::Registry).
//!
//! Each type provides `as_label` (stable snake_case for logs/metrics) and `as_message` helpers.
//!
//! None of these errors is fatal: a rejected submission produces no output, and
//! store failures are logged while the tracker keeps running on its in-memory timers.

use std::path::PathBuf;

use thiserror::Error;

use crate::message::Message;

/// # Errors produced while handling a submission.
///
/// `InvalidId` and `InvalidTtl` abort the current submission; no output is emitted.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TrackerError {
    /// The resolved id is empty, a dot path, or contains a path separator.
    #[error(r#"the value of the id property may not contain a "/" or "\" character (got {id:?})"#)]
    InvalidId {
        /// The offending id.
        id: String,
    },

    /// The TTL did not evaluate to a number.
    #[error("TTL must be a number (got {value})")]
    InvalidTtl {
        /// Rendered value the TTL expression produced.
        value: String,
    },

    /// A configured expression could not be evaluated.
    #[error("failed to evaluate {field}: {source}")]
    Evaluation {
        /// Which configuration field was evaluated (`ttl`, `units`, `key`).
        field: &'static str,
        /// The evaluator failure.
        #[source]
        source: EvalError,
    },

    /// The tracker loop is gone (shut down or dropped).
    #[error("tracker is closed")]
    Closed,
}

impl TrackerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use ackvisor::TrackerError;
    ///
    /// let err = TrackerError::InvalidId { id: "a/b".into() };
    /// assert_eq!(err.as_label(), "invalid_id");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TrackerError::InvalidId { .. } => "invalid_id",
            TrackerError::InvalidTtl { .. } => "invalid_ttl",
            TrackerError::Evaluation { .. } => "evaluation_failed",
            TrackerError::Closed => "tracker_closed",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            TrackerError::InvalidId { id } => format!("invalid id: {id:?}"),
            TrackerError::InvalidTtl { value } => format!("invalid ttl: {value}"),
            TrackerError::Evaluation { field, source } => format!("{field}: {source}"),
            TrackerError::Closed => "tracker closed".to_string(),
        }
    }
}

/// A rejected submission: the error plus the message that caused it.
///
/// The message is handed back untouched so the caller can report it for diagnosis
/// (or resubmit it elsewhere).
#[derive(Error, Debug)]
#[error("{error}")]
pub struct Rejection {
    /// Why the submission was rejected.
    #[source]
    pub error: TrackerError,
    /// The offending message.
    pub message: Message,
}

impl Rejection {
    pub(crate) fn new(error: TrackerError, message: Message) -> Self {
        Self { error, message }
    }
}

/// # Errors produced by record stores.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StoreError {
    /// An I/O operation on the backing storage failed.
    #[error("i/o error at {}: {source}", path.display())]
    Io {
        /// Path the operation touched.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A stored record could not be decoded.
    #[error("corrupt record {id:?}: {reason}")]
    Corrupt {
        /// Key of the record.
        id: String,
        /// Decoder message.
        reason: String,
    },

    /// A scope or record key would escape its storage area.
    #[error("invalid storage key {key:?}")]
    InvalidKey {
        /// The offending key.
        key: String,
    },

    /// The backend refused the write (used by in-memory fault injection).
    #[error("write rejected for {id:?}")]
    WriteRejected {
        /// Key of the record.
        id: String,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StoreError::Io { .. } => "store_io",
            StoreError::Corrupt { .. } => "store_corrupt",
            StoreError::InvalidKey { .. } => "store_invalid_key",
            StoreError::WriteRejected { .. } => "store_write_rejected",
        }
    }
}

/// # Errors produced by expression evaluation.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// The expression type is not supported by the evaluator.
    #[error("unknown expression type {kind:?}")]
    UnknownType {
        /// The requested type.
        kind: String,
    },

    /// The expression is malformed for its type.
    #[error("invalid {kind} expression {expr:?}: {reason}")]
    Invalid {
        /// Expression type.
        kind: String,
        /// Expression text.
        expr: String,
        /// Parser message.
        reason: String,
    },
}

/// # Errors produced by the host-side registry.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RegistryError {
    /// No instance with this id is deployed.
    #[error("no instance deployed with id {id:?}")]
    NotFound {
        /// The requested id.
        id: String,
    },

    /// Scope reconciliation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RegistryError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RegistryError::NotFound { .. } => "registry_not_found",
            RegistryError::Store(e) => e.as_label(),
        }
    }
}
