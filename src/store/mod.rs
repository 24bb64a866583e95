//! Durable record stores.
//!
//! A [`RecordStore`] keeps at most one [`PersistedRecord`] per `(scope, id)`.
//! Each tracker instance owns one scope, so deleting one instance never touches
//! another's pending set and orphaned scopes can be found by set difference.
//!
//! ## Contents
//! - [`RecordStore`] the backend contract
//! - [`PersistedRecord`], [`ScopeLoad`] record and bulk-load types
//! - [`FsStore`] directory-per-scope, file-per-record backend
//! - [`MemoryStore`] in-process backend with fault injection (tests, ephemeral hosts)
//!
//! ## Rules
//! - `delete` and `drop_scope` of something absent succeed (idempotent)
//! - `load_all` of an unknown scope yields an empty load
//! - operations on different scopes or ids never wait on each other

mod fs;
mod memory;
mod record;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;

pub use fs::FsStore;
pub use memory::MemoryStore;
pub use record::{PersistedRecord, ScopeLoad};

/// Scoped key-value persistence of pending messages.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Writes `record` under `scope/record.id`, replacing any previous record.
    async fn put(&self, scope: &str, record: &PersistedRecord) -> Result<(), StoreError>;

    /// Removes the record if present.
    async fn delete(&self, scope: &str, id: &str) -> Result<(), StoreError>;

    /// Reads every record of a scope. Undecodable records are reported in
    /// [`ScopeLoad::failures`] and do not prevent the others from loading.
    async fn load_all(&self, scope: &str) -> Result<ScopeLoad, StoreError>;

    /// Creates the storage area of a scope.
    async fn ensure_scope(&self, scope: &str) -> Result<(), StoreError>;

    /// Recursively removes a scope and its records.
    async fn drop_scope(&self, scope: &str) -> Result<(), StoreError>;

    /// Lists existing scopes.
    async fn scopes(&self) -> Result<Vec<String>, StoreError>;

    /// Drops every scope not in `live`; returns the dropped scopes, sorted.
    async fn reconcile_scopes(&self, live: &[String]) -> Result<Vec<String>, StoreError> {
        let live: HashSet<&str> = live.iter().map(String::as_str).collect();
        let mut removed = Vec::new();
        for scope in self.scopes().await? {
            if !live.contains(scope.as_str()) {
                self.drop_scope(&scope).await?;
                removed.push(scope);
            }
        }
        removed.sort_unstable();
        Ok(removed)
    }
}

/// Shared store handle.
pub type StoreRef = Arc<dyn RecordStore>;

/// Storage scope of an instance: its id with the first `.` removed.
///
/// Only the first dot goes, so scopes written by existing hosts keep their directory.
pub fn scope_id(instance_id: &str) -> String {
    instance_id.replacen('.', "", 1)
}

/// Rejects keys that would escape their directory.
///
/// Separators, the empty key, `.` and `..` are refused.
pub fn check_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() || key == "." || key == ".." || key.contains(['/', '\\']) {
        return Err(StoreError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(())
}
