//! # In-memory record store.
//!
//! Keeps encoded records in a map so the same encode/decode path as
//! [`FsStore`](crate::FsStore) is exercised. Cloning shares the contents, which
//! lets a test drop a tracker and start a new one against "the same disk".
//!
//! Fault injection:
//! - [`MemoryStore::fail_writes`] makes `put` fail with `WriteRejected`;
//! - [`MemoryStore::insert_raw`] plants arbitrary bytes (e.g. a corrupt record).

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::store::{PersistedRecord, RecordStore, ScopeLoad, check_key};

type Scopes = HashMap<String, BTreeMap<String, Vec<u8>>>;

/// Shared, process-local store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    scopes: Arc<Mutex<Scopes>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `put` calls fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Stores raw bytes under `scope/id`, bypassing encoding.
    pub fn insert_raw(&self, scope: &str, id: &str, bytes: impl Into<Vec<u8>>) {
        self.lock()
            .entry(scope.to_string())
            .or_default()
            .insert(id.to_string(), bytes.into());
    }

    /// True if a record exists under `scope/id`.
    pub fn contains(&self, scope: &str, id: &str) -> bool {
        self.lock()
            .get(scope)
            .is_some_and(|records| records.contains_key(id))
    }

    /// Number of records in a scope.
    pub fn len(&self, scope: &str) -> usize {
        self.lock().get(scope).map_or(0, BTreeMap::len)
    }

    fn lock(&self) -> MutexGuard<'_, Scopes> {
        self.scopes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn put(&self, scope: &str, record: &PersistedRecord) -> Result<(), StoreError> {
        check_key(scope)?;
        check_key(&record.id)?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::WriteRejected {
                id: record.id.clone(),
            });
        }
        let bytes = record.encode()?;
        self.insert_raw(scope, &record.id, bytes);
        Ok(())
    }

    async fn delete(&self, scope: &str, id: &str) -> Result<(), StoreError> {
        check_key(id)?;
        if let Some(records) = self.lock().get_mut(scope) {
            records.remove(id);
        }
        Ok(())
    }

    async fn load_all(&self, scope: &str) -> Result<ScopeLoad, StoreError> {
        check_key(scope)?;
        let raw: Vec<(String, Vec<u8>)> = self
            .lock()
            .get(scope)
            .map(|records| records.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        let mut load = ScopeLoad::default();
        for (id, bytes) in raw {
            match PersistedRecord::decode(&id, &bytes) {
                Ok(rec) => load.records.push(rec),
                Err(e) => load.failures.push((id, e)),
            }
        }
        Ok(load)
    }

    async fn ensure_scope(&self, scope: &str) -> Result<(), StoreError> {
        check_key(scope)?;
        self.lock().entry(scope.to_string()).or_default();
        Ok(())
    }

    async fn drop_scope(&self, scope: &str) -> Result<(), StoreError> {
        check_key(scope)?;
        self.lock().remove(scope);
        Ok(())
    }

    async fn scopes(&self) -> Result<Vec<String>, StoreError> {
        let mut scopes: Vec<String> = self.lock().keys().cloned().collect();
        scopes.sort_unstable();
        Ok(scopes)
    }
}
