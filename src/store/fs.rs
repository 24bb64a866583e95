//! # Filesystem record store.
//!
//! ## Layout
//! ```text
//! <root>/
//!   <scope>/               one directory per tracker scope
//!     <id>                 one JSON file per pending record
//!     .staging/<id>        in-flight writes (renamed into place)
//! ```
//!
//! ## Rules
//! - Writes go to `.staging/<id>`, are synced, then renamed over `<id>`; a crash
//!   never leaves a half-written record under its final name.
//! - Ids never contain separators, so `.staging` cannot collide with a record
//!   and `load_all` skips directories.
//! - Missing files and directories are treated as already deleted.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::config::RuntimeConfig;
use crate::error::StoreError;
use crate::store::{PersistedRecord, RecordStore, ScopeLoad, check_key};

const STAGING_DIR: &str = ".staging";

/// Directory-per-scope, file-per-record store.
#[derive(Clone, Debug)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Store rooted at `root` (created lazily).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at the runtime's cache directory.
    pub fn from_config(cfg: &RuntimeConfig) -> Self {
        Self::new(cfg.cache_root())
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn scope_dir(&self, scope: &str) -> Result<PathBuf, StoreError> {
        check_key(scope)?;
        Ok(self.root.join(scope))
    }

    fn record_path(&self, scope: &str, id: &str) -> Result<PathBuf, StoreError> {
        check_key(id)?;
        Ok(self.scope_dir(scope)?.join(id))
    }
}

#[async_trait]
impl RecordStore for FsStore {
    async fn put(&self, scope: &str, record: &PersistedRecord) -> Result<(), StoreError> {
        let target = self.record_path(scope, &record.id)?;
        let staging = self.scope_dir(scope)?.join(STAGING_DIR);
        fs::create_dir_all(&staging)
            .await
            .map_err(|e| StoreError::io(&staging, e))?;

        let tmp = staging.join(&record.id);
        let bytes = record.encode()?;
        let mut file = fs::File::create(&tmp)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        file.sync_all().await.map_err(|e| StoreError::io(&tmp, e))?;
        drop(file);

        fs::rename(&tmp, &target)
            .await
            .map_err(|e| StoreError::io(&target, e))
    }

    async fn delete(&self, scope: &str, id: &str) -> Result<(), StoreError> {
        let path = self.record_path(scope, id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    async fn load_all(&self, scope: &str) -> Result<ScopeLoad, StoreError> {
        let dir = self.scope_dir(scope)?;
        let mut load = ScopeLoad::default();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(load),
            Err(e) => return Err(StoreError::io(dir, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&dir, e))?
        {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            match entry.file_type().await {
                Ok(ft) if ft.is_dir() => continue,
                Ok(_) => {}
                Err(e) => {
                    load.failures.push((name, StoreError::io(path, e)));
                    continue;
                }
            }
            match fs::read(&path).await {
                Ok(bytes) => match PersistedRecord::decode(&name, &bytes) {
                    Ok(rec) => load.records.push(rec),
                    Err(e) => load.failures.push((name, e)),
                },
                Err(e) => load.failures.push((name, StoreError::io(path, e))),
            }
        }

        load.records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(load)
    }

    async fn ensure_scope(&self, scope: &str) -> Result<(), StoreError> {
        let dir = self.scope_dir(scope)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(dir, e))
    }

    async fn drop_scope(&self, scope: &str) -> Result<(), StoreError> {
        let dir = self.scope_dir(scope)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(dir, e)),
        }
    }

    async fn scopes(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.root, e)),
        };

        let mut scopes = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.root, e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|ft| ft.is_dir())
                .unwrap_or(false);
            if is_dir {
                scopes.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        scopes.sort_unstable();
        Ok(scopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(id: &str, deadline: i64) -> PersistedRecord {
        PersistedRecord::new(id, deadline, Message::from_value(json!({ "orderId": id })))
    }

    #[tokio::test]
    async fn put_overwrites_and_load_returns_one_record_per_id() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path());
        store.put("s1", &record("X1", 10)).await.unwrap();
        store.put("s1", &record("X1", 20)).await.unwrap();
        store.put("s1", &record("X2", 30)).await.unwrap();

        let load = store.load_all("s1").await.unwrap();
        assert!(load.failures.is_empty());
        let got: Vec<(String, i64)> = load
            .records
            .into_iter()
            .map(|r| (r.id, r.deadline_ms))
            .collect();
        assert_eq!(got, vec![("X1".to_string(), 20), ("X2".to_string(), 30)]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path());
        store.put("s1", &record("X1", 10)).await.unwrap();

        store.delete("s1", "X1").await.unwrap();
        store.delete("s1", "X1").await.unwrap();
        store.delete("never-created", "X1").await.unwrap();
        assert!(store.load_all("s1").await.unwrap().records.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_reported_and_others_still_load() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path());
        store.put("s1", &record("good", 10)).await.unwrap();
        std::fs::write(tmp.path().join("s1").join("bad"), b"{ truncated").unwrap();

        let load = store.load_all("s1").await.unwrap();
        assert_eq!(load.records.len(), 1);
        assert_eq!(load.records[0].id, "good");
        assert_eq!(load.failures.len(), 1);
        assert_eq!(load.failures[0].0, "bad");
    }

    #[tokio::test]
    async fn unknown_scope_loads_empty() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path().join("not-yet"));
        let load = store.load_all("s1").await.unwrap();
        assert!(load.records.is_empty() && load.failures.is_empty());
        assert!(store.scopes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn traversal_keys_are_refused() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path());
        let err = store.put("s1", &record("../escape", 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey { .. }));
        assert!(store.drop_scope("..").await.is_err());
    }

    #[tokio::test]
    async fn ensure_and_drop_scope() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path());
        store.ensure_scope("s1").await.unwrap();
        assert!(tmp.path().join("s1").is_dir());

        store.put("s1", &record("X1", 1)).await.unwrap();
        store.drop_scope("s1").await.unwrap();
        store.drop_scope("s1").await.unwrap();
        assert!(!tmp.path().join("s1").exists());
    }

    #[tokio::test]
    async fn reconcile_removes_exactly_the_orphans() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path());
        for scope in ["A", "B", "C"] {
            store.ensure_scope(scope).await.unwrap();
        }
        store.put("B", &record("X1", 1)).await.unwrap();
        // stray files at the root are not scopes
        std::fs::write(tmp.path().join("README"), b"x").unwrap();

        let removed = store
            .reconcile_scopes(&["A".to_string(), "C".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, vec!["B".to_string()]);
        assert_eq!(store.scopes().await.unwrap(), vec!["A".to_string(), "C".to_string()]);
        assert!(tmp.path().join("README").exists());
    }
}
