//! Cursor persistence.
//!
//! Only `{cursor, fingerprint}` per server survives a restart; counters
//! and sessions are rebuilt from whatever is read afterwards.
//!
//! [`JsonCursorStore`] keeps every server in one JSON document:
//!
//! ```json
//! { "servers": { "eu-1": { "server_id": "eu-1", "cursor": 1024,
//!   "fingerprint": { "size": 2048, "mtime": "2025-05-17T02:01:30Z", "file_id": 1234 } } } }
//! ```
//!
//! Writes go to a temporary sibling file that is then renamed over the
//! original, and are serialized by an async mutex.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use emerald_core::error::StorageError;
use emerald_core::pipeline::BoxFuture;
use emerald_core::types::{FileFingerprint, ServerId};

/// Committed read position of one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorRecord {
    pub server_id: ServerId,
    pub cursor: u64,
    pub fingerprint: FileFingerprint,
}

/// Storage for committed cursors. Each server writes only its own key.
pub trait CursorStore: Send + Sync {
    /// Committed record for `server_id`, if any.
    fn load<'a>(
        &'a self,
        server_id: &'a ServerId,
    ) -> BoxFuture<'a, Result<Option<CursorRecord>, StorageError>>;

    /// Replaces the record for `record.server_id` atomically.
    fn commit(&self, record: CursorRecord) -> BoxFuture<'_, Result<(), StorageError>>;

    /// Deletes the record. Returns `true` if one existed.
    fn remove<'a>(&'a self, server_id: &'a ServerId) -> BoxFuture<'a, Result<bool, StorageError>>;

    /// All records, ordered by server id.
    fn list(&self) -> BoxFuture<'_, Result<Vec<CursorRecord>, StorageError>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CursorDocument {
    #[serde(default)]
    servers: BTreeMap<String, CursorRecord>,
}

/// JSON-file cursor store.
pub struct JsonCursorStore {
    path: PathBuf,
    /// Lazily loaded document; `None` until first access
    document: Mutex<Option<CursorDocument>>,
}

impl JsonCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            document: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn path_str(&self) -> String {
        self.path.display().to_string()
    }

    async fn read_document(&self) -> Result<CursorDocument, StorageError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CursorDocument::default());
            }
            Err(e) => {
                return Err(StorageError::Read {
                    path: self.path_str(),
                    reason: e.to_string(),
                });
            }
        };

        if content.trim().is_empty() {
            return Ok(CursorDocument::default());
        }

        serde_json::from_str(&content).map_err(|e| StorageError::Corrupt {
            path: self.path_str(),
            reason: e.to_string(),
        })
    }

    async fn write_document(&self, document: &CursorDocument) -> Result<(), StorageError> {
        let write_err = |reason: String| StorageError::Write {
            path: self.path_str(),
            reason,
        };

        let json = serde_json::to_vec_pretty(document).map_err(|e| write_err(e.to_string()))?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| write_err(e.to_string()))?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| write_err(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| write_err(e.to_string()))
    }
}

impl CursorStore for JsonCursorStore {
    fn load<'a>(
        &'a self,
        server_id: &'a ServerId,
    ) -> BoxFuture<'a, Result<Option<CursorRecord>, StorageError>> {
        Box::pin(async move {
            let mut guard = self.document.lock().await;
            if guard.is_none() {
                *guard = Some(self.read_document().await?);
            }
            Ok(guard
                .as_ref()
                .and_then(|doc| doc.servers.get(server_id.as_str()).cloned()))
        })
    }

    fn commit(&self, record: CursorRecord) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            let mut guard = self.document.lock().await;
            let mut document = match guard.take() {
                Some(doc) => doc,
                None => match self.read_document().await {
                    Ok(doc) => doc,
                    Err(StorageError::Corrupt { path, reason }) => {
                        tracing::warn!(path = %path, reason = %reason, "replacing corrupt cursor store");
                        CursorDocument::default()
                    }
                    Err(e) => return Err(e),
                },
            };

            let previous = document
                .servers
                .insert(record.server_id.to_string(), record.clone());
            let result = self.write_document(&document).await;
            if result.is_err() {
                // keep memory consistent with disk
                match previous {
                    Some(prev) => document.servers.insert(record.server_id.to_string(), prev),
                    None => document.servers.remove(record.server_id.as_str()),
                };
            }
            *guard = Some(document);
            result
        })
    }

    fn remove<'a>(&'a self, server_id: &'a ServerId) -> BoxFuture<'a, Result<bool, StorageError>> {
        Box::pin(async move {
            let mut guard = self.document.lock().await;
            let mut document = match guard.take() {
                Some(doc) => doc,
                None => self.read_document().await?,
            };

            let removed = document.servers.remove(server_id.as_str());
            let result = match &removed {
                Some(_) => self.write_document(&document).await,
                None => Ok(()),
            };
            if let (Err(_), Some(prev)) = (&result, removed.clone()) {
                document.servers.insert(server_id.to_string(), prev);
            }
            *guard = Some(document);
            result.map(|()| removed.is_some())
        })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<CursorRecord>, StorageError>> {
        Box::pin(async move {
            let mut guard = self.document.lock().await;
            if guard.is_none() {
                *guard = Some(self.read_document().await?);
            }
            Ok(guard
                .as_ref()
                .map(|doc| doc.servers.values().cloned().collect())
                .unwrap_or_default())
        })
    }
}

/// In-memory cursor store for tests and offline runs.
#[derive(Default)]
pub struct MemoryCursorStore {
    records: StdMutex<HashMap<ServerId, CursorRecord>>,
    fail_writes: AtomicBool,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `commit` fail until switched off.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<ServerId, CursorRecord>> {
        // a poisoned map is still a valid map
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl CursorStore for MemoryCursorStore {
    fn load<'a>(
        &'a self,
        server_id: &'a ServerId,
    ) -> BoxFuture<'a, Result<Option<CursorRecord>, StorageError>> {
        let record = self.records().get(server_id).cloned();
        Box::pin(async move { Ok(record) })
    }

    fn commit(&self, record: CursorRecord) -> BoxFuture<'_, Result<(), StorageError>> {
        let result = if self.fail_writes.load(Ordering::SeqCst) {
            Err(StorageError::Write {
                path: "memory".to_owned(),
                reason: "writes disabled".to_owned(),
            })
        } else {
            self.records().insert(record.server_id.clone(), record);
            Ok(())
        };
        Box::pin(async move { result })
    }

    fn remove<'a>(&'a self, server_id: &'a ServerId) -> BoxFuture<'a, Result<bool, StorageError>> {
        let removed = self.records().remove(server_id).is_some();
        Box::pin(async move { Ok(removed) })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<CursorRecord>, StorageError>> {
        let mut records: Vec<_> = self.records().values().cloned().collect();
        records.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        Box::pin(async move { Ok(records) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn record(id: &str, cursor: u64) -> CursorRecord {
        CursorRecord {
            server_id: ServerId::new(id),
            cursor,
            fingerprint: FileFingerprint {
                size: cursor,
                mtime: DateTime::<Utc>::UNIX_EPOCH,
                file_id: Some(7),
            },
        }
    }

    #[tokio::test]
    async fn json_store_roundtrip_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("cursors.json");

        let store = JsonCursorStore::new(&path);
        store.commit(record("eu-1", 100)).await.unwrap();
        store.commit(record("na-2", 200)).await.unwrap();
        store.commit(record("eu-1", 150)).await.unwrap();

        let reopened = JsonCursorStore::new(&path);
        let eu = reopened.load(&ServerId::new("eu-1")).await.unwrap().unwrap();
        assert_eq!(eu.cursor, 150);
        assert_eq!(reopened.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn json_store_layout_is_keyed_by_server() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursors.json");
        JsonCursorStore::new(&path)
            .commit(record("eu-1", 10))
            .await
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["servers"]["eu-1"]["cursor"], 10);
        assert_eq!(raw["servers"]["eu-1"]["fingerprint"]["file_id"], 7);
        assert!(!dir.path().join("cursors.json.tmp").exists());
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonCursorStore::new(dir.path().join("absent.json"));
        assert!(store.load(&ServerId::new("eu-1")).await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_reported_then_replaced_on_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursors.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = JsonCursorStore::new(&path);
        let err = store.list().await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));

        let fresh = JsonCursorStore::new(&path);
        fresh.commit(record("eu-1", 5)).await.unwrap();
        assert_eq!(fresh.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remove_deletes_only_that_server() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonCursorStore::new(dir.path().join("cursors.json"));
        store.commit(record("eu-1", 1)).await.unwrap();
        store.commit(record("na-2", 2)).await.unwrap();

        assert!(store.remove(&ServerId::new("eu-1")).await.unwrap());
        assert!(!store.remove(&ServerId::new("eu-1")).await.unwrap());
        let left = store.list().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].server_id.as_str(), "na-2");
    }

    #[tokio::test]
    async fn memory_store_can_fail_writes() {
        let store = MemoryCursorStore::new();
        store.set_fail_writes(true);
        assert!(store.commit(record("eu-1", 1)).await.is_err());
        store.set_fail_writes(false);
        store.commit(record("eu-1", 1)).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
