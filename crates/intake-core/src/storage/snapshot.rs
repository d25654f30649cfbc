//! Snapshot persistence
//!
//! Stores the whole form state as one JSON blob under a single key.
//! Loading fails soft: a missing or unreadable blob yields `None` and the
//! caller starts from an empty snapshot. Saving verifies the blob it wrote
//! by reading it back and comparing per-collection counts.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::error::{StorageError, StorageResult};
use super::kv::KeyValueStore;
use crate::models::{Snapshot, SNAPSHOT_VERSION};

/// Suffix for the copy kept when a stored snapshot cannot be parsed
const CORRUPT_SUFFIX: &str = "corrupt";

/// Loads and saves [`Snapshot`]s through a [`KeyValueStore`]
#[derive(Clone)]
pub struct SnapshotStore {
    kv: Arc<dyn KeyValueStore>,
    key: String,
}

impl SnapshotStore {
    /// Create an adapter storing snapshots under `key`
    pub fn new(kv: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            kv,
            key: key.into(),
        }
    }

    /// Storage key in use
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Key under which an unreadable snapshot is preserved
    pub fn corrupt_key(&self) -> String {
        format!("{}.{}", self.key, CORRUPT_SUFFIX)
    }

    /// Load the stored snapshot
    ///
    /// Returns `None` when nothing is stored, when the store can't be read,
    /// or when the blob is corrupted. Never fails.
    pub async fn load(&self) -> Option<Snapshot> {
        let raw = match self.kv.get(&self.key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("No stored snapshot under '{}'", self.key);
                return None;
            }
            Err(e) => {
                warn!("Failed to read snapshot '{}': {}", self.key, e);
                return None;
            }
        };

        match parse(&self.key, &raw) {
            Ok(snapshot) => {
                debug!(
                    "Loaded snapshot '{}' with {} items",
                    self.key,
                    snapshot.total_items()
                );
                Some(snapshot)
            }
            Err(e) => {
                warn!("{}", e);
                // Keep the bytes around for manual recovery
                if let Err(copy_err) = self.kv.set(&self.corrupt_key(), &raw).await {
                    warn!("Could not preserve corrupt snapshot: {}", copy_err);
                }
                None
            }
        }
    }

    /// Save a snapshot, stamping `_lastSaved` and `_version`
    ///
    /// Returns the save timestamp. Quota exhaustion is reported as
    /// [`StorageError::QuotaExceeded`] so the caller can evict and retry.
    pub async fn save(&self, snapshot: &Snapshot) -> StorageResult<DateTime<Utc>> {
        let saved_at = Utc::now();
        let mut stamped = snapshot.clone();
        stamped.last_saved = Some(saved_at);
        stamped.version = SNAPSHOT_VERSION;

        let json = serde_json::to_string(&stamped)?;
        self.kv.set(&self.key, &json).await?;
        self.verify(&stamped).await?;

        debug!(
            "Saved snapshot '{}' ({} bytes, {} items)",
            self.key,
            json.len(),
            stamped.total_items()
        );
        Ok(saved_at)
    }

    /// Remove the stored snapshot
    pub async fn clear(&self) -> StorageResult<bool> {
        self.kv.remove(&self.key).await
    }

    /// Read the blob back and compare per-collection sizes
    async fn verify(&self, expected: &Snapshot) -> StorageResult<()> {
        let raw = self
            .kv
            .get(&self.key)
            .await?
            .ok_or_else(|| StorageError::IntegrityMismatch {
                key: self.key.clone(),
                details: "value missing after write".to_string(),
            })?;
        let stored = parse(&self.key, &raw).map_err(|e| StorageError::IntegrityMismatch {
            key: self.key.clone(),
            details: e.to_string(),
        })?;

        let (want, got) = (expected.counts(), stored.counts());
        if want != got {
            return Err(StorageError::IntegrityMismatch {
                key: self.key.clone(),
                details: format!("expected counts {want:?}, found {got:?}"),
            });
        }
        Ok(())
    }
}

fn parse(key: &str, raw: &str) -> StorageResult<Snapshot> {
    serde_json::from_str(raw).map_err(|e| StorageError::Corrupt {
        key: key.to_string(),
        details: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldMap, ItemRecord};
    use crate::storage::{FileStore, MemoryStore};
    use async_trait::async_trait;
    use tempfile::TempDir;

    fn snapshot_with(collections: &[(&str, usize)]) -> Snapshot {
        let mut snapshot = Snapshot::new();
        for (name, n) in collections {
            let items = snapshot.collections.entry(name.to_string()).or_default();
            for i in 0..*n {
                let record = ItemRecord::with_id(format!("{name}-{i}"), FieldMap::new());
                items.insert(record.id.clone(), record);
            }
        }
        snapshot
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let store = SnapshotStore::new(Arc::new(MemoryStore::new()), "state");
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn test_save_then_fresh_load_preserves_counts() {
        let temp_dir = TempDir::new().unwrap();
        let snapshot = snapshot_with(&[("formularios", 3), ("documentos", 5)]);

        {
            let store = SnapshotStore::new(Arc::new(FileStore::new(temp_dir.path())), "state");
            store.save(&snapshot).await.unwrap();
        }

        // Simulates a reload: new adapter over the same directory
        let store = SnapshotStore::new(Arc::new(FileStore::new(temp_dir.path())), "state");
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.counts(), snapshot.counts());
        assert_eq!(loaded.version, SNAPSHOT_VERSION);
        assert!(loaded.last_saved.is_some());
    }

    #[tokio::test]
    async fn test_corrupt_blob_fails_soft_and_is_preserved() {
        let kv = Arc::new(MemoryStore::new());
        kv.set("state", "{not json").await.unwrap();

        let store = SnapshotStore::new(kv.clone(), "state");
        assert!(store.load().await.is_none());
        assert_eq!(
            kv.get("state.corrupt").await.unwrap().as_deref(),
            Some("{not json")
        );
    }

    #[tokio::test]
    async fn test_save_reports_quota_exceeded() {
        let store = SnapshotStore::new(Arc::new(MemoryStore::with_quota(64)), "state");
        let err = store
            .save(&snapshot_with(&[("formularios", 10)]))
            .await
            .unwrap_err();
        assert!(err.is_quota_exceeded());
    }

    /// Store that silently drops everything but the metadata on write
    struct LossyStore(MemoryStore);

    #[async_trait]
    impl KeyValueStore for LossyStore {
        async fn get(&self, key: &str) -> StorageResult<Option<String>> {
            self.0.get(key).await
        }
        async fn set(&self, key: &str, _value: &str) -> StorageResult<()> {
            self.0.set(key, r#"{"_version":2}"#).await
        }
        async fn remove(&self, key: &str) -> StorageResult<bool> {
            self.0.remove(key).await
        }
        async fn keys(&self) -> StorageResult<Vec<String>> {
            self.0.keys().await
        }
    }

    #[tokio::test]
    async fn test_integrity_mismatch_detected() {
        let store = SnapshotStore::new(Arc::new(LossyStore(MemoryStore::new())), "state");
        let err = store
            .save(&snapshot_with(&[("social", 2)]))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::IntegrityMismatch { .. }));
    }

    #[tokio::test]
    async fn test_clear() {
        let store = SnapshotStore::new(Arc::new(MemoryStore::new()), "state");
        store.save(&Snapshot::new()).await.unwrap();
        assert!(store.clear().await.unwrap());
        assert!(store.load().await.is_none());
    }
}
