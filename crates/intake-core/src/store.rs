//! Unified storage interface
//!
//! The `Store` wires every layer together from a [`Config`]:
//! - `FileStore` (raw key-value files, optional quota)
//! - `LocalCache` (in-memory state, debounced snapshot)
//! - `SyncCoordinator` (remote mirroring, offline queue)
//!
//! ## Usage
//!
//! ```ignore
//! let store = Store::open().await?;
//!
//! let (record, _) = store.save("pessoal", fields).await?;
//! let items = store.get("pessoal");
//!
//! store.close().await;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::cache::{CacheOptions, FlushOutcome, LocalCache};
use crate::config::Config;
use crate::form::{FormStateManager, FormView};
use crate::models::{FieldMap, ItemRecord};
use crate::storage::{FileStore, KeyValueStore, SnapshotStore};
use crate::sync::{
    spawn_sync_task, Connectivity, DrainReport, HttpRemote, NoRemote, PushOutcome, RemoteStore,
    SyncCoordinator, SyncOptions, SyncQueue, SyncStatus, SyncTaskHandle,
};

/// Point-in-time summary of the store
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    /// Items per collection
    pub collections: BTreeMap<String, usize>,
    /// When the snapshot was last written
    pub last_saved: Option<DateTime<Utc>>,
    /// Whether in-memory state has unsaved changes
    pub dirty: bool,
    /// Writes waiting for the remote
    pub queued: usize,
    pub online: bool,
    /// Remote base URL, when sync is enabled
    pub remote_url: Option<String>,
}

/// Unified storage interface
pub struct Store {
    config: Config,
    cache: LocalCache,
    sync: SyncCoordinator,
    connectivity: Connectivity,
    sync_task: Option<SyncTaskHandle>,
}

impl Store {
    /// Open the store with the configuration from disk and environment
    pub async fn open() -> Result<Self> {
        let config = Config::load().context("Failed to load configuration")?;
        Self::open_with_config(config).await
    }

    /// Open the store with a specific configuration
    ///
    /// Uses the HTTP remote when sync is enabled and a URL is set; otherwise
    /// writes are kept locally and queued.
    pub async fn open_with_config(config: Config) -> Result<Self> {
        config.ensure_data_dir()?;
        let kv: Arc<dyn KeyValueStore> =
            Arc::new(FileStore::new(config.data_dir.clone()).with_quota(config.quota_bytes));

        let (remote, online): (Arc<dyn RemoteStore>, bool) = match config.active_remote_url() {
            Some(url) => {
                let remote = HttpRemote::new(url)
                    .with_context(|| format!("Failed to set up remote store at {}", url))?;
                (Arc::new(remote), true)
            }
            None => (Arc::new(NoRemote), false),
        };

        Ok(Self::open_with_parts(config, kv, remote, online).await)
    }

    /// Open the store over explicit backends
    pub async fn open_with_parts(
        config: Config,
        kv: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteStore>,
        online: bool,
    ) -> Self {
        let cache = LocalCache::open(
            SnapshotStore::new(kv.clone(), config.snapshot_key.clone()),
            CacheOptions {
                debounce: config.debounce(),
                eviction_ratio: config.eviction_ratio,
            },
        )
        .await;
        let queue = SyncQueue::open(kv, config.queue_key.clone()).await;

        let connectivity = Connectivity::new(online);
        let sync = SyncCoordinator::new(
            cache.clone(),
            remote,
            queue,
            connectivity.subscribe(),
            SyncOptions {
                retry_initial: std::time::Duration::from_millis(config.retry_initial_ms),
                retry_max: std::time::Duration::from_millis(config.retry_max_ms),
                ..SyncOptions::default()
            },
        );

        info!("Store opened at {:?}", config.data_dir);
        Self {
            config,
            cache,
            sync,
            connectivity,
            sync_task: None,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn sync(&self) -> &SyncCoordinator {
        &self.sync
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Start the background task that drains the queue on reconnect
    pub fn start_sync(&mut self) {
        if self.sync_task.is_none() {
            self.sync_task = Some(spawn_sync_task(self.sync.clone()));
        }
    }

    /// Report a connectivity change
    pub fn set_online(&self, online: bool) {
        self.connectivity.set_online(online);
    }

    /// Bind a form to this store
    pub fn form<V: FormView>(&self, form_id: impl Into<String>, view: V) -> FormStateManager<V> {
        FormStateManager::new(self.cache.clone(), self.sync.clone(), form_id, view)
    }

    // ==================== Record Operations ====================

    /// All records of a collection
    pub fn get(&self, collection: &str) -> Vec<ItemRecord> {
        self.cache.get(collection)
    }

    /// One record
    pub fn get_item(&self, collection: &str, id: &str) -> Option<ItemRecord> {
        self.cache.get_item(collection, id)
    }

    /// Store a record locally and push it
    pub async fn save(&self, collection: &str, fields: FieldMap) -> Result<(ItemRecord, PushOutcome)> {
        let record = self
            .cache
            .set(collection, fields)
            .context("Failed to save record")?;
        let outcome = self.sync.push(collection, &record).await;
        Ok((record, outcome))
    }

    /// Delete a record locally and remotely; returns whether it existed
    pub async fn remove(&self, collection: &str, id: &str) -> bool {
        if !self.cache.remove(collection, id) {
            return false;
        }
        self.sync.push_delete(collection, id).await;
        true
    }

    // ==================== Persistence & Sync ====================

    /// Write pending changes to disk now
    pub async fn flush(&self) -> FlushOutcome {
        self.cache.flush().await
    }

    /// Replay queued writes
    pub async fn drain(&self) -> DrainReport {
        self.sync.drain_queue().await
    }

    /// Current status
    pub async fn status(&self) -> StoreStatus {
        let snapshot = self.cache.snapshot();
        StoreStatus {
            collections: snapshot.counts(),
            last_saved: snapshot.last_saved,
            dirty: self.cache.is_dirty(),
            queued: self.sync.queue_len().await,
            online: self.connectivity.is_online(),
            remote_url: self.config.active_remote_url().map(str::to_string),
        }
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.sync.status()
    }

    /// Stop background sync and flush everything to disk
    pub async fn close(mut self) -> FlushOutcome {
        if let Some(task) = self.sync_task.take() {
            task.shutdown().await;
        }
        self.cache.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::sync::MemoryRemote;
    use serde_json::json;
    use tempfile::TempDir;

    fn fields(value: serde_json::Value) -> FieldMap {
        value.as_object().cloned().unwrap()
    }

    fn test_config(temp_dir: &TempDir) -> Config {
        Config {
            data_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_save_flush_and_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);

        {
            let store = Store::open_with_config(config.clone()).await.unwrap();
            let (record, outcome) = store
                .save("formularios", fields(json!({"id": "abc", "cpf": "123"})))
                .await
                .unwrap();
            assert_eq!(record.id, "abc");
            // No remote configured: the write waits in the queue
            assert_eq!(outcome, PushOutcome::Queued);
            assert_eq!(store.close().await, FlushOutcome::Saved);
        }

        let store = Store::open_with_config(config).await.unwrap();
        let item = store.get_item("formularios", "abc").unwrap();
        assert_eq!(item.get_str("cpf"), Some("123"));

        let status = store.status().await;
        assert_eq!(status.collections.get("formularios"), Some(&1));
        assert!(status.last_saved.is_some());
        assert_eq!(status.queued, 1);
        assert!(!status.online);
        assert!(status.remote_url.is_none());
    }

    #[tokio::test]
    async fn test_remove_queues_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open_with_config(test_config(&temp_dir)).await.unwrap();
        store
            .save("social", fields(json!({"id": "a"})))
            .await
            .unwrap();

        assert!(store.remove("social", "a").await);
        assert!(!store.remove("social", "a").await);
        assert!(store.get("social").is_empty());

        let pending = store.sync().pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].operation, crate::sync::SyncOperation::Delete);
    }

    #[tokio::test]
    async fn test_reconnect_drains_through_background_task() {
        let remote = Arc::new(MemoryRemote::new());
        let mut store = Store::open_with_parts(
            Config::default(),
            Arc::new(MemoryStore::new()),
            remote.clone(),
            false,
        )
        .await;
        store.start_sync();

        store
            .save("pessoal", fields(json!({"id": "abc", "nome": "Maria"})))
            .await
            .unwrap();
        assert!(remote.is_empty());

        let mut status = store.sync().subscribe_status();
        store.set_online(true);
        while *status.borrow_and_update() != SyncStatus::Idle {
            status.changed().await.unwrap();
        }

        assert!(remote.document("pessoal", "abc").is_some());
        assert_eq!(store.sync().queue_len().await, 0);
        store.close().await;
    }

    #[tokio::test]
    async fn test_invalid_collection_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open_with_config(test_config(&temp_dir)).await.unwrap();
        assert!(store.save("_version", FieldMap::new()).await.is_err());
    }
}
