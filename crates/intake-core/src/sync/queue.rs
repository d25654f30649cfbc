//! Pending sync queue
//!
//! Writes that could not reach the remote wait here, oldest first, until a
//! drain replays them. The queue is persisted under its own key so pending
//! writes survive a restart.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::ItemRecord;
use crate::storage::{KeyValueStore, StorageResult};

/// Kind of queued write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Save,
    Delete,
}

/// A write waiting to be replayed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Monotonic sequence number, breaks timestamp ties
    pub seq: u64,
    pub collection: String,
    pub operation: SyncOperation,
    pub id: String,
    /// Record to save; absent for deletes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ItemRecord>,
    /// When the write was queued
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedQueue {
    next_seq: u64,
    entries: Vec<QueueEntry>,
}

/// Ordered queue of writes awaiting replay
pub struct SyncQueue {
    entries: Vec<QueueEntry>,
    next_seq: u64,
    /// Where to persist; in-memory only when unset
    backing: Option<(Arc<dyn KeyValueStore>, String)>,
}

impl SyncQueue {
    /// Create a queue that lives only in memory
    pub fn in_memory() -> Self {
        Self {
            entries: Vec::new(),
            next_seq: 1,
            backing: None,
        }
    }

    /// Open a queue persisted under `key`, loading any stored entries
    ///
    /// An unreadable stored queue is logged and replaced by an empty one.
    pub async fn open(kv: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        let key = key.into();
        let persisted = match kv.get(&key).await {
            Ok(Some(json)) => match serde_json::from_str::<PersistedQueue>(&json) {
                Ok(persisted) => persisted,
                Err(e) => {
                    warn!("Sync queue '{}' is unreadable, starting empty: {}", key, e);
                    PersistedQueue::default()
                }
            },
            Ok(None) => PersistedQueue::default(),
            Err(e) => {
                warn!("Failed to read sync queue '{}': {}", key, e);
                PersistedQueue::default()
            }
        };

        let max_seq = persisted.entries.iter().map(|e| e.seq).max().unwrap_or(0);
        debug!("Sync queue '{}' loaded {} entries", key, persisted.entries.len());

        Self {
            entries: persisted.entries,
            next_seq: persisted.next_seq.max(max_seq + 1),
            backing: Some((kv, key)),
        }
    }

    /// Queue a save of `record`
    pub fn enqueue_save(&mut self, collection: &str, record: ItemRecord) -> u64 {
        let id = record.id.clone();
        self.push(collection, SyncOperation::Save, id, Some(record), Utc::now())
    }

    /// Queue a delete
    pub fn enqueue_delete(&mut self, collection: &str, id: &str) -> u64 {
        self.push(collection, SyncOperation::Delete, id.to_string(), None, Utc::now())
    }

    /// Queue a write with an explicit timestamp
    ///
    /// Any earlier entry for the same collection and id is superseded and
    /// dropped: replaying it would only be overwritten by this one.
    pub fn push(
        &mut self,
        collection: &str,
        operation: SyncOperation,
        id: String,
        data: Option<ItemRecord>,
        timestamp: DateTime<Utc>,
    ) -> u64 {
        self.discard(collection, &id);

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(QueueEntry {
            seq,
            collection: collection.to_string(),
            operation,
            id,
            data,
            timestamp,
        });
        seq
    }

    /// Entries in replay order: oldest timestamp first, then by sequence
    pub fn pending(&self) -> Vec<QueueEntry> {
        let mut entries = self.entries.clone();
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.seq.cmp(&b.seq)));
        entries
    }

    /// Remove an entry after a successful replay
    pub fn remove(&mut self, seq: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.seq != seq);
        self.entries.len() != before
    }

    /// Drop every entry for a collection and id; returns how many
    pub fn discard(&mut self, collection: &str, id: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|e| !(e.collection == collection && e.id == id));
        before - self.entries.len()
    }

    /// Drop entries for a collection and id queued before `mark`
    ///
    /// `mark` comes from [`SyncQueue::next_seq`] taken before a direct push,
    /// so writes queued while that push was in flight are kept.
    pub fn discard_before(&mut self, collection: &str, id: &str, mark: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|e| !(e.collection == collection && e.id == id && e.seq < mark));
        before - self.entries.len()
    }

    /// Sequence number the next queued entry will get
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Whether a write for this collection and id is waiting
    pub fn has_pending(&self, collection: &str, id: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.collection == collection && e.id == id)
    }

    /// Number of queued entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Write the queue to its backing store (no-op when in memory)
    pub async fn persist(&self) -> StorageResult<()> {
        let Some((kv, key)) = &self.backing else {
            return Ok(());
        };

        if self.entries.is_empty() {
            kv.remove(key).await?;
            return Ok(());
        }

        let json = serde_json::to_string(&PersistedQueue {
            next_seq: self.next_seq,
            entries: self.entries.clone(),
        })?;
        kv.set(key, &json).await
    }
}
