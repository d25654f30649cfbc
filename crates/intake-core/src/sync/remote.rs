//! Remote document store interface
//!
//! The remote side is a document database addressed by collection and id.
//! Writes return the timestamp the server stamped on the document.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::ItemRecord;

/// Errors returned by a remote store
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// The remote could not be reached at all
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// A write reached the remote but did not succeed
    #[error("Remote write failed for {collection}/{id}: {reason}")]
    WriteFailed {
        collection: String,
        id: String,
        reason: String,
    },

    /// A read reached the remote but did not succeed
    #[error("Remote read failed for {collection}/{id}: {reason}")]
    ReadFailed {
        collection: String,
        id: String,
        reason: String,
    },

    /// The remote refused the request (auth, validation)
    #[error("Remote rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The remote answered with something we can't read
    #[error("Invalid response from remote: {0}")]
    Decode(String),
}

/// Result type for remote operations
pub type RemoteResult<T> = Result<T, RemoteError>;

/// One write in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum WriteOp {
    /// Create or replace a document
    Set {
        collection: String,
        record: ItemRecord,
    },
    /// Delete a document
    Delete { collection: String, id: String },
}

impl WriteOp {
    /// Collection this write targets
    pub fn collection(&self) -> &str {
        match self {
            WriteOp::Set { collection, .. } | WriteOp::Delete { collection, .. } => collection,
        }
    }

    /// Document id this write targets
    pub fn id(&self) -> &str {
        match self {
            WriteOp::Set { record, .. } => &record.id,
            WriteOp::Delete { id, .. } => id,
        }
    }
}

/// A remote document store keyed by collection and id
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch a document; `None` if it doesn't exist
    async fn get(&self, collection: &str, id: &str) -> RemoteResult<Option<ItemRecord>>;

    /// Create or replace a document; returns the server-assigned `updatedAt`
    async fn set(&self, collection: &str, record: &ItemRecord) -> RemoteResult<DateTime<Utc>>;

    /// Delete a document (deleting a missing document succeeds)
    async fn delete(&self, collection: &str, id: &str) -> RemoteResult<()>;

    /// Apply several writes at once; all succeed or none do
    async fn batch_write(&self, ops: &[WriteOp]) -> RemoteResult<()>;
}

// ==================== No remote ====================

/// Stand-in used when no remote is configured
///
/// Every call fails as unreachable, so writes stay queued until a real
/// remote is set up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRemote;

#[async_trait]
impl RemoteStore for NoRemote {
    async fn get(&self, _collection: &str, _id: &str) -> RemoteResult<Option<ItemRecord>> {
        Err(not_configured())
    }

    async fn set(&self, _collection: &str, _record: &ItemRecord) -> RemoteResult<DateTime<Utc>> {
        Err(not_configured())
    }

    async fn delete(&self, _collection: &str, _id: &str) -> RemoteResult<()> {
        Err(not_configured())
    }

    async fn batch_write(&self, _ops: &[WriteOp]) -> RemoteResult<()> {
        Err(not_configured())
    }
}

fn not_configured() -> RemoteError {
    RemoteError::NetworkUnavailable("no remote store configured".to_string())
}

// ==================== In-memory remote ====================

/// In-process remote store
///
/// Stamps documents with the current time like a server would, records
/// every successful write in order, and can be switched into a failing mode
/// to simulate an unreachable server.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    docs: Mutex<BTreeMap<(String, String), ItemRecord>>,
    log: Mutex<Vec<WriteOp>>,
    failing: AtomicBool,
}

impl MemoryRemote {
    /// Create an empty, healthy remote
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Successful writes, oldest first
    pub fn writes(&self) -> Vec<WriteOp> {
        lock(&self.log).clone()
    }

    /// Stored document, if any
    pub fn document(&self, collection: &str, id: &str) -> Option<ItemRecord> {
        lock(&self.docs)
            .get(&(collection.to_string(), id.to_string()))
            .cloned()
    }

    /// Number of stored documents
    pub fn len(&self) -> usize {
        lock(&self.docs).len()
    }

    /// Whether no documents are stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store a document verbatim, bypassing the server stamp
    pub fn insert_document(&self, collection: &str, record: ItemRecord) {
        lock(&self.docs).insert((collection.to_string(), record.id.clone()), record);
    }

    fn check(&self) -> RemoteResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(RemoteError::NetworkUnavailable(
                "simulated outage".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn apply(&self, op: &WriteOp, now: DateTime<Utc>) -> WriteOp {
        let mut docs = lock(&self.docs);
        match op {
            WriteOp::Set { collection, record } => {
                let mut stored = record.clone();
                stored.updated_at = now;
                docs.insert((collection.clone(), stored.id.clone()), stored.clone());
                WriteOp::Set {
                    collection: collection.clone(),
                    record: stored,
                }
            }
            WriteOp::Delete { collection, id } => {
                docs.remove(&(collection.clone(), id.clone()));
                op.clone()
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn get(&self, collection: &str, id: &str) -> RemoteResult<Option<ItemRecord>> {
        self.check()?;
        Ok(self.document(collection, id))
    }

    async fn set(&self, collection: &str, record: &ItemRecord) -> RemoteResult<DateTime<Utc>> {
        self.check()?;
        let now = Utc::now();
        let applied = self.apply(
            &WriteOp::Set {
                collection: collection.to_string(),
                record: record.clone(),
            },
            now,
        );
        lock(&self.log).push(applied);
        Ok(now)
    }

    async fn delete(&self, collection: &str, id: &str) -> RemoteResult<()> {
        self.check()?;
        let applied = self.apply(
            &WriteOp::Delete {
                collection: collection.to_string(),
                id: id.to_string(),
            },
            Utc::now(),
        );
        lock(&self.log).push(applied);
        Ok(())
    }

    async fn batch_write(&self, ops: &[WriteOp]) -> RemoteResult<()> {
        self.check()?;
        let now = Utc::now();
        let applied: Vec<WriteOp> = ops.iter().map(|op| self.apply(op, now)).collect();
        lock(&self.log).extend(applied);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldMap;

    #[tokio::test]
    async fn test_memory_remote_stamps_and_logs() {
        let remote = MemoryRemote::new();
        let record = ItemRecord::with_id("a", FieldMap::new());

        let stamped = remote.set("social", &record).await.unwrap();
        let stored = remote.get("social", "a").await.unwrap().unwrap();
        assert_eq!(stored.updated_at, stamped);
        assert_eq!(remote.writes().len(), 1);

        remote.delete("social", "a").await.unwrap();
        assert!(remote.get("social", "a").await.unwrap().is_none());
        assert!(remote.is_empty());
        assert_eq!(remote.writes()[1].id(), "a");
    }

    #[tokio::test]
    async fn test_memory_remote_failing_mode() {
        let remote = MemoryRemote::new();
        remote.set_failing(true);

        let record = ItemRecord::with_id("a", FieldMap::new());
        assert!(matches!(
            remote.set("social", &record).await,
            Err(RemoteError::NetworkUnavailable(_))
        ));
        assert!(remote.get("social", "a").await.is_err());
        assert!(remote.writes().is_empty());

        remote.set_failing(false);
        assert!(remote.set("social", &record).await.is_ok());
    }

    #[tokio::test]
    async fn test_batch_write_applies_in_order() {
        let remote = MemoryRemote::new();
        let ops = vec![
            WriteOp::Set {
                collection: "social".to_string(),
                record: ItemRecord::with_id("a", FieldMap::new()),
            },
            WriteOp::Delete {
                collection: "social".to_string(),
                id: "a".to_string(),
            },
            WriteOp::Set {
                collection: "pessoal".to_string(),
                record: ItemRecord::with_id("b", FieldMap::new()),
            },
        ];

        remote.batch_write(&ops).await.unwrap();
        assert!(remote.document("social", "a").is_none());
        assert!(remote.document("pessoal", "b").is_some());
        assert_eq!(remote.writes().len(), 3);
        assert_eq!(remote.writes()[2].collection(), "pessoal");
    }

    #[tokio::test]
    async fn test_no_remote_is_unreachable() {
        let remote = NoRemote;
        assert!(matches!(
            remote.get("social", "a").await,
            Err(RemoteError::NetworkUnavailable(_))
        ));
    }

    #[test]
    fn test_write_op_json_shape() {
        let op = WriteOp::Delete {
            collection: "social".to_string(),
            id: "a".to_string(),
        };
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["op"], "delete");
        assert_eq!(value["collection"], "social");
    }
}
