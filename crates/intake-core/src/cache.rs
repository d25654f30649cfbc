//! Local cache layer
//!
//! In-memory mirror of every collection, written back to the snapshot store
//! after a quiet period. Writes are applied to memory before `set`/`remove`
//! return; persistence is eventual and coalesced.
//!
//! ## Flushing
//!
//! Each write bumps a generation counter and pokes a background debounce
//! task. Once no write has arrived for the debounce window the task flushes.
//! Flushes are serialized: a second flush waits for the first instead of
//! racing the store. A flush with nothing new since the last successful save
//! is a no-op.
//!
//! ## Eviction
//!
//! When the store reports its quota is exhausted, the oldest entries (by
//! `updatedAt`) of the largest collection are dropped and the save is
//! retried once.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{id_from_fields, FieldMap, ItemRecord, Snapshot};
use crate::storage::SnapshotStore;

/// Errors returned for invalid cache input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Invalid collection name '{0}'")]
    InvalidCollection(String),
}

/// Collection names that would collide with snapshot metadata
const RESERVED_COLLECTIONS: &[&str] = &["_lastSaved", "_version"];

/// Whether `name` can be used as a collection name
pub fn is_valid_collection_name(name: &str) -> bool {
    !name.trim().is_empty() && !RESERVED_COLLECTIONS.contains(&name)
}

/// Tuning for the cache
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Quiet window before a flush
    pub debounce: Duration,
    /// Fraction of the largest collection dropped when storage is full
    pub eviction_ratio: f64,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(800),
            eviction_ratio: 0.2,
        }
    }
}

/// Events emitted by the cache
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// Snapshot written to storage
    Flushed { saved_at: DateTime<Utc> },
    /// Entries dropped to make room
    Evicted { collection: String, ids: Vec<String> },
    /// Non-blocking notice for the user
    StorageWarning(String),
}

/// Result of a flush
#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    /// Nothing changed since the last save
    Clean,
    /// Snapshot written
    Saved,
    /// Snapshot written after dropping entries
    SavedAfterEviction { collection: String, evicted: usize },
    /// Snapshot not written; state stays in memory and dirty
    Failed { reason: String },
}

/// Commands sent to the debounce task
#[derive(Debug, Clone, Copy)]
enum FlushCommand {
    /// A write happened; (re)start the quiet window
    Schedule,
    /// Flush what's pending and stop
    Shutdown,
}

struct CacheState {
    snapshot: Snapshot,
    /// Bumped on every mutation
    generation: u64,
    /// Generation captured by the last successful save
    saved_generation: u64,
}

struct Inner {
    state: Mutex<CacheState>,
    store: SnapshotStore,
    options: CacheOptions,
    flush_lock: tokio::sync::Mutex<()>,
    commands: mpsc::UnboundedSender<FlushCommand>,
    events: broadcast::Sender<CacheEvent>,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// In-memory cache of all collections with debounced persistence
///
/// Cloning is cheap and yields another handle to the same cache.
#[derive(Clone)]
pub struct LocalCache {
    inner: Arc<Inner>,
}

impl LocalCache {
    /// Open the cache, loading any stored snapshot
    ///
    /// Must be called inside a tokio runtime: it spawns the debounce task.
    pub async fn open(store: SnapshotStore, options: CacheOptions) -> Self {
        let snapshot = store.load().await.unwrap_or_else(Snapshot::new);
        info!(
            "Local cache opened with {} collections, {} items",
            snapshot.collections.len(),
            snapshot.total_items()
        );

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(64);
        let debounce = options.debounce;

        let inner = Arc::new(Inner {
            state: Mutex::new(CacheState {
                snapshot,
                generation: 0,
                saved_generation: 0,
            }),
            store,
            options,
            flush_lock: tokio::sync::Mutex::new(()),
            commands: command_tx,
            events: event_tx,
        });

        tokio::spawn(debounce_loop(Arc::downgrade(&inner), command_rx, debounce));

        Self { inner }
    }

    /// Subscribe to cache events
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    // ==================== Reads ====================

    /// All records of a collection (empty if it doesn't exist)
    pub fn get(&self, collection: &str) -> Vec<ItemRecord> {
        self.inner
            .lock_state()
            .snapshot
            .collections
            .get(collection)
            .map(|items| items.values().cloned().collect())
            .unwrap_or_default()
    }

    /// A single record by id
    pub fn get_item(&self, collection: &str, id: &str) -> Option<ItemRecord> {
        self.inner
            .lock_state()
            .snapshot
            .collections
            .get(collection)
            .and_then(|items| items.get(id))
            .cloned()
    }

    /// Names of all non-empty collections
    pub fn collection_names(&self) -> Vec<String> {
        self.inner
            .lock_state()
            .snapshot
            .collections
            .keys()
            .cloned()
            .collect()
    }

    /// Item count per collection
    pub fn counts(&self) -> std::collections::BTreeMap<String, usize> {
        self.inner.lock_state().snapshot.counts()
    }

    /// Copy of the full in-memory state
    pub fn snapshot(&self) -> Snapshot {
        self.inner.lock_state().snapshot.clone()
    }

    /// Whether there are writes not yet persisted
    pub fn is_dirty(&self) -> bool {
        let state = self.inner.lock_state();
        state.generation != state.saved_generation
    }

    // ==================== Writes ====================

    /// Insert or update a record
    ///
    /// Uses the `id` field when present, otherwise generates one. Stamps
    /// `updatedAt` (and `createdAt` on insert) and schedules a flush.
    pub fn set(&self, collection: &str, fields: FieldMap) -> Result<ItemRecord, CacheError> {
        check_collection(collection)?;
        let id = id_from_fields(&fields).unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();

        let stored = {
            let mut state = self.inner.lock_state();
            let items = state
                .snapshot
                .collections
                .entry(collection.to_string())
                .or_default();

            let record = match items.get_mut(&id) {
                Some(existing) => {
                    existing.replace_fields(fields);
                    // Never older than an adopted server stamp
                    existing.updated_at = now
                        .max(existing.created_at)
                        .max(existing.updated_at + chrono::Duration::microseconds(1));
                    existing.clone()
                }
                None => {
                    let mut record = ItemRecord::with_id(id.clone(), fields);
                    record.created_at = now;
                    record.updated_at = now;
                    items.insert(id, record.clone());
                    record
                }
            };
            state.generation += 1;
            record
        };

        debug!("Cached {}/{}", collection, stored.id);
        self.schedule_flush();
        Ok(stored)
    }

    /// Delete a record; returns whether one was removed
    pub fn remove(&self, collection: &str, id: &str) -> bool {
        let removed = {
            let mut state = self.inner.lock_state();
            let Some(items) = state.snapshot.collections.get_mut(collection) else {
                return false;
            };
            let removed = items.remove(id).is_some();
            if items.is_empty() {
                state.snapshot.collections.remove(collection);
            }
            if removed {
                state.generation += 1;
            }
            removed
        };

        if removed {
            debug!("Removed {}/{}", collection, id);
            self.schedule_flush();
        }
        removed
    }

    /// Store a record exactly as given, timestamps included
    pub fn apply_remote(&self, collection: &str, record: ItemRecord) -> Result<(), CacheError> {
        check_collection(collection)?;
        {
            let mut state = self.inner.lock_state();
            state
                .snapshot
                .collections
                .entry(collection.to_string())
                .or_default()
                .insert(record.id.clone(), record);
            state.generation += 1;
        }
        self.schedule_flush();
        Ok(())
    }

    /// Replace a record's `updatedAt` with the server's stamp
    ///
    /// Only applies when the record still carries `expected`, so a local
    /// edit made while the push was in flight is never clobbered.
    pub fn adopt_server_timestamp(
        &self,
        collection: &str,
        id: &str,
        expected: DateTime<Utc>,
        server_time: DateTime<Utc>,
    ) -> bool {
        let adopted = {
            let mut state = self.inner.lock_state();
            let record = state
                .snapshot
                .collections
                .get_mut(collection)
                .and_then(|items| items.get_mut(id));
            match record {
                Some(record) if record.updated_at == expected => {
                    record.updated_at = server_time.max(record.created_at);
                    state.generation += 1;
                    true
                }
                _ => false,
            }
        };
        if adopted {
            self.schedule_flush();
        }
        adopted
    }

    fn schedule_flush(&self) {
        // The receiver only goes away during runtime shutdown
        let _ = self.inner.commands.send(FlushCommand::Schedule);
    }

    // ==================== Persistence ====================

    /// Write the snapshot now
    ///
    /// Never returns an error: failures are logged, reported as
    /// [`CacheEvent::StorageWarning`], and leave the cache dirty.
    pub async fn flush(&self) -> FlushOutcome {
        let _guard = self.inner.flush_lock.lock().await;

        let (snapshot, generation) = {
            let state = self.inner.lock_state();
            if state.generation == state.saved_generation {
                return FlushOutcome::Clean;
            }
            (state.snapshot.clone(), state.generation)
        };

        match self.inner.store.save(&snapshot).await {
            Ok(saved_at) => {
                self.mark_saved(generation, saved_at);
                FlushOutcome::Saved
            }
            Err(e) if e.is_quota_exceeded() => {
                warn!("Storage full, evicting old entries: {}", e);
                self.evict_and_retry().await
            }
            Err(e) => {
                warn!("Failed to persist form state: {}", e);
                self.emit(CacheEvent::StorageWarning(format!(
                    "Form data could not be saved locally: {e}"
                )));
                FlushOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Flush pending writes and stop the debounce task
    pub async fn close(&self) -> FlushOutcome {
        let outcome = self.flush().await;
        let _ = self.inner.commands.send(FlushCommand::Shutdown);
        outcome
    }

    async fn evict_and_retry(&self) -> FlushOutcome {
        let (evicted, snapshot, generation) = {
            let mut state = self.inner.lock_state();
            let evicted = evict_oldest(&mut state.snapshot, self.inner.options.eviction_ratio);
            if evicted.is_some() {
                state.generation += 1;
            }
            (evicted, state.snapshot.clone(), state.generation)
        };

        let Some((collection, ids)) = evicted else {
            let reason = "storage full and nothing left to evict".to_string();
            warn!("{}", reason);
            self.emit(CacheEvent::StorageWarning(reason.clone()));
            return FlushOutcome::Failed { reason };
        };

        info!("Evicted {} entries from '{}'", ids.len(), collection);
        let evicted_count = ids.len();
        self.emit(CacheEvent::Evicted {
            collection: collection.clone(),
            ids,
        });

        match self.inner.store.save(&snapshot).await {
            Ok(saved_at) => {
                self.mark_saved(generation, saved_at);
                self.emit(CacheEvent::StorageWarning(format!(
                    "Local storage was full; removed {evicted_count} old entries from {collection}"
                )));
                FlushOutcome::SavedAfterEviction {
                    collection,
                    evicted: evicted_count,
                }
            }
            Err(e) => {
                warn!("Save failed after eviction: {}", e);
                self.emit(CacheEvent::StorageWarning(format!(
                    "Local storage is full; form data is kept in memory only: {e}"
                )));
                FlushOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn mark_saved(&self, generation: u64, saved_at: DateTime<Utc>) {
        {
            let mut state = self.inner.lock_state();
            state.saved_generation = generation;
            state.snapshot.last_saved = Some(saved_at);
        }
        self.emit(CacheEvent::Flushed { saved_at });
    }

    fn emit(&self, event: CacheEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }
}

fn check_collection(name: &str) -> Result<(), CacheError> {
    if is_valid_collection_name(name) {
        Ok(())
    } else {
        Err(CacheError::InvalidCollection(name.to_string()))
    }
}

/// Drop the oldest `ratio` of the largest collection (at least one entry)
///
/// Returns the collection name and the removed ids, oldest first.
fn evict_oldest(snapshot: &mut Snapshot, ratio: f64) -> Option<(String, Vec<String>)> {
    let name = snapshot.largest_collection()?.to_string();
    let items = snapshot.collections.get_mut(&name)?;

    let mut by_age: Vec<(DateTime<Utc>, String)> = items
        .values()
        .map(|r| (r.updated_at, r.id.clone()))
        .collect();
    by_age.sort();

    let count = ((items.len() as f64 * ratio).round() as usize).clamp(1, items.len());
    let ids: Vec<String> = by_age.into_iter().take(count).map(|(_, id)| id).collect();
    for id in &ids {
        items.remove(id);
    }
    if items.is_empty() {
        snapshot.collections.remove(&name);
    }
    Some((name, ids))
}

/// Background task that turns bursts of writes into one flush
async fn debounce_loop(
    cache: Weak<Inner>,
    mut commands: mpsc::UnboundedReceiver<FlushCommand>,
    window: Duration,
) {
    while let Some(command) = commands.recv().await {
        let mut shutdown = matches!(command, FlushCommand::Shutdown);

        if !shutdown {
            // Restart the quiet window on every new write
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(window) => break,
                    next = commands.recv() => match next {
                        Some(FlushCommand::Schedule) => continue,
                        Some(FlushCommand::Shutdown) | None => {
                            shutdown = true;
                            break;
                        }
                    }
                }
            }
        }

        let Some(inner) = cache.upgrade() else {
            break;
        };
        let outcome = LocalCache { inner }.flush().await;
        debug!("Debounced flush: {:?}", outcome);

        if shutdown {
            break;
        }
    }
    debug!("Debounce task stopped");
}
