//! Sync coordinator
//!
//! Mirrors local writes to the remote store while online and queues them
//! while offline or when the remote fails. Queued writes are replayed
//! oldest first when connectivity comes back; a background task retries
//! leftovers with exponential backoff for as long as the device stays
//! online.
//!
//! Nothing here is fatal: every failure ends with the data kept locally
//! and queued for a later attempt.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::policy::{ConflictPolicy, Resolution};
use super::queue::{QueueEntry, SyncOperation, SyncQueue};
use super::remote::{RemoteError, RemoteStore, WriteOp};
use crate::cache::LocalCache;
use crate::models::ItemRecord;

/// Tuning for the coordinator
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// First retry delay after a drain leaves entries behind
    pub retry_initial: Duration,
    /// Maximum retry delay
    pub retry_max: Duration,
    /// Local/remote conflict policy
    pub policy: ConflictPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            retry_initial: Duration::from_secs(1),
            retry_max: Duration::from_secs(30),
            policy: ConflictPolicy::default(),
        }
    }
}

/// Sync status as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Network is down; writes are being queued
    Offline,
    /// Online with nothing pending
    Idle,
    /// Replaying queued writes
    Draining,
    /// Online with writes still queued
    Pending(usize),
}

/// Events emitted by the coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A write reached the remote
    Pushed { collection: String, id: String },
    /// A write was queued for later
    Queued {
        collection: String,
        id: String,
        reason: String,
    },
    /// A remote copy replaced the local one
    Pulled { collection: String, id: String },
    /// A drain finished
    Drained(DrainReport),
    /// Status changed
    StatusChanged(SyncStatus),
}

/// Result of a push
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// Written remotely; carries the server timestamp for saves
    Pushed { server_time: Option<DateTime<Utc>> },
    /// Kept in the sync queue
    Queued,
}

/// Result of a pull
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// Local copy replaced by a newer remote copy
    Updated,
    /// Local copy is as new or newer
    KeptLocal,
    /// Remote has no such document
    NotFound,
    /// Remote unreachable; local copy stays in use
    Unavailable,
}

/// Summary of a drain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries replayed and removed
    pub pushed: usize,
    /// Entries that failed and stay queued
    pub failed: usize,
    /// Entries still queued afterwards
    pub remaining: usize,
    /// Another drain was in progress; nothing was done
    pub already_running: bool,
    /// Device was offline; nothing was done
    pub offline: bool,
}

struct CoordinatorInner {
    cache: LocalCache,
    remote: Arc<dyn RemoteStore>,
    queue: Mutex<SyncQueue>,
    online: watch::Receiver<bool>,
    draining: AtomicBool,
    options: SyncOptions,
    status: watch::Sender<SyncStatus>,
    events: broadcast::Sender<SyncEvent>,
}

/// Coordinates the local cache with a remote store
///
/// Cloning is cheap and yields another handle to the same coordinator.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<CoordinatorInner>,
}

/// Resets the in-progress flag when a drain ends, however it ends
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncCoordinator {
    /// Create a coordinator
    ///
    /// `online` is the connectivity signal; it is only ever read, never polled
    /// in a loop.
    pub fn new(
        cache: LocalCache,
        remote: Arc<dyn RemoteStore>,
        queue: SyncQueue,
        online: watch::Receiver<bool>,
        options: SyncOptions,
    ) -> Self {
        let initial = if !*online.borrow() {
            SyncStatus::Offline
        } else if queue.is_empty() {
            SyncStatus::Idle
        } else {
            SyncStatus::Pending(queue.len())
        };
        let (status, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(64);

        Self {
            inner: Arc::new(CoordinatorInner {
                cache,
                remote,
                queue: Mutex::new(queue),
                online,
                draining: AtomicBool::new(false),
                options,
                status,
                events,
            }),
        }
    }

    /// Whether the connectivity signal currently says online
    pub fn is_online(&self) -> bool {
        *self.inner.online.borrow()
    }

    /// Current status
    pub fn status(&self) -> SyncStatus {
        *self.inner.status.borrow()
    }

    /// Watch status changes
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    /// Subscribe to sync events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Number of queued writes
    pub async fn queue_len(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    /// Copy of the queued writes in replay order
    pub async fn pending(&self) -> Vec<QueueEntry> {
        self.inner.queue.lock().await.pending()
    }

    // ==================== Push ====================

    /// Send a saved record to the remote, or queue it
    pub async fn push(&self, collection: &str, record: &ItemRecord) -> PushOutcome {
        if !self.is_online() {
            self.enqueue(collection, SyncOperation::Save, &record.id, Some(record.clone()), "offline")
                .await;
            return PushOutcome::Queued;
        }

        let mark = self.queue_mark().await;
        match self.inner.remote.set(collection, record).await {
            Ok(server_time) => {
                self.after_push(collection, &record.id, mark).await;
                self.inner.cache.adopt_server_timestamp(
                    collection,
                    &record.id,
                    record.updated_at,
                    server_time,
                );
                PushOutcome::Pushed {
                    server_time: Some(server_time),
                }
            }
            Err(e) => {
                warn!("Push of {}/{} failed, queueing: {}", collection, record.id, e);
                self.enqueue(
                    collection,
                    SyncOperation::Save,
                    &record.id,
                    Some(record.clone()),
                    &e.to_string(),
                )
                .await;
                PushOutcome::Queued
            }
        }
    }

    /// Send a deletion to the remote, or queue it
    pub async fn push_delete(&self, collection: &str, id: &str) -> PushOutcome {
        if !self.is_online() {
            self.enqueue(collection, SyncOperation::Delete, id, None, "offline")
                .await;
            return PushOutcome::Queued;
        }

        let mark = self.queue_mark().await;
        match self.inner.remote.delete(collection, id).await {
            Ok(()) => {
                self.after_push(collection, id, mark).await;
                PushOutcome::Pushed { server_time: None }
            }
            Err(e) => {
                warn!("Delete of {}/{} failed, queueing: {}", collection, id, e);
                self.enqueue(collection, SyncOperation::Delete, id, None, &e.to_string())
                    .await;
                PushOutcome::Queued
            }
        }
    }

    /// Upload every local record in one batch
    ///
    /// Used for a full resync. If the batch fails, each record is queued
    /// individually so the regular drain can retry them.
    pub async fn push_all(&self) -> PushOutcome {
        let mut ops = Vec::new();
        for collection in self.inner.cache.collection_names() {
            for record in self.inner.cache.get(&collection) {
                ops.push(WriteOp::Set {
                    collection: collection.clone(),
                    record,
                });
            }
        }
        if ops.is_empty() {
            return PushOutcome::Pushed { server_time: None };
        }

        let mark = self.queue_mark().await;
        let result = if self.is_online() {
            self.inner.remote.batch_write(&ops).await
        } else {
            Err(RemoteError::NetworkUnavailable("offline".to_string()))
        };

        match result {
            Ok(()) => {
                info!("Uploaded {} records in one batch", ops.len());
                for op in &ops {
                    self.after_push(op.collection(), op.id(), mark).await;
                }
                PushOutcome::Pushed { server_time: None }
            }
            Err(e) => {
                warn!("Batch upload failed, queueing {} records: {}", ops.len(), e);
                let reason = e.to_string();
                for op in ops {
                    if let WriteOp::Set { collection, record } = op {
                        let id = record.id.clone();
                        self.enqueue(&collection, SyncOperation::Save, &id, Some(record), &reason)
                            .await;
                    }
                }
                PushOutcome::Queued
            }
        }
    }

    async fn queue_mark(&self) -> u64 {
        self.inner.queue.lock().await.next_seq()
    }

    async fn after_push(&self, collection: &str, id: &str, mark: u64) {
        // A direct write supersedes what was queued for it before it was sent
        let discarded = {
            let mut queue = self.inner.queue.lock().await;
            let discarded = queue.discard_before(collection, id, mark);
            if discarded > 0 {
                if let Err(e) = queue.persist().await {
                    warn!("Failed to persist sync queue: {}", e);
                }
            }
            discarded
        };
        if discarded > 0 {
            debug!("Dropped {} superseded queue entries for {}/{}", discarded, collection, id);
            self.refresh_status().await;
        }
        self.emit(SyncEvent::Pushed {
            collection: collection.to_string(),
            id: id.to_string(),
        });
    }

    async fn enqueue(
        &self,
        collection: &str,
        operation: SyncOperation,
        id: &str,
        data: Option<ItemRecord>,
        reason: &str,
    ) {
        {
            let mut queue = self.inner.queue.lock().await;
            queue.push(collection, operation, id.to_string(), data, Utc::now());
            if let Err(e) = queue.persist().await {
                warn!("Failed to persist sync queue: {}", e);
            }
        }
        debug!("Queued {:?} of {}/{} ({})", operation, collection, id, reason);
        self.emit(SyncEvent::Queued {
            collection: collection.to_string(),
            id: id.to_string(),
            reason: reason.to_string(),
        });
        self.refresh_status().await;
    }

    // ==================== Pull ====================

    /// Fetch the remote copy and keep whichever the policy prefers
    ///
    /// A record with a write still queued keeps its local copy.
    pub async fn pull(&self, collection: &str, id: &str) -> PullOutcome {
        if !self.is_online() {
            return PullOutcome::Unavailable;
        }

        // An unsent local write is newer than anything the remote holds
        if self.inner.queue.lock().await.has_pending(collection, id) {
            debug!("Keeping local {}/{}: write still queued", collection, id);
            return PullOutcome::KeptLocal;
        }

        let remote = match self.inner.remote.get(collection, id).await {
            Ok(Some(remote)) => remote,
            Ok(None) => return PullOutcome::NotFound,
            Err(e) => {
                debug!("Pull of {}/{} failed, using local copy: {}", collection, id, e);
                return PullOutcome::Unavailable;
            }
        };

        let local = self.inner.cache.get_item(collection, id);
        match self.inner.options.policy.resolve(local.as_ref(), &remote) {
            Resolution::KeepLocal => PullOutcome::KeptLocal,
            Resolution::TakeRemote => match self.inner.cache.apply_remote(collection, remote) {
                Ok(()) => {
                    debug!("Pulled newer {}/{} from remote", collection, id);
                    self.emit(SyncEvent::Pulled {
                        collection: collection.to_string(),
                        id: id.to_string(),
                    });
                    PullOutcome::Updated
                }
                Err(e) => {
                    warn!("Ignoring remote copy of {}/{}: {}", collection, id, e);
                    PullOutcome::KeptLocal
                }
            },
        }
    }

    // ==================== Drain ====================

    /// Replay queued writes, oldest first
    ///
    /// A failing entry stays queued and does not stop the rest. Entries
    /// queued while the drain runs are picked up before it returns.
    pub async fn drain_queue(&self) -> DrainReport {
        if !self.is_online() {
            return DrainReport {
                offline: true,
                remaining: self.queue_len().await,
                ..DrainReport::default()
            };
        }

        if self.inner.draining.swap(true, Ordering::SeqCst) {
            debug!("Drain already in progress");
            return DrainReport {
                already_running: true,
                remaining: self.queue_len().await,
                ..DrainReport::default()
            };
        }
        let guard = DrainGuard(&self.inner.draining);

        self.set_status(SyncStatus::Draining);
        let mut report = DrainReport::default();
        let mut attempted: HashSet<u64> = HashSet::new();

        'passes: loop {
            let batch: Vec<QueueEntry> = self
                .inner
                .queue
                .lock()
                .await
                .pending()
                .into_iter()
                .filter(|e| !attempted.contains(&e.seq))
                .collect();
            if batch.is_empty() {
                break;
            }

            for entry in batch {
                if !self.is_online() {
                    debug!("Went offline mid-drain, stopping");
                    break 'passes;
                }
                attempted.insert(entry.seq);

                match self.replay(&entry).await {
                    Ok(server_time) => {
                        self.inner.queue.lock().await.remove(entry.seq);
                        if let (Some(server_time), Some(data)) = (server_time, &entry.data) {
                            self.inner.cache.adopt_server_timestamp(
                                &entry.collection,
                                &entry.id,
                                data.updated_at,
                                server_time,
                            );
                        }
                        report.pushed += 1;
                    }
                    Err(e) => {
                        warn!(
                            "Replay of {:?} {}/{} failed, keeping it queued: {}",
                            entry.operation, entry.collection, entry.id, e
                        );
                        report.failed += 1;
                    }
                }
            }
        }

        {
            let queue = self.inner.queue.lock().await;
            if let Err(e) = queue.persist().await {
                warn!("Failed to persist sync queue: {}", e);
            }
            report.remaining = queue.len();
        }

        drop(guard);

        if report.pushed > 0 || report.failed > 0 {
            info!(
                "Drain finished: {} pushed, {} failed, {} remaining",
                report.pushed, report.failed, report.remaining
            );
        }
        self.refresh_status().await;
        self.emit(SyncEvent::Drained(report.clone()));
        report
    }

    async fn replay(&self, entry: &QueueEntry) -> Result<Option<DateTime<Utc>>, RemoteError> {
        match entry.operation {
            SyncOperation::Save => {
                let Some(record) = &entry.data else {
                    // Nothing to send; treat as done so it doesn't block the queue
                    warn!("Queued save of {}/{} has no data, dropping", entry.collection, entry.id);
                    return Ok(None);
                };
                self.inner
                    .remote
                    .set(&entry.collection, record)
                    .await
                    .map(Some)
            }
            SyncOperation::Delete => self
                .inner
                .remote
                .delete(&entry.collection, &entry.id)
                .await
                .map(|()| None),
        }
    }

    // ==================== Status ====================

    async fn refresh_status(&self) {
        let status = if !self.is_online() {
            SyncStatus::Offline
        } else if self.inner.draining.load(Ordering::SeqCst) {
            SyncStatus::Draining
        } else {
            match self.queue_len().await {
                0 => SyncStatus::Idle,
                n => SyncStatus::Pending(n),
            }
        };
        self.set_status(status);
    }

    fn set_status(&self, status: SyncStatus) {
        let changed = self.inner.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            self.emit(SyncEvent::StatusChanged(status));
        }
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.inner.events.send(event);
    }
}

// ==================== Background task ====================

/// Commands sent to the sync task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    /// Drain the queue now
    DrainNow,
    /// Stop the task
    Shutdown,
}

/// Handle to control the background sync task
pub struct SyncTaskHandle {
    /// Send commands to the task
    pub command_tx: mpsc::Sender<SyncCommand>,
    /// The task itself
    pub join: JoinHandle<()>,
}

impl SyncTaskHandle {
    /// Ask the task to stop and wait for it
    pub async fn shutdown(self) {
        let _ = self.command_tx.send(SyncCommand::Shutdown).await;
        let _ = self.join.await;
    }
}

/// Spawn the background sync task
///
/// The task drains the queue whenever connectivity flips to online and,
/// while entries remain, retries with exponential backoff.
pub fn spawn_sync_task(coordinator: SyncCoordinator) -> SyncTaskHandle {
    let (command_tx, command_rx) = mpsc::channel(16);
    let join = tokio::spawn(sync_task_loop(coordinator, command_rx));
    SyncTaskHandle { command_tx, join }
}

async fn sync_task_loop(coordinator: SyncCoordinator, mut command_rx: mpsc::Receiver<SyncCommand>) {
    let options = coordinator.inner.options.clone();
    let mut online_rx = coordinator.inner.online.clone();
    let mut retry_delay = options.retry_initial;
    let mut retry_at: Option<Instant> = None;

    // Catch up on anything queued before we started
    if *online_rx.borrow_and_update() {
        let report = coordinator.drain_queue().await;
        retry_at = schedule_retry(&report, &mut retry_delay, &options);
    }

    loop {
        tokio::select! {
            changed = online_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let online = *online_rx.borrow_and_update();
                if online {
                    retry_delay = options.retry_initial;
                    let report = coordinator.drain_queue().await;
                    retry_at = schedule_retry(&report, &mut retry_delay, &options);
                } else {
                    retry_at = None;
                    coordinator.set_status(SyncStatus::Offline);
                }
            }
            cmd = command_rx.recv() => {
                match cmd {
                    Some(SyncCommand::DrainNow) => {
                        let report = coordinator.drain_queue().await;
                        retry_at = schedule_retry(&report, &mut retry_delay, &options);
                    }
                    Some(SyncCommand::Shutdown) | None => break,
                }
            }
            _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                let report = coordinator.drain_queue().await;
                retry_at = schedule_retry(&report, &mut retry_delay, &options);
            }
        }
    }
    debug!("Sync task stopped");
}

/// Next retry time after a drain, doubling the delay each time
fn schedule_retry(
    report: &DrainReport,
    retry_delay: &mut Duration,
    options: &SyncOptions,
) -> Option<Instant> {
    if report.offline || report.remaining == 0 {
        *retry_delay = options.retry_initial;
        return None;
    }
    let at = Instant::now() + *retry_delay;
    debug!("{} entries still queued, retrying in {:?}", report.remaining, retry_delay);
    *retry_delay = (*retry_delay * 2).min(options.retry_max);
    Some(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheOptions;
    use crate::models::FieldMap;
    use crate::storage::{MemoryStore, SnapshotStore};
    use crate::sync::connectivity::Connectivity;
    use crate::sync::remote::{MemoryRemote, RemoteResult};
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Notify;

    struct Harness {
        cache: LocalCache,
        remote: Arc<MemoryRemote>,
        connectivity: Connectivity,
        sync: SyncCoordinator,
    }

    async fn harness(online: bool) -> Harness {
        harness_with(online, SyncOptions::default()).await
    }

    async fn memory_cache() -> LocalCache {
        LocalCache::open(
            SnapshotStore::new(Arc::new(MemoryStore::new()), "state"),
            CacheOptions {
                debounce: Duration::from_secs(3600),
                ..CacheOptions::default()
            },
        )
        .await
    }

    fn coordinator(
        cache: &LocalCache,
        remote: Arc<dyn RemoteStore>,
        connectivity: &Connectivity,
        options: SyncOptions,
    ) -> SyncCoordinator {
        SyncCoordinator::new(
            cache.clone(),
            remote,
            SyncQueue::in_memory(),
            connectivity.subscribe(),
            options,
        )
    }

    async fn harness_with(online: bool, options: SyncOptions) -> Harness {
        let cache = memory_cache().await;
        let remote = Arc::new(MemoryRemote::new());
        let connectivity = Connectivity::new(online);
        let sync = coordinator(&cache, remote.clone(), &connectivity, options);
        Harness {
            cache,
            remote,
            connectivity,
            sync,
        }
    }

    fn fields(value: serde_json::Value) -> FieldMap {
        value.as_object().cloned().unwrap()
    }

    fn pushed_ids(remote: &MemoryRemote) -> Vec<String> {
        remote.writes().iter().map(|w| w.id().to_string()).collect()
    }

    /// Holds the first `set` until released
    struct GatedRemote {
        inner: MemoryRemote,
        hold: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    impl GatedRemote {
        fn new() -> Self {
            Self {
                inner: MemoryRemote::new(),
                hold: AtomicBool::new(true),
                entered: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl RemoteStore for GatedRemote {
        async fn get(&self, collection: &str, id: &str) -> RemoteResult<Option<ItemRecord>> {
            self.inner.get(collection, id).await
        }

        async fn set(&self, collection: &str, record: &ItemRecord) -> RemoteResult<DateTime<Utc>> {
            if self.hold.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.set(collection, record).await
        }

        async fn delete(&self, collection: &str, id: &str) -> RemoteResult<()> {
            self.inner.delete(collection, id).await
        }

        async fn batch_write(&self, ops: &[WriteOp]) -> RemoteResult<()> {
            self.inner.batch_write(ops).await
        }
    }

    /// Stamps saves with a clock running ahead of ours
    struct SkewedRemote {
        inner: MemoryRemote,
        skew: chrono::Duration,
    }

    #[async_trait]
    impl RemoteStore for SkewedRemote {
        async fn get(&self, collection: &str, id: &str) -> RemoteResult<Option<ItemRecord>> {
            self.inner.get(collection, id).await
        }

        async fn set(&self, collection: &str, record: &ItemRecord) -> RemoteResult<DateTime<Utc>> {
            let mut stored = record.clone();
            stored.updated_at = Utc::now() + self.skew;
            self.inner.insert_document(collection, stored.clone());
            Ok(stored.updated_at)
        }

        async fn delete(&self, collection: &str, id: &str) -> RemoteResult<()> {
            self.inner.delete(collection, id).await
        }

        async fn batch_write(&self, ops: &[WriteOp]) -> RemoteResult<()> {
            self.inner.batch_write(ops).await
        }
    }

    #[tokio::test]
    async fn test_push_online_writes_remote_and_adopts_server_time() {
        let h = harness(true).await;
        let record = h.cache.set("social", fields(json!({"id": "a", "renda": 900}))).unwrap();

        let outcome = h.sync.push("social", &record).await;
        let PushOutcome::Pushed { server_time: Some(server_time) } = outcome else {
            panic!("expected push, got {outcome:?}");
        };

        let remote_doc = h.remote.document("social", "a").unwrap();
        assert_eq!(remote_doc.updated_at, server_time);
        assert_eq!(remote_doc.get("renda"), Some(&json!(900)));
        assert_eq!(h.cache.get_item("social", "a").unwrap().updated_at, server_time);
        assert_eq!(h.sync.queue_len().await, 0);
    }

    #[tokio::test]
    async fn test_offline_writes_are_queued_not_pushed() {
        let h = harness(false).await;

        for id in ["a", "b"] {
            let record = h.cache.set("social", fields(json!({"id": id}))).unwrap();
            assert_eq!(h.sync.push("social", &record).await, PushOutcome::Queued);
        }
        assert_eq!(h.sync.push_delete("pessoal", "c").await, PushOutcome::Queued);

        assert!(h.remote.writes().is_empty());
        assert_eq!(h.sync.queue_len().await, 3);
        assert_eq!(h.sync.status(), SyncStatus::Offline);

        // Draining while offline does nothing
        let report = h.sync.drain_queue().await;
        assert!(report.offline);
        assert_eq!(report.remaining, 3);
    }

    #[tokio::test]
    async fn test_online_drain_empties_queue_with_healthy_remote() {
        let h = harness(false).await;
        for id in ["a", "b", "c"] {
            let record = h.cache.set("social", fields(json!({"id": id}))).unwrap();
            h.sync.push("social", &record).await;
        }

        h.connectivity.set_online(true);
        let report = h.sync.drain_queue().await;

        assert_eq!(report.pushed, 3);
        assert_eq!(report.remaining, 0);
        assert_eq!(h.sync.queue_len().await, 0);
        assert_eq!(h.remote.len(), 3);
        assert_eq!(h.sync.status(), SyncStatus::Idle);
    }

    #[tokio::test]
    async fn test_drain_with_failing_remote_keeps_entries() {
        let h = harness(false).await;
        for id in ["a", "b"] {
            let record = h.cache.set("social", fields(json!({"id": id}))).unwrap();
            h.sync.push("social", &record).await;
        }

        h.remote.set_failing(true);
        h.connectivity.set_online(true);
        let report = h.sync.drain_queue().await;

        assert_eq!(report.pushed, 0);
        assert_eq!(report.failed, 2);
        assert_eq!(report.remaining, 2);
        assert_eq!(h.sync.status(), SyncStatus::Pending(2));

        // Next drain after recovery succeeds
        h.remote.set_failing(false);
        assert_eq!(h.sync.drain_queue().await.remaining, 0);
    }

    #[tokio::test]
    async fn test_failed_online_push_is_queued() {
        let h = harness(true).await;
        h.remote.set_failing(true);

        let record = h.cache.set("social", fields(json!({"id": "a"}))).unwrap();
        assert_eq!(h.sync.push("social", &record).await, PushOutcome::Queued);
        let pending = h.sync.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].data.as_ref().unwrap().id, "a");
    }

    #[tokio::test]
    async fn test_drain_pushes_oldest_first() {
        let h = harness(true).await;
        let t0 = Utc::now();
        {
            let mut queue = h.sync.inner.queue.lock().await;
            for (id, offset) in [("t3", 3), ("t1", 1), ("t2", 2)] {
                let record = ItemRecord::with_id(id, FieldMap::new());
                queue.push(
                    "social",
                    SyncOperation::Save,
                    id.to_string(),
                    Some(record),
                    t0 + chrono::Duration::seconds(offset),
                );
            }
        }

        let report = h.sync.drain_queue().await;
        assert_eq!(report.pushed, 3);
        assert_eq!(pushed_ids(&h.remote), vec!["t1", "t2", "t3"]);
    }

    #[tokio::test]
    async fn test_drain_replays_deletes() {
        let h = harness(true).await;
        h.remote
            .insert_document("social", ItemRecord::with_id("gone", FieldMap::new()));
        h.connectivity.set_online(false);
        h.sync.push_delete("social", "gone").await;

        h.connectivity.set_online(true);
        h.sync.drain_queue().await;
        assert!(h.remote.document("social", "gone").is_none());
    }

    #[tokio::test]
    async fn test_concurrent_drain_is_rejected() {
        let h = harness(true).await;
        h.sync.inner.draining.store(true, Ordering::SeqCst);

        let report = h.sync.drain_queue().await;
        assert!(report.already_running);

        h.sync.inner.draining.store(false, Ordering::SeqCst);
        assert!(!h.sync.drain_queue().await.already_running);
    }

    #[tokio::test]
    async fn test_direct_push_discards_older_queued_entry() {
        let h = harness(false).await;
        let old = h.cache.set("social", fields(json!({"id": "a", "v": 1}))).unwrap();
        h.sync.push("social", &old).await;
        assert_eq!(h.sync.queue_len().await, 1);

        h.connectivity.set_online(true);
        let new = h.cache.set("social", fields(json!({"id": "a", "v": 2}))).unwrap();
        h.sync.push("social", &new).await;

        assert_eq!(h.sync.queue_len().await, 0);
        assert_eq!(h.remote.document("social", "a").unwrap().get("v"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_write_queued_during_inflight_push_survives() {
        let cache = memory_cache().await;
        let remote = Arc::new(GatedRemote::new());
        let connectivity = Connectivity::new(true);
        let sync = coordinator(&cache, remote.clone(), &connectivity, SyncOptions::default());

        let v1 = cache.set("social", fields(json!({"id": "a", "v": 1}))).unwrap();
        let in_flight = {
            let sync = sync.clone();
            tokio::spawn(async move { sync.push("social", &v1).await })
        };
        remote.entered.notified().await;

        // Connection drops while v1 is on the wire
        connectivity.set_online(false);
        let v2 = cache.set("social", fields(json!({"id": "a", "v": 2}))).unwrap();
        assert_eq!(sync.push("social", &v2).await, PushOutcome::Queued);

        remote.release.notify_one();
        assert!(matches!(in_flight.await.unwrap(), PushOutcome::Pushed { .. }));

        let pending = sync.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].data.as_ref().unwrap().get("v"), Some(&json!(2)));
        assert_eq!(cache.get_item("social", "a").unwrap().get("v"), Some(&json!(2)));

        connectivity.set_online(true);
        assert_eq!(sync.drain_queue().await.remaining, 0);
        assert_eq!(remote.inner.document("social", "a").unwrap().get("v"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_pull_keeps_local_while_write_is_queued() {
        let cache = memory_cache().await;
        let remote = Arc::new(SkewedRemote {
            inner: MemoryRemote::new(),
            skew: chrono::Duration::seconds(60),
        });
        let connectivity = Connectivity::new(true);
        let sync = coordinator(&cache, remote.clone(), &connectivity, SyncOptions::default());

        let v1 = cache.set("social", fields(json!({"id": "a", "v": 1}))).unwrap();
        let PushOutcome::Pushed { server_time: Some(server_time) } = sync.push("social", &v1).await
        else {
            panic!("expected push");
        };
        assert_eq!(cache.get_item("social", "a").unwrap().updated_at, server_time);

        connectivity.set_online(false);
        let v2 = cache.set("social", fields(json!({"id": "a", "v": 2}))).unwrap();
        assert!(v2.updated_at > server_time);
        assert_eq!(sync.push("social", &v2).await, PushOutcome::Queued);

        connectivity.set_online(true);
        assert_eq!(sync.pull("social", "a").await, PullOutcome::KeptLocal);
        assert_eq!(cache.get_item("social", "a").unwrap().get("v"), Some(&json!(2)));
        assert_eq!(sync.queue_len().await, 1);

        assert_eq!(sync.drain_queue().await.remaining, 0);
        assert_eq!(remote.inner.document("social", "a").unwrap().get("v"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_pull_takes_strictly_newer_remote() {
        let h = harness(true).await;
        let local = h.cache.set("pessoal", fields(json!({"id": "a", "nome": "local"}))).unwrap();

        let mut remote = ItemRecord::with_id("a", fields(json!({"nome": "remote"})));
        remote.created_at = local.created_at;
        remote.updated_at = local.updated_at + chrono::Duration::seconds(1);
        h.remote.insert_document("pessoal", remote.clone());

        assert_eq!(h.sync.pull("pessoal", "a").await, PullOutcome::Updated);
        assert_eq!(h.cache.get_item("pessoal", "a").unwrap(), remote);
    }

    #[tokio::test]
    async fn test_pull_tie_keeps_local() {
        let h = harness(true).await;
        let local = h.cache.set("pessoal", fields(json!({"id": "a", "nome": "local"}))).unwrap();

        let mut remote = ItemRecord::with_id("a", fields(json!({"nome": "remote"})));
        remote.updated_at = local.updated_at;
        h.remote.insert_document("pessoal", remote);

        assert_eq!(h.sync.pull("pessoal", "a").await, PullOutcome::KeptLocal);
        assert_eq!(
            h.cache.get_item("pessoal", "a").unwrap().get_str("nome"),
            Some("local")
        );
    }

    #[tokio::test]
    async fn test_pull_without_local_copy_and_failures() {
        let h = harness(true).await;
        assert_eq!(h.sync.pull("pessoal", "missing").await, PullOutcome::NotFound);

        h.remote
            .insert_document("pessoal", ItemRecord::with_id("b", FieldMap::new()));
        assert_eq!(h.sync.pull("pessoal", "b").await, PullOutcome::Updated);

        h.remote.set_failing(true);
        assert_eq!(h.sync.pull("pessoal", "b").await, PullOutcome::Unavailable);
        assert!(h.cache.get_item("pessoal", "b").is_some());

        h.connectivity.set_online(false);
        assert_eq!(h.sync.pull("pessoal", "b").await, PullOutcome::Unavailable);
    }

    #[tokio::test]
    async fn test_push_all_batches_or_queues() {
        let h = harness(true).await;
        h.cache.set("social", fields(json!({"id": "a"}))).unwrap();
        h.cache.set("pessoal", fields(json!({"id": "b"}))).unwrap();

        h.remote.set_failing(true);
        assert_eq!(h.sync.push_all().await, PushOutcome::Queued);
        assert_eq!(h.sync.queue_len().await, 2);

        h.remote.set_failing(false);
        assert!(matches!(h.sync.push_all().await, PushOutcome::Pushed { .. }));
        assert_eq!(h.remote.len(), 2);
        // The batch supersedes the queued copies
        assert_eq!(h.sync.queue_len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_task_drains_on_reconnect_and_retries() {
        let h = harness_with(
            false,
            SyncOptions {
                retry_initial: Duration::from_millis(100),
                retry_max: Duration::from_millis(400),
                ..SyncOptions::default()
            },
        )
        .await;
        let record = h.cache.set("social", fields(json!({"id": "a"}))).unwrap();
        h.sync.push("social", &record).await;

        let task = spawn_sync_task(h.sync.clone());

        // Reconnect while the remote is still down: entry stays queued
        h.remote.set_failing(true);
        h.connectivity.set_online(true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.sync.queue_len().await, 1);

        // Remote recovers; the backoff retry picks the entry up
        h.remote.set_failing(false);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.sync.queue_len().await, 0);
        assert!(h.remote.document("social", "a").is_some());
        assert_eq!(h.sync.status(), SyncStatus::Idle);

        task.shutdown().await;
    }

    #[test]
    fn test_schedule_retry_backoff_caps() {
        let options = SyncOptions {
            retry_initial: Duration::from_secs(1),
            retry_max: Duration::from_secs(4),
            ..SyncOptions::default()
        };
        let mut delay = options.retry_initial;
        let pending = DrainReport {
            remaining: 1,
            ..DrainReport::default()
        };

        for expected in [2, 4, 4] {
            assert!(schedule_retry(&pending, &mut delay, &options).is_some());
            assert_eq!(delay, Duration::from_secs(expected));
        }

        assert!(schedule_retry(&DrainReport::default(), &mut delay, &options).is_none());
        assert_eq!(delay, options.retry_initial);
    }
}
