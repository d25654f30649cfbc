//! Remote synchronization
//!
//! Keeps the local cache and a remote document store in step:
//!
//! 1. While online, each saved record is pushed immediately
//! 2. While offline, or when a push fails, the write is queued
//! 3. When connectivity returns, the queue is drained oldest first
//! 4. Reads pull the remote copy and keep it only if strictly newer
//!
//! ## Usage
//!
//! ```ignore
//! let sync = SyncCoordinator::new(cache, remote, queue, connectivity.subscribe(), SyncOptions::default());
//! let handle = spawn_sync_task(sync.clone());
//! sync.push("pessoal", &record).await;
//! ```

mod connectivity;
mod coordinator;
mod http;
mod policy;
mod queue;
mod remote;

pub use connectivity::Connectivity;
pub use coordinator::{
    spawn_sync_task, DrainReport, PullOutcome, PushOutcome, SyncCommand, SyncCoordinator,
    SyncEvent, SyncOptions, SyncStatus, SyncTaskHandle,
};
pub use http::HttpRemote;
pub use policy::{ConflictPolicy, Resolution};
pub use queue::{QueueEntry, SyncOperation, SyncQueue};
pub use remote::{MemoryRemote, NoRemote, RemoteError, RemoteResult, RemoteStore, WriteOp};
