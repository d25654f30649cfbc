//! Intake Core Library
//!
//! Client-side persistence and sync for a multi-step social-assistance
//! intake form. Form values are kept in an in-memory cache, written to a
//! local key-value store after a quiet period, and mirrored to a remote
//! document store when the network allows.
//!
//! # Architecture
//!
//! - **Local cache**: source of truth on the device; all reads are served
//!   from memory
//! - **Snapshot**: the whole cache persisted as one JSON blob
//! - **Sync coordinator**: pushes writes, queues them while offline, pulls
//!   newer remote copies
//!
//! # Quick Start
//!
//! ```text
//! let store = Store::open().await?;
//!
//! let mut fields = FieldMap::new();
//! fields.insert("id".into(), "abc".into());
//! fields.insert("cpf".into(), "123.456.789-00".into());
//! store.save("formularios", fields).await?;
//!
//! let forms = store.get("formularios");
//! store.close().await;
//! ```
//!
//! # Modules
//!
//! - `store`: Unified entry point wiring every layer from configuration
//! - `cache`: In-memory cache with debounced flushing and eviction
//! - `storage`: Key-value stores and the snapshot blob
//! - `sync`: Remote stores, offline queue and the sync coordinator
//! - `form`: Form steps and the form state manager
//! - `models`: Records and snapshots
//! - `config`: Application configuration

pub mod cache;
pub mod config;
pub mod form;
pub mod models;
pub mod storage;
pub mod store;
pub mod sync;

pub use cache::{CacheError, CacheEvent, FlushOutcome, LocalCache};
pub use config::Config;
pub use form::{FormStateManager, FormView, Step};
pub use models::{FieldMap, ItemRecord, Snapshot};
pub use storage::{StorageError, StorageResult};
pub use store::{Store, StoreStatus};
pub use sync::{DrainReport, PushOutcome, SyncCoordinator, SyncStatus};
