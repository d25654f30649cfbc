//! Storage layer
//!
//! Handles local persistence of form state.
//!
//! ## Architecture
//!
//! - **KeyValueStore**: named string blobs (files on disk or memory)
//! - **SnapshotStore**: the whole form state as one JSON blob under one key
//!
//! The local cache is the only writer of the snapshot; everything else
//! reads through it.

pub mod error;
pub mod kv;
pub mod snapshot;

pub use error::{StorageError, StorageResult};
pub use kv::{FileStore, KeyValueStore, MemoryStore};
pub use snapshot::SnapshotStore;
