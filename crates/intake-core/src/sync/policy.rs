//! Conflict resolution between local and remote copies

use crate::models::ItemRecord;

/// How to choose between a local record and the remote copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Newest `updatedAt` wins; equal timestamps keep the local copy
    #[default]
    LastWriterWins,
}

/// Outcome of comparing two copies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Replace the local record with the remote one
    TakeRemote,
    /// Leave the local record alone
    KeepLocal,
}

impl ConflictPolicy {
    /// Decide which copy to keep
    pub fn resolve(&self, local: Option<&ItemRecord>, remote: &ItemRecord) -> Resolution {
        match self {
            ConflictPolicy::LastWriterWins => match local {
                None => Resolution::TakeRemote,
                Some(local) if remote.updated_at > local.updated_at => Resolution::TakeRemote,
                Some(_) => Resolution::KeepLocal,
            },
        }
    }
}
