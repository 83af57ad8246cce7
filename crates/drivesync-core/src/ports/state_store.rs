//! State store port (driven/secondary port)
//!
//! This module defines the interface for persisting the last-synchronized
//! snapshot of each sync root.
//!
//! ## Design Notes
//!
//! - `commit` replaces a root's snapshot atomically; a reader never sees a
//!   half-written snapshot.
//! - `record_item` and `remove_item` are the incremental path used by
//!   transfer workers after each confirmed transfer. Implementations must serialise concurrent
//!   calls internally.
//! - Errors are typed so the orchestrator can log them and fall back to an
//!   empty state instead of failing the cycle.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::newtypes::{RelativePath, SyncRootId};
use crate::domain::sync_state::SyncState;
use crate::domain::tracked_item::TrackedItem;

/// Errors reported by a state store adapter
#[derive(Debug, Error)]
pub enum StateStoreError {
    /// The underlying storage could not be reached
    #[error("State store unavailable: {0}")]
    Unavailable(String),

    /// Stored data exists but cannot be decoded
    #[error("State store corrupt for root {root}: {reason}")]
    Corrupt { root: String, reason: String },

    /// Snapshot was written by a newer, unknown schema
    #[error("Unsupported snapshot schema version {found} (supported up to {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// A write could not be completed
    #[error("State store write failed: {0}")]
    WriteFailed(String),
}

/// Summary of what is stored for a root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub schema_version: u32,
    pub committed_at: Option<DateTime<Utc>>,
    /// Entries in the last committed snapshot
    pub entries: usize,
    /// Incremental records written since that commit
    pub pending_records: usize,
}

/// Port trait for persisting sync state
#[async_trait::async_trait]
pub trait IStateStore: Send + Sync {
    /// Loads the current state of a root, including incremental records
    ///
    /// A root with no stored snapshot yields `SyncState::empty()`.
    async fn load(&self, root: &SyncRootId) -> Result<SyncState, StateStoreError>;

    /// Durably replaces the snapshot of a root
    async fn commit(&self, root: &SyncRootId, state: &SyncState) -> Result<(), StateStoreError>;

    /// Records one entry without a full commit
    ///
    /// Tombstones (`TrackedItem::is_deleted`) remove the path.
    async fn record_item(
        &self,
        root: &SyncRootId,
        item: &TrackedItem,
    ) -> Result<(), StateStoreError>;

    /// Records the removal of one entry without a full commit
    async fn remove_item(
        &self,
        root: &SyncRootId,
        path: &RelativePath,
    ) -> Result<(), StateStoreError>;

    /// Forgets everything stored for a root
    async fn discard(&self, root: &SyncRootId) -> Result<(), StateStoreError>;

    /// Describes what is stored for a root, `None` if nothing is
    async fn snapshot_info(&self, root: &SyncRootId)
        -> Result<Option<SnapshotInfo>, StateStoreError>;
}
