//! Remote store port (driven/secondary port)
//!
//! This module defines the interface for interacting with the remote
//! hierarchical object store. Items are addressed by provider-assigned
//! [`RemoteId`]s and scoped by their parent folder.
//!
//! ## Design Notes
//!
//! - Unlike the other ports this one returns a typed [`RemoteError`]: the
//!   engine must tell rate limiting and quota exhaustion apart from plain
//!   connectivity failures to decide between retrying and skipping.
//! - [`RemoteEntry`] is a loosely typed port-level DTO mirroring what a
//!   listing API returns. The scanner converts it into a `TrackedItem` and
//!   rejects entries with missing fields instead of guessing defaults.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::newtypes::{RemoteId, RevisionMarker};

// ============================================================================
// RemoteError
// ============================================================================

/// Errors reported by a remote store adapter
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Too many requests; the adapter may suggest a wait
    #[error("Rate limited by remote (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Storage quota exhausted
    #[error("Remote storage quota exceeded")]
    QuotaExceeded,

    /// Caller may not perform the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Item does not exist (or no longer exists)
    #[error("Remote item not found: {0}")]
    NotFound(String),

    /// Conditional write rejected because the item changed
    #[error("Remote item changed concurrently: {0}")]
    PreconditionFailed(String),

    /// Credentials rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Connection-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// Operation exceeded its deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// 5xx-style server failure
    #[error("Remote server error: {0}")]
    Server(String),

    /// Response could not be interpreted
    #[error("Invalid response from remote: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Network(_) | Self::Timeout(_) | Self::Server(_)
        )
    }

    /// Suggested wait before the next attempt, if the remote gave one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

// ============================================================================
// DTOs
// ============================================================================

/// One item as returned by a listing or metadata call
///
/// Every field is optional because remote payloads are loosely typed;
/// validation happens when the entry is converted into a domain item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub id: Option<String>,
    pub name: Option<String>,
    pub is_folder: Option<bool>,
    pub size: Option<u64>,
    /// Hex content digest (files only)
    pub hash: Option<String>,
    pub revision: Option<String>,
    pub modified: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    /// Entries in the remote trash are ignored by the scanner
    #[serde(default)]
    pub trashed: bool,
}

/// One page of a folder listing
#[derive(Debug, Clone, Default)]
pub struct RemotePage {
    pub entries: Vec<RemoteEntry>,
    /// Token for the next page; `None` on the last page
    pub next_page_token: Option<String>,
}

// ============================================================================
// IRemoteStore trait
// ============================================================================

/// Port trait for remote object store operations
///
/// ## Implementation Notes
///
/// - Implementations should not retry internally; the engine owns the
///   retry policy and per-operation timeouts.
/// - `update_file` must honour `expected_revision` when given and fail
///   with [`RemoteError::PreconditionFailed`] if the item moved on.
/// - Returned entries for files must carry a content hash computed with the
///   same algorithm the local filesystem adapter uses.
#[async_trait::async_trait]
pub trait IRemoteStore: Send + Sync {
    /// Lists one page of the direct children of `folder`
    async fn list_children(
        &self,
        folder: &RemoteId,
        page_token: Option<&str>,
    ) -> Result<RemotePage, RemoteError>;

    /// Retrieves metadata for a single item
    async fn get_item(&self, id: &RemoteId) -> Result<RemoteEntry, RemoteError>;

    /// Looks up a child folder by name, used to locate a sync root's folder
    async fn find_folder(
        &self,
        parent: &RemoteId,
        name: &str,
    ) -> Result<Option<RemoteEntry>, RemoteError>;

    /// Creates a folder named `name` inside `parent`
    async fn create_folder(&self, parent: &RemoteId, name: &str)
        -> Result<RemoteEntry, RemoteError>;

    /// Creates a new file named `name` inside `parent`
    async fn create_file(
        &self,
        parent: &RemoteId,
        name: &str,
        data: Vec<u8>,
    ) -> Result<RemoteEntry, RemoteError>;

    /// Replaces the content of an existing file
    async fn update_file(
        &self,
        id: &RemoteId,
        data: Vec<u8>,
        expected_revision: Option<&RevisionMarker>,
    ) -> Result<RemoteEntry, RemoteError>;

    /// Downloads the full content of a file
    async fn download(&self, id: &RemoteId) -> Result<Vec<u8>, RemoteError>;

    /// Deletes an item (folders are expected to be empty)
    async fn delete(&self, id: &RemoteId) -> Result<(), RemoteError>;

    /// Renames an item within its parent folder
    async fn rename(&self, id: &RemoteId, new_name: &str) -> Result<RemoteEntry, RemoteError>;
}
