//! DriveSync Sync - Scan, reconcile and transfer engine
//!
//! Provides:
//! - Concurrent local and remote change scanning
//! - Three-way reconciliation against the last agreed state
//! - Dependency-aware, bounded-concurrency transfer execution with retries
//! - Single-flight sync cycles with pull-based progress events
//!
//! ## Modules
//!
//! - [`scanner`] - Local tree walk and paged remote listing
//! - [`reconciler`] - Pure three-way diff producing an ordered action plan
//! - [`executor`] - Runs plan actions against both sides
//! - [`orchestrator`] - Drives one cycle end-to-end and exposes cancellation
//! - [`filesystem`] - Local filesystem adapter (atomic writes, md5/sha256)
//! - [`folder_remote`] - Remote store backed by a directory tree

pub mod exclusion;
pub mod executor;
pub mod filesystem;
pub mod folder_remote;
pub mod hashing;
pub mod orchestrator;
pub mod progress;
pub mod reconciler;
pub mod retry;
pub mod scanner;

use std::time::Duration;

use thiserror::Error;

use drivesync_core::ports::{AuthError, RemoteError};

pub use exclusion::ExclusionPolicy;
pub use executor::{ActionOutcome, ExecutionContext, ExecutorEvent, TransferExecutor};
pub use filesystem::LocalFileSystemAdapter;
pub use folder_remote::FolderRemoteStore;
pub use hashing::HashAlgorithm;
pub use orchestrator::{SyncOrchestrator, SyncPorts};
pub use progress::{AbortReason, CycleHandle, CycleSummary, ProgressEvent, ProgressSubscription};
pub use reconciler::{reconcile, restore_parents};
pub use retry::RetryPolicy;
pub use scanner::ChangeScanner;

/// Errors that abort a scan, and with it the whole cycle
///
/// A scan error is raised before anything is transferred, so the last
/// committed state stays authoritative.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScanError {
    /// The local root or the remote root folder cannot be used
    #[error("Sync root unavailable: {path}: {reason}")]
    RootUnavailable { path: String, reason: String },

    /// A local directory or file could not be read
    #[error("Failed to read {path}: {reason}")]
    Io { path: String, reason: String },

    /// A remote listing entry lacks a required field or carries an invalid one
    #[error("Malformed remote entry in folder {folder}: {reason}")]
    MalformedEntry { folder: String, reason: String },

    /// The remote listing failed after retries
    #[error("Remote listing failed: {0}")]
    Remote(RemoteError),

    /// The remote rejected the credentials
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The scan was cancelled
    #[error("Scan cancelled")]
    Cancelled,
}

impl From<RemoteError> for ScanError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Unauthorized(msg) => Self::Auth(AuthError::Rejected(msg)),
            other => Self::Remote(other),
        }
    }
}

/// Failure of a single transfer action
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    /// Worth retrying: network trouble, rate limits, verification mismatches
    #[error("Transient transfer error: {message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Retrying cannot help; the action is skipped
    #[error("Permanent transfer error: {0}")]
    Permanent(String),
}

impl TransferError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

impl From<RemoteError> for TransferError {
    fn from(err: RemoteError) -> Self {
        if err.is_transient() {
            Self::Transient {
                retry_after: err.retry_after(),
                message: err.to_string(),
            }
        } else {
            Self::Permanent(err.to_string())
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
                Self::transient(err.to_string())
            }
            _ => Self::Permanent(err.to_string()),
        }
    }
}
