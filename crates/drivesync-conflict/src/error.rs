//! Error types for the conflict resolver

use thiserror::Error;

use drivesync_core::domain::{DomainError, RelativePath};

/// Errors that can occur while resolving a conflict
///
/// None of these should happen for records produced by the reconciler; the
/// orchestrator treats them as a permanent skip of the affected path.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConflictPolicyError {
    /// The record carries neither a local nor a remote item
    #[error("conflict at {0} has no surviving side")]
    NoCandidate(RelativePath),

    /// The record's items do not fit its conflict kind
    #[error("conflict at {path} cannot be resolved: {reason}")]
    Unresolvable { path: RelativePath, reason: String },

    /// Every candidate name for the conflict copy is already taken
    #[error("no free conflict name for {0}")]
    NoFreeName(RelativePath),

    /// Invalid glob pattern or strategy in a conflict rule
    #[error("invalid conflict rule {pattern}: {reason}")]
    InvalidRule { pattern: String, reason: String },

    /// A generated path failed validation
    #[error(transparent)]
    Path(#[from] DomainError),
}
