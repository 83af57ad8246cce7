//! Domain entities and business logic
//!
//! This module contains the core domain types for DriveSync:
//! - Newtypes for validated paths, identifiers and digests
//! - Tracked items and the persisted sync state
//! - Actions, plans and conflict records produced during reconciliation
//! - Sync roots and the cycle phase state machine
//! - Domain-specific error types

pub mod action;
pub mod conflict;
pub mod cycle;
pub mod errors;
pub mod newtypes;
pub mod sync_state;
pub mod tracked_item;

// Re-export commonly used types
pub use action::{Action, ActionKind, ActionPlan, PlanStats, Side};
pub use conflict::{ConflictKind, ConflictRecord, Resolution};
pub use cycle::{CyclePhase, SyncRoot};
pub use errors::DomainError;
pub use newtypes::*;
pub use sync_state::{ChangeSet, SyncState, SCHEMA_VERSION};
pub use tracked_item::{ItemKind, TrackedItem};
