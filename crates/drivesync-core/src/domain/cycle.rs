//! Sync roots and the cycle state machine
//!
//! ## Cycle phases
//!
//! ```text
//!   ┌──────┐   start   ┌──────────┐        ┌─────────────┐        ┌───────────┐
//!   │ Idle │ ────────► │ Scanning │ ─────► │ Reconciling │ ─────► │ Resolving │
//!   └──────┘           └──────────┘        └─────────────┘        └───────────┘
//!      ▲                    │                     │                     │
//!      │                    │ scan/auth error     │                     ▼
//!      │◄───────────────────┘                     │               ┌───────────┐
//!      │                                          │               │ Executing │
//!      │         ┌────────────┐                   │               └───────────┘
//!      └──────── │ Committing │ ◄─────────────────┴─────────────────────┘
//!                └────────────┘
//!                      ▲
//!                      │            any non-Idle phase ──cancel──► Cancelling
//!                      └──────────────────────────────────────────────┘
//! ```
//!
//! Scanning failures return straight to `Idle` without committing, so the
//! last committed state stays authoritative.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{RemoteId, SyncRootId};

/// One paired local directory and remote folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRoot {
    id: SyncRootId,
    local_path: PathBuf,
    remote_folder: RemoteId,
}

impl SyncRoot {
    pub fn new(id: SyncRootId, local_path: PathBuf, remote_folder: RemoteId) -> Self {
        Self {
            id,
            local_path,
            remote_folder,
        }
    }

    pub fn id(&self) -> &SyncRootId {
        &self.id
    }

    pub fn local_path(&self) -> &PathBuf {
        &self.local_path
    }

    pub fn remote_folder(&self) -> &RemoteId {
        &self.remote_folder
    }
}

/// Phase of a sync cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    #[default]
    Idle,
    Scanning,
    Reconciling,
    Resolving,
    Executing,
    Committing,
    Cancelling,
}

impl CyclePhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Reconciling => "reconciling",
            Self::Resolving => "resolving",
            Self::Executing => "executing",
            Self::Committing => "committing",
            Self::Cancelling => "cancelling",
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle)
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: CyclePhase) -> bool {
        use CyclePhase::*;
        match (self, next) {
            (Idle, Scanning) => true,
            (Scanning, Reconciling) | (Scanning, Idle) => true,
            (Reconciling, Resolving) | (Reconciling, Committing) => true,
            (Resolving, Executing) | (Resolving, Committing) => true,
            (Executing, Committing) => true,
            (Committing, Idle) => true,
            (Cancelling, Committing) | (Cancelling, Idle) => true,
            (from, Cancelling) => *from != Idle && *from != Cancelling,
            _ => false,
        }
    }

    /// Move to `next`, rejecting illegal transitions
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` for an illegal transition
    pub fn transition_to(&mut self, next: CyclePhase) -> Result<(), DomainError> {
        if !self.can_transition_to(next) {
            return Err(DomainError::InvalidState {
                from: self.name().to_string(),
                to: next.name().to_string(),
            });
        }
        *self = next;
        Ok(())
    }
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
