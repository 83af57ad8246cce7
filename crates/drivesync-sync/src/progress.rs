//! Cycle progress events
//!
//! Every cycle records its events in an append-only log. Subscribers pull
//! events with [`ProgressSubscription::next`], starting from the first event
//! no matter when they subscribed, and the sequence always ends with exactly
//! one terminal event: [`ProgressEvent::Completed`] or
//! [`ProgressEvent::Aborted`].

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use drivesync_core::domain::{
    ActionKind, ConflictKind, CycleId, CyclePhase, PlanStats, RelativePath, Resolution, SyncRootId,
};
use drivesync_core::ports::AuthError;

use crate::ScanError;

// ============================================================================
// Summary and abort reasons
// ============================================================================

/// An action that was skipped, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedAction {
    pub path: RelativePath,
    pub action: ActionKind,
    pub error: String,
}

/// Counters for one finished (or cancelled) cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleSummary {
    /// New files created on the remote
    pub uploaded: usize,
    /// New files created locally
    pub downloaded: usize,
    /// Existing files overwritten on either side
    pub updated: usize,
    pub deleted_local: usize,
    pub deleted_remote: usize,
    pub dirs_created: usize,
    /// Conflict losers moved aside
    pub renamed: usize,
    pub unchanged: usize,
    pub conflicts: usize,
    pub skipped: Vec<SkippedAction>,
    pub warnings: Vec<String>,
    pub duration_ms: u64,
}

impl CycleSummary {
    /// Number of actions that changed either side
    pub fn transfers(&self) -> usize {
        self.uploaded
            + self.downloaded
            + self.updated
            + self.deleted_local
            + self.deleted_remote
            + self.dirs_created
            + self.renamed
    }
}

/// Why a cycle ended without completing
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AbortReason {
    /// Another cycle holds the root
    #[error("A sync cycle is already running for root {0}")]
    AlreadyRunning(SyncRootId),

    /// The root is not registered with the orchestrator
    #[error("Unknown sync root {0}")]
    UnknownRoot(SyncRootId),

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Scan failed: {0}")]
    Scan(ScanError),

    /// Cancelled; `summary` covers what was done before stopping
    #[error("Cycle cancelled")]
    Cancelled { summary: CycleSummary },

    /// The cycle task failed unexpectedly
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ScanError> for AbortReason {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::Auth(auth) => Self::Auth(auth),
            other => Self::Scan(other),
        }
    }
}

// ============================================================================
// ProgressEvent
// ============================================================================

/// One observable step of a cycle
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    PhaseChanged {
        phase: CyclePhase,
    },
    /// Something the user should know about that did not stop the cycle
    Warning {
        message: String,
    },
    ScanCompleted {
        local_items: usize,
        remote_items: usize,
    },
    PlanReady {
        stats: PlanStats,
    },
    ConflictResolved {
        path: RelativePath,
        kind: ConflictKind,
        resolution: Resolution,
        renamed_to: Option<RelativePath>,
    },
    ActionStarted {
        path: RelativePath,
        action: ActionKind,
    },
    ActionCompleted {
        path: RelativePath,
        action: ActionKind,
        completed: usize,
        total: usize,
        percent: u8,
    },
    ActionSkipped {
        path: RelativePath,
        action: ActionKind,
        error: String,
    },
    Completed {
        summary: CycleSummary,
    },
    Aborted {
        reason: AbortReason,
    },
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Aborted { .. })
    }
}

/// Integer percentage of `completed` out of `total`; 100 for an empty plan
pub fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((completed.min(total) * 100) / total) as u8
}

// ============================================================================
// Event log and subscriptions
// ============================================================================

/// Append-only event log shared by a cycle and its subscribers
#[derive(Debug)]
pub(crate) struct ProgressLog {
    events: Mutex<Vec<ProgressEvent>>,
    len_tx: watch::Sender<usize>,
}

impl ProgressLog {
    pub(crate) fn new() -> Arc<Self> {
        let (len_tx, _) = watch::channel(0);
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            len_tx,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ProgressEvent>> {
        // Only pushes and clones happen under the lock, so a poisoned log is
        // still consistent
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends an event; anything after the terminal event is dropped
    pub(crate) fn push(&self, event: ProgressEvent) {
        let len = {
            let mut events = self.lock();
            if events.last().is_some_and(ProgressEvent::is_terminal) {
                return;
            }
            events.push(event);
            events.len()
        };
        self.len_tx.send_replace(len);
    }

    fn get(&self, index: usize) -> Option<ProgressEvent> {
        self.lock().get(index).cloned()
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.lock().last().is_some_and(ProgressEvent::is_terminal)
    }

    pub(crate) fn subscribe(self: &Arc<Self>) -> ProgressSubscription {
        ProgressSubscription {
            log: Arc::clone(self),
            len_rx: self.len_tx.subscribe(),
            cursor: 0,
            finished: false,
        }
    }
}

/// Pull-based view of one cycle's events
///
/// ```ignore
/// let mut events = orchestrator.subscribe_progress(&handle);
/// while let Some(event) = events.next().await {
///     println!("{event:?}");
/// }
/// ```
#[derive(Debug)]
pub struct ProgressSubscription {
    log: Arc<ProgressLog>,
    len_rx: watch::Receiver<usize>,
    cursor: usize,
    finished: bool,
}

impl ProgressSubscription {
    /// The next event, waiting for it if needed; `None` after the terminal event
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        loop {
            if self.finished {
                return None;
            }

            if let Some(event) = self.log.get(self.cursor) {
                self.cursor += 1;
                self.finished = event.is_terminal();
                return Some(event);
            }

            if self.len_rx.changed().await.is_err() {
                // Log dropped; drain what is left, then stop
                let event = self.log.get(self.cursor);
                self.finished = true;
                if event.is_some() {
                    self.cursor += 1;
                }
                return event;
            }
        }
    }

    /// Drains the remaining events, returning the terminal one
    pub async fn wait(mut self) -> Option<ProgressEvent> {
        let mut last = None;
        while let Some(event) = self.next().await {
            last = Some(event);
        }
        last.filter(ProgressEvent::is_terminal)
    }
}

// ============================================================================
// CycleHandle
// ============================================================================

/// Handle to a running (or finished) cycle
#[derive(Debug, Clone)]
pub struct CycleHandle {
    id: CycleId,
    root: SyncRootId,
    cancel: CancellationToken,
    log: Arc<ProgressLog>,
}

impl CycleHandle {
    pub(crate) fn new(root: SyncRootId, log: Arc<ProgressLog>) -> Self {
        Self {
            id: CycleId::new(),
            root,
            cancel: CancellationToken::new(),
            log,
        }
    }

    pub fn id(&self) -> CycleId {
        self.id
    }

    pub fn root(&self) -> &SyncRootId {
        &self.root
    }

    /// True once the terminal event was emitted
    pub fn is_finished(&self) -> bool {
        self.log.is_finished()
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn log(&self) -> &Arc<ProgressLog> {
        &self.log
    }
}
