//! Batch job vocabulary: kinds, statuses, controls, progress snapshots, and
//! the status state machine.
//!
//! This module lives in `core` (zero internal deps) so it can be used by both
//! the job controller and the catalog wire layer without either depending on
//! the other.

use serde::{Deserialize, Serialize};

use crate::types::{ItemId, JobId};

// ---------------------------------------------------------------------------
// Job kind
// ---------------------------------------------------------------------------

/// What a batch job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Render processed output images for each photo in scope.
    Render,
    /// Download original files for each photo in scope.
    Download,
}

impl JobKind {
    /// Wire name used in catalog batch endpoints (`/batch/{kind}`).
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Render => "render",
            JobKind::Download => "download",
        }
    }
}

// ---------------------------------------------------------------------------
// Job status
// ---------------------------------------------------------------------------

/// Lifecycle status of a batch job.
///
/// `Completed`, `Failed`, and `Cancelled` are terminal: once observed, no
/// further polling or local-loop activity occurs for the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Whether this status permits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Human-readable name (matches the wire spelling).
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

// ---------------------------------------------------------------------------
// Job control
// ---------------------------------------------------------------------------

/// A control request the UI can issue against a running job.
///
/// Each is a request, not a guarantee: the execution target may not support
/// it (queried via the target's capability, never silently ignored).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobControl {
    Pause,
    Resume,
    Cancel,
}

impl JobControl {
    /// Wire name used in catalog batch control endpoints
    /// (`POST /batch/{id}/{control}`).
    pub fn as_str(self) -> &'static str {
        match self {
            JobControl::Pause => "pause",
            JobControl::Resume => "resume",
            JobControl::Cancel => "cancel",
        }
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

pub mod state_machine {
    use super::JobStatus;

    /// Returns the set of valid target statuses reachable from `from`.
    ///
    /// Terminal states return an empty slice because no further transitions
    /// are allowed.
    pub fn valid_transitions(from: JobStatus) -> &'static [JobStatus] {
        match from {
            JobStatus::Processing => &[
                JobStatus::Paused,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ],
            JobStatus::Paused => &[JobStatus::Processing, JobStatus::Cancelled],
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => &[],
        }
    }

    /// Check whether a transition from `from` to `to` is valid.
    pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
        valid_transitions(from).contains(&to)
    }

    /// Validate a state transition, returning an error message for invalid ones.
    pub fn validate_transition(from: JobStatus, to: JobStatus) -> Result<(), String> {
        if can_transition(from, to) {
            Ok(())
        } else {
            Err(format!(
                "Invalid transition: {} -> {}",
                from.as_str(),
                to.as_str()
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Progress snapshots
// ---------------------------------------------------------------------------

/// An item that failed during batch execution, with its error reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub item: ItemId,
    pub error: String,
}

/// A point-in-time snapshot of a batch job's progress.
///
/// Snapshots are the only view of a job the UI layer gets; the job itself is
/// owned by the controller. Invariant: `completed + failed <= total`, and
/// `completed + failed` never decreases across successive snapshots of the
/// same job.
#[derive(Debug, Clone, Serialize)]
pub struct JobProgress {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    /// The item currently being worked on, if any.
    pub current: Option<ItemId>,
    /// Items that failed so far, each with a human-readable reason.
    pub failed_items: Vec<FailedItem>,
}

impl JobProgress {
    /// A fresh snapshot for a newly submitted job of `total` items.
    pub fn new(id: JobId, kind: JobKind, total: u32) -> Self {
        Self {
            id,
            kind,
            status: JobStatus::Processing,
            total,
            completed: 0,
            failed: 0,
            current: None,
            failed_items: Vec::new(),
        }
    }

    /// Number of items not yet settled (neither completed nor failed).
    pub fn pending_items(&self) -> u32 {
        self.total.saturating_sub(self.completed + self.failed)
    }

    /// Number of items that have reached a settled state.
    pub fn settled_items(&self) -> u32 {
        self.completed + self.failed
    }

    /// Displayable progress percentage for this snapshot.
    pub fn percent(&self) -> u8 {
        progress_percent(self.completed, self.failed, self.total)
    }
}

/// Displayable progress percentage, rounded to the nearest integer.
///
/// Counts both completed and failed items as settled work: a job with
/// `total=10, completed=7, failed=2` displays 90%. Returns 0 for an empty
/// total rather than dividing by zero.
pub fn progress_percent(completed: u32, failed: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (f64::from(completed + failed) / f64::from(total)) * 100.0;
    pct.round().min(100.0) as u8
}

/// Whether a newly observed pair of counters is a legal successor of the
/// previous one (settled work never goes backwards, bounds hold).
pub fn counters_monotonic(
    prev_completed: u32,
    prev_failed: u32,
    completed: u32,
    failed: u32,
    total: u32,
) -> bool {
    completed + failed >= prev_completed + prev_failed && completed + failed <= total
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
