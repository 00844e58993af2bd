//! The batch job controller.
//!
//! Owns every job for its lifetime: submission picks and fixes the execution
//! target, one spawned poll loop per job keeps the snapshot current, and the
//! UI reads snapshots and issues control requests through this one service.
//! A terminal job stays registered until the caller acknowledges it, so the
//! final summary can be shown exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use lightbox_cache::ResourceCache;
use lightbox_compute::{ComputeDispatcher, DispatchError, ExecTarget};
use lightbox_core::batch::{self, BatchScope, BatchSpec};
use lightbox_core::job::{state_machine, JobControl, JobKind, JobProgress, JobStatus};
use lightbox_core::types::JobId;

use crate::poll::{next_poll_delay, PollConfig};
use crate::target::{
    BatchBackend, ExecutionTarget, LocalTarget, LocalWorkItem, PollReport, RemoteTarget,
};

/// How long shutdown waits for each poll loop to exit.
const SHUTDOWN_JOIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the job controller.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The batch spec failed validation; no job was created.
    #[error("Invalid batch submission: {0}")]
    SubmissionInvalid(String),

    /// The chosen target refused the submission.
    #[error("Failed to submit batch: {0}")]
    SubmitFailed(String),

    /// No job is registered under this handle.
    #[error("Job {0} not found")]
    NotFound(JobId),

    /// The job's execution target does not honor this control.
    #[error("The job's execution target does not support {control}")]
    UnsupportedControl { control: &'static str },

    /// The control request is not legal from the job's current status.
    #[error("{0}")]
    InvalidTransition(String),

    /// The target accepted neither the control nor gave a transport excuse.
    #[error("Control request failed: {0}")]
    ControlFailed(String),

    /// Acknowledge was called on a job that has not reached a terminal
    /// status yet.
    #[error("Job {0} is still running; only terminal jobs can be acknowledged")]
    NotTerminal(JobId),

    /// Target selection failed (no viable execution target).
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

// ---------------------------------------------------------------------------
// Job registry entries
// ---------------------------------------------------------------------------

struct JobEntry {
    snapshot: RwLock<JobProgress>,
    target: Arc<dyn ExecutionTarget>,
    /// Stops this job's poll loop.
    poll_cancel: CancellationToken,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl JobEntry {
    /// Merge a poll report into the snapshot.
    ///
    /// Regressing counters are ignored (per-handle progress is monotonically
    /// non-decreasing), and a terminal snapshot never changes again. Returns
    /// `true` once the snapshot is terminal.
    async fn apply_report(&self, report: PollReport) -> bool {
        let mut snapshot = self.snapshot.write().await;
        if snapshot.status.is_terminal() {
            return true;
        }

        let total = if report.total > 0 {
            report.total
        } else {
            snapshot.total
        };
        if !lightbox_core::job::counters_monotonic(
            snapshot.completed,
            snapshot.failed,
            report.completed,
            report.failed,
            total,
        ) {
            tracing::warn!(
                job_id = %snapshot.id,
                prev_completed = snapshot.completed,
                prev_failed = snapshot.failed,
                completed = report.completed,
                failed = report.failed,
                "Ignoring regressing progress report",
            );
            return false;
        }

        snapshot.total = total;
        snapshot.completed = report.completed;
        snapshot.failed = report.failed;
        snapshot.current = report.current;
        snapshot.failed_items = report.failed_items;

        if report.status != snapshot.status {
            if state_machine::can_transition(snapshot.status, report.status) {
                tracing::debug!(
                    job_id = %snapshot.id,
                    from = snapshot.status.as_str(),
                    to = report.status.as_str(),
                    "Job status changed",
                );
                snapshot.status = report.status;
            } else {
                tracing::warn!(
                    job_id = %snapshot.id,
                    from = snapshot.status.as_str(),
                    to = report.status.as_str(),
                    "Ignoring invalid status transition from poll report",
                );
            }
        }

        snapshot.status.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Orchestrates batch jobs across both execution targets.
///
/// Created once per engine instance via [`JobController::new`]; the returned
/// `Arc` is cheaply cloned into the UI facade.
pub struct JobController {
    jobs: RwLock<HashMap<JobId, Arc<JobEntry>>>,
    backend: Arc<dyn BatchBackend>,
    dispatcher: Arc<ComputeDispatcher>,
    cache: Arc<ResourceCache>,
    poll_config: PollConfig,
    /// Master token; cancelled during shutdown.
    cancel: CancellationToken,
}

impl JobController {
    pub fn new(
        backend: Arc<dyn BatchBackend>,
        dispatcher: Arc<ComputeDispatcher>,
        cache: Arc<ResourceCache>,
        poll_config: PollConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            jobs: RwLock::new(HashMap::new()),
            backend,
            dispatcher,
            cache,
            poll_config,
            cancel: CancellationToken::new(),
        })
    }

    /// Submit a batch job. Validates the spec, fixes the execution target,
    /// and returns a handle immediately; never blocks for the job's
    /// duration.
    pub async fn submit(&self, spec: BatchSpec) -> Result<JobId, JobError> {
        batch::validate_spec(&spec).map_err(|e| JobError::SubmissionInvalid(e.to_string()))?;

        let target = self.select_target(&spec).await?;
        let job_id = uuid::Uuid::new_v4();

        let snapshot = JobProgress::new(job_id, spec.kind, spec.item_ids.len() as u32);
        let entry = Arc::new(JobEntry {
            snapshot: RwLock::new(snapshot),
            target,
            poll_cancel: self.cancel.child_token(),
            poll_task: Mutex::new(None),
        });

        let poll_entry = Arc::clone(&entry);
        let poll_config = self.poll_config.clone();
        let task = tokio::spawn(async move {
            run_poll_loop(poll_entry, poll_config).await;
        });
        *entry.poll_task.lock().await = Some(task);

        tracing::info!(
            job_id = %job_id,
            kind = spec.kind.as_str(),
            target = ?entry.target.kind(),
            "Batch job submitted",
        );

        self.jobs.write().await.insert(job_id, entry);
        Ok(job_id)
    }

    /// A side-effect-free snapshot of a job's progress.
    pub async fn progress(&self, job_id: JobId) -> Result<JobProgress, JobError> {
        let entry = self.entry(job_id).await?;
        let snapshot = entry.snapshot.read().await;
        Ok(snapshot.clone())
    }

    /// Request a pause. Rejected when the target cannot honor it.
    pub async fn pause(&self, job_id: JobId) -> Result<(), JobError> {
        self.control(job_id, JobControl::Pause).await
    }

    /// Request a resume. Rejected when the target cannot honor it.
    pub async fn resume(&self, job_id: JobId) -> Result<(), JobError> {
        self.control(job_id, JobControl::Resume).await
    }

    /// Request cancellation. For a remote job this is best-effort: the local
    /// state moves to `cancelled` once the server accepts the request. For a
    /// local job the work loop has stopped by the time this returns.
    pub async fn cancel(&self, job_id: JobId) -> Result<(), JobError> {
        self.control(job_id, JobControl::Cancel).await
    }

    /// Acknowledge a terminal job and release its handle.
    ///
    /// Returns the final snapshot. Erring on a non-terminal job keeps the
    /// "terminal but unseen" state visible to the UI.
    pub async fn acknowledge(&self, job_id: JobId) -> Result<JobProgress, JobError> {
        let entry = self.entry(job_id).await?;
        let final_snapshot = {
            let snapshot = entry.snapshot.read().await;
            if !snapshot.status.is_terminal() {
                return Err(JobError::NotTerminal(job_id));
            }
            snapshot.clone()
        };

        entry.poll_cancel.cancel();
        self.jobs.write().await.remove(&job_id);
        tracing::info!(job_id = %job_id, status = final_snapshot.status.as_str(), "Job acknowledged");
        Ok(final_snapshot)
    }

    /// Number of currently registered (unacknowledged) jobs.
    pub async fn active_jobs(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Stop all polling and drop every registered job.
    ///
    /// Local work loops are cancelled (this device is going away); jobs
    /// running on the server are left to finish there. Waits briefly for
    /// each task to exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down job controller");
        self.cancel.cancel();

        let mut jobs = self.jobs.write().await;
        for (job_id, entry) in jobs.drain() {
            let running_locally = entry.target.kind() == ExecTarget::Local
                && !entry.snapshot.read().await.status.is_terminal();
            if running_locally {
                let stop = entry.target.control(JobControl::Cancel);
                if tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, stop).await.is_err() {
                    tracing::warn!(job_id = %job_id, "Local work loop did not stop in time");
                }
            }

            if let Some(task) = entry.poll_task.lock().await.take() {
                if tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, task).await.is_err() {
                    tracing::warn!(job_id = %job_id, "Poll loop did not exit in time");
                }
            }
        }
    }

    // ---- private helpers ----

    async fn entry(&self, job_id: JobId) -> Result<Arc<JobEntry>, JobError> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or(JobError::NotFound(job_id))
    }

    /// Fix the execution target for a new job.
    ///
    /// Downloads and scope-based renders always run on the catalog server
    /// (it owns the catalog and files). An explicit selection of photos to
    /// render is hybrid-eligible: the dispatcher decides based on server
    /// capabilities and local hardware. The chosen target never changes for
    /// the job's lifetime.
    async fn select_target(
        &self,
        spec: &BatchSpec,
    ) -> Result<Arc<dyn ExecutionTarget>, JobError> {
        let hybrid_eligible = spec.kind == JobKind::Render && spec.scope == BatchScope::Selection;

        if hybrid_eligible {
            let decision = self.dispatcher.decide_target().await?;
            if decision.target == ExecTarget::Local {
                let executor = self
                    .dispatcher
                    .local_executor()
                    .await
                    .ok_or(JobError::Dispatch(DispatchError::LocalExecutorUnavailable))?;
                let items = self.local_work_items(spec);
                let target = LocalTarget::spawn(
                    items,
                    spec.output.clone(),
                    executor,
                    Arc::clone(&self.cache),
                );
                return Ok(Arc::new(target));
            }
        }

        let target = RemoteTarget::submit(Arc::clone(&self.backend), spec)
            .await
            .map_err(|e| JobError::SubmitFailed(e.to_string()))?;
        Ok(Arc::new(target))
    }

    /// Build the local work list for a selection render: source bytes come
    /// from the catalog's file endpoint (hybrid mode: data remote, compute
    /// local) and flow through the resource cache.
    fn local_work_items(&self, spec: &BatchSpec) -> Vec<LocalWorkItem> {
        spec.item_ids
            .iter()
            .map(|item| LocalWorkItem {
                item: *item,
                source: self.backend.file_url(*item),
                settings: serde_json::json!({
                    "paramsSource": spec.params_source,
                    "presetId": spec.preset_id,
                    "output": spec.output,
                }),
            })
            .collect()
    }

    async fn control(&self, job_id: JobId, control: JobControl) -> Result<(), JobError> {
        let entry = self.entry(job_id).await?;

        if !entry.target.supports(control) {
            return Err(JobError::UnsupportedControl {
                control: control.as_str(),
            });
        }

        let intended = match control {
            JobControl::Pause => JobStatus::Paused,
            JobControl::Resume => JobStatus::Processing,
            JobControl::Cancel => JobStatus::Cancelled,
        };
        {
            let snapshot = entry.snapshot.read().await;
            state_machine::validate_transition(snapshot.status, intended)
                .map_err(JobError::InvalidTransition)?;
        }

        entry
            .target
            .control(control)
            .await
            .map_err(|e| JobError::ControlFailed(e.to_string()))?;

        if control == JobControl::Cancel {
            // Optimistic: the request was accepted, so the job is cancelled
            // from the client's point of view and polling stops for good.
            let mut snapshot = entry.snapshot.write().await;
            if !snapshot.status.is_terminal() {
                snapshot.status = JobStatus::Cancelled;
                snapshot.current = None;
            }
            entry.poll_cancel.cancel();
        }
        // Pause/resume are requests, not guarantees: the snapshot changes
        // when a later poll observes the target's new status.

        tracing::info!(job_id = %job_id, control = control.as_str(), "Control request accepted");
        Ok(())
    }
}

/// Self-rescheduling progress loop for one job.
///
/// One in-flight check at a time; stops permanently once the snapshot is
/// terminal or the job's token is cancelled. A failed poll only stretches
/// the delay, never the job status.
async fn run_poll_loop(entry: Arc<JobEntry>, config: PollConfig) {
    let mut last_failed = false;

    loop {
        let delay = next_poll_delay(last_failed, &config);
        tokio::select! {
            _ = entry.poll_cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        match entry.target.poll().await {
            Ok(report) => {
                last_failed = false;
                if entry.apply_report(report).await {
                    return;
                }
            }
            Err(e) => {
                last_failed = true;
                tracing::warn!(error = %e, "Progress poll failed, backing off");
            }
        }
    }
}
