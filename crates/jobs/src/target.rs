//! Execution targets for batch jobs.
//!
//! A job's target is fixed at submission and never migrates. Both targets
//! answer the same poll/control contract; what differs is where the work
//! happens and which controls the target honors. Control support is a
//! queried capability ([`ExecutionTarget::supports`]), never an implicit
//! branch on execution mode.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use lightbox_cache::ResourceCache;
use lightbox_catalog::wire::{BatchProgressResponse, BatchRequest, SubmitBatchResponse};
use lightbox_catalog::{CatalogApiError, CatalogClient};
use lightbox_compute::{ExecTarget, LocalExecutor, Operation, ProcessParams};
use lightbox_core::batch::{BatchSpec, OutputConfig};
use lightbox_core::job::{FailedItem, JobControl, JobKind, JobStatus};
use lightbox_core::types::ItemId;

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// A target's answer to a progress check.
#[derive(Debug, Clone)]
pub struct PollReport {
    pub status: JobStatus,
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub current: Option<ItemId>,
    pub failed_items: Vec<FailedItem>,
}

impl From<BatchProgressResponse> for PollReport {
    fn from(resp: BatchProgressResponse) -> Self {
        Self {
            status: resp.status,
            total: resp.total,
            completed: resp.completed,
            failed: resp.failed,
            current: resp.current,
            failed_items: resp
                .failed_items
                .into_iter()
                .map(|f| FailedItem {
                    item: f.item_ref,
                    error: f.error,
                })
                .collect(),
        }
    }
}

/// Errors from an execution target.
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    /// The request never reached the target (network, IO). Poll loops back
    /// off on this and try again.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The target received the request and refused it.
    #[error("Target rejected request: {0}")]
    Rejected(String),
}

fn map_api_error(e: CatalogApiError) -> TargetError {
    match e {
        CatalogApiError::Request(inner) => TargetError::Transport(inner.to_string()),
        other => TargetError::Rejected(other.to_string()),
    }
}

/// Where a job's items actually execute.
#[async_trait]
pub trait ExecutionTarget: Send + Sync {
    /// Which side of the hybrid split this target is.
    fn kind(&self) -> ExecTarget;

    /// Whether this target honors a control request.
    fn supports(&self, control: JobControl) -> bool;

    /// Snapshot the target's progress.
    async fn poll(&self) -> Result<PollReport, TargetError>;

    /// Forward a control request. Callers check [`supports`](Self::supports)
    /// first; an unsupported control still returns `Rejected` rather than
    /// silently succeeding.
    async fn control(&self, control: JobControl) -> Result<(), TargetError>;
}

// ---------------------------------------------------------------------------
// Remote target
// ---------------------------------------------------------------------------

/// The catalog server's batch endpoints, as the job layer sees them.
/// Implemented by [`CatalogClient`]; tests substitute scripted backends.
#[async_trait]
pub trait BatchBackend: Send + Sync {
    /// URL of an item's original file on the server's file endpoint.
    fn file_url(&self, item: ItemId) -> String;

    async fn submit_batch(
        &self,
        kind: JobKind,
        request: &BatchRequest,
    ) -> Result<SubmitBatchResponse, CatalogApiError>;

    async fn batch_progress(&self, job_id: &str)
        -> Result<BatchProgressResponse, CatalogApiError>;

    async fn batch_control(
        &self,
        job_id: &str,
        control: JobControl,
    ) -> Result<(), CatalogApiError>;
}

#[async_trait]
impl BatchBackend for CatalogClient {
    fn file_url(&self, item: ItemId) -> String {
        format!("{}/files/{item}", self.base_url().trim_end_matches('/'))
    }

    async fn submit_batch(
        &self,
        kind: JobKind,
        request: &BatchRequest,
    ) -> Result<SubmitBatchResponse, CatalogApiError> {
        CatalogClient::submit_batch(self, kind, request).await
    }

    async fn batch_progress(
        &self,
        job_id: &str,
    ) -> Result<BatchProgressResponse, CatalogApiError> {
        CatalogClient::batch_progress(self, job_id).await
    }

    async fn batch_control(
        &self,
        job_id: &str,
        control: JobControl,
    ) -> Result<(), CatalogApiError> {
        CatalogClient::batch_control(self, job_id, control).await
    }
}

/// A batch job executing on the catalog server, observed via polling.
pub struct RemoteTarget {
    backend: Arc<dyn BatchBackend>,
    server_job_id: String,
}

impl RemoteTarget {
    /// Submit the batch to the server. Construction is submission: a
    /// `RemoteTarget` only exists once the server has assigned a job ID.
    pub async fn submit(
        backend: Arc<dyn BatchBackend>,
        spec: &BatchSpec,
    ) -> Result<Self, TargetError> {
        let request = BatchRequest::from(spec);
        let response = backend
            .submit_batch(spec.kind, &request)
            .await
            .map_err(map_api_error)?;
        Ok(Self {
            backend,
            server_job_id: response.job_id,
        })
    }

    /// Server-assigned identifier for this job.
    pub fn server_job_id(&self) -> &str {
        &self.server_job_id
    }
}

#[async_trait]
impl ExecutionTarget for RemoteTarget {
    fn kind(&self) -> ExecTarget {
        ExecTarget::Remote
    }

    fn supports(&self, _control: JobControl) -> bool {
        true
    }

    async fn poll(&self) -> Result<PollReport, TargetError> {
        let response = self
            .backend
            .batch_progress(&self.server_job_id)
            .await
            .map_err(map_api_error)?;
        Ok(response.into())
    }

    /// Forward the control to the server. Cancellation is best-effort: the
    /// controller moves the job to `cancelled` once the server accepts the
    /// request, independent of whether server-side work has stopped yet.
    async fn control(&self, control: JobControl) -> Result<(), TargetError> {
        self.backend
            .batch_control(&self.server_job_id, control)
            .await
            .map_err(map_api_error)
    }
}

// ---------------------------------------------------------------------------
// Local target
// ---------------------------------------------------------------------------

/// One unit of work for the local loop.
#[derive(Debug, Clone)]
pub struct LocalWorkItem {
    pub item: ItemId,
    /// Locator of the source bytes, resolved through the resource cache.
    pub source: String,
    /// Opaque edit parameters handed to the executor.
    pub settings: serde_json::Value,
}

/// A batch job executing on this device's hardware.
///
/// Items run sequentially on one spawned task; progress lives in an
/// in-memory report polled through the same contract as a remote job.
/// Supports cancel but not pause/resume.
pub struct LocalTarget {
    state: Arc<Mutex<PollReport>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LocalTarget {
    /// Start the work loop for `items` and return the target handle.
    pub fn spawn(
        items: Vec<LocalWorkItem>,
        output: OutputConfig,
        executor: Arc<dyn LocalExecutor>,
        cache: Arc<ResourceCache>,
    ) -> Self {
        let state = Arc::new(Mutex::new(PollReport {
            status: JobStatus::Processing,
            total: items.len() as u32,
            completed: 0,
            failed: 0,
            current: None,
            failed_items: Vec::new(),
        }));
        let cancel = CancellationToken::new();

        let loop_state = Arc::clone(&state);
        let loop_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            run_local_loop(items, output, executor, cache, loop_state, loop_cancel).await;
        });

        Self {
            state,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }
}

#[async_trait]
impl ExecutionTarget for LocalTarget {
    fn kind(&self) -> ExecTarget {
        ExecTarget::Local
    }

    fn supports(&self, control: JobControl) -> bool {
        matches!(control, JobControl::Cancel)
    }

    async fn poll(&self) -> Result<PollReport, TargetError> {
        Ok(self.state.lock().await.clone())
    }

    async fn control(&self, control: JobControl) -> Result<(), TargetError> {
        match control {
            JobControl::Cancel => {
                self.cancel.cancel();
                // The loop finishes its current item, then observes the
                // token. Joining here guarantees the work has stopped
                // before the cancel request returns.
                if let Some(task) = self.task.lock().await.take() {
                    if let Err(e) = task.await {
                        tracing::error!(error = %e, "Local work loop panicked during cancel");
                    }
                }
                Ok(())
            }
            JobControl::Pause | JobControl::Resume => Err(TargetError::Rejected(format!(
                "local execution does not support {}",
                control.as_str()
            ))),
        }
    }
}

/// Sequential work loop: resolve source bytes, run the executor, write the
/// output. Item failures are recorded and the loop moves on; only the
/// job-level status reflects the outcome.
async fn run_local_loop(
    items: Vec<LocalWorkItem>,
    output: OutputConfig,
    executor: Arc<dyn LocalExecutor>,
    cache: Arc<ResourceCache>,
    state: Arc<Mutex<PollReport>>,
    cancel: CancellationToken,
) {
    if let Err(e) = tokio::fs::create_dir_all(&output.destination).await {
        tracing::error!(
            destination = %output.destination,
            error = %e,
            "Cannot create batch output directory",
        );
        let mut report = state.lock().await;
        report.status = JobStatus::Failed;
        return;
    }

    for work in items {
        if cancel.is_cancelled() {
            let mut report = state.lock().await;
            report.status = JobStatus::Cancelled;
            report.current = None;
            return;
        }

        {
            let mut report = state.lock().await;
            report.current = Some(work.item);
        }

        match process_item(&work, &output, executor.as_ref(), &cache).await {
            Ok(()) => {
                let mut report = state.lock().await;
                report.completed += 1;
            }
            Err(reason) => {
                tracing::warn!(item = work.item, error = %reason, "Batch item failed");
                let mut report = state.lock().await;
                report.failed += 1;
                report.failed_items.push(FailedItem {
                    item: work.item,
                    error: reason,
                });
            }
        }
    }

    // Partial item failures still complete the job; the failed list rides
    // along in the final snapshot.
    let mut report = state.lock().await;
    report.current = None;
    report.status = JobStatus::Completed;
    tracing::info!(
        completed = report.completed,
        failed = report.failed,
        "Local batch finished",
    );
}

async fn process_item(
    work: &LocalWorkItem,
    output: &OutputConfig,
    executor: &dyn LocalExecutor,
    cache: &ResourceCache,
) -> Result<(), String> {
    let source = cache
        .resolve(&work.source)
        .await
        .map_err(|e| e.to_string())?;

    let params = ProcessParams {
        item: work.item,
        source: work.source.clone(),
        settings: work.settings.clone(),
    };
    let rendered = executor
        .execute(Operation::Render, &params, &source)
        .await
        .map_err(|e| e.to_string())?;

    let path = format!(
        "{}/{}.{}",
        output.destination.trim_end_matches('/'),
        work.item,
        output.format.extension()
    );
    tokio::fs::write(&path, &rendered)
        .await
        .map_err(|e| format!("failed to write '{path}': {e}"))?;

    Ok(())
}
