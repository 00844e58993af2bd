//! End-to-end job lifecycle tests against scripted targets.
//!
//! The catalog server is simulated by an in-memory [`BatchBackend`] whose
//! jobs advance one item per progress poll; local execution runs against a
//! gated executor so tests control exactly when items finish.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};

use lightbox_cache::{CacheConfig, FetchError, RemoteFetcher, ResourceCache};
use lightbox_catalog::wire::{
    BatchProgressResponse, BatchRequest, DiscoverResponse, SubmitBatchResponse,
};
use lightbox_catalog::CatalogApiError;
use lightbox_compute::{
    CapabilityProbe, CapabilityRegistry, ComputeDispatcher, LocalExecuteError, LocalExecutor,
    Operation, ProcessParams, RemoteProcessor,
};
use lightbox_core::batch::{BatchScope, BatchSpec, OutputConfig, OutputFormat, ParamsSource};
use lightbox_core::job::{JobControl, JobKind, JobStatus};
use lightbox_core::types::ItemId;
use lightbox_jobs::{BatchBackend, JobController, JobError, PollConfig};

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ServerJob {
    status: JobStatus,
    total: u32,
    completed: u32,
}

/// In-memory catalog server: one job at a time, advancing one item per
/// progress poll while `processing`.
struct MockBackend {
    job: Mutex<Option<ServerJob>>,
    progress_calls: AtomicUsize,
    /// Next N progress polls fail with a transport error.
    fail_next_polls: AtomicUsize,
    controls: Mutex<Vec<JobControl>>,
}

impl MockBackend {
    fn new(total: u32) -> Arc<Self> {
        Arc::new(Self {
            job: Mutex::new(Some(ServerJob {
                status: JobStatus::Processing,
                total,
                completed: 0,
            })),
            progress_calls: AtomicUsize::new(0),
            fail_next_polls: AtomicUsize::new(0),
            controls: Mutex::new(Vec::new()),
        })
    }

    fn progress_calls(&self) -> usize {
        self.progress_calls.load(Ordering::SeqCst)
    }

    async fn recorded_controls(&self) -> Vec<JobControl> {
        self.controls.lock().await.clone()
    }
}

#[async_trait]
impl BatchBackend for MockBackend {
    fn file_url(&self, item: ItemId) -> String {
        format!("https://files.test/{item}")
    }

    async fn submit_batch(
        &self,
        _kind: JobKind,
        _request: &BatchRequest,
    ) -> Result<SubmitBatchResponse, CatalogApiError> {
        Ok(SubmitBatchResponse {
            job_id: "srv-1".to_string(),
        })
    }

    async fn batch_progress(
        &self,
        _job_id: &str,
    ) -> Result<BatchProgressResponse, CatalogApiError> {
        self.progress_calls.fetch_add(1, Ordering::SeqCst);

        if self
            .fail_next_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(CatalogApiError::ApiError {
                status: 502,
                body: "connection reset".to_string(),
            });
        }

        let mut guard = self.job.lock().await;
        let job = guard.as_mut().expect("job submitted");

        if job.status == JobStatus::Processing && job.completed < job.total {
            job.completed += 1;
            if job.completed == job.total {
                job.status = JobStatus::Completed;
            }
        }

        Ok(BatchProgressResponse {
            status: job.status,
            total: job.total,
            completed: job.completed,
            failed: 0,
            current: if job.status == JobStatus::Processing {
                Some(i64::from(job.completed) + 1)
            } else {
                None
            },
            failed_items: Vec::new(),
        })
    }

    async fn batch_control(
        &self,
        _job_id: &str,
        control: JobControl,
    ) -> Result<(), CatalogApiError> {
        self.controls.lock().await.push(control);
        let mut guard = self.job.lock().await;
        let job = guard.as_mut().expect("job submitted");
        match control {
            JobControl::Pause => job.status = JobStatus::Paused,
            JobControl::Resume => job.status = JobStatus::Processing,
            JobControl::Cancel => job.status = JobStatus::Cancelled,
        }
        Ok(())
    }
}

struct FixedProbe {
    compute: bool,
}

#[async_trait]
impl CapabilityProbe for FixedProbe {
    async fn probe(&self) -> Result<DiscoverResponse, CatalogApiError> {
        Ok(DiscoverResponse {
            execution_mode: Some(if self.compute {
                "standalone".to_string()
            } else {
                "data-only".to_string()
            }),
            ..DiscoverResponse::default()
        })
    }
}

struct UnusedRemote;

#[async_trait]
impl RemoteProcessor for UnusedRemote {
    async fn process(
        &self,
        _op: Operation,
        _params: &serde_json::Value,
    ) -> Result<Vec<u8>, CatalogApiError> {
        Err(CatalogApiError::ApiError {
            status: 500,
            body: "not under test".to_string(),
        })
    }
}

struct EchoFetcher;

#[async_trait]
impl RemoteFetcher for EchoFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        Ok(url.as_bytes().to_vec())
    }
}

/// Executor that records which items started and waits for a per-call
/// release, so tests decide when each item finishes. Releases are permits,
/// so one issued early is never lost.
struct GatedExecutor {
    started: AtomicUsize,
    finished: AtomicUsize,
    gate: Semaphore,
    gated: bool,
}

impl GatedExecutor {
    fn instant() -> Arc<Self> {
        Arc::new(Self {
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            gate: Semaphore::new(0),
            gated: false,
        })
    }

    fn gated() -> Arc<Self> {
        Arc::new(Self {
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            gate: Semaphore::new(0),
            gated: true,
        })
    }

    fn release_one(&self) {
        self.gate.add_permits(1);
    }

    async fn wait_for_start(&self, n: usize) {
        while self.started.load(Ordering::SeqCst) < n {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl LocalExecutor for GatedExecutor {
    fn name(&self) -> &str {
        "gated-test"
    }

    async fn execute(
        &self,
        _op: Operation,
        params: &ProcessParams,
        source: &[u8],
    ) -> Result<Vec<u8>, LocalExecuteError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if self.gated {
            self.gate.acquire().await.expect("gate never closed").forget();
        }
        self.finished.fetch_add(1, Ordering::SeqCst);
        let mut out = format!("rendered:{}:", params.item).into_bytes();
        out.extend_from_slice(source);
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Setup helpers
// ---------------------------------------------------------------------------

async fn controller_with(
    backend: Arc<MockBackend>,
    server_can_compute: bool,
    executor: Option<Arc<GatedExecutor>>,
) -> Arc<JobController> {
    let registry = Arc::new(CapabilityRegistry::new(
        Arc::new(FixedProbe {
            compute: server_can_compute,
        }),
        Duration::from_secs(60),
    ));
    let cache = Arc::new(ResourceCache::new(
        CacheConfig::default(),
        None,
        Arc::new(EchoFetcher),
    ));
    let dispatcher = Arc::new(ComputeDispatcher::new(
        registry,
        Arc::new(UnusedRemote),
        Arc::clone(&cache),
    ));
    if let Some(executor) = executor {
        dispatcher.register_local_executor(executor).await;
    }
    JobController::new(backend, dispatcher, cache, PollConfig::default())
}

fn render_selection(item_ids: Vec<ItemId>, destination: &str) -> BatchSpec {
    BatchSpec {
        kind: JobKind::Render,
        scope: BatchScope::Selection,
        item_ids,
        roll_id: None,
        params_source: ParamsSource::Photo,
        preset_id: None,
        output: OutputConfig {
            format: OutputFormat::Jpeg,
            quality: 90,
            max_dimension: None,
            destination: destination.to_string(),
        },
    }
}

async fn wait_for_status(
    controller: &JobController,
    job_id: lightbox_core::types::JobId,
    status: JobStatus,
) {
    loop {
        let snapshot = controller.progress(job_id).await.expect("job registered");
        if snapshot.status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

// ---------------------------------------------------------------------------
// Remote lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn remote_job_runs_to_completion_and_is_acknowledged() {
    let backend = MockBackend::new(3);
    let controller = controller_with(Arc::clone(&backend), true, None).await;

    let job_id = controller
        .submit(render_selection(vec![1, 2, 3], "/exports"))
        .await
        .unwrap();

    wait_for_status(&controller, job_id, JobStatus::Completed).await;

    let snapshot = controller.progress(job_id).await.unwrap();
    assert_eq!(snapshot.total, 3);
    assert_eq!(snapshot.completed, 3);
    assert_eq!(snapshot.failed, 0);

    let final_snapshot = controller.acknowledge(job_id).await.unwrap();
    assert_eq!(final_snapshot.status, JobStatus::Completed);
    assert_eq!(controller.active_jobs().await, 0);

    // The handle is gone after acknowledgment.
    assert_matches!(
        controller.progress(job_id).await,
        Err(JobError::NotFound(_))
    );
}

#[tokio::test(start_paused = true)]
async fn progress_is_monotonic_and_polling_stops_when_terminal() {
    let backend = MockBackend::new(5);
    let controller = controller_with(Arc::clone(&backend), true, None).await;

    let job_id = controller
        .submit(render_selection(vec![1, 2, 3, 4, 5], "/exports"))
        .await
        .unwrap();

    let mut last_settled = 0u32;
    loop {
        let snapshot = controller.progress(job_id).await.unwrap();
        assert!(snapshot.settled_items() >= last_settled);
        last_settled = snapshot.settled_items();
        if snapshot.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let calls_at_terminal = backend.progress_calls();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(backend.progress_calls(), calls_at_terminal);
}

#[tokio::test(start_paused = true)]
async fn transport_errors_back_off_without_failing_the_job() {
    let backend = MockBackend::new(2);
    backend.fail_next_polls.store(3, Ordering::SeqCst);
    let controller = controller_with(Arc::clone(&backend), true, None).await;

    let job_id = controller
        .submit(render_selection(vec![1, 2], "/exports"))
        .await
        .unwrap();

    wait_for_status(&controller, job_id, JobStatus::Completed).await;

    let snapshot = controller.progress(job_id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.completed, 2);
}

#[tokio::test(start_paused = true)]
async fn remote_pause_and_resume_round_trip() {
    let backend = MockBackend::new(50);
    let controller = controller_with(Arc::clone(&backend), true, None).await;

    let job_id = controller
        .submit(render_selection((1..=50).collect(), "/exports"))
        .await
        .unwrap();

    // Let at least one poll land so the job is visibly processing.
    wait_for_status(&controller, job_id, JobStatus::Processing).await;
    controller.pause(job_id).await.unwrap();
    wait_for_status(&controller, job_id, JobStatus::Paused).await;

    // Paused server jobs stop advancing.
    let settled = controller.progress(job_id).await.unwrap().settled_items();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(
        controller.progress(job_id).await.unwrap().settled_items(),
        settled
    );

    controller.resume(job_id).await.unwrap();
    wait_for_status(&controller, job_id, JobStatus::Completed).await;

    assert_eq!(
        backend.recorded_controls().await,
        vec![JobControl::Pause, JobControl::Resume]
    );
}

#[tokio::test(start_paused = true)]
async fn remote_cancel_is_optimistic_and_stops_polling() {
    let backend = MockBackend::new(100);
    let controller = controller_with(Arc::clone(&backend), true, None).await;

    let job_id = controller
        .submit(render_selection((1..=100).collect(), "/exports"))
        .await
        .unwrap();

    wait_for_status(&controller, job_id, JobStatus::Processing).await;
    controller.cancel(job_id).await.unwrap();

    // Status flips immediately on request acceptance.
    let snapshot = controller.progress(job_id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Cancelled);

    let calls = backend.progress_calls();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(backend.progress_calls(), calls);

    assert_eq!(backend.recorded_controls().await, vec![JobControl::Cancel]);
}

// ---------------------------------------------------------------------------
// Local lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn local_job_renders_and_writes_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().to_str().unwrap().to_string();

    let backend = MockBackend::new(0);
    let executor = GatedExecutor::instant();
    let controller = controller_with(backend, false, Some(Arc::clone(&executor))).await;

    let job_id = controller
        .submit(render_selection(vec![7, 8], &dest))
        .await
        .unwrap();

    wait_for_status(&controller, job_id, JobStatus::Completed).await;

    let snapshot = controller.progress(job_id).await.unwrap();
    assert_eq!(snapshot.completed, 2);
    assert_eq!(snapshot.failed, 0);
    assert_eq!(executor.finished.load(Ordering::SeqCst), 2);

    let out = tokio::fs::read(format!("{dest}/7.jpg")).await.unwrap();
    assert!(out.starts_with(b"rendered:7:"));
    assert!(tokio::fs::metadata(format!("{dest}/8.jpg")).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn local_pause_is_rejected_as_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().to_str().unwrap().to_string();

    let backend = MockBackend::new(0);
    let executor = GatedExecutor::gated();
    let controller = controller_with(backend, false, Some(Arc::clone(&executor))).await;

    let job_id = controller
        .submit(render_selection(vec![1, 2], &dest))
        .await
        .unwrap();
    executor.wait_for_start(1).await;

    let err = controller.pause(job_id).await.unwrap_err();
    assert_matches!(err, JobError::UnsupportedControl { control: "pause" });

    // Status is untouched by the rejected request.
    let snapshot = controller.progress(job_id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Processing);

    // Drain the job so its task finishes before the test ends.
    executor.release_one();
    executor.release_one();
    wait_for_status(&controller, job_id, JobStatus::Completed).await;
}

#[tokio::test(start_paused = true)]
async fn local_cancel_stops_the_work_loop() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().to_str().unwrap().to_string();

    let backend = MockBackend::new(0);
    let executor = GatedExecutor::gated();
    let controller = controller_with(backend, false, Some(Arc::clone(&executor))).await;

    let job_id = controller
        .submit(render_selection(vec![1, 2, 3], &dest))
        .await
        .unwrap();
    executor.wait_for_start(1).await;

    // Cancel joins the loop, which needs the in-flight item to finish. The
    // releasing task only fires once the runtime is idle (paused clock), so
    // the cancel token is guaranteed set before item 1 completes.
    let release_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        release_executor.release_one();
    });
    controller.cancel(job_id).await.unwrap();

    let snapshot = controller.progress(job_id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Cancelled);

    // No further item ever starts.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(executor.started.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Submission validation and handles
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_spec_never_creates_a_job() {
    let backend = MockBackend::new(0);
    let controller = controller_with(backend, true, None).await;

    let err = controller
        .submit(render_selection(vec![], "/exports"))
        .await
        .unwrap_err();
    assert_matches!(err, JobError::SubmissionInvalid(_));
    assert_eq!(controller.active_jobs().await, 0);
}

#[tokio::test]
async fn unknown_handle_is_not_found() {
    let backend = MockBackend::new(0);
    let controller = controller_with(backend, true, None).await;

    let missing = uuid::Uuid::new_v4();
    assert_matches!(
        controller.progress(missing).await,
        Err(JobError::NotFound(_))
    );
    assert_matches!(controller.cancel(missing).await, Err(JobError::NotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn acknowledging_a_running_job_is_rejected() {
    let backend = MockBackend::new(50);
    let controller = controller_with(backend, true, None).await;

    let job_id = controller
        .submit(render_selection((1..=50).collect(), "/exports"))
        .await
        .unwrap();

    wait_for_status(&controller, job_id, JobStatus::Processing).await;
    assert_matches!(
        controller.acknowledge(job_id).await,
        Err(JobError::NotTerminal(_))
    );
    assert_eq!(controller.active_jobs().await, 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_all_polling() {
    let backend = MockBackend::new(1000);
    let controller = controller_with(Arc::clone(&backend), true, None).await;

    controller
        .submit(render_selection((1..=1000).collect(), "/exports"))
        .await
        .unwrap();

    controller.shutdown().await;
    let calls = backend.progress_calls();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(backend.progress_calls(), calls);
    assert_eq!(controller.active_jobs().await, 0);
}
