//! The engine facade embedded by the UI shells.
//!
//! Wires the catalog client, capability registry, resource cache, compute
//! dispatcher, and job controller into one constructible service. The
//! desktop, mobile, and wrist shells each build one [`Engine`] per
//! configured server connection and call the operations below; everything
//! UI-visible is a snapshot or a request, never shared mutable state.

pub mod config;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use lightbox_cache::{
    CacheStats, HttpFetcher, ResolveError, ResourceCache, TokioFileReader,
};
use lightbox_catalog::CatalogClient;
use lightbox_compute::{
    CapabilityProbe, CapabilityRegistry, ComputeDispatcher, DispatchError, DispatchOutcome,
    LocalExecutor, Operation, ProcessParams, RemoteProcessor, ServerCapabilities,
};
use lightbox_core::batch::BatchSpec;
use lightbox_core::job::{JobProgress, JobStatus};
use lightbox_core::types::JobId;
use lightbox_jobs::{BatchBackend, JobController, JobError};

pub use config::EngineConfig;
pub use lightbox_core::job_events;

/// One engine instance per configured server connection.
pub struct Engine {
    config: EngineConfig,
    client: Arc<CatalogClient>,
    registry: Arc<CapabilityRegistry>,
    cache: Arc<ResourceCache>,
    dispatcher: Arc<ComputeDispatcher>,
    jobs: Arc<JobController>,
    /// Stops the background cache sweeper.
    background_cancel: CancellationToken,
}

impl Engine {
    /// Build the service graph and start background maintenance.
    ///
    /// Must be called within a Tokio runtime. The returned `Arc` is cheaply
    /// cloned into whatever state container the shell uses.
    pub async fn start(config: EngineConfig) -> Arc<Self> {
        let http = reqwest::Client::new();
        let client = Arc::new(CatalogClient::with_client(
            http.clone(),
            config.server_url.clone(),
        ));

        let registry = Arc::new(CapabilityRegistry::new(
            Arc::clone(&client) as Arc<dyn CapabilityProbe>,
            config.capability_ttl,
        ));

        let cache = Arc::new(ResourceCache::new(
            config.cache.clone(),
            Some(Arc::new(TokioFileReader)),
            Arc::new(HttpFetcher::with_client(http)),
        ));

        let dispatcher = Arc::new(ComputeDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&client) as Arc<dyn RemoteProcessor>,
            Arc::clone(&cache),
        ));

        let jobs = JobController::new(
            Arc::clone(&client) as Arc<dyn BatchBackend>,
            Arc::clone(&dispatcher),
            Arc::clone(&cache),
            config.poll.clone(),
        );

        let background_cancel = CancellationToken::new();
        cache.spawn_sweeper(config.cache_sweep_interval, background_cancel.clone());

        tracing::info!(server_url = %config.server_url, "Engine started");

        Arc::new(Self {
            config,
            client,
            registry,
            cache,
            dispatcher,
            jobs,
            background_cancel,
        })
    }

    /// Base URL of the catalog server this engine talks to.
    pub fn server_url(&self) -> &str {
        self.client.base_url()
    }

    // ---- batch jobs ----

    /// Submit a batch job; returns its handle immediately.
    pub async fn submit_batch_job(&self, spec: BatchSpec) -> Result<JobId, JobError> {
        self.jobs.submit(spec).await
    }

    /// Side-effect-free progress snapshot.
    pub async fn get_job_progress(&self, job_id: JobId) -> Result<JobProgress, JobError> {
        self.jobs.progress(job_id).await
    }

    pub async fn pause_job(&self, job_id: JobId) -> Result<(), JobError> {
        self.jobs.pause(job_id).await
    }

    pub async fn resume_job(&self, job_id: JobId) -> Result<(), JobError> {
        self.jobs.resume(job_id).await
    }

    pub async fn cancel_job(&self, job_id: JobId) -> Result<(), JobError> {
        self.jobs.cancel(job_id).await
    }

    /// Acknowledge a terminal job, releasing its handle. Returns the final
    /// snapshot for the UI's one-time summary.
    pub async fn acknowledge_job(&self, job_id: JobId) -> Result<JobProgress, JobError> {
        self.jobs.acknowledge(job_id).await
    }

    /// The notification message type the shells broadcast for a status.
    pub fn job_message_type(status: JobStatus) -> &'static str {
        job_events::message_type_for(status)
    }

    // ---- one-shot compute ----

    /// Run a one-shot operation on whichever target can serve it.
    pub async fn dispatch_operation(
        &self,
        op: Operation,
        params: &ProcessParams,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.dispatcher.dispatch(op, params).await
    }

    /// Register this device's processing hardware.
    pub async fn register_local_executor(&self, executor: Arc<dyn LocalExecutor>) {
        self.dispatcher.register_local_executor(executor).await;
    }

    // ---- capabilities ----

    /// The server's capabilities, no older than the configured TTL.
    pub async fn server_capabilities(&self) -> ServerCapabilities {
        self.registry.get().await
    }

    /// Drop the cached capabilities. Call after the user reconfigures the
    /// server connection.
    pub async fn refresh_server_capabilities(&self) {
        self.registry.invalidate().await;
    }

    // ---- resources ----

    /// Resolve a resource through the cache.
    pub async fn get_resource(&self, locator: &str) -> Result<Arc<Vec<u8>>, ResolveError> {
        self.cache.resolve(locator).await
    }

    /// Drop one resource from the cache.
    pub async fn invalidate_resource(&self, locator: &str) -> bool {
        self.cache.invalidate(locator).await
    }

    /// Drop every cached resource (settings "clear cache" action).
    pub async fn clear_resources(&self) {
        self.cache.clear().await;
    }

    /// Background prefetch of a list of locators.
    pub fn warm_resources(&self, locators: Vec<String>) -> JoinHandle<()> {
        self.cache.warm(locators, self.config.warm_concurrency)
    }

    /// Current cache counters and occupancy.
    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    // ---- lifecycle ----

    /// Stop all polling and background maintenance.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down engine");
        self.background_cancel.cancel();
        self.jobs.shutdown().await;
    }
}

/// Initialize tracing for a shell that has no subscriber of its own.
///
/// Honors `RUST_LOG`; defaults to debug-level output for the lightbox
/// crates.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lightbox=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn engine_starts_and_shuts_down_cleanly() {
        let engine = Engine::start(EngineConfig::default()).await;
        assert_eq!(engine.server_url(), "http://localhost:8400");
        assert_eq!(engine.cache_stats().await.current_count, 0);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn message_types_follow_status() {
        assert_eq!(
            Engine::job_message_type(JobStatus::Completed),
            "batch_completed"
        );
    }
}
