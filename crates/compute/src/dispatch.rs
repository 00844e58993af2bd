//! Per-operation routing between the catalog server and local hardware.
//!
//! The dispatcher consults the capability registry, attempts the remote
//! path when the server can compute, and falls back to local execution on
//! exactly one signal: HTTP 503 with the `E_NO_COMPUTE` code. Any other
//! remote failure is surfaced unchanged, because bad parameters or auth
//! would not be fixed by running locally.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use lightbox_cache::{ResolveError, ResourceCache};
use lightbox_catalog::{CatalogApiError, CatalogClient};

use crate::capability::CapabilityRegistry;
use crate::executor::{LocalExecuteError, LocalExecutor, Operation, ProcessParams};

// ---------------------------------------------------------------------------
// Decisions and outcomes
// ---------------------------------------------------------------------------

/// Where an operation executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecTarget {
    Remote,
    Local,
}

/// Why a target was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    /// The capability registry said so up front.
    Capability,
    /// The server rejected the operation with the no-compute signal
    /// mid-flight.
    ErrorFallback,
}

/// A routing decision. Computed per call, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchDecision {
    pub target: ExecTarget,
    pub source_of_truth: DecisionSource,
}

/// Result of a dispatched operation: the payload plus where it ran.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub bytes: Vec<u8>,
    pub decision: DispatchDecision,
}

// ---------------------------------------------------------------------------
// Remote seam
// ---------------------------------------------------------------------------

/// The server's one-shot processing endpoints. Implemented by
/// [`CatalogClient`]; tests substitute scripted processors.
#[async_trait]
pub trait RemoteProcessor: Send + Sync {
    async fn process(
        &self,
        op: Operation,
        params: &serde_json::Value,
    ) -> Result<Vec<u8>, CatalogApiError>;
}

#[async_trait]
impl RemoteProcessor for CatalogClient {
    async fn process(
        &self,
        op: Operation,
        params: &serde_json::Value,
    ) -> Result<Vec<u8>, CatalogApiError> {
        match op {
            Operation::Preview => self.process_preview(params).await,
            Operation::Render => self.process_render(params).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by [`ComputeDispatcher::dispatch`].
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Local execution was required but this device has no registered
    /// executor.
    #[error(
        "This device is not configured for local processing; connect to a \
         server with processing support or enable a local processing engine"
    )]
    LocalExecutorUnavailable,

    /// The remote call failed with something other than the fallback signal.
    #[error("Remote processing failed: {0}")]
    Remote(#[source] CatalogApiError),

    /// The source bytes for local execution could not be resolved.
    #[error("Failed to resolve processing source: {0}")]
    Source(#[from] ResolveError),

    /// The local executor itself failed.
    #[error(transparent)]
    Local(#[from] LocalExecuteError),
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Routes operations between the catalog server and local hardware.
pub struct ComputeDispatcher {
    registry: Arc<CapabilityRegistry>,
    remote: Arc<dyn RemoteProcessor>,
    cache: Arc<ResourceCache>,
    local: RwLock<Option<Arc<dyn LocalExecutor>>>,
}

impl ComputeDispatcher {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        remote: Arc<dyn RemoteProcessor>,
        cache: Arc<ResourceCache>,
    ) -> Self {
        Self {
            registry,
            remote,
            cache,
            local: RwLock::new(None),
        }
    }

    /// Register the device's processing capability. Overwrites any previous
    /// registration.
    pub async fn register_local_executor(&self, executor: Arc<dyn LocalExecutor>) {
        tracing::info!(executor = executor.name(), "Local executor registered");
        *self.local.write().await = Some(executor);
    }

    /// Whether a local executor is currently registered.
    pub async fn has_local_executor(&self) -> bool {
        self.local.read().await.is_some()
    }

    /// The registered local executor, if any. Used by the job layer to run
    /// local batch loops against the same hardware seam.
    pub async fn local_executor(&self) -> Option<Arc<dyn LocalExecutor>> {
        self.local.read().await.clone()
    }

    /// Run a one-shot operation on whichever target can serve it.
    pub async fn dispatch(
        &self,
        op: Operation,
        params: &ProcessParams,
    ) -> Result<DispatchOutcome, DispatchError> {
        let caps = self.registry.get().await;

        if caps.can_compute {
            let wire = serde_json::to_value(params)
                .unwrap_or_else(|_| serde_json::Value::Object(Default::default()));
            match self.remote.process(op, &wire).await {
                Ok(bytes) => {
                    return Ok(DispatchOutcome {
                        bytes,
                        decision: DispatchDecision {
                            target: ExecTarget::Remote,
                            source_of_truth: DecisionSource::Capability,
                        },
                    });
                }
                Err(CatalogApiError::NoCompute) => {
                    tracing::info!(
                        op = op.as_str(),
                        item = params.item,
                        "Server reported no compute available, falling back to local execution",
                    );
                    return self
                        .execute_local(op, params, DecisionSource::ErrorFallback)
                        .await;
                }
                Err(e) => return Err(DispatchError::Remote(e)),
            }
        }

        self.execute_local(op, params, DecisionSource::Capability)
            .await
    }

    /// Pick the initial execution target for a batch job.
    ///
    /// Capability-driven only; the mid-operation fallback signal does not
    /// apply to a job that has not started. Errors when neither target is
    /// viable.
    pub async fn decide_target(&self) -> Result<DispatchDecision, DispatchError> {
        let caps = self.registry.get().await;
        if caps.can_compute {
            return Ok(DispatchDecision {
                target: ExecTarget::Remote,
                source_of_truth: DecisionSource::Capability,
            });
        }
        if self.has_local_executor().await {
            return Ok(DispatchDecision {
                target: ExecTarget::Local,
                source_of_truth: DecisionSource::Capability,
            });
        }
        Err(DispatchError::LocalExecutorUnavailable)
    }

    // ---- private helpers ----

    async fn execute_local(
        &self,
        op: Operation,
        params: &ProcessParams,
        source_of_truth: DecisionSource,
    ) -> Result<DispatchOutcome, DispatchError> {
        let executor = self
            .local
            .read()
            .await
            .clone()
            .ok_or(DispatchError::LocalExecutorUnavailable)?;

        let source = self.cache.resolve(&params.source).await?;
        let bytes = executor.execute(op, params, &source).await?;

        tracing::debug!(
            op = op.as_str(),
            item = params.item,
            executor = executor.name(),
            size = bytes.len(),
            "Operation executed locally",
        );

        Ok(DispatchOutcome {
            bytes,
            decision: DispatchDecision {
                target: ExecTarget::Local,
                source_of_truth,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
