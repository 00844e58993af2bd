//! Local execution seam.
//!
//! The actual pixel-processing kernel (GPU-backed RAW development, LUT
//! application) lives behind [`LocalExecutor`]; this layer only routes to it
//! and feeds it source bytes. Devices without processing hardware simply
//! never register an executor.

use async_trait::async_trait;
use serde::Serialize;

use lightbox_core::types::ItemId;

/// One-shot processing operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Fast, screen-sized render.
    Preview,
    /// Full-quality render.
    Render,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Preview => "preview",
            Operation::Render => "render",
        }
    }
}

/// Parameters for a processing operation, shared by both execution targets.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessParams {
    /// The photo being processed.
    pub item: ItemId,
    /// Locator of the source bytes (local scan path or file-server URL).
    pub source: String,
    /// Opaque edit parameters forwarded to whichever engine runs.
    pub settings: serde_json::Value,
}

/// Error from a local execution attempt.
#[derive(Debug, thiserror::Error)]
#[error("Local processing failed: {0}")]
pub struct LocalExecuteError(pub String);

/// A processing capability of the hosting device.
#[async_trait]
pub trait LocalExecutor: Send + Sync {
    /// Short name for logs, e.g. `"metal-gpu"`.
    fn name(&self) -> &str;

    /// Run one operation over the given source bytes.
    async fn execute(
        &self,
        op: Operation,
        params: &ProcessParams,
        source: &[u8],
    ) -> Result<Vec<u8>, LocalExecuteError>;
}
