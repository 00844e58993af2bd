//! Wire shapes for the catalog server endpoints the core inspects.
//!
//! The server's JSON is loosely typed with optional fields; every shape here
//! deserializes with explicit defaults so the rest of the system never
//! handles raw untyped responses.

use serde::{Deserialize, Serialize};

use lightbox_core::batch::BatchSpec;
use lightbox_core::job::JobStatus;
use lightbox_core::types::ItemId;

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Response of `GET /discover`.
///
/// Older servers omit fields freely; all of them default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscoverResponse {
    /// `"standalone"` or `"data-only"`. Absent on pre-capability servers.
    pub execution_mode: Option<String>,
    pub capabilities: DiscoverCapabilities,
    pub version: Option<String>,
}

/// Capability flags inside a discovery response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DiscoverCapabilities {
    pub compute: Option<bool>,
    pub database: Option<bool>,
    pub files: Option<bool>,
}

// ---------------------------------------------------------------------------
// Error bodies
// ---------------------------------------------------------------------------

/// Machine-readable code the server attaches to a 503 when its processing
/// backend is unavailable. The only signal that triggers remote-to-local
/// fallback.
pub const CODE_NO_COMPUTE: &str = "E_NO_COMPUTE";

/// Generic error body shape (`{code?, message?}`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ErrorBody {
    pub code: Option<String>,
    pub message: Option<String>,
}

/// Extract the machine-readable error code from a raw error body, if any.
pub fn parse_error_code(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body).ok()?.code
}

// ---------------------------------------------------------------------------
// Batch submission
// ---------------------------------------------------------------------------

/// Request body for `POST /batch/render` and `POST /batch/download`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub scope: lightbox_core::batch::BatchScope,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub item_ids: Vec<ItemId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roll_id: Option<i64>,
    pub params_source: lightbox_core::batch::ParamsSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset_id: Option<i64>,
    pub output_config: lightbox_core::batch::OutputConfig,
}

impl From<&BatchSpec> for BatchRequest {
    fn from(spec: &BatchSpec) -> Self {
        Self {
            scope: spec.scope,
            item_ids: spec.item_ids.clone(),
            roll_id: spec.roll_id,
            params_source: spec.params_source,
            preset_id: spec.preset_id,
            output_config: spec.output.clone(),
        }
    }
}

/// Response of a successful batch submission.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBatchResponse {
    /// Server-assigned job identifier, used for all subsequent polling.
    pub job_id: String,
}

// ---------------------------------------------------------------------------
// Batch progress
// ---------------------------------------------------------------------------

/// One failed item in a progress report.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFailedItem {
    pub item_ref: ItemId,
    #[serde(default)]
    pub error: String,
}

/// Response of `GET /batch/{jobId}/progress`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgressResponse {
    pub status: JobStatus,
    pub total: u32,
    #[serde(default)]
    pub completed: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default)]
    pub current: Option<ItemId>,
    #[serde(default)]
    pub failed_items: Vec<WireFailedItem>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_discover_response() {
        let json = r#"{
            "executionMode": "standalone",
            "capabilities": {"compute": true, "database": true, "files": true},
            "version": "2.4.1"
        }"#;
        let resp: DiscoverResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.execution_mode.as_deref(), Some("standalone"));
        assert_eq!(resp.capabilities.compute, Some(true));
        assert_eq!(resp.version.as_deref(), Some("2.4.1"));
    }

    #[test]
    fn parse_sparse_discover_response() {
        let resp: DiscoverResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.execution_mode.is_none());
        assert!(resp.capabilities.compute.is_none());
        assert!(resp.version.is_none());
    }

    #[test]
    fn parse_no_compute_error_code() {
        assert_eq!(
            parse_error_code(r#"{"code":"E_NO_COMPUTE"}"#).as_deref(),
            Some(CODE_NO_COMPUTE)
        );
    }

    #[test]
    fn parse_error_code_absent() {
        assert!(parse_error_code(r#"{"message":"boom"}"#).is_none());
        assert!(parse_error_code("not json").is_none());
    }

    #[test]
    fn parse_progress_response() {
        let json = r#"{
            "status": "processing",
            "total": 10,
            "completed": 7,
            "failed": 2,
            "current": 8,
            "failedItems": [{"itemRef": 3, "error": "decode error"}]
        }"#;
        let resp: BatchProgressResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.status, JobStatus::Processing);
        assert_eq!(resp.total, 10);
        assert_eq!(resp.completed, 7);
        assert_eq!(resp.failed, 2);
        assert_eq!(resp.current, Some(8));
        assert_eq!(resp.failed_items.len(), 1);
        assert_eq!(resp.failed_items[0].item_ref, 3);
    }

    #[test]
    fn parse_progress_response_minimal() {
        let json = r#"{"status": "completed", "total": 4}"#;
        let resp: BatchProgressResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.status, JobStatus::Completed);
        assert_eq!(resp.completed, 0);
        assert!(resp.failed_items.is_empty());
        assert!(resp.current.is_none());
    }

    #[test]
    fn batch_request_from_spec_uses_camel_case() {
        use lightbox_core::batch::*;
        use lightbox_core::job::JobKind;

        let spec = BatchSpec {
            kind: JobKind::Render,
            scope: BatchScope::Selection,
            item_ids: vec![1, 2],
            roll_id: None,
            params_source: ParamsSource::Photo,
            preset_id: None,
            output: OutputConfig {
                format: OutputFormat::Jpeg,
                quality: 90,
                max_dimension: None,
                destination: "/exports".to_string(),
            },
        };
        let body = serde_json::to_value(BatchRequest::from(&spec)).unwrap();
        assert_eq!(body["scope"], "selection");
        assert_eq!(body["itemIds"][1], 2);
        assert_eq!(body["paramsSource"], "photo");
        assert_eq!(body["outputConfig"]["format"], "jpeg");
        assert!(body.get("rollId").is_none());
    }
}
