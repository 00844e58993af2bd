//! REST client for the catalog/file server.
//!
//! Wraps the discovery, processing, batch, and file endpoints using
//! [`reqwest`]. One [`CatalogClient`] targets one configured server; the
//! engine rebuilds it when the user changes the server connection.

use lightbox_core::job::{JobControl, JobKind};

use crate::wire::{
    parse_error_code, BatchProgressResponse, BatchRequest, DiscoverResponse, SubmitBatchResponse,
    CODE_NO_COMPUTE,
};

/// HTTP client for a single catalog server.
pub struct CatalogClient {
    client: reqwest::Client,
    base_url: String,
}

/// Errors from the catalog REST layer.
#[derive(Debug, thiserror::Error)]
pub enum CatalogApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server reported it has no processing backend (503 +
    /// `E_NO_COMPUTE`). The one condition that triggers local fallback.
    #[error("Server has no compute capability available")]
    NoCompute,

    /// The server returned any other non-2xx status.
    #[error("Catalog API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl CatalogClient {
    /// Create a new client for a catalog server.
    ///
    /// * `base_url` - Base HTTP URL, e.g. `http://gallery.local:8400`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Create a client reusing an existing [`reqwest::Client`]
    /// (connection pooling across services).
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Base HTTP URL of the configured server.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ---- discovery ----

    /// Probe the server's execution capabilities.
    ///
    /// Sends `GET /discover`. The caller (capability registry) decides what
    /// a failure means; this method just reports it.
    pub async fn discover(&self) -> Result<DiscoverResponse, CatalogApiError> {
        let response = self
            .client
            .get(format!("{}/discover", self.base_url))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- one-shot processing ----

    /// Run a one-shot preview render on the server.
    ///
    /// Returns the binary payload on success.
    pub async fn process_preview(
        &self,
        params: &serde_json::Value,
    ) -> Result<Vec<u8>, CatalogApiError> {
        self.post_process("preview", params).await
    }

    /// Run a one-shot full render on the server.
    pub async fn process_render(
        &self,
        params: &serde_json::Value,
    ) -> Result<Vec<u8>, CatalogApiError> {
        self.post_process("render", params).await
    }

    async fn post_process(
        &self,
        endpoint: &str,
        params: &serde_json::Value,
    ) -> Result<Vec<u8>, CatalogApiError> {
        let response = self
            .client
            .post(format!("{}/process/{endpoint}", self.base_url))
            .json(params)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    // ---- batch jobs ----

    /// Submit a batch job. Returns the server-assigned job ID.
    pub async fn submit_batch(
        &self,
        kind: JobKind,
        request: &BatchRequest,
    ) -> Result<SubmitBatchResponse, CatalogApiError> {
        let response = self
            .client
            .post(format!("{}/batch/{}", self.base_url, kind.as_str()))
            .json(request)
            .send()
            .await?;

        let parsed: SubmitBatchResponse = Self::parse_response(response).await?;
        tracing::info!(
            kind = kind.as_str(),
            job_id = %parsed.job_id,
            "Batch job submitted to catalog server",
        );
        Ok(parsed)
    }

    /// Fetch the current progress of a server-side batch job.
    pub async fn batch_progress(
        &self,
        job_id: &str,
    ) -> Result<BatchProgressResponse, CatalogApiError> {
        let response = self
            .client
            .get(format!("{}/batch/{job_id}/progress", self.base_url))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Issue a control request (`cancel`, `pause`, `resume`) against a
    /// server-side batch job.
    pub async fn batch_control(
        &self,
        job_id: &str,
        control: JobControl,
    ) -> Result<(), CatalogApiError> {
        let response = self
            .client
            .post(format!(
                "{}/batch/{job_id}/{}",
                self.base_url,
                control.as_str()
            ))
            .send()
            .await?;

        Self::check_status(response).await
    }

    // ---- files ----

    /// Fetch raw bytes from a file URL served by the catalog.
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, CatalogApiError> {
        let response = self.client.get(url).send().await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code.
    ///
    /// A 503 carrying the `E_NO_COMPUTE` code maps to
    /// [`CatalogApiError::NoCompute`]; every other non-2xx becomes
    /// [`CatalogApiError::ApiError`] with the status and body text.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, CatalogApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());

            if status.as_u16() == 503 && parse_error_code(&body).as_deref() == Some(CODE_NO_COMPUTE)
            {
                return Err(CatalogApiError::NoCompute);
            }

            return Err(CatalogApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, CatalogApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), CatalogApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}
