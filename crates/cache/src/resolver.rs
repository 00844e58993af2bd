//! Resolution seams for cache misses: local filesystem read and HTTP fetch.
//!
//! Both are traits so tests (and platforms without a given capability) can
//! substitute implementations. A device without filesystem access simply
//! constructs the cache without a [`LocalFileReader`].

use async_trait::async_trait;

// ---------------------------------------------------------------------------
// Local filesystem
// ---------------------------------------------------------------------------

/// Reads resource bytes from the device filesystem.
#[async_trait]
pub trait LocalFileReader: Send + Sync {
    async fn read(&self, path: &str) -> std::io::Result<Vec<u8>>;
}

/// Production reader backed by [`tokio::fs`].
pub struct TokioFileReader;

#[async_trait]
impl LocalFileReader for TokioFileReader {
    async fn read(&self, path: &str) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }
}

// ---------------------------------------------------------------------------
// HTTP fetch
// ---------------------------------------------------------------------------

/// Errors from a remote fetch.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Transport(String),

    /// The server returned a non-2xx status.
    #[error("HTTP status {status} fetching resource")]
    Status { status: u16 },
}

/// Fetches resource bytes over HTTP(S).
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Production fetcher over a shared [`reqwest::Client`].
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Reuse an existing client (connection pooling with the catalog client).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
