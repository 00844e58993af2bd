//! The resource cache service: resolution order, coalescing, prefetch.
//!
//! Resolution order for [`ResourceCache::resolve`]: fresh cache hit, then
//! local filesystem read (when the locator is a local path and a reader is
//! registered), then HTTP fetch. Successful resolutions are inserted into
//! the store.
//!
//! Concurrent resolutions of the same locator coalesce: the first caller
//! performs the underlying read/fetch, all overlapping callers share its
//! result. At most one fetch is ever in flight per key.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use lightbox_core::locator::{self, LocatorKind};
use lightbox_core::CoreError;

use crate::resolver::{LocalFileReader, RemoteFetcher};
use crate::store::{CacheConfig, CacheStats, CacheStore};

/// Result shared between coalesced waiters. The error is stringified so it
/// can be cloned into every waiter.
type FlightResult = Result<Arc<Vec<u8>>, String>;

/// Default number of locators resolved concurrently by [`ResourceCache::warm`].
pub const DEFAULT_WARM_CONCURRENCY: usize = 4;

/// Errors surfaced by [`ResourceCache::resolve`].
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The locator is empty or not classifiable.
    #[error(transparent)]
    InvalidLocator(#[from] CoreError),

    /// The locator is a local path but no filesystem reader is registered
    /// on this device.
    #[error("No local file reader available for '{locator}'")]
    NoLocalReader { locator: String },

    /// The local read failed.
    #[error("Failed to read '{path}': {message}")]
    LocalRead { path: String, message: String },

    /// The HTTP fetch failed.
    #[error("Failed to fetch '{url}': {message}")]
    Fetch { url: String, message: String },

    /// A coalesced resolution this caller was waiting on failed.
    #[error("Resolution failed: {0}")]
    Shared(String),
}

/// Bounded, expiring, coalescing cache over file-like resources.
///
/// Constructed per engine instance (no process-wide singleton) and shared
/// via `Arc` between the dispatcher, the local job runner, and the UI facade.
pub struct ResourceCache {
    store: Mutex<CacheStore>,
    in_flight: Mutex<HashMap<String, broadcast::Sender<FlightResult>>>,
    reader: Option<Arc<dyn LocalFileReader>>,
    fetcher: Arc<dyn RemoteFetcher>,
}

impl ResourceCache {
    /// Create a cache with the given bounds and resolution backends.
    ///
    /// `reader` is `None` on devices without filesystem access (the wrist
    /// companion); such devices resolve everything over HTTP.
    pub fn new(
        config: CacheConfig,
        reader: Option<Arc<dyn LocalFileReader>>,
        fetcher: Arc<dyn RemoteFetcher>,
    ) -> Self {
        Self {
            store: Mutex::new(CacheStore::new(config)),
            in_flight: Mutex::new(HashMap::new()),
            reader,
            fetcher,
        }
    }

    /// Resolve a locator to its payload bytes.
    ///
    /// Fresh cache hits return immediately. Otherwise the caller either
    /// becomes the leader of a new resolution or waits on an in-flight one
    /// for the same locator.
    pub async fn resolve(&self, locator: &str) -> Result<Arc<Vec<u8>>, ResolveError> {
        let kind = locator::validate(locator)?;
        let key = locator.trim();

        if let Some(payload) = self.store.lock().await.get(key) {
            return Ok(payload);
        }

        // Join an in-flight resolution if one exists; otherwise register as
        // the leader. Subscribing under the lock guarantees the leader's
        // send (also under the lock) cannot be missed.
        let mut rx = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(key) {
                Some(tx) => tx.subscribe(),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    in_flight.insert(key.to_string(), tx);
                    drop(in_flight);
                    return self.lead_resolution(key, kind).await;
                }
            }
        };

        match rx.recv().await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(message)) => Err(ResolveError::Shared(message)),
            Err(_) => Err(ResolveError::Shared(
                "in-flight resolution was abandoned".to_string(),
            )),
        }
    }

    /// Drop one entry from the cache.
    pub async fn invalidate(&self, locator: &str) -> bool {
        self.store.lock().await.invalidate(locator.trim())
    }

    /// Drop every entry from the cache.
    pub async fn clear(&self) {
        self.store.lock().await.clear();
    }

    /// Current cache counters and occupancy.
    pub async fn stats(&self) -> CacheStats {
        self.store.lock().await.stats()
    }

    /// Best-effort background prefetch of a list of locators.
    ///
    /// Spawned onto the runtime so it never blocks the caller. Locators
    /// already cached are skipped; failures are logged and ignored.
    pub fn warm(self: &Arc<Self>, locators: Vec<String>, concurrency: usize) -> JoinHandle<()> {
        use futures::StreamExt;

        let cache = Arc::clone(self);
        let limit = concurrency.max(1);

        tokio::spawn(async move {
            futures::stream::iter(locators)
                .for_each_concurrent(limit, |loc| {
                    let cache = Arc::clone(&cache);
                    async move {
                        if cache.store.lock().await.contains_fresh(loc.trim()) {
                            return;
                        }
                        if let Err(e) = cache.resolve(&loc).await {
                            tracing::debug!(locator = %loc, error = %e, "Prefetch skipped");
                        }
                    }
                })
                .await;
        })
    }

    /// Spawn the periodic TTL sweep task.
    ///
    /// Runs until the cancellation token is triggered.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
                let swept = cache.store.lock().await.sweep_expired();
                if swept > 0 {
                    tracing::debug!(swept, "Cache sweep dropped expired entries");
                }
            }
        })
    }

    // ---- private helpers ----

    /// Perform the underlying resolution as the leader for `key`, publish
    /// the result to any coalesced waiters, and settle the store.
    async fn lead_resolution(
        &self,
        key: &str,
        kind: LocatorKind,
    ) -> Result<Arc<Vec<u8>>, ResolveError> {
        let result = self.resolve_uncached(key, kind).await;

        // Store before unregistering the flight: a caller arriving in
        // between must see either the flight or the stored entry. The
        // leader's own read settles through the store in the same critical
        // section so hit accounting and access times reflect it; oversized
        // payloads are handed back without being resident.
        let settled = match result {
            Ok(payload) => {
                let mut store = self.store.lock().await;
                if store.insert(key, Arc::clone(&payload)) {
                    Ok(store.get(key).unwrap_or(payload))
                } else {
                    Ok(payload)
                }
            }
            Err(e) => Err(e),
        };

        let shared: FlightResult = match &settled {
            Ok(payload) => Ok(Arc::clone(payload)),
            Err(e) => Err(e.to_string()),
        };
        {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(tx) = in_flight.remove(key) {
                let _ = tx.send(shared);
            }
        }

        settled
    }

    /// The resolution order below the cache: local read, then HTTP fetch.
    async fn resolve_uncached(
        &self,
        key: &str,
        kind: LocatorKind,
    ) -> Result<Arc<Vec<u8>>, ResolveError> {
        match kind {
            LocatorKind::LocalFile => {
                let path = locator::local_path(key).unwrap_or(key);
                let reader = self
                    .reader
                    .as_ref()
                    .ok_or_else(|| ResolveError::NoLocalReader {
                        locator: key.to_string(),
                    })?;
                let bytes = reader
                    .read(path)
                    .await
                    .map_err(|e| ResolveError::LocalRead {
                        path: path.to_string(),
                        message: e.to_string(),
                    })?;
                tracing::debug!(path, size = bytes.len(), "Resolved resource from local file");
                Ok(Arc::new(bytes))
            }
            LocatorKind::Http => {
                let bytes = self
                    .fetcher
                    .fetch(key)
                    .await
                    .map_err(|e| ResolveError::Fetch {
                        url: key.to_string(),
                        message: e.to_string(),
                    })?;
                tracing::debug!(url = key, size = bytes.len(), "Resolved resource over HTTP");
                Ok(Arc::new(bytes))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
