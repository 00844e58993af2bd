//! Server capability registry with TTL caching.
//!
//! One probe of the server's discovery endpoint is cached for a TTL; within
//! the TTL every dispatch call reads the cached value without touching the
//! network. A failed probe degrades to a permissive default instead of
//! erroring: the capability check exists to optimize routing, not to gate
//! correctness, so callers are never blocked by it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use lightbox_catalog::wire::DiscoverResponse;
use lightbox_catalog::{CatalogApiError, CatalogClient};
use lightbox_core::types::Timestamp;

/// Default time-to-live for a cached capability probe.
pub const DEFAULT_CAPABILITY_TTL: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Capability model
// ---------------------------------------------------------------------------

/// How the connected server operates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Full server: database, files, and processing.
    Standalone,
    /// Data-only server: owns the catalog and files but cannot process.
    DataOnly,
}

impl ExecutionMode {
    /// Map the wire spelling, defaulting unknown/absent values to
    /// `Standalone` (servers predating capability discovery are full
    /// servers).
    pub fn from_wire(raw: Option<&str>) -> Self {
        match raw {
            Some("data-only") => ExecutionMode::DataOnly,
            _ => ExecutionMode::Standalone,
        }
    }
}

/// Typed capability set resolved from a discovery response.
///
/// Every optional field of the server's loosely-typed JSON gets an explicit
/// default here, once, at the registry boundary.
#[derive(Debug, Clone)]
pub struct ServerCapabilities {
    pub execution_mode: ExecutionMode,
    pub can_compute: bool,
    pub can_store_data: bool,
    pub can_serve_files: bool,
    pub server_version: String,
    /// Wall-clock time of the probe that produced this value.
    pub fetched_at: Timestamp,
}

impl ServerCapabilities {
    /// Resolve a discovery response into a typed capability set.
    pub fn from_discovery(resp: &DiscoverResponse) -> Self {
        let execution_mode = ExecutionMode::from_wire(resp.execution_mode.as_deref());
        Self {
            execution_mode,
            // A server that omits the compute flag can process unless it
            // declared itself data-only.
            can_compute: resp
                .capabilities
                .compute
                .unwrap_or(execution_mode != ExecutionMode::DataOnly),
            can_store_data: resp.capabilities.database.unwrap_or(true),
            can_serve_files: resp.capabilities.files.unwrap_or(true),
            server_version: resp.version.clone().unwrap_or_else(|| "unknown".to_string()),
            fetched_at: chrono::Utc::now(),
        }
    }

    /// Synthetic result used when a probe fails: assume the server can do
    /// everything, and let the actual operation report otherwise.
    pub fn permissive_default() -> Self {
        Self {
            execution_mode: ExecutionMode::Standalone,
            can_compute: true,
            can_store_data: true,
            can_serve_files: true,
            server_version: "unknown".to_string(),
            fetched_at: chrono::Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Probe seam
// ---------------------------------------------------------------------------

/// Issues the discovery probe. Implemented by [`CatalogClient`]; tests
/// substitute scripted probes.
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    async fn probe(&self) -> Result<DiscoverResponse, CatalogApiError>;
}

#[async_trait]
impl CapabilityProbe for CatalogClient {
    async fn probe(&self) -> Result<DiscoverResponse, CatalogApiError> {
        self.discover().await
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct CachedCapabilities {
    caps: ServerCapabilities,
    fetched: Instant,
}

/// TTL-cached view of the server's capabilities.
///
/// Constructed per engine instance and shared via `Arc` across all dispatch
/// calls. Only [`invalidate`](Self::invalidate) mutates the cache from the
/// outside; that mutation is last-writer-wins.
pub struct CapabilityRegistry {
    probe: Arc<dyn CapabilityProbe>,
    ttl: Duration,
    cached: RwLock<Option<CachedCapabilities>>,
}

impl CapabilityRegistry {
    pub fn new(probe: Arc<dyn CapabilityProbe>, ttl: Duration) -> Self {
        Self {
            probe,
            ttl,
            cached: RwLock::new(None),
        }
    }

    /// The server's capabilities, no older than the TTL.
    ///
    /// Issues at most one probe per staleness window; concurrent callers of
    /// a stale registry wait on the same refresh rather than racing probes.
    /// Never errors: a failed probe yields [`ServerCapabilities::permissive_default`].
    pub async fn get(&self) -> ServerCapabilities {
        {
            let cached = self.cached.read().await;
            if let Some(c) = cached.as_ref() {
                if c.fetched.elapsed() < self.ttl {
                    return c.caps.clone();
                }
            }
        }

        let mut cached = self.cached.write().await;
        // Another caller may have refreshed while this one waited for the
        // write lock.
        if let Some(c) = cached.as_ref() {
            if c.fetched.elapsed() < self.ttl {
                return c.caps.clone();
            }
        }

        let caps = match self.probe.probe().await {
            Ok(resp) => {
                let caps = ServerCapabilities::from_discovery(&resp);
                tracing::debug!(
                    can_compute = caps.can_compute,
                    version = %caps.server_version,
                    "Refreshed server capabilities",
                );
                caps
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Capability probe failed, assuming permissive defaults",
                );
                ServerCapabilities::permissive_default()
            }
        };

        *cached = Some(CachedCapabilities {
            caps: caps.clone(),
            fetched: Instant::now(),
        });
        caps
    }

    /// Drop the cached value. Called after the user reconfigures the server
    /// connection; the next [`get`](Self::get) probes again.
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
        tracing::debug!("Server capability cache invalidated");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use lightbox_catalog::wire::DiscoverCapabilities;

    use super::*;

    struct ScriptedProbe {
        calls: AtomicUsize,
        fail: bool,
        response: DiscoverResponse,
    }

    impl ScriptedProbe {
        fn ok(response: DiscoverResponse) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: false,
                response,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: true,
                response: DiscoverResponse::default(),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CapabilityProbe for ScriptedProbe {
        async fn probe(&self) -> Result<DiscoverResponse, CatalogApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(CatalogApiError::ApiError {
                    status: 500,
                    body: "boom".to_string(),
                })
            } else {
                Ok(self.response.clone())
            }
        }
    }

    fn standalone_response() -> DiscoverResponse {
        DiscoverResponse {
            execution_mode: Some("standalone".to_string()),
            capabilities: DiscoverCapabilities {
                compute: Some(true),
                database: Some(true),
                files: Some(true),
            },
            version: Some("2.4.1".to_string()),
        }
    }

    // -- TTL behaviour -------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn queries_within_ttl_hit_cache() {
        let probe = ScriptedProbe::ok(standalone_response());
        let registry = CapabilityRegistry::new(probe.clone(), Duration::from_secs(60));

        registry.get().await;
        tokio::time::advance(Duration::from_secs(30)).await;
        registry.get().await;
        registry.get().await;

        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_cache_probes_exactly_once() {
        let probe = ScriptedProbe::ok(standalone_response());
        let registry = CapabilityRegistry::new(probe.clone(), Duration::from_secs(60));

        registry.get().await;
        tokio::time::advance(Duration::from_secs(61)).await;
        registry.get().await;

        assert_eq!(probe.calls(), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_reprobe() {
        let probe = ScriptedProbe::ok(standalone_response());
        let registry = CapabilityRegistry::new(probe.clone(), Duration::from_secs(60));

        registry.get().await;
        registry.invalidate().await;
        registry.get().await;

        assert_eq!(probe.calls(), 2);
    }

    // -- degraded probe ------------------------------------------------------

    #[tokio::test]
    async fn failed_probe_returns_permissive_default() {
        let probe = ScriptedProbe::failing();
        let registry = CapabilityRegistry::new(probe, Duration::from_secs(60));

        let caps = registry.get().await;
        assert!(caps.can_compute);
        assert!(caps.can_store_data);
        assert!(caps.can_serve_files);
    }

    // -- field defaults ------------------------------------------------------

    #[test]
    fn sparse_discovery_defaults_to_capable() {
        let caps = ServerCapabilities::from_discovery(&DiscoverResponse::default());
        assert_eq!(caps.execution_mode, ExecutionMode::Standalone);
        assert!(caps.can_compute);
        assert_eq!(caps.server_version, "unknown");
    }

    #[test]
    fn data_only_mode_defaults_compute_off() {
        let resp = DiscoverResponse {
            execution_mode: Some("data-only".to_string()),
            ..DiscoverResponse::default()
        };
        let caps = ServerCapabilities::from_discovery(&resp);
        assert_eq!(caps.execution_mode, ExecutionMode::DataOnly);
        assert!(!caps.can_compute);
    }

    #[test]
    fn explicit_compute_flag_wins_over_mode() {
        let resp = DiscoverResponse {
            execution_mode: Some("data-only".to_string()),
            capabilities: DiscoverCapabilities {
                compute: Some(true),
                database: None,
                files: None,
            },
            version: None,
        };
        assert!(ServerCapabilities::from_discovery(&resp).can_compute);
    }
}
