use std::time::Duration;

use lightbox_cache::CacheConfig;
use lightbox_jobs::PollConfig;

/// Engine configuration loaded from environment variables.
///
/// All fields have defaults suitable for a desktop shell talking to a
/// server on the local network. A `.env` next to the shell binary is
/// honored.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the catalog/file server (default: `http://localhost:8400`).
    pub server_url: String,
    /// How long a capability probe result stays fresh (default: `60` s).
    pub capability_ttl: Duration,
    /// Resource cache bounds.
    pub cache: CacheConfig,
    /// Interval between background cache TTL sweeps (default: `60` s).
    pub cache_sweep_interval: Duration,
    /// Progress polling cadence.
    pub poll: PollConfig,
    /// Concurrent resolutions used by resource prefetch (default: `4`).
    pub warm_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8400".to_string(),
            capability_ttl: Duration::from_secs(60),
            cache: CacheConfig::default(),
            cache_sweep_interval: Duration::from_secs(60),
            poll: PollConfig::default(),
            warm_concurrency: 4,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                 |
    /// |---------------------------|-------------------------|
    /// | `SERVER_URL`              | `http://localhost:8400` |
    /// | `CAPABILITY_TTL_SECS`     | `60`                    |
    /// | `CACHE_MAX_ENTRIES`       | `256`                   |
    /// | `CACHE_MAX_BYTES`         | `268435456`             |
    /// | `CACHE_TTL_SECS`          | `300`                   |
    /// | `CACHE_SWEEP_INTERVAL_SECS` | `60`                  |
    /// | `POLL_INTERVAL_MS`        | `500`                   |
    /// | `POLL_ERROR_BACKOFF_MS`   | `2000`                  |
    /// | `WARM_CONCURRENCY`        | `4`                     |
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let server_url =
            std::env::var("SERVER_URL").unwrap_or_else(|_| defaults.server_url.clone());

        let capability_ttl = Duration::from_secs(env_u64(
            "CAPABILITY_TTL_SECS",
            defaults.capability_ttl.as_secs(),
        ));

        let cache = CacheConfig {
            max_entries: env_u64("CACHE_MAX_ENTRIES", defaults.cache.max_entries as u64) as usize,
            max_bytes: env_u64("CACHE_MAX_BYTES", defaults.cache.max_bytes),
            ttl: Duration::from_secs(env_u64("CACHE_TTL_SECS", defaults.cache.ttl.as_secs())),
        };

        let cache_sweep_interval = Duration::from_secs(env_u64(
            "CACHE_SWEEP_INTERVAL_SECS",
            defaults.cache_sweep_interval.as_secs(),
        ));

        let poll = PollConfig {
            interval: Duration::from_millis(env_u64(
                "POLL_INTERVAL_MS",
                defaults.poll.interval.as_millis() as u64,
            )),
            error_backoff: Duration::from_millis(env_u64(
                "POLL_ERROR_BACKOFF_MS",
                defaults.poll.error_backoff.as_millis() as u64,
            )),
        };

        let warm_concurrency =
            env_u64("WARM_CONCURRENCY", defaults.warm_concurrency as u64) as usize;

        Self {
            server_url,
            capability_ttl,
            cache,
            cache_sweep_interval,
            poll,
            warm_concurrency,
        }
    }
}

fn env_u64(var: &str, default: u64) -> u64 {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{var} must be a valid integer, got '{raw}'")),
        Err(_) => default,
    }
}
