//! Polling cadence for job progress checks.
//!
//! The controller's poll loop is self-rescheduling: after a successful check
//! it waits [`PollConfig::interval`]; after a transport error it backs off to
//! [`PollConfig::error_backoff`] without failing the job — only the execution
//! target's own reported status ever changes job state.

use std::time::Duration;

/// Tunable cadence for the progress polling loop.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay between checks while polls succeed.
    pub interval: Duration,
    /// Delay after a failed poll attempt.
    pub error_backoff: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            error_backoff: Duration::from_millis(2000),
        }
    }
}

/// Delay before the next poll, given whether the last attempt failed.
pub fn next_poll_delay(last_failed: bool, config: &PollConfig) -> Duration {
    if last_failed {
        config.error_backoff
    } else {
        config.interval
    }
}
