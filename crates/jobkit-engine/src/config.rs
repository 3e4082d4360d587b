//! Engine configuration.

use jobkit_core::job::{DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunable settings for a [`JobEngine`](crate::JobEngine).
///
/// Hosts construct this directly or deserialize it from their own
/// configuration layer; unset fields fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of concurrent workers spawned by `start()`.
    pub workers: usize,
    /// How long an idle worker waits before re-checking for work.
    pub poll_interval: Duration,
    /// Per-attempt execution timeout for submissions that do not override it.
    pub default_timeout: Duration,
    /// Retry budget for submissions that do not override it.
    pub default_max_retries: u32,
    /// Reject submissions whose job type has no registered processor instead
    /// of failing them lazily at execution time.
    pub strict_registration: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_secs(1),
            default_timeout: DEFAULT_TIMEOUT,
            default_max_retries: DEFAULT_MAX_RETRIES,
            strict_registration: false,
        }
    }
}
