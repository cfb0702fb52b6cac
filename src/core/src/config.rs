//! Shared run configuration for mirror and sync jobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Minimum accepted worker count.
pub const MIN_WORKER_NUM: usize = 1;

/// Maximum accepted worker count.
pub const MAX_WORKER_NUM: usize = 20;

/// Worker count used when the requested value is out of range.
pub const DEFAULT_WORKER_NUM: usize = 1;

/// Default per-image timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Clamp a requested worker count into `[MIN_WORKER_NUM, MAX_WORKER_NUM]`.
///
/// Out-of-range values fall back to `DEFAULT_WORKER_NUM` with a warning,
/// matching the batch driver's behavior rather than silently saturating.
pub fn clamp_workers(requested: usize) -> usize {
    if !(MIN_WORKER_NUM..=MAX_WORKER_NUM).contains(&requested) {
        tracing::warn!(requested, "invalid worker num, set to {DEFAULT_WORKER_NUM}");
        return DEFAULT_WORKER_NUM;
    }
    requested
}

/// Options shared by every batch copy run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonConfig {
    /// Architecture allow-list; empty selects every architecture.
    #[serde(default = "default_arch")]
    pub arch: Vec<String>,

    /// OS allow-list; empty selects every OS.
    #[serde(default = "default_os")]
    pub os: Vec<String>,

    /// Variant allow-list; empty selects every variant.
    #[serde(default)]
    pub variant: Vec<String>,

    /// Number of images copied in parallel.
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Per-image timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Require HTTPS and verify certificates.
    #[serde(default = "default_true")]
    pub tls_verify: bool,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            arch: default_arch(),
            os: default_os(),
            variant: Vec::new(),
            jobs: default_jobs(),
            timeout_secs: default_timeout_secs(),
            tls_verify: true,
        }
    }
}

impl CommonConfig {
    /// Per-image timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The effective (clamped) worker count.
    pub fn workers(&self) -> usize {
        clamp_workers(self.jobs)
    }
}

fn default_arch() -> Vec<String> {
    vec!["amd64".to_string(), "arm64".to_string()]
}

fn default_os() -> Vec<String> {
    vec!["linux".to_string()]
}

fn default_jobs() -> usize {
    DEFAULT_WORKER_NUM
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}
