use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::model::Remote;

/// Tuning knobs for the sync pipeline. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacity of each bounded queue between stages.
    pub queue_capacity: usize,
    /// Content units resolved concurrently.
    pub resolver_workers: usize,
    /// Content units whose artifacts are downloaded concurrently.
    pub download_workers: usize,
    /// Attempts per download, including the first one.
    pub download_retries: u32,
    pub retry_base_delay_ms: u64,
    /// Timeout of a single network request.
    pub timeout_secs: u64,
    pub version_commit_attempts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            resolver_workers: 8,
            download_workers: 10,
            download_retries: 3,
            retry_base_delay_ms: 500,
            timeout_secs: 30,
            version_commit_attempts: 5,
        }
    }
}

impl PipelineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Always at least two attempts, so every transient failure gets one retry.
    pub fn download_attempts(&self) -> u32 {
        self.download_retries.max(2)
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }

    pub fn resolver_workers(&self) -> usize {
        self.resolver_workers.max(1)
    }

    /// The remote's own concurrency wins over the pipeline default.
    pub fn download_workers_for(&self, remote: &Remote) -> usize {
        remote
            .download_concurrency
            .unwrap_or(self.download_workers)
            .max(1)
    }

    pub fn version_commit_attempts(&self) -> u32 {
        self.version_commit_attempts.max(1)
    }

    pub fn trace_loaded(&self) {
        info!(
            queue_capacity = self.queue_capacity,
            resolver_workers = self.resolver_workers,
            download_workers = self.download_workers,
            "Loaded PipelineConfig"
        );
        debug!(?self, "PipelineConfig loaded (full debug)");
    }
}
