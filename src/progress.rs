//! Progress counters shared by the stages of one sync run.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::info;

#[derive(Debug, Default)]
pub struct SyncProgress {
    parsed: AtomicU64,
    created: AtomicU64,
    associated: AtomicU64,
    duplicates: AtomicU64,
    artifacts_downloaded: AtomicU64,
    artifacts_present: AtomicU64,
    artifacts_deferred: AtomicU64,
}

/// Point-in-time copy of [`SyncProgress`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressReport {
    /// Manifest entries handed to the pipeline.
    pub parsed: u64,
    /// Content units persisted by this run.
    pub created: u64,
    /// Content units that were already stored.
    pub associated: u64,
    /// Units whose natural key was already claimed earlier in this run.
    pub duplicates: u64,
    pub artifacts_downloaded: u64,
    pub artifacts_present: u64,
    pub artifacts_deferred: u64,
}

impl SyncProgress {
    pub fn parsed(&self) {
        self.parsed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn associated(&self) {
        self.associated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn artifact_downloaded(&self) {
        self.artifacts_downloaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn artifact_present(&self) {
        self.artifacts_present.fetch_add(1, Ordering::Relaxed);
    }

    pub fn artifact_deferred(&self) {
        self.artifacts_deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressReport {
        ProgressReport {
            parsed: self.parsed.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            associated: self.associated.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            artifacts_downloaded: self.artifacts_downloaded.load(Ordering::Relaxed),
            artifacts_present: self.artifacts_present.load(Ordering::Relaxed),
            artifacts_deferred: self.artifacts_deferred.load(Ordering::Relaxed),
        }
    }

    pub fn log(&self, message: &'static str) {
        let report = self.snapshot();
        info!(
            parsed = report.parsed,
            created = report.created,
            associated = report.associated,
            duplicates = report.duplicates,
            artifacts_downloaded = report.artifacts_downloaded,
            artifacts_deferred = report.artifacts_deferred,
            "{message}"
        );
    }
}
