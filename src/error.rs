//! Error types shared by every stage of a sync run.
//!
//! Each variant maps onto one failure class of the pipeline. All of them are
//! fatal for the run they occur in except [`SyncError::VersionConflict`],
//! which the version builder retries with a fresh head.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Missing or invalid remote/repository configuration. Raised before any stage starts.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network failure after retries, or a digest/size mismatch.
    #[error("Download of '{url}' failed: {reason}")]
    Download { url: String, reason: String },

    /// Malformed manifest content.
    #[error("Manifest parse error at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    /// Content or artifact storage unavailable while resolving or saving.
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// Another writer published a version first.
    #[error(
        "Version conflict on repository '{repository}': expected head {expected}, found {actual}"
    )]
    VersionConflict {
        repository: String,
        expected: u64,
        actual: u64,
    },

    /// Version commit still conflicting after the bounded number of attempts.
    #[error("Could not create a version of repository '{repository}' after {attempts} attempts")]
    Versioning { repository: String, attempts: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A neighbouring stage stopped consuming or producing.
    #[error("Pipeline stage '{0}' closed unexpectedly")]
    PipelineClosed(&'static str),
}

impl SyncError {
    pub fn download(url: impl Into<String>, reason: impl Into<String>) -> Self {
        SyncError::Download {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn parse(line: usize, reason: impl Into<String>) -> Self {
        SyncError::Parse {
            line,
            reason: reason.into(),
        }
    }

    /// Whether a retry loop may try the failed operation again.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::VersionConflict { .. })
    }
}
