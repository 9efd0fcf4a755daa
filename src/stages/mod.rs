//! Stages of the declarative content pipeline and the queues between them.
//!
//! ```text
//! FirstStage -> ResolveStage -> ArtifactDownloadStage -> ContentSaveStage -> VersionBuilder
//! ```
//!
//! Stages are connected by bounded `tokio::sync::mpsc` channels, so a slow stage
//! applies backpressure to everything upstream of it. A stage signals the end of
//! its stream by dropping its sender; the next stage sees the channel close
//! once every queued unit has been received.

use futures::stream::{self, Stream};
use tokio::sync::mpsc;

use crate::error::{Result, SyncError};

pub mod artifacts;
pub mod first;
pub mod resolve;
pub mod save;
pub mod version;

pub use artifacts::ArtifactDownloadStage;
pub use first::FirstStage;
pub use resolve::{KeyClaims, ResolveStage};
pub use save::ContentSaveStage;
pub use version::VersionBuilder;

pub fn channel<T>(capacity: usize) -> (mpsc::Sender<T>, mpsc::Receiver<T>) {
    mpsc::channel(capacity.max(1))
}

/// Adapt a receiver into a stream that ends when all senders are gone.
pub fn receiver_stream<T>(rx: mpsc::Receiver<T>) -> impl Stream<Item = T> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
}

/// Hand a unit to the next stage, waiting while its queue is full.
pub async fn forward<T>(tx: &mpsc::Sender<T>, item: T, stage: &'static str) -> Result<()> {
    tx.send(item)
        .await
        .map_err(|_| SyncError::PipelineClosed(stage))
}

/// Wrap a storage failure as a resolution error, keeping existing resolution errors as they are.
pub(crate) fn resolution_error(context: impl std::fmt::Display, e: SyncError) -> SyncError {
    match e {
        SyncError::Resolution(_) => e,
        other => SyncError::Resolution(format!("{context}: {other}")),
    }
}
