//! First stage: turn the remote's manifest into declarative content.

use std::sync::Arc;

use futures::TryStreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::contract::{Downloader, FetchRequest};
use crate::error::Result;
use crate::manifest::{read_manifest, ManifestEntry};
use crate::model::{ArtifactState, ContentUnit, DeclarativeArtifact, DeclarativeContent, Remote};
use crate::progress::SyncProgress;

use super::forward;

pub struct FirstStage {
    remote: Remote,
    downloader: Arc<dyn Downloader>,
    progress: Arc<SyncProgress>,
}

impl FirstStage {
    pub fn new(
        remote: Remote,
        downloader: Arc<dyn Downloader>,
        progress: Arc<SyncProgress>,
    ) -> Self {
        Self {
            remote,
            downloader,
            progress,
        }
    }

    /// Build the in-memory content unit and its artifacts for one manifest entry.
    pub fn declare(&self, entry: ManifestEntry) -> Result<DeclarativeContent> {
        let content = ContentUnit {
            relative_path: entry.relative_path,
            digest: entry.digest,
        };
        let d_artifacts = entry
            .artifacts
            .into_iter()
            .map(|artifact| {
                let url = match artifact.url {
                    Some(url) => url,
                    None => self.remote.artifact_url(&artifact.relative_path)?,
                };
                Ok(DeclarativeArtifact {
                    relative_path: artifact.relative_path,
                    url,
                    digest: artifact.digest,
                    size: artifact.size,
                    remote_id: self.remote.id.clone(),
                    state: ArtifactState::Pending,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(DeclarativeContent::new(content, d_artifacts))
    }

    /// Fetch and parse the manifest, emitting units in manifest order.
    /// Returning drops `out`, which ends the stream for the next stage.
    pub async fn run(self, out: mpsc::Sender<DeclarativeContent>) -> Result<()> {
        info!(remote = %self.remote.id, url = %self.remote.url, "[SYNC] Fetching manifest");
        let manifest = self
            .downloader
            .fetch(&FetchRequest::new(self.remote.url.clone()))
            .await?;

        let entries = read_manifest(&manifest.path).await?;
        futures::pin_mut!(entries);
        while let Some(entry) = entries.try_next().await? {
            let dc = self.declare(entry)?;
            debug!(key = %dc.content.key(), "[SYNC] Declared content");
            self.progress.parsed();
            forward(&out, dc, "first").await?;
        }

        let _ = tokio::fs::remove_file(&manifest.path).await;
        self.progress.log("[SYNC] Manifest fully emitted");
        Ok(())
    }
}
