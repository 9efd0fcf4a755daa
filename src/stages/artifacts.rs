//! Artifact stage: settle the artifacts of every unit the run will reference.
//!
//! Artifacts whose digest is already in the artifact store are marked present
//! without touching the network. The rest are fetched when the remote's policy
//! downloads during sync and marked deferred otherwise. New content is always
//! processed; existing content only when downloading, so a version synced with
//! the immediate policy never references missing bytes. Duplicates pass through.

use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::contract::{ArtifactStore, Downloader, FetchRequest};
use crate::error::Result;
use crate::model::{ArtifactState, DeclarativeArtifact, DeclarativeContent, ResolutionKind};
use crate::progress::SyncProgress;

use super::{forward, receiver_stream, resolution_error};

pub struct ArtifactDownloadStage {
    downloader: Arc<dyn Downloader>,
    artifacts: Arc<dyn ArtifactStore>,
    download: bool,
    workers: usize,
    progress: Arc<SyncProgress>,
}

impl ArtifactDownloadStage {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        artifacts: Arc<dyn ArtifactStore>,
        download: bool,
        workers: usize,
        progress: Arc<SyncProgress>,
    ) -> Self {
        Self {
            downloader,
            artifacts,
            download,
            workers: workers.max(1),
            progress,
        }
    }

    async fn settle_artifact(&self, da: &mut DeclarativeArtifact) -> Result<()> {
        if let Some(digest) = &da.digest {
            let present = self
                .artifacts
                .exists(digest)
                .await
                .map_err(|e| resolution_error(format!("artifact lookup of {digest} failed"), e))?;
            if present {
                da.state = ArtifactState::Present;
                self.progress.artifact_present();
                return Ok(());
            }
        }
        if !self.download {
            da.state = ArtifactState::Deferred;
            self.progress.artifact_deferred();
            return Ok(());
        }

        let request = FetchRequest::new(da.url.clone())
            .with_digest(da.digest.clone())
            .with_size(da.size);
        let resource = self.downloader.fetch(&request).await?;
        let bytes = tokio::fs::read(&resource.path).await?;
        self.artifacts
            .store(&resource.digest, bytes)
            .await
            .map_err(|e| {
                resolution_error(format!("storing artifact {} failed", resource.digest), e)
            })?;
        let _ = tokio::fs::remove_file(&resource.path).await;

        da.digest.get_or_insert(resource.digest);
        da.size.get_or_insert(resource.size);
        da.state = ArtifactState::Downloaded;
        self.progress.artifact_downloaded();
        debug!(url = %da.url, "[SYNC][DOWNLOAD] Stored artifact");
        Ok(())
    }

    pub async fn process(&self, mut dc: DeclarativeContent) -> Result<DeclarativeContent> {
        let wanted = match dc.resolution.map(|r| r.kind) {
            Some(ResolutionKind::Created) => true,
            Some(ResolutionKind::Existing) => self.download,
            _ => false,
        };
        if !wanted {
            return Ok(dc);
        }
        for da in dc
            .d_artifacts
            .iter_mut()
            .filter(|da| da.state == ArtifactState::Pending)
        {
            self.settle_artifact(da).await?;
        }
        Ok(dc)
    }

    pub async fn run(
        &self,
        input: mpsc::Receiver<DeclarativeContent>,
        out: mpsc::Sender<DeclarativeContent>,
    ) -> Result<()> {
        receiver_stream(input)
            .map(|dc| self.process(dc))
            .buffer_unordered(self.workers)
            .try_for_each(|dc| forward(&out, dc, "artifacts"))
            .await?;

        info!("[SYNC][DOWNLOAD] Artifact stage drained");
        Ok(())
    }
}
