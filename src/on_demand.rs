//! Serving artifacts whose download was deferred during sync.
//!
//! Content synced with the `on_demand` or `streamed` policy keeps the remote URL of
//! each artifact. [`ArtifactServer::fetch`] returns the bytes from the artifact
//! store when present and otherwise fetches them from that URL, validating the
//! recorded digest and size. `on_demand` artifacts are stored after the first
//! fetch; `streamed` artifacts never are.

use std::sync::Arc;

use tracing::info;

use crate::contract::{ArtifactStore, ContentStore, Downloader, FetchRequest};
use crate::error::{Result, SyncError};
use crate::model::ContentId;

pub struct ArtifactServer {
    content: Arc<dyn ContentStore>,
    artifacts: Arc<dyn ArtifactStore>,
    downloader: Arc<dyn Downloader>,
}

impl ArtifactServer {
    pub fn new(
        content: Arc<dyn ContentStore>,
        artifacts: Arc<dyn ArtifactStore>,
        downloader: Arc<dyn Downloader>,
    ) -> Self {
        Self {
            content,
            artifacts,
            downloader,
        }
    }

    pub async fn fetch(&self, id: ContentId, relative_path: &str) -> Result<Vec<u8>> {
        let record = self
            .content
            .get(id)
            .await?
            .ok_or_else(|| SyncError::Resolution(format!("content {id} does not exist")))?;
        let artifact = record
            .artifacts
            .iter()
            .find(|a| a.relative_path == relative_path)
            .ok_or_else(|| {
                SyncError::Resolution(format!("content {id} has no artifact '{relative_path}'"))
            })?;

        if let Some(digest) = &artifact.digest {
            if let Some(bytes) = self.artifacts.load(digest).await? {
                return Ok(bytes);
            }
        }

        let request = FetchRequest::new(artifact.url.clone())
            .with_digest(artifact.digest.clone())
            .with_size(artifact.size);
        let resource = self.downloader.fetch(&request).await?;
        let bytes = tokio::fs::read(&resource.path).await?;
        let _ = tokio::fs::remove_file(&resource.path).await;

        if artifact.policy.caches_on_access() {
            self.artifacts.store(&resource.digest, bytes.clone()).await?;
        }
        info!(
            content = %id,
            relative_path,
            remote = %artifact.remote_id,
            cached = artifact.policy.caches_on_access(),
            "Served deferred artifact"
        );
        Ok(bytes)
    }
}
