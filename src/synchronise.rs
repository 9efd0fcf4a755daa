//! High-level pipeline: sync a remote's manifest into a new repository version.
//!
//! [`Synchroniser::synchronise`] wires the stages of [`crate::stages`] together
//! with bounded queues and runs them concurrently:
//!   - the first stage fetches and parses the manifest, emitting declarative content in order
//!   - the resolver claims every natural key once and decides create / reuse / duplicate
//!   - the artifact stage fetches missing artifacts, deferring them unless the policy is immediate
//!   - the saver persists new content
//!   - the version builder drains the stream, then publishes the version
//!
//! # Error Handling
//! The first fatal error of any stage cancels the whole run: the remaining stages
//! are dropped, in-flight work is discarded and no version is published. Versions
//! created by earlier runs are never touched.
//!
//! # Navigation
//! - Main entrypoint: [`Synchroniser::synchronise`]
//! - Supporting types: [`SynchroniseReport`]

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::PipelineConfig;
use crate::contract::{ArtifactStore, ContentStore, Downloader, RepositoryStore};
use crate::error::{Result, SyncError};
use crate::model::{Remote, RepositoryVersion};
use crate::progress::{ProgressReport, SyncProgress};
use crate::stages::{
    channel, ArtifactDownloadStage, ContentSaveStage, FirstStage, ResolveStage, VersionBuilder,
};

/// Outcome of a successful sync.
#[derive(Debug, Clone, Serialize)]
pub struct SynchroniseReport {
    pub version: RepositoryVersion,
    pub progress: ProgressReport,
}

/// Holds the collaborators a sync run reads from and writes to.
#[derive(Clone)]
pub struct Synchroniser {
    downloader: Arc<dyn Downloader>,
    artifacts: Arc<dyn ArtifactStore>,
    content: Arc<dyn ContentStore>,
    repositories: Arc<dyn RepositoryStore>,
    config: PipelineConfig,
}

impl Synchroniser {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        artifacts: Arc<dyn ArtifactStore>,
        content: Arc<dyn ContentStore>,
        repositories: Arc<dyn RepositoryStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            downloader,
            artifacts,
            content,
            repositories,
            config,
        }
    }

    /// Sync `remote` into `repository`.
    ///
    /// With `mirror` the new version holds exactly the remote's content; otherwise
    /// it is the union of the previous head and the remote's content.
    pub async fn synchronise(
        &self,
        remote: &Remote,
        repository: &str,
        mirror: bool,
    ) -> Result<SynchroniseReport> {
        remote.validate()?;
        if repository.trim().is_empty() {
            return Err(SyncError::Config("A repository must be named to synchronise".into()));
        }
        let previous = self.repositories.get_head_version(repository).await?;
        info!(
            remote = %remote.id,
            repository = %repository,
            head = previous.number,
            mirror,
            policy = ?remote.policy,
            "[SYNC] Starting synchronisation pipeline"
        );

        let progress = Arc::new(SyncProgress::default());
        let capacity = self.config.queue_capacity();
        let (first_tx, resolve_rx) = channel(capacity);
        let (resolve_tx, artifact_rx) = channel(capacity);
        let (artifact_tx, save_rx) = channel(capacity);
        let (save_tx, version_rx) = channel(capacity);

        let first = FirstStage::new(remote.clone(), self.downloader.clone(), progress.clone());
        let resolver = ResolveStage::new(
            self.content.clone(),
            self.config.resolver_workers(),
            progress.clone(),
        );
        let artifact_stage = ArtifactDownloadStage::new(
            self.downloader.clone(),
            self.artifacts.clone(),
            remote.policy.downloads_during_sync(),
            self.config.download_workers_for(remote),
            progress.clone(),
        );
        let saver = ContentSaveStage::new(self.content.clone(), remote.policy, progress.clone());
        let builder =
            VersionBuilder::new(self.repositories.clone(), repository, mirror, &self.config);

        let pipeline = async {
            tokio::try_join!(
                first.run(first_tx),
                resolver.run(resolve_rx, resolve_tx),
                artifact_stage.run(artifact_rx, artifact_tx),
                saver.run(save_rx, save_tx),
                async { Ok::<_, SyncError>(VersionBuilder::collect(version_rx).await) },
            )
        };
        let (_, _, _, remapped, synced) = match pipeline.await {
            Ok(outputs) => outputs,
            Err(e) => {
                error!(
                    error = %e,
                    repository = %repository,
                    "[SYNC][ERROR] Pipeline aborted, no version published"
                );
                return Err(e);
            }
        };
        debug!(content = synced.len(), "[SYNC] Pipeline drained");

        let version = match builder.commit(VersionBuilder::remap(synced, &remapped)).await {
            Ok(version) => version,
            Err(e) => {
                error!(
                    error = %e,
                    repository = %repository,
                    "[SYNC][ERROR] Failed to publish version"
                );
                return Err(e);
            }
        };
        progress.log("[SYNC] Synchronisation complete");

        Ok(SynchroniseReport {
            version,
            progress: progress.snapshot(),
        })
    }
}
