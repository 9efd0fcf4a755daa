//! Version builder: gather the run's content ids and publish them as a new repository version.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::contract::RepositoryStore;
use crate::download::backoff_delay;
use crate::error::{Result, SyncError};
use crate::model::{ContentId, RepositoryVersion};

pub struct VersionBuilder {
    repositories: Arc<dyn RepositoryStore>,
    repository: String,
    mirror: bool,
    max_attempts: u32,
    retry_delay: Duration,
}

impl VersionBuilder {
    pub fn new(
        repositories: Arc<dyn RepositoryStore>,
        repository: impl Into<String>,
        mirror: bool,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            repositories,
            repository: repository.into(),
            mirror,
            max_attempts: config.version_commit_attempts(),
            retry_delay: config.retry_base_delay(),
        }
    }

    /// Drain the final queue. Completes only once every upstream stage has finished.
    pub async fn collect(mut input: mpsc::Receiver<ContentId>) -> BTreeSet<ContentId> {
        let mut content = BTreeSet::new();
        while let Some(id) = input.recv().await {
            content.insert(id);
        }
        content
    }

    /// Replace ids the content store swapped out during saving.
    pub fn remap(
        content: BTreeSet<ContentId>,
        remapped: &HashMap<ContentId, ContentId>,
    ) -> BTreeSet<ContentId> {
        content
            .into_iter()
            .map(|id| remapped.get(&id).copied().unwrap_or(id))
            .collect()
    }

    /// The content set of the next version given the current head.
    pub fn next_content(
        &self,
        head: &RepositoryVersion,
        synced: &BTreeSet<ContentId>,
    ) -> BTreeSet<ContentId> {
        if self.mirror {
            synced.clone()
        } else {
            head.content.union(synced).copied().collect()
        }
    }

    /// Publish the new version, retrying against a fresh head when another writer got there first.
    pub async fn commit(&self, synced: BTreeSet<ContentId>) -> Result<RepositoryVersion> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let head = self.repositories.get_head_version(&self.repository).await?;
            let content = self.next_content(&head, &synced);

            match self
                .repositories
                .create_version(&self.repository, content, head.number)
                .await
            {
                Ok(version) => {
                    info!(
                        repository = %self.repository,
                        version = version.number,
                        content = version.content.len(),
                        mirror = self.mirror,
                        "[SYNC][VERSION] Created repository version"
                    );
                    return Ok(version);
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    warn!(
                        repository = %self.repository,
                        attempt,
                        error = %e,
                        "[SYNC][VERSION] Version conflict, retrying against new head"
                    );
                    tokio::time::sleep(backoff_delay(self.retry_delay, attempt)).await;
                }
                Err(e) if e.is_transient() => {
                    return Err(SyncError::Versioning {
                        repository: self.repository.clone(),
                        attempts: attempt,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}
