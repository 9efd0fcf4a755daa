//! Content saver stage: persist newly created content and pass ids to the version builder.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::contract::ContentStore;
use crate::error::{Result, SyncError};
use crate::model::{ContentId, ContentRecord, DeclarativeContent, DownloadPolicy, ResolutionKind};
use crate::progress::SyncProgress;

use super::{forward, resolution_error};

pub struct ContentSaveStage {
    content: Arc<dyn ContentStore>,
    policy: DownloadPolicy,
    progress: Arc<SyncProgress>,
}

impl ContentSaveStage {
    pub fn new(
        content: Arc<dyn ContentStore>,
        policy: DownloadPolicy,
        progress: Arc<SyncProgress>,
    ) -> Self {
        Self {
            content,
            policy,
            progress,
        }
    }

    /// Persist a created unit, or return the id an existing/duplicate unit resolved to.
    pub async fn save(&self, dc: DeclarativeContent) -> Result<ContentId> {
        let resolution = dc.resolution.ok_or_else(|| {
            SyncError::Resolution(format!(
                "unresolved content {} reached the saver",
                dc.content.key()
            ))
        })?;
        if resolution.kind != ResolutionKind::Created {
            return Ok(resolution.id);
        }

        let key = dc.content.key();
        let record = ContentRecord {
            id: resolution.id,
            artifacts: dc
                .d_artifacts
                .iter()
                .map(|da| da.to_remote_artifact(self.policy))
                .collect(),
            unit: dc.content,
        };
        let id = self
            .content
            .create(record)
            .await
            .map_err(|e| resolution_error(format!("saving {key} failed"), e))?;
        if id != resolution.id {
            warn!(
                key = %key,
                stored = %id,
                "[SYNC] Content was created concurrently by another writer"
            );
        }
        self.progress.created();
        debug!(key = %key, id = %id, "[SYNC] Saved content");
        Ok(id)
    }

    /// Save every unit in arrival order.
    ///
    /// Returns the ids that had to be replaced because the store already held the
    /// key under another id. Duplicates downstream still carry the replaced id.
    pub async fn run(
        &self,
        mut input: mpsc::Receiver<DeclarativeContent>,
        out: mpsc::Sender<ContentId>,
    ) -> Result<HashMap<ContentId, ContentId>> {
        let mut remapped = HashMap::new();
        while let Some(dc) = input.recv().await {
            let claimed = dc.content_id();
            let id = self.save(dc).await?;
            if let Some(claimed) = claimed.filter(|claimed| *claimed != id) {
                remapped.insert(claimed, id);
            }
            forward(&out, id, "save").await?;
        }
        Ok(remapped)
    }
}
