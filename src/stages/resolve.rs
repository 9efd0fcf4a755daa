//! Resolver stage: decide for every unit whether it creates, reuses or duplicates content.
//!
//! Units are resolved concurrently, but each natural key is claimed exactly once
//! per run. The first unit to claim a key does the store lookup; every later unit
//! with the same key waits for that claim and reuses its outcome, so at most one
//! unit per key is ever marked for creation. Artifacts are left to the artifact stage.

use std::collections::HashMap;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use tokio::sync::{mpsc, Mutex, OnceCell};
use tracing::debug;

use crate::contract::ContentStore;
use crate::error::Result;
use crate::model::{ContentId, DeclarativeContent, NaturalKey, Resolution, ResolutionKind};
use crate::progress::SyncProgress;

use super::{forward, receiver_stream, resolution_error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    /// The store already holds content with this key.
    Stored(ContentId),
    /// No stored content; the unit holding this id creates it.
    Creating(ContentId),
}

/// Per-run registry of natural keys that have been claimed.
#[derive(Default)]
pub struct KeyClaims {
    claims: Mutex<HashMap<NaturalKey, Arc<OnceCell<Claim>>>>,
}

impl KeyClaims {
    async fn cell(&self, key: &NaturalKey) -> Arc<OnceCell<Claim>> {
        let mut claims = self.claims.lock().await;
        claims.entry(key.clone()).or_default().clone()
    }

    pub async fn len(&self) -> usize {
        self.claims.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

pub struct ResolveStage {
    content: Arc<dyn ContentStore>,
    claims: KeyClaims,
    workers: usize,
    progress: Arc<SyncProgress>,
}

impl ResolveStage {
    pub fn new(
        content: Arc<dyn ContentStore>,
        workers: usize,
        progress: Arc<SyncProgress>,
    ) -> Self {
        Self {
            content,
            claims: KeyClaims::default(),
            workers: workers.max(1),
            progress,
        }
    }

    pub async fn resolve(&self, mut dc: DeclarativeContent) -> Result<DeclarativeContent> {
        let key = dc.content.key();
        let candidate = ContentId::new();
        let cell = self.claims.cell(&key).await;

        let store = &self.content;
        let lookup_key = &key;
        let claim = *cell
            .get_or_try_init(move || async move {
                match store.lookup(lookup_key).await {
                    Ok(Some(id)) => Ok(Claim::Stored(id)),
                    Ok(None) => Ok(Claim::Creating(candidate)),
                    Err(e) => Err(resolution_error(format!("lookup of {lookup_key} failed"), e)),
                }
            })
            .await?;

        let resolution = match claim {
            Claim::Stored(id) => {
                self.progress.associated();
                Resolution {
                    id,
                    kind: ResolutionKind::Existing,
                }
            }
            Claim::Creating(id) if id == candidate => Resolution {
                id,
                kind: ResolutionKind::Created,
            },
            Claim::Creating(id) => {
                self.progress.duplicate();
                Resolution {
                    id,
                    kind: ResolutionKind::Duplicate,
                }
            }
        };

        debug!(
            key = %key,
            id = %resolution.id,
            kind = ?resolution.kind,
            "[SYNC][RESOLVE] Resolved content"
        );
        dc.resolution = Some(resolution);
        Ok(dc)
    }

    /// Resolve units with up to `workers` lookups in flight. Output order is not preserved.
    pub async fn run(
        &self,
        input: mpsc::Receiver<DeclarativeContent>,
        out: mpsc::Sender<DeclarativeContent>,
    ) -> Result<()> {
        receiver_stream(input)
            .map(|dc| self.resolve(dc))
            .buffer_unordered(self.workers)
            .try_for_each(|dc| forward(&out, dc, "resolve"))
            .await?;

        debug!(keys = self.claims.len().await, "[SYNC][RESOLVE] Resolver drained");
        Ok(())
    }
}
