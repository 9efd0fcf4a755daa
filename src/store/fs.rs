use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::memory::{RepositoryState, Snapshot};
use crate::contract::{ArtifactStore, ContentStore, RepositoryStore};
use crate::error::{Result, SyncError};
use crate::model::{ContentId, ContentRecord, NaturalKey, RepositoryVersion};

/// Content-addressed artifact directory laid out as `<root>/<digest[..2]>/<digest>`.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, digest: &str) -> Result<PathBuf> {
        if digest.len() < 2 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(SyncError::Resolution(format!(
                "'{digest}' is not a valid artifact digest"
            )));
        }
        Ok(self.root.join(&digest[..2]).join(digest))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn exists(&self, digest: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path_for(digest)?).await?)
    }

    async fn store(&self, digest: &str, bytes: Vec<u8>) -> Result<String> {
        let path = self.path_for(digest)?;
        if tokio::fs::try_exists(&path).await? {
            return Ok(digest.to_string());
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_atomic(&path, &bytes).await?;
        debug!(digest, path = %path.display(), "Stored artifact");
        Ok(digest.to_string())
    }

    async fn load(&self, digest: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(digest)?).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Repository and content store persisted as one JSON document.
///
/// The whole state is kept in memory and rewritten after every change that must
/// survive a restart: new repositories and new versions. Content records are
/// written together with the version that references them.
pub struct FileRepositoryStore {
    path: PathBuf,
    state: Mutex<RepositoryState>,
}

impl FileRepositoryStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => {
                let snapshot: Snapshot = serde_json::from_str(&raw).map_err(|e| {
                    SyncError::Config(format!("Corrupt repository file {}: {e}", path.display()))
                })?;
                RepositoryState::from_snapshot(snapshot)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RepositoryState::default(),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to read repository file");
                return Err(e.into());
            }
        };
        info!(path = %path.display(), "Opened repository store");
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Create the repository at version 0 if it does not exist yet.
    pub async fn ensure_repository(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.create_repository(name) {
            info!(repository = name, "Created repository");
            self.persist(&state).await?;
        }
        Ok(())
    }

    async fn persist(&self, state: &RepositoryState) -> Result<()> {
        let json = serde_json::to_vec_pretty(&state.to_snapshot())
            .map_err(|e| SyncError::Config(format!("Failed to serialise repositories: {e}")))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        write_atomic(&self.path, &json).await
    }
}

#[async_trait]
impl ContentStore for FileRepositoryStore {
    async fn lookup(&self, key: &NaturalKey) -> Result<Option<ContentId>> {
        Ok(self.state.lock().await.lookup(key))
    }

    async fn create(&self, record: ContentRecord) -> Result<ContentId> {
        Ok(self.state.lock().await.insert_content(record))
    }

    async fn get(&self, id: ContentId) -> Result<Option<ContentRecord>> {
        Ok(self.state.lock().await.content(id))
    }
}

#[async_trait]
impl RepositoryStore for FileRepositoryStore {
    async fn get_head_version(&self, repository: &str) -> Result<RepositoryVersion> {
        self.state.lock().await.head(repository).cloned()
    }

    async fn create_version(
        &self,
        repository: &str,
        content: BTreeSet<ContentId>,
        expected_prior: u64,
    ) -> Result<RepositoryVersion> {
        let mut state = self.state.lock().await;
        let version = state.create_version(repository, content, expected_prior)?;
        if let Err(e) = self.persist(&state).await {
            error!(repository, error = %e, "Failed to persist repository version, rolling back");
            state.pop_version(repository);
            return Err(e);
        }
        Ok(version)
    }

    async fn get_version(
        &self,
        repository: &str,
        number: u64,
    ) -> Result<Option<RepositoryVersion>> {
        Ok(self.state.lock().await.version(repository, number))
    }
}

/// Write to a sibling temp file and rename it over `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()));
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
