use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::contract::{ArtifactStore, ContentStore, RepositoryStore};
use crate::error::{Result, SyncError};
use crate::model::{ContentId, ContentRecord, NaturalKey, RepositoryVersion};

#[derive(Default)]
pub struct MemoryArtifactStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn exists(&self, digest: &str) -> Result<bool> {
        Ok(self.blobs.read().await.contains_key(digest))
    }

    async fn store(&self, digest: &str, bytes: Vec<u8>) -> Result<String> {
        self.blobs
            .write()
            .await
            .entry(digest.to_string())
            .or_insert(bytes);
        Ok(digest.to_string())
    }

    async fn load(&self, digest: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(digest).cloned())
    }
}

/// Serialisable form of [`RepositoryState`].
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub repositories: BTreeMap<String, Vec<RepositoryVersion>>,
    pub content: Vec<ContentRecord>,
}

/// Repositories with their version history, and every content record.
#[derive(Debug, Default)]
pub struct RepositoryState {
    repositories: BTreeMap<String, Vec<RepositoryVersion>>,
    content: HashMap<ContentId, ContentRecord>,
    keys: HashMap<NaturalKey, ContentId>,
}

impl RepositoryState {
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut state = RepositoryState {
            repositories: snapshot.repositories,
            ..RepositoryState::default()
        };
        for record in snapshot.content {
            state.insert_content(record);
        }
        state
    }

    pub fn to_snapshot(&self) -> Snapshot {
        let mut content: Vec<ContentRecord> = self.content.values().cloned().collect();
        content.sort_by(|a, b| a.unit.key().cmp(&b.unit.key()));
        Snapshot {
            repositories: self.repositories.clone(),
            content,
        }
    }

    /// Create a repository at version 0. Returns false if it already exists.
    pub fn create_repository(&mut self, name: &str) -> bool {
        if self.repositories.contains_key(name) {
            return false;
        }
        self.repositories
            .insert(name.to_string(), vec![RepositoryVersion::initial(name)]);
        true
    }

    pub fn head(&self, repository: &str) -> Result<&RepositoryVersion> {
        self.repositories
            .get(repository)
            .and_then(|versions| versions.last())
            .ok_or_else(|| SyncError::Config(format!("Unknown repository '{repository}'")))
    }

    pub fn create_version(
        &mut self,
        repository: &str,
        content: BTreeSet<ContentId>,
        expected_prior: u64,
    ) -> Result<RepositoryVersion> {
        let head = self.head(repository)?.number;
        if head != expected_prior {
            return Err(SyncError::VersionConflict {
                repository: repository.to_string(),
                expected: expected_prior,
                actual: head,
            });
        }
        if let Some(missing) = content.iter().find(|id| !self.content.contains_key(id)) {
            return Err(SyncError::Resolution(format!(
                "version references unknown content {missing}"
            )));
        }

        let version = RepositoryVersion {
            repository: repository.to_string(),
            number: head + 1,
            content,
        };
        if let Some(versions) = self.repositories.get_mut(repository) {
            versions.push(version.clone());
        }
        Ok(version)
    }

    /// Undo the latest version. Used when persisting it failed.
    pub(crate) fn pop_version(&mut self, repository: &str) {
        if let Some(versions) = self.repositories.get_mut(repository) {
            if versions.len() > 1 {
                versions.pop();
            }
        }
    }

    pub fn version(&self, repository: &str, number: u64) -> Option<RepositoryVersion> {
        self.repositories
            .get(repository)
            .and_then(|versions| versions.iter().find(|v| v.number == number))
            .cloned()
    }

    pub fn lookup(&self, key: &NaturalKey) -> Option<ContentId> {
        self.keys.get(key).copied()
    }

    /// Insert a record unless its key is taken; returns the id stored under the key.
    pub fn insert_content(&mut self, record: ContentRecord) -> ContentId {
        let key = record.unit.key();
        if let Some(existing) = self.keys.get(&key) {
            return *existing;
        }
        let id = record.id;
        self.keys.insert(key, id);
        self.content.insert(id, record);
        id
    }

    pub fn content(&self, id: ContentId) -> Option<ContentRecord> {
        self.content.get(&id).cloned()
    }

    pub fn content_count(&self) -> usize {
        self.content.len()
    }
}

#[derive(Default)]
pub struct MemoryRepositoryStore {
    state: Mutex<RepositoryState>,
}

impl MemoryRepositoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_repository(&self, name: &str) -> bool {
        self.state.lock().await.create_repository(name)
    }

    pub async fn content_count(&self) -> usize {
        self.state.lock().await.content_count()
    }
}

#[async_trait]
impl ContentStore for MemoryRepositoryStore {
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
impl RepositoryStore for MemoryRepositoryStore {
    async fn get_head_version(&self, repository: &str) -> Result<RepositoryVersion> {
        self.state.lock().await.head(repository).cloned()
    }

    async fn create_version(
        &self,
        repository: &str,
        content: BTreeSet<ContentId>,
        expected_prior: u64,
    ) -> Result<RepositoryVersion> {
        self.state
            .lock()
            .await
            .create_version(repository, content, expected_prior)
    }

    async fn get_version(
        &self,
        repository: &str,
        number: u64,
    ) -> Result<Option<RepositoryVersion>> {
        Ok(self.state.lock().await.version(repository, number))
    }
}
