//! Data model of a sync run: remotes, content units, declarative content and repository versions.
//!
//! `DeclarativeContent` and `DeclarativeArtifact` only live while a pipeline is
//! running. `ContentRecord` and `RepositoryVersion` are what the stores persist.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SyncError};

/// When artifact bytes are fetched for newly created content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadPolicy {
    /// Fetch every artifact during the sync.
    #[default]
    Immediate,
    /// Defer bytes until first access, then keep them in the artifact store.
    OnDemand,
    /// Defer bytes until first access and never keep them.
    Streamed,
}

impl DownloadPolicy {
    pub fn downloads_during_sync(self) -> bool {
        self == DownloadPolicy::Immediate
    }

    /// Whether bytes fetched on first access are written to the artifact store.
    pub fn caches_on_access(self) -> bool {
        self != DownloadPolicy::Streamed
    }
}

impl FromStr for DownloadPolicy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "immediate" | "IMMEDIATE" => Ok(DownloadPolicy::Immediate),
            "on_demand" | "on-demand" | "ON_DEMAND" => Ok(DownloadPolicy::OnDemand),
            "streamed" | "STREAMED" => Ok(DownloadPolicy::Streamed),
            other => Err(SyncError::Config(format!("Unknown download policy '{other}'"))),
        }
    }
}

/// Where content comes from and how its artifacts are fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    pub id: String,
    /// URL of the manifest. Artifact URLs are resolved relative to it.
    pub url: String,
    #[serde(default)]
    pub policy: DownloadPolicy,
    /// Overrides the pipeline's artifact download concurrency for this remote.
    #[serde(default)]
    pub download_concurrency: Option<usize>,
}

impl Remote {
    pub fn new(id: impl Into<String>, url: impl Into<String>, policy: DownloadPolicy) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            policy,
            download_concurrency: None,
        }
    }

    /// A remote can only be synced from if its url is set and uses a supported scheme.
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(SyncError::Config(
                "A remote must have a url specified to synchronise".into(),
            ));
        }
        let url = self.parsed_url()?;
        match url.scheme() {
            "http" | "https" | "file" => Ok(()),
            other => Err(SyncError::Config(format!(
                "Remote '{}' uses unsupported url scheme '{other}'",
                self.id
            ))),
        }
    }

    /// Resolve an artifact path from the manifest against the manifest's location.
    pub fn artifact_url(&self, relative_path: &str) -> Result<String> {
        let joined = self.parsed_url()?.join(relative_path).map_err(|e| {
            SyncError::Config(format!(
                "Cannot resolve '{relative_path}' against remote url '{}': {e}",
                self.url
            ))
        })?;
        Ok(joined.to_string())
    }

    fn parsed_url(&self) -> Result<Url> {
        Url::parse(self.url.trim()).map_err(|e| {
            SyncError::Config(format!(
                "Remote '{}' has an invalid url '{}': {e}",
                self.id, self.url
            ))
        })
    }
}

/// Logical identity of a content unit. Excludes all artifact and storage state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NaturalKey {
    pub relative_path: String,
    pub digest: String,
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.relative_path, self.digest)
    }
}

/// One syncable file-like item, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentUnit {
    pub relative_path: String,
    pub digest: String,
}

impl ContentUnit {
    pub fn key(&self) -> NaturalKey {
        NaturalKey {
            relative_path: self.relative_path.clone(),
            digest: self.digest.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(Uuid);

impl ContentId {
    pub fn new() -> Self {
        ContentId(Uuid::new_v4())
    }
}

impl Default for ContentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactState {
    /// Not yet looked at by the artifact stage.
    Pending,
    /// Already in the artifact store; nothing fetched.
    Present,
    /// Fetched and stored during this run.
    Downloaded,
    /// Left for on-demand retrieval.
    Deferred,
}

/// An artifact of a content unit together with what is needed to fetch it later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclarativeArtifact {
    pub relative_path: String,
    pub url: String,
    pub digest: Option<String>,
    pub size: Option<u64>,
    pub remote_id: String,
    pub state: ArtifactState,
}

impl DeclarativeArtifact {
    pub fn to_remote_artifact(&self, policy: DownloadPolicy) -> RemoteArtifact {
        RemoteArtifact {
            relative_path: self.relative_path.clone(),
            url: self.url.clone(),
            digest: self.digest.clone(),
            size: self.size,
            remote_id: self.remote_id.clone(),
            policy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionKind {
    /// No stored content had this key; this unit creates it.
    Created,
    /// Content with this key was already stored; associate only.
    Existing,
    /// Another unit in the same run claimed this key first.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub id: ContentId,
    pub kind: ResolutionKind,
}

/// A content unit in flight through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclarativeContent {
    pub content: ContentUnit,
    pub d_artifacts: Vec<DeclarativeArtifact>,
    pub resolution: Option<Resolution>,
}

impl DeclarativeContent {
    pub fn new(content: ContentUnit, d_artifacts: Vec<DeclarativeArtifact>) -> Self {
        Self {
            content,
            d_artifacts,
            resolution: None,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(
            self.resolution,
            Some(Resolution {
                kind: ResolutionKind::Created,
                ..
            })
        )
    }

    pub fn content_id(&self) -> Option<ContentId> {
        self.resolution.map(|r| r.id)
    }
}

/// Where an artifact can be fetched from after the sync that declared it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteArtifact {
    pub relative_path: String,
    pub url: String,
    pub digest: Option<String>,
    pub size: Option<u64>,
    pub remote_id: String,
    pub policy: DownloadPolicy,
}

/// A persisted content unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: ContentId,
    pub unit: ContentUnit,
    pub artifacts: Vec<RemoteArtifact>,
}

/// An immutable snapshot of a repository's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryVersion {
    pub repository: String,
    pub number: u64,
    pub content: BTreeSet<ContentId>,
}

impl RepositoryVersion {
    /// Version 0 of every repository: no content.
    pub fn initial(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            number: 0,
            content: BTreeSet::new(),
        }
    }
}
