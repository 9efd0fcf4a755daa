//! # contract: collaborator interfaces of the sync pipeline
//!
//! The pipeline never reaches for global state. Everything it reads or writes
//! goes through one of the traits below, handed in by the caller:
//!
//! - [`Downloader`]: fetch a URL into a local file, validating digest and size
//! - [`ArtifactStore`]: content-addressed blob storage
//! - [`ContentStore`]: persisted content units, looked up by natural key
//! - [`RepositoryStore`]: immutable repository versions and the head pointer
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall` so tests can script collaborator
//!   behaviour (enabled by the default `test-export-mocks` feature).
//! - [`crate::store`] has in-memory and filesystem implementations.

use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;
use mockall::automock;

use crate::error::Result;
use crate::model::{ContentId, ContentRecord, NaturalKey, RepositoryVersion};

/// What to fetch and what the result must look like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    /// Lowercase hex SHA-256 the fetched bytes must hash to.
    pub expected_digest: Option<String>,
    pub expected_size: Option<u64>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            expected_digest: None,
            expected_size: None,
        }
    }

    pub fn with_digest(mut self, digest: Option<String>) -> Self {
        self.expected_digest = digest;
        self
    }

    pub fn with_size(mut self, size: Option<u64>) -> Self {
        self.expected_size = size;
        self
    }
}

/// A fetched resource on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalResource {
    pub path: PathBuf,
    /// Lowercase hex SHA-256 of the file contents.
    pub digest: String,
    pub size: u64,
}

/// Fetches remote resources. Implementations retry transient failures themselves.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<LocalResource>;
}

/// Content-addressed blob storage keyed by SHA-256 digest.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn exists(&self, digest: &str) -> Result<bool>;

    /// Store bytes under their digest and return the digest. Storing an existing digest is a no-op.
    async fn store(&self, digest: &str, bytes: Vec<u8>) -> Result<String>;

    async fn load(&self, digest: &str) -> Result<Option<Vec<u8>>>;
}

/// Persisted content units. Natural keys are unique across the store.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn lookup(&self, key: &NaturalKey) -> Result<Option<ContentId>>;

    /// Persist a record. If its natural key is already stored, the existing id is
    /// returned and the record is discarded.
    async fn create(&self, record: ContentRecord) -> Result<ContentId>;

    async fn get(&self, id: ContentId) -> Result<Option<ContentRecord>>;
}

/// Repository version history.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RepositoryStore: Send + Sync {
    async fn get_head_version(&self, repository: &str) -> Result<RepositoryVersion>;

    /// Publish `content` as the next version, provided the head is still `expected_prior`.
    /// Fails with `SyncError::VersionConflict` when the head moved.
    async fn create_version(
        &self,
        repository: &str,
        content: BTreeSet<ContentId>,
        expected_prior: u64,
    ) -> Result<RepositoryVersion>;

    async fn get_version(&self, repository: &str, number: u64)
        -> Result<Option<RepositoryVersion>>;
}
