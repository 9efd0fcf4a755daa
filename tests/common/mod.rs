#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use content_sync::config::PipelineConfig;
use content_sync::contract::{ContentStore, Downloader, FetchRequest, LocalResource};
use content_sync::download::HttpDownloader;
use content_sync::model::{ContentId, ContentRecord, DownloadPolicy, NaturalKey, Remote};
use content_sync::store::{MemoryArtifactStore, MemoryRepositoryStore};
use content_sync::{Result, SyncError, Synchroniser};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

pub const REPO: &str = "repo";
pub const MANIFEST: &str = "PULP_MANIFEST";

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// A directory of files plus manifests describing them, reachable over `file://`.
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    /// Write `files` under `<dir>/<name>/` with a manifest listing them in order.
    pub fn remote(&self, name: &str, files: &[(&str, &[u8])], policy: DownloadPolicy) -> Remote {
        let root = self.dir.path().join(name);
        let mut manifest = String::from("# relative_path,sha256,size\n");
        for (path, bytes) in files {
            let target = root.join(path);
            std::fs::create_dir_all(target.parent().expect("parent")).expect("mkdir");
            std::fs::write(&target, bytes).expect("write fixture file");
            manifest.push_str(&format!("{path},{},{}\n", sha256_hex(bytes), bytes.len()));
        }
        self.remote_with_manifest(name, &manifest, policy)
    }

    /// Write a raw manifest under `<dir>/<name>/`.
    pub fn remote_with_manifest(
        &self,
        name: &str,
        manifest: &str,
        policy: DownloadPolicy,
    ) -> Remote {
        let root = self.dir.path().join(name);
        std::fs::create_dir_all(&root).expect("mkdir");
        let manifest_path = root.join(MANIFEST);
        std::fs::write(&manifest_path, manifest).expect("write manifest");
        Remote::new(name, file_url(&manifest_path), policy)
    }
}

pub fn file_url(path: &Path) -> String {
    reqwest::Url::from_file_path(path)
        .expect("absolute path")
        .to_string()
}

pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        queue_capacity: 4,
        resolver_workers: 4,
        download_workers: 4,
        retry_base_delay_ms: 1,
        ..PipelineConfig::default()
    }
}

/// Wraps the real downloader, counting artifact fetches and failing chosen urls.
pub struct CountingDownloader {
    inner: HttpDownloader,
    artifact_fetches: AtomicUsize,
    fail_matching: Option<String>,
}

impl CountingDownloader {
    pub fn new() -> Self {
        Self {
            inner: HttpDownloader::new(&fast_config()).expect("downloader"),
            artifact_fetches: AtomicUsize::new(0),
            fail_matching: None,
        }
    }

    /// Fail every fetch whose url ends with `suffix`, as a dropped connection would.
    pub fn failing(suffix: &str) -> Self {
        Self {
            fail_matching: Some(suffix.to_string()),
            ..Self::new()
        }
    }

    pub fn artifact_fetches(&self) -> usize {
        self.artifact_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downloader for CountingDownloader {
    async fn fetch(&self, request: &FetchRequest) -> Result<LocalResource> {
        if !request.url.ends_with(MANIFEST) {
            self.artifact_fetches.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(suffix) = &self.fail_matching {
            if request.url.ends_with(suffix.as_str()) {
                return Err(SyncError::download(&request.url, "connection reset by peer"));
            }
        }
        self.inner.fetch(request).await
    }
}

/// Wraps a content store, counting creations.
pub struct CountingContentStore {
    inner: Arc<MemoryRepositoryStore>,
    creates: AtomicUsize,
}

impl CountingContentStore {
    pub fn new(inner: Arc<MemoryRepositoryStore>) -> Self {
        Self {
            inner,
            creates: AtomicUsize::new(0),
        }
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentStore for CountingContentStore {
    async fn lookup(&self, key: &NaturalKey) -> Result<Option<ContentId>> {
        self.inner.lookup(key).await
    }

    async fn create(&self, record: ContentRecord) -> Result<ContentId> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create(record).await
    }

    async fn get(&self, id: ContentId) -> Result<Option<ContentRecord>> {
        self.inner.get(id).await
    }
}

/// Memory stores with one empty repository, and a synchroniser over them.
pub struct Harness {
    pub downloader: Arc<CountingDownloader>,
    pub artifacts: Arc<MemoryArtifactStore>,
    pub repositories: Arc<MemoryRepositoryStore>,
    pub content: Arc<CountingContentStore>,
    pub synchroniser: Synchroniser,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_downloader(CountingDownloader::new()).await
    }

    pub async fn with_downloader(downloader: CountingDownloader) -> Self {
        let downloader = Arc::new(downloader);
        let artifacts = Arc::new(MemoryArtifactStore::new());
        let repositories = Arc::new(MemoryRepositoryStore::new());
        repositories.create_repository(REPO).await;
        let content = Arc::new(CountingContentStore::new(repositories.clone()));

        let synchroniser = Synchroniser::new(
            downloader.clone(),
            artifacts.clone(),
            content.clone(),
            repositories.clone(),
            fast_config(),
        );
        Self {
            downloader,
            artifacts,
            repositories,
            content,
            synchroniser,
        }
    }

    /// Relative paths of the content in a version, sorted.
    pub async fn paths(&self, content: &std::collections::BTreeSet<ContentId>) -> Vec<String> {
        let mut paths = Vec::new();
        for id in content {
            let record = self
                .repositories
                .get(*id)
                .await
                .expect("content store")
                .expect("content referenced by a version exists");
            paths.push(record.unit.relative_path);
        }
        paths.sort();
        paths
    }
}
