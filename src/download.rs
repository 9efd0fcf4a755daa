//! Fetching of manifests and artifacts.
//!
//! [`HttpDownloader`] handles `http://`, `https://` and `file://` URLs. Bodies are
//! streamed to a uuid-named file in a private temporary directory while their
//! SHA-256 is computed, so neither manifests nor artifacts are held in memory.
//!
//! Transient failures (connection errors, timeouts, HTTP 5xx and 429) are retried
//! with exponential backoff. Anything else, including digest and size
//! mismatches, fails the fetch immediately.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::contract::{Downloader, FetchRequest, LocalResource};
use crate::error::{Result, SyncError};

/// Buffer size for local file copies (8 KB)
const STREAM_BUFFER_SIZE: usize = 8192;

/// Upper bound on the backoff multiplier.
const MAX_BACKOFF_SHIFT: u32 = 10;

enum FetchFailure {
    Transient(String),
    Fatal(String),
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt - 1)`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
    base * (1u32 << shift)
}

/// Check a fetched resource against what the request declared.
pub fn verify_resource(request: &FetchRequest, digest: &str, size: u64) -> Result<()> {
    if let Some(expected) = request.expected_size {
        if expected != size {
            return Err(SyncError::download(
                &request.url,
                format!("size mismatch: expected {expected} bytes, got {size}"),
            ));
        }
    }
    if let Some(expected) = &request.expected_digest {
        if !expected.eq_ignore_ascii_case(digest) {
            return Err(SyncError::download(
                &request.url,
                format!("digest mismatch: expected {expected}, got {digest}"),
            ));
        }
    }
    Ok(())
}

pub struct HttpDownloader {
    client: reqwest::Client,
    workdir: TempDir,
    max_attempts: u32,
    base_delay: Duration,
}

impl HttpDownloader {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to create HTTP client: {e}")))?;
        let workdir = tempfile::Builder::new().prefix("content-sync-").tempdir()?;
        debug!(path = %workdir.path().display(), "Created download working directory");

        Ok(Self {
            client,
            workdir,
            max_attempts: config.download_attempts(),
            base_delay: config.retry_base_delay(),
        })
    }

    async fn fetch_once(
        &self,
        url: &Url,
        dest: &Path,
    ) -> std::result::Result<(String, u64), FetchFailure> {
        match url.scheme() {
            "file" => fetch_file(url, dest).await,
            "http" | "https" => self.fetch_http(url, dest).await,
            other => Err(FetchFailure::Fatal(format!("unsupported url scheme '{other}'"))),
        }
    }

    async fn fetch_http(
        &self,
        url: &Url,
        dest: &Path,
    ) -> std::result::Result<(String, u64), FetchFailure> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let reason = format!("HTTP {status}");
            return Err(if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                FetchFailure::Transient(reason)
            } else {
                FetchFailure::Fatal(reason)
            });
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| FetchFailure::Fatal(format!("cannot create {}: {e}", dest.display())))?;
        let mut hasher = Sha256::new();
        let mut size: u64 = 0;

        while let Some(chunk) = response.chunk().await.map_err(classify_reqwest_error)? {
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| FetchFailure::Fatal(format!("failed to write data: {e}")))?;
            size += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| FetchFailure::Fatal(format!("failed to flush data: {e}")))?;

        Ok((format!("{:x}", hasher.finalize()), size))
    }
}

async fn fetch_file(url: &Url, dest: &Path) -> std::result::Result<(String, u64), FetchFailure> {
    let source = url
        .to_file_path()
        .map_err(|_| FetchFailure::Fatal("url is not a local file path".into()))?;
    let mut input = tokio::fs::File::open(&source)
        .await
        .map_err(|e| FetchFailure::Fatal(format!("cannot open {}: {e}", source.display())))?;
    let mut output = tokio::fs::File::create(dest)
        .await
        .map_err(|e| FetchFailure::Fatal(format!("cannot create {}: {e}", dest.display())))?;

    let mut hasher = Sha256::new();
    let mut size: u64 = 0;
    let mut buffer = vec![0u8; STREAM_BUFFER_SIZE];
    loop {
        let read = input
            .read(&mut buffer)
            .await
            .map_err(|e| FetchFailure::Fatal(format!("failed to read {}: {e}", source.display())))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        output
            .write_all(&buffer[..read])
            .await
            .map_err(|e| FetchFailure::Fatal(format!("failed to write data: {e}")))?;
        size += read as u64;
    }
    output
        .flush()
        .await
        .map_err(|e| FetchFailure::Fatal(format!("failed to flush data: {e}")))?;

    Ok((format!("{:x}", hasher.finalize()), size))
}

fn classify_reqwest_error(e: reqwest::Error) -> FetchFailure {
    if e.is_timeout() || e.is_connect() || e.is_body() {
        FetchFailure::Transient(e.to_string())
    } else {
        FetchFailure::Fatal(e.to_string())
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, request: &FetchRequest) -> Result<LocalResource> {
        let url = Url::parse(&request.url)
            .map_err(|e| SyncError::download(&request.url, format!("invalid url: {e}")))?;
        let dest = self.workdir.path().join(Uuid::new_v4().to_string());

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fetch_once(&url, &dest).await {
                Ok((digest, size)) => {
                    if let Err(e) = verify_resource(request, &digest, size) {
                        let _ = tokio::fs::remove_file(&dest).await;
                        return Err(e);
                    }
                    info!(url = %request.url, size, attempt, "[SYNC][DOWNLOAD] Fetched resource");
                    return Ok(LocalResource {
                        path: dest,
                        digest,
                        size,
                    });
                }
                Err(FetchFailure::Transient(reason)) if attempt < self.max_attempts => {
                    let delay = backoff_delay(self.base_delay, attempt);
                    warn!(
                        url = %request.url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "[SYNC][DOWNLOAD] Fetch attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(FetchFailure::Transient(reason)) => {
                    let _ = tokio::fs::remove_file(&dest).await;
                    return Err(SyncError::download(
                        &request.url,
                        format!("giving up after {attempt} attempts: {reason}"),
                    ));
                }
                Err(FetchFailure::Fatal(reason)) => {
                    let _ = tokio::fs::remove_file(&dest).await;
                    return Err(SyncError::download(&request.url, reason));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            download_retries: 3,
            retry_base_delay_ms: 1,
            timeout_secs: 5,
            ..PipelineConfig::default()
        }
    }

    /// Serve the given raw HTTP responses, one per connection, in order.
    async fn serve(responses: Vec<&'static str>) -> (String, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            for response in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{addr}/hello.txt"), hits)
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 4), Duration::from_millis(800));
    }

    #[test]
    fn verify_rejects_size_and_digest_mismatch() {
        let request = FetchRequest::new("file:///x").with_size(Some(3));
        assert!(verify_resource(&request, HELLO_SHA256, 5).is_err());

        let request = FetchRequest::new("file:///x").with_digest(Some("00".repeat(32)));
        assert!(verify_resource(&request, HELLO_SHA256, 5).is_err());

        let request = FetchRequest::new("file:///x")
            .with_digest(Some(HELLO_SHA256.to_uppercase()))
            .with_size(Some(5));
        assert!(verify_resource(&request, HELLO_SHA256, 5).is_ok());
    }

    #[tokio::test]
    async fn fetches_local_files_with_digest() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("hello.txt");
        std::fs::write(&source, b"hello").unwrap();
        let url = Url::from_file_path(&source).unwrap().to_string();

        let downloader = HttpDownloader::new(&fast_config()).unwrap();
        let resource = downloader
            .fetch(&FetchRequest::new(url).with_digest(Some(HELLO_SHA256.into())))
            .await
            .expect("local fetch should succeed");

        assert_eq!(resource.digest, HELLO_SHA256);
        assert_eq!(resource.size, 5);
        assert_eq!(std::fs::read(&resource.path).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn missing_local_file_is_a_download_error() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::from_file_path(dir.path().join("absent")).unwrap().to_string();
        let downloader = HttpDownloader::new(&fast_config()).unwrap();
        let err = downloader.fetch(&FetchRequest::new(url)).await.unwrap_err();
        assert!(matches!(err, SyncError::Download { .. }));
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let (url, hits) = serve(vec![
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        ])
        .await;

        let downloader = HttpDownloader::new(&fast_config()).unwrap();
        let resource = downloader
            .fetch(&FetchRequest::new(url).with_size(Some(5)))
            .await
            .expect("second attempt should succeed");

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(resource.digest, HELLO_SHA256);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let (url, hits) = serve(vec![
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        ])
        .await;

        let downloader = HttpDownloader::new(&fast_config()).unwrap();
        let err = downloader.fetch(&FetchRequest::new(url)).await.unwrap_err();

        assert!(matches!(err, SyncError::Download { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_bounded_attempts() {
        let unavailable =
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
        let (url, hits) = serve(vec![unavailable, unavailable, unavailable, unavailable]).await;

        let downloader = HttpDownloader::new(&fast_config()).unwrap();
        let err = downloader.fetch(&FetchRequest::new(url)).await.unwrap_err();

        assert!(err.to_string().contains("giving up after 3 attempts"));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    /// Accept connections and hold them open without ever answering.
    async fn serve_silently() -> (String, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(socket);
            }
        });
        (format!("http://{addr}/hello.txt"), hits)
    }

    #[tokio::test]
    async fn silent_server_times_out_after_bounded_attempts() {
        let (url, hits) = serve_silently().await;
        let config = PipelineConfig {
            download_retries: 2,
            retry_base_delay_ms: 1,
            timeout_secs: 1,
            ..PipelineConfig::default()
        };

        let downloader = HttpDownloader::new(&config).unwrap();
        let err = tokio::time::timeout(
            Duration::from_secs(10),
            downloader.fetch(&FetchRequest::new(url)),
        )
        .await
        .expect("fetch must give up on its own")
        .unwrap_err();

        assert!(matches!(err, SyncError::Download { .. }));
        assert!(err.to_string().contains("giving up after 2 attempts"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
