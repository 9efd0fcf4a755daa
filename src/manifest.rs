//! Streaming parser for `PULP_MANIFEST`-style manifests.
//!
//! Each non-blank line that does not start with `#` reads
//! `relative_path,sha256_hex_digest,size`. Entries are yielded lazily, one per
//! line, so a manifest is never held in memory as a whole.

use std::path::Path;

use futures::stream::{self, Stream};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::error::{Result, SyncError};

const SHA256_HEX_LEN: usize = 64;

/// One artifact declared by a manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    pub relative_path: String,
    /// Absolute URL. Filled in by the first stage from the remote.
    pub url: Option<String>,
    pub digest: Option<String>,
    pub size: Option<u64>,
}

/// One content unit declared by a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub relative_path: String,
    pub digest: String,
    pub artifacts: Vec<ArtifactDescriptor>,
}

/// Parse one manifest line. `Ok(None)` for blank and comment lines.
pub fn parse_line(line_no: usize, line: &str) -> Result<Option<ManifestEntry>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let [relative_path, digest, size] = fields.as_slice() else {
        return Err(SyncError::parse(
            line_no,
            format!("expected 3 comma separated fields, found {}", fields.len()),
        ));
    };

    validate_relative_path(line_no, relative_path)?;

    if digest.len() != SHA256_HEX_LEN || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(SyncError::parse(
            line_no,
            format!("'{digest}' is not a sha256 hex digest"),
        ));
    }
    let digest = digest.to_ascii_lowercase();

    let size: u64 = size
        .parse()
        .map_err(|_| SyncError::parse(line_no, format!("'{size}' is not a valid size")))?;

    Ok(Some(ManifestEntry {
        relative_path: relative_path.to_string(),
        digest: digest.clone(),
        artifacts: vec![ArtifactDescriptor {
            relative_path: relative_path.to_string(),
            url: None,
            digest: Some(digest),
            size: Some(size),
        }],
    }))
}

fn validate_relative_path(line_no: usize, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(SyncError::parse(line_no, "empty relative path"));
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(SyncError::parse(
            line_no,
            format!("'{path}' must be relative"),
        ));
    }
    if path.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(SyncError::parse(
            line_no,
            format!("'{path}' must not leave the manifest directory"),
        ));
    }
    Ok(())
}

/// Lazily parse manifest entries from a buffered reader.
///
/// The stream ends after the first error.
pub fn parse_manifest<R>(reader: R) -> impl Stream<Item = Result<ManifestEntry>>
where
    R: AsyncBufRead + Unpin,
{
    let lines = reader.lines();
    stream::unfold(Some((lines, 0usize)), |state| async move {
        let (mut lines, mut line_no) = state?;
        loop {
            line_no += 1;
            match lines.next_line().await {
                Ok(Some(line)) => match parse_line(line_no, &line) {
                    Ok(Some(entry)) => return Some((Ok(entry), Some((lines, line_no)))),
                    Ok(None) => continue,
                    Err(e) => return Some((Err(e), None)),
                },
                Ok(None) => return None,
                Err(e) => return Some((Err(SyncError::parse(line_no, e.to_string())), None)),
            }
        }
    })
}

/// Open a manifest file on disk and parse it lazily.
pub async fn read_manifest(path: &Path) -> Result<impl Stream<Item = Result<ManifestEntry>>> {
    let file = tokio::fs::File::open(path).await?;
    Ok(parse_manifest(BufReader::new(file)))
}
