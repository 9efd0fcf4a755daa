use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::contract::{ContentStore, RepositoryStore};
use crate::download::HttpDownloader;
use crate::load_config::{load_config, SyncConfig};
use crate::model::{ContentId, ContentRecord, DownloadPolicy};
use crate::store::{FileRepositoryStore, FsArtifactStore};
use crate::synchronise::Synchroniser;

/// CLI for content-sync: mirror a remote manifest into versioned local repositories.
#[derive(Parser)]
#[clap(
    name = "content-sync",
    version,
    about = "Synchronise remote content manifests into versioned local repositories"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sync the configured remote into the configured repository
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Publish exactly the remote's content, dropping anything not in the manifest
        #[clap(long)]
        mirror: bool,
        /// Override the remote's download policy: immediate, on_demand or streamed
        #[clap(long)]
        policy: Option<DownloadPolicy>,
    },
    /// Print the content of a repository version
    Show {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Version number; the latest version when omitted
        #[clap(long)]
        version: Option<u64>,
    },
}

#[derive(Serialize)]
struct VersionListing {
    repository: String,
    version: u64,
    content: Vec<ListedContent>,
}

#[derive(Serialize)]
struct ListedContent {
    id: ContentId,
    relative_path: String,
    digest: String,
    artifacts: usize,
}

impl From<ContentRecord> for ListedContent {
    fn from(record: ContentRecord) -> Self {
        Self {
            id: record.id,
            relative_path: record.unit.relative_path,
            digest: record.unit.digest,
            artifacts: record.artifacts.len(),
        }
    }
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync {
            config,
            mirror,
            policy,
        } => {
            let mut config = load_config(config)?;
            if let Some(policy) = policy {
                tracing::info!(?policy, "Download policy overridden on the command line");
                config.remote.policy = policy;
            }
            sync(&config, mirror || config.mirror).await
        }
        Commands::Show { config, version } => {
            let config = load_config(config)?;
            show(&config, version).await
        }
    }
}

async fn sync(config: &SyncConfig, mirror: bool) -> Result<()> {
    let artifacts = Arc::new(FsArtifactStore::open(config.artifacts_dir()).await?);
    let repositories = Arc::new(FileRepositoryStore::open(config.repositories_file()).await?);
    repositories.ensure_repository(&config.repository).await?;
    let downloader = Arc::new(HttpDownloader::new(&config.pipeline)?);

    let synchroniser = Synchroniser::new(
        downloader,
        artifacts,
        repositories.clone(),
        repositories,
        config.pipeline.clone(),
    );

    println!("Synchronise starting...");
    match synchroniser
        .synchronise(&config.remote, &config.repository, mirror)
        .await
    {
        Ok(report) => {
            println!("Synchronise complete.");
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("[ERROR] Synchronisation failed: {}", e);
            Err(anyhow::Error::new(e))
        }
    }
}

async fn show(config: &SyncConfig, version: Option<u64>) -> Result<()> {
    let repositories = FileRepositoryStore::open(config.repositories_file()).await?;
    let version = match version {
        Some(number) => repositories
            .get_version(&config.repository, number)
            .await?
            .ok_or_else(|| {
                anyhow::anyhow!("Repository '{}' has no version {number}", config.repository)
            })?,
        None => repositories.get_head_version(&config.repository).await?,
    };

    let mut content = Vec::with_capacity(version.content.len());
    for id in &version.content {
        match repositories.get(*id).await? {
            Some(record) => content.push(ListedContent::from(record)),
            None => anyhow::bail!("Version {} references missing content {id}", version.number),
        }
    }
    content.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    let listing = VersionListing {
        repository: version.repository,
        version: version.number,
        content,
    };
    println!("{}", serde_json::to_string_pretty(&listing)?);
    Ok(())
}
