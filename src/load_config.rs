use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;
use tracing::{error, info};

use crate::config::PipelineConfig;
use crate::model::Remote;

/// Overrides `storage_dir` from the config file when set.
pub const STORAGE_DIR_ENV: &str = "CONTENT_SYNC_STORAGE_DIR";

/// Everything a CLI sync run needs, as read from the YAML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub storage_dir: PathBuf,
    pub repository: String,
    #[serde(default)]
    pub mirror: bool,
    pub remote: Remote,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl SyncConfig {
    pub fn artifacts_dir(&self) -> PathBuf {
        self.storage_dir.join("artifacts")
    }

    pub fn repositories_file(&self) -> PathBuf {
        self.storage_dir.join("repositories.json")
    }
}

/// Loads a YAML config file and applies environment overrides.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SyncConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let mut config: SyncConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => conf,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if let Ok(dir) = std::env::var(STORAGE_DIR_ENV) {
        if !dir.trim().is_empty() {
            info!(storage_dir = %dir, "{STORAGE_DIR_ENV} overrides storage_dir");
            config.storage_dir = PathBuf::from(dir);
        }
    }

    if config.repository.trim().is_empty() {
        error!(config_path = ?path_ref, "Config names no repository");
        anyhow::bail!("Config must name a repository");
    }
    if let Err(e) = config.remote.validate() {
        error!(error = %e, remote = %config.remote.id, "Invalid remote in config");
        return Err(e.into());
    }

    config.pipeline.trace_loaded();
    info!(
        repository = %config.repository,
        remote = %config.remote.id,
        storage_dir = %config.storage_dir.display(),
        mirror = config.mirror,
        "Config loaded successfully"
    );
    Ok(config)
}
