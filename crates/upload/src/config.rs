//! Uploader configuration.
//!
//! Read from `<config_dir>/seqlift/config.json`; every field is optional and
//! falls back to its default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use seqlift_transfer::{MAX_CHUNK_SIZE, MIN_CHUNK_SIZE, RetryPolicy};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::UploadError;

const APP_DIR: &str = "seqlift";

/// Settings of the upload engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    /// Base URL of the resumable upload service.
    pub upload_endpoint: String,
    /// URL metadata submissions are posted to.
    pub metadata_endpoint: String,
    /// Root of the per-user metadata backups.
    pub backup_dir: PathBuf,
    /// File name prefix of sequence archives.
    pub archive_prefix: String,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub max_retries: u32,
    pub max_backoff_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            upload_endpoint: "https://upload.seqlift.io/v1/sessions".into(),
            metadata_endpoint: "https://api.seqlift.io/v1/uploads/metadata".into(),
            backup_dir: default_backup_dir(),
            archive_prefix: "seqlift".into(),
            min_chunk_size: MIN_CHUNK_SIZE,
            max_chunk_size: MAX_CHUNK_SIZE,
            max_retries: 200,
            max_backoff_secs: 16,
            request_timeout_secs: 60,
        }
    }
}

impl UploaderConfig {
    /// Loads the default config file, or defaults when it does not exist.
    pub fn load() -> Result<Self, UploadError> {
        match default_config_path() {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("no config directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Loads `path`. A missing file yields defaults; an unparsable one is
    /// reported and ignored.
    pub fn load_from(path: &Path) -> Result<Self, UploadError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str::<Self>(&content) {
            Ok(config) => {
                debug!(path = %path.display(), "config loaded");
                Ok(config)
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config, using defaults"
                );
                Ok(Self::default())
            }
        }
    }

    /// Writes the config to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), UploadError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.min_chunk_size == 0 {
            return Err(UploadError::Config("min_chunk_size must be positive".into()));
        }
        if self.max_chunk_size < self.min_chunk_size {
            return Err(UploadError::Config(format!(
                "max_chunk_size {} is below min_chunk_size {}",
                self.max_chunk_size, self.min_chunk_size
            )));
        }
        if self.archive_prefix.is_empty() {
            return Err(UploadError::Config("archive_prefix must not be empty".into()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            max_backoff: Duration::from_secs(self.max_backoff_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// `<config_dir>/seqlift/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join(APP_DIR).join("config.json"))
}

/// `<config_dir>/seqlift/user.json`: the stored user credential record.
pub fn default_credentials_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join(APP_DIR).join("user.json"))
}

fn default_backup_dir() -> PathBuf {
    config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join("configs")
}

/// Returns the platform-specific config directory.
fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    }
}
