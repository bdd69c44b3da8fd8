//! Settings Storage
//!
//! Handles reading/writing the settings and status files.
//! Location: ~/.rigctl on macOS/Linux, %APPDATA%\rigctl on Windows

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::types::{RigSettings, CONFIG_VERSION};
use crate::rig::{HealthSink, HealthSnapshot};

/// Settings storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Settings version {found} is newer than supported {supported}")]
    VersionTooNew { found: u32, supported: u32 },
}

/// Get the rigctl configuration directory
pub fn config_dir() -> Result<PathBuf, StorageError> {
    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            return Ok(app_data.join("rigctl"));
        }
        dirs::home_dir()
            .map(|home| home.join(".rigctl"))
            .ok_or(StorageError::NoConfigDir)
    }

    #[cfg(not(windows))]
    {
        dirs::home_dir()
            .map(|home| home.join(".rigctl"))
            .ok_or(StorageError::NoConfigDir)
    }
}

/// Get the settings file path
pub fn settings_file() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("settings.json"))
}

/// Get the persisted connection status path
pub fn status_file() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("status.json"))
}

/// Write `contents` next to `path` and rename it into place
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let temp_path = path.with_extension("json.tmp");
    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;

    fs::rename(&temp_path, path).await?;
    Ok(())
}

/// Settings storage manager
pub struct SettingsStorage {
    path: PathBuf,
}

impl SettingsStorage {
    /// Create a new storage manager with default path
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self {
            path: settings_file()?,
        })
    }

    /// Create storage manager with custom path (for testing)
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load settings from disk
    /// Returns defaults if the file doesn't exist
    /// If the file is corrupted, backs it up and returns defaults
    pub async fn load(&self) -> Result<RigSettings, StorageError> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => match serde_json::from_str::<RigSettings>(&contents) {
                Ok(settings) => {
                    if settings.version > CONFIG_VERSION {
                        return Err(StorageError::VersionTooNew {
                            found: settings.version,
                            supported: CONFIG_VERSION,
                        });
                    }
                    Ok(settings)
                }
                Err(e) => {
                    tracing::warn!("Settings file corrupted: {}", e);

                    match self.backup().await {
                        Ok(backup_path) => {
                            tracing::warn!(
                                "Corrupted settings backed up to {:?}, using defaults",
                                backup_path
                            );
                        }
                        Err(backup_err) => {
                            tracing::error!("Failed to backup corrupted settings: {}", backup_err);
                        }
                    }

                    Ok(RigSettings::default())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RigSettings::default()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Save settings to disk
    pub async fn save(&self, settings: &RigSettings) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(settings)?;
        write_atomic(&self.path, json.as_bytes()).await
    }

    /// Check if the settings file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a backup of the current settings file
    pub async fn backup(&self) -> Result<PathBuf, StorageError> {
        let backup_path = self.path.with_extension(format!(
            "json.backup.{}",
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        ));

        if self.exists().await {
            fs::copy(&self.path, &backup_path).await?;
        }

        Ok(backup_path)
    }
}

/// Health sink that persists the latest snapshot as JSON
///
/// Other processes read this file to learn whether the rig is reachable without
/// holding a connection themselves.
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self {
            path: status_file()?,
        })
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Status file in the same directory as `settings_path`
    pub fn beside(settings_path: &Path) -> Self {
        Self {
            path: settings_path.with_file_name("status.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write(&self, snapshot: &HealthSnapshot) -> Result<(), StorageError> {
        let json = serde_json::to_vec(snapshot)?;
        write_atomic(&self.path, &json).await
    }

    /// Last persisted snapshot, `None` if nothing was ever written
    pub async fn read(&self) -> Result<Option<HealthSnapshot>, StorageError> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

#[async_trait]
impl HealthSink for StatusFile {
    async fn record(&self, snapshot: HealthSnapshot) {
        if let Err(e) = self.write(&snapshot).await {
            tracing::warn!("Failed to persist connection status: {}", e);
        }
    }
}
