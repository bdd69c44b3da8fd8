//! Configuration Management Module
//!
//! Persistent rig settings and the connection status file.

pub mod storage;
pub mod types;

pub use storage::{config_dir, settings_file, status_file, SettingsStorage, StatusFile, StorageError};
pub use types::{RigSettings, CONFIG_VERSION};
