//! User settings for apkvault
//!
//! Where backups and staging live on the device, how privileged the process
//! is, and the defaults the CLI applies to a restore request.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::paths::VaultPaths;
use crate::archive::ExtractStrategy;
use crate::backup::BackupFlags;
use crate::error::RestoreError;

/// User settings for apkvault
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Root of the backup tree; `VaultPaths::backup_dir` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_root: Option<PathBuf>,

    /// Where APKs are staged before installation when running privileged
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Android keystore directory
    #[serde(default = "default_keystore_root")]
    pub keystore_root: PathBuf,

    /// Force privileged mode on or off; detected from the effective UID when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privileged: Option<bool>,

    /// Override the SDK level reported by the device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk_int: Option<u32>,

    /// Categories restored when the CLI is given none
    #[serde(default = "BackupFlags::restore_all")]
    pub default_flags: BackupFlags,

    /// Log filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub extract_strategy: ExtractStrategy,

    /// Record every restore outcome in the journal
    #[serde(default = "default_true")]
    pub journal_enabled: bool,
}

fn default_schema_version() -> u32 {
    1
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("/data/local/tmp")
}

fn default_keystore_root() -> PathBuf {
    PathBuf::from("/data/misc/keystore")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            backup_root: None,
            staging_dir: default_staging_dir(),
            keystore_root: default_keystore_root(),
            privileged: None,
            sdk_int: None,
            default_flags: BackupFlags::restore_all(),
            log_level: default_log_level(),
            extract_strategy: ExtractStrategy::default(),
            journal_enabled: true,
        }
    }
}

impl Settings {
    /// Backup root to use, falling back to the vault's own directory
    pub fn backup_root(&self, paths: &VaultPaths) -> PathBuf {
        self.backup_root.clone().unwrap_or_else(|| paths.backup_dir())
    }

    /// Whether the process may use privileged paths and commands
    pub fn is_privileged(&self) -> bool {
        self.privileged
            .unwrap_or_else(|| nix::unistd::geteuid().is_root())
    }

    /// Load settings from disk, or create default settings if file doesn't exist
    pub fn load_or_create(paths: &VaultPaths) -> Result<Self, RestoreError> {
        let settings_path = paths.settings_file();

        if settings_path.exists() {
            let contents = std::fs::read_to_string(&settings_path).map_err(|e| {
                RestoreError::Io(format!("Failed to read settings file: {}", e))
            })?;

            let settings: Settings = serde_json::from_str(&contents).map_err(|e| {
                RestoreError::Configuration(format!("Failed to parse settings file: {}", e))
            })?;

            Ok(settings)
        } else {
            // Don't save yet - let caller decide when to persist
            Ok(Settings::default())
        }
    }

    /// Save settings to disk
    pub fn save(&self, paths: &VaultPaths) -> Result<(), RestoreError> {
        paths.ensure_directories()?;

        let settings_path = paths.settings_file();
        let contents = serde_json::to_string_pretty(self).map_err(|e| {
            RestoreError::Configuration(format!("Failed to serialize settings: {}", e))
        })?;

        std::fs::write(&settings_path, contents)
            .map_err(|e| RestoreError::Io(format!("Failed to write settings file: {}", e)))?;

        Ok(())
    }
}
