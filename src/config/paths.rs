//! Path management for apkvault
//!
//! ## Path Resolution Order
//!
//! 1. `APKVAULT_DIR` environment variable (if set)
//! 2. `$XDG_CONFIG_HOME/apkvault` or `~/.config/apkvault`
//! 3. `/data/local/tmp/apkvault` when neither variable is available (a root
//!    shell on a device usually has no `HOME`)

use std::path::PathBuf;

use crate::error::RestoreError;

/// Manages all local paths used by apkvault
#[derive(Debug, Clone)]
pub struct VaultPaths {
    /// Base directory for configuration and the restore journal
    base_dir: PathBuf,
}

impl VaultPaths {
    /// Create a new VaultPaths instance from the environment
    pub fn new() -> Result<Self, RestoreError> {
        let base_dir = if let Ok(custom) = std::env::var("APKVAULT_DIR") {
            PathBuf::from(custom)
        } else {
            resolve_default_path()
        };

        Ok(Self { base_dir })
    }

    /// Create VaultPaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Default backup root, used when the settings don't name one
    pub fn backup_dir(&self) -> PathBuf {
        self.base_dir.join("backups")
    }

    /// Get the path to the settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the path to the restore journal
    pub fn journal_file(&self) -> PathBuf {
        self.base_dir.join("journal.log")
    }

    /// Ensure the base directory exists
    pub fn ensure_directories(&self) -> Result<(), RestoreError> {
        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| RestoreError::Io(format!("Failed to create base directory: {}", e)))?;
        Ok(())
    }
}

fn resolve_default_path() -> PathBuf {
    let config_base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|home| PathBuf::from(home).join(".config")));

    match config_base {
        Ok(base) => base.join("apkvault"),
        Err(_) => PathBuf::from("/data/local/tmp/apkvault"),
    }
}
