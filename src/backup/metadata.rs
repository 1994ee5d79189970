//! Backup metadata
//!
//! `metadata.json` is the authoritative description of a backup: what was
//! archived, how it was encrypted and which digest algorithm guards it. It is
//! always stored in plaintext because it declares the crypto mode.

use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Component, Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{CryptoMode, KeyDerivationParams};
use crate::error::{RestoreError, RestoreResult};

use super::checksum::ChecksumAlgorithm;
use super::flags::BackupFlags;
use super::location::BackupLocation;

/// Newest metadata format this crate understands
pub const CURRENT_VERSION: u32 = 4;

/// File name of the metadata inside a backup directory
pub const METADATA_FILE: &str = "metadata.json";

/// Compression applied to every tar stream of a backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TarType {
    #[default]
    Gz,
    Zst,
}

impl TarType {
    /// Suffix used in archive file names, after `.tar`
    pub fn extension(self) -> &'static str {
        match self {
            TarType::Gz => "gz",
            TarType::Zst => "zst",
        }
    }
}

impl fmt::Display for TarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Immutable descriptor of a single backup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    /// Format version
    pub version: u32,

    /// Backup label, `None` for the unnamed default backup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    pub package_name: String,

    #[serde(default)]
    pub version_name: String,

    #[serde(default)]
    pub version_code: i64,

    /// File name of the base APK
    #[serde(default = "default_apk_name")]
    pub apk_name: String,

    /// Split APK names, in install order
    #[serde(default)]
    pub split_configs: Vec<String>,

    /// Absolute data directories; the index is the `data_<index>_` prefix
    #[serde(default)]
    pub data_dirs: Vec<String>,

    #[serde(default)]
    pub crypto: CryptoMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_params: Option<KeyDerivationParams>,

    #[serde(default)]
    pub checksum_algo: ChecksumAlgorithm,

    #[serde(default)]
    pub tar_type: TarType,

    pub flags: BackupFlags,

    /// User the backup was taken from
    #[serde(default)]
    pub user_handle: u32,

    /// Package that originally installed the app
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer: Option<String>,

    /// Whether keystore entries were archived
    #[serde(default)]
    pub key_store: bool,

    #[serde(default)]
    pub has_rules: bool,

    pub backup_time: DateTime<Utc>,
}

fn default_apk_name() -> String {
    "base.apk".to_string()
}

impl BackupMetadata {
    /// Minimal metadata for a package, used on the write path and in tests
    pub fn new(package_name: impl Into<String>, flags: BackupFlags) -> Self {
        Self {
            version: CURRENT_VERSION,
            label: None,
            package_name: package_name.into(),
            version_name: String::new(),
            version_code: 0,
            apk_name: default_apk_name(),
            split_configs: Vec::new(),
            data_dirs: Vec::new(),
            crypto: CryptoMode::None,
            key_params: None,
            checksum_algo: ChecksumAlgorithm::default(),
            tar_type: TarType::default(),
            flags,
            user_handle: 0,
            installer: None,
            key_store: false,
            has_rules: false,
            backup_time: Utc::now(),
        }
    }

    /// Read and validate the metadata of a backup
    pub fn read(location: &BackupLocation) -> RestoreResult<Self> {
        Self::read_file(&location.metadata_file())
    }

    /// Read and validate a metadata file
    pub fn read_file(path: &Path) -> RestoreResult<Self> {
        let file = File::open(path).map_err(|e| {
            RestoreError::MalformedMetadata(format!("Failed to open {}: {}", path.display(), e))
        })?;
        let metadata: BackupMetadata =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| {
                RestoreError::MalformedMetadata(format!(
                    "Failed to parse {}: {}",
                    path.display(),
                    e
                ))
            })?;
        metadata.validate()?;
        Ok(metadata)
    }

    /// Check the invariants `read` relies on
    pub fn validate(&self) -> RestoreResult<()> {
        if self.version == 0 || self.version > CURRENT_VERSION {
            return Err(RestoreError::MalformedMetadata(format!(
                "Unsupported metadata version {} (supported: 1..={})",
                self.version, CURRENT_VERSION
            )));
        }
        if self.package_name.trim().is_empty() {
            return Err(RestoreError::MalformedMetadata(
                "Package name is empty".to_string(),
            ));
        }
        self.apk_names()?;
        Ok(())
    }

    /// Base APK followed by the splits, each a bare file name.
    ///
    /// The names end up joined onto the staging directory, so anything with
    /// a directory component, `..` or a root is rejected.
    pub fn apk_names(&self) -> RestoreResult<Vec<String>> {
        std::iter::once(&self.apk_name)
            .chain(&self.split_configs)
            .map(|name| {
                let mut components = Path::new(name).components();
                match (components.next(), components.next()) {
                    (Some(Component::Normal(part)), None) if part == name.as_str() => Ok(name.clone()),
                    _ => Err(RestoreError::MalformedMetadata(format!(
                        "APK name {:?} is not a plain file name",
                        name
                    ))),
                }
            })
            .collect()
    }

    /// Write the metadata atomically (write to temp, then rename)
    pub fn write(&self, location: &BackupLocation) -> RestoreResult<()> {
        let path = location.metadata_file();
        fs::create_dir_all(location.path())
            .map_err(|e| RestoreError::Io(format!("Failed to create backup directory: {}", e)))?;

        let temp_path = path.with_extension("json.tmp");
        let file = File::create(&temp_path)
            .map_err(|e| RestoreError::Io(format!("Failed to create temp file: {}", e)))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        fs::rename(&temp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            RestoreError::Io(format!("Failed to rename temp file: {}", e))
        })?;
        Ok(())
    }

    /// Whether a data directory lives on shared (external) storage
    pub fn is_external(dir: &str) -> bool {
        dir.starts_with("/storage") || dir.starts_with("/sdcard")
    }
}
