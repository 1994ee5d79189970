//! Backup location resolver
//!
//! Maps a package and label to its backup directory and knows the naming
//! convention of the files inside it:
//!
//! ```text
//! <root>/<package>/<label>/
//!     metadata.json
//!     checksums.txt<ext>
//!     source_<part>.tar.<gz|zst><ext>
//!     keystore_<part>.tar.<gz|zst><ext>
//!     data_<index>_<part>.tar.<gz|zst><ext>
//!     misc.tsv<ext>
//!     rules.tsv<ext>
//! ```
//!
//! `<ext>` is the crypto mode's extension (empty for unencrypted backups).

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::crypto::CryptoMode;
use crate::error::{RestoreError, RestoreResult};

use super::metadata::{TarType, METADATA_FILE};

/// Directory name of an unlabeled backup
pub const DEFAULT_LABEL: &str = "default";

pub const CHECKSUMS_FILE: &str = "checksums.txt";
pub const MISC_FILE: &str = "misc.tsv";
pub const RULES_FILE: &str = "rules.tsv";

/// A group of split archive files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Source,
    KeyStore,
    /// Data directory at the given index of `data_dirs`
    Data(usize),
}

impl Category {
    /// File name prefix; the trailing underscore keeps `data_1_` from
    /// matching `data_10_`
    pub fn prefix(self) -> String {
        match self {
            Category::Source => "source_".to_string(),
            Category::KeyStore => "keystore_".to_string(),
            Category::Data(index) => format!("data_{}_", index),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Source => write!(f, "source"),
            Category::KeyStore => write!(f, "keystore"),
            Category::Data(index) => write!(f, "data {}", index),
        }
    }
}

/// Directory of a single backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupLocation {
    package: String,
    label: Option<String>,
    path: PathBuf,
}

impl BackupLocation {
    pub fn new(root: &Path, package: &str, label: Option<&str>) -> Self {
        let path = root.join(package).join(label.unwrap_or(DEFAULT_LABEL));
        Self {
            package: package.to_string(),
            label: label.map(str::to_string),
            path,
        }
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.metadata_file().is_file()
    }

    pub fn metadata_file(&self) -> PathBuf {
        self.path.join(METADATA_FILE)
    }

    pub fn checksum_file(&self, mode: CryptoMode) -> PathBuf {
        self.path.join(format!("{}{}", CHECKSUMS_FILE, mode.extension()))
    }

    /// The misc (extras) file, if present
    pub fn misc_file(&self, mode: CryptoMode) -> Option<PathBuf> {
        let path = self.path.join(format!("{}{}", MISC_FILE, mode.extension()));
        path.is_file().then_some(path)
    }

    /// The rules file, if present
    pub fn rules_file(&self, mode: CryptoMode) -> Option<PathBuf> {
        let path = self.path.join(format!("{}{}", RULES_FILE, mode.extension()));
        path.is_file().then_some(path)
    }

    /// File name of one archive part (write path)
    pub fn archive_name(category: Category, part: usize, tar_type: TarType, mode: CryptoMode) -> String {
        format!(
            "{}{}.tar.{}{}",
            category.prefix(),
            part,
            tar_type.extension(),
            mode.extension()
        )
    }

    /// Archive parts of a category, ordered by part index
    pub fn list_files(&self, category: Category, mode: CryptoMode) -> RestoreResult<Vec<PathBuf>> {
        let prefix = category.prefix();
        let entries = match fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(RestoreError::Io(format!(
                    "Failed to list {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let mut parts = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(part) = part_index(&name, &prefix, mode) {
                parts.push((part, entry.path()));
            }
        }
        parts.sort_by_key(|(part, _)| *part);
        Ok(parts.into_iter().map(|(_, path)| path).collect())
    }

    /// Like [`list_files`](Self::list_files), but an empty result is a state error
    pub fn require_files(&self, category: Category, mode: CryptoMode) -> RestoreResult<Vec<PathBuf>> {
        let files = self.list_files(category, mode)?;
        if files.is_empty() {
            return Err(RestoreError::State(format!(
                "{} files are missing from {}",
                category,
                self.path.display()
            )));
        }
        Ok(files)
    }

    /// Every backup of `package` under `root`, sorted by directory name
    pub fn list_backups(root: &Path, package: &str) -> RestoreResult<Vec<BackupLocation>> {
        let package_dir = root.join(package);
        if !package_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for entry in fs::read_dir(&package_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dir_name = entry.file_name().to_string_lossy().to_string();
            let label = (dir_name != DEFAULT_LABEL).then_some(dir_name.as_str());
            let location = BackupLocation::new(root, package, label);
            if location.exists() {
                backups.push(location);
            }
        }
        backups.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(backups)
    }

    /// Packages that have at least one backup under `root`
    pub fn list_packages(root: &Path) -> RestoreResult<Vec<String>> {
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let mut packages = Vec::new();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let package = entry.file_name().to_string_lossy().to_string();
            if !Self::list_backups(root, &package)?.is_empty() {
                packages.push(package);
            }
        }
        packages.sort();
        Ok(packages)
    }
}

/// Part index of `name` if it is `<prefix><part>.tar.<gz|zst><ext>`
fn part_index(name: &str, prefix: &str, mode: CryptoMode) -> Option<usize> {
    let rest = name.strip_prefix(prefix)?;
    let (part, suffix) = rest.split_once('.')?;
    let part: usize = part.parse().ok()?;
    let tarball = suffix.strip_suffix(mode.extension())?;
    matches!(tarball, "tar.gz" | "tar.zst").then_some(part)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn test_layout() {
        let location = BackupLocation::new(Path::new("/backups"), "com.example", Some("weekly"));
        assert_eq!(location.path(), Path::new("/backups/com.example/weekly"));
        assert_eq!(location.metadata_file(), Path::new("/backups/com.example/weekly/metadata.json"));
        assert_eq!(
            location.checksum_file(CryptoMode::Aes),
            Path::new("/backups/com.example/weekly/checksums.txt.aes")
        );

        let unlabeled = BackupLocation::new(Path::new("/backups"), "com.example", None);
        assert_eq!(unlabeled.path(), Path::new("/backups/com.example/default"));
    }

    #[test]
    fn test_parts_sorted_numerically() {
        let temp = TempDir::new().unwrap();
        let location = BackupLocation::new(temp.path(), "com.example", None);
        for part in [10, 2, 0, 1] {
            touch(location.path(), &format!("source_{}.tar.gz", part));
        }

        let files = location.list_files(Category::Source, CryptoMode::None).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["source_0.tar.gz", "source_1.tar.gz", "source_2.tar.gz", "source_10.tar.gz"]
        );
    }

    #[test]
    fn test_data_prefixes_are_disjoint() {
        let temp = TempDir::new().unwrap();
        let location = BackupLocation::new(temp.path(), "com.example", None);
        touch(location.path(), "data_1_0.tar.zst");
        touch(location.path(), "data_10_0.tar.zst");

        assert_eq!(location.list_files(Category::Data(1), CryptoMode::None).unwrap().len(), 1);
        assert_eq!(location.list_files(Category::Data(10), CryptoMode::None).unwrap().len(), 1);
        assert!(location.list_files(Category::Data(2), CryptoMode::None).unwrap().is_empty());
    }

    #[test]
    fn test_extension_filters_mode() {
        let temp = TempDir::new().unwrap();
        let location = BackupLocation::new(temp.path(), "com.example", None);
        touch(location.path(), "keystore_0.tar.gz.aes");

        assert!(location.list_files(Category::KeyStore, CryptoMode::None).unwrap().is_empty());
        assert_eq!(location.list_files(Category::KeyStore, CryptoMode::Aes).unwrap().len(), 1);
    }

    #[test]
    fn test_require_files_missing_is_state_error() {
        let temp = TempDir::new().unwrap();
        let location = BackupLocation::new(temp.path(), "com.example", None);
        let err = location.require_files(Category::Source, CryptoMode::None).err().unwrap();
        assert!(err.is_state());
    }

    #[test]
    fn test_optional_files() {
        let temp = TempDir::new().unwrap();
        let location = BackupLocation::new(temp.path(), "com.example", None);
        assert!(location.misc_file(CryptoMode::None).is_none());

        touch(location.path(), "misc.tsv");
        assert!(location.misc_file(CryptoMode::None).is_some());
        assert!(location.rules_file(CryptoMode::None).is_none());
    }

    #[test]
    fn test_list_backups_and_packages() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("com.a").join("default"), METADATA_FILE);
        touch(&temp.path().join("com.a").join("weekly"), METADATA_FILE);
        touch(&temp.path().join("com.b").join("empty"), "checksums.txt");

        let backups = BackupLocation::list_backups(temp.path(), "com.a").unwrap();
        assert_eq!(backups.len(), 2);
        assert_eq!(backups[0].label(), None);
        assert_eq!(backups[1].label(), Some("weekly"));

        assert_eq!(BackupLocation::list_packages(temp.path()).unwrap(), vec!["com.a"]);
    }

    #[test]
    fn test_archive_name() {
        assert_eq!(
            BackupLocation::archive_name(Category::Data(3), 1, TarType::Zst, CryptoMode::Aes),
            "data_3_1.tar.zst.aes"
        );
    }
}
