//! Checksum store
//!
//! A persisted mapping from archived file name to hex digest. The on-disk
//! format is one `name<TAB>digest` pair per line. Names starting with
//! `cert_` hold signing certificate digests rather than file digests.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::error::{RestoreError, RestoreResult};

/// Prefix of signing certificate entries
pub const CERT_PREFIX: &str = "cert_";

/// Digest algorithm recorded in the metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl ChecksumAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha384 => "sha384",
            ChecksumAlgorithm::Sha512 => "sha512",
        }
    }

    /// Hex digest of a byte slice
    pub fn hex_digest(self, bytes: &[u8]) -> String {
        match self {
            ChecksumAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
            ChecksumAlgorithm::Sha384 => hex::encode(Sha384::digest(bytes)),
            ChecksumAlgorithm::Sha512 => hex::encode(Sha512::digest(bytes)),
        }
    }

    /// Hex digest of a file's contents, streamed
    pub fn hex_digest_file(self, path: &Path) -> RestoreResult<String> {
        let file = File::open(path).map_err(|e| {
            RestoreError::Io(format!("Failed to open {} for hashing: {}", path.display(), e))
        })?;
        let reader = BufReader::new(file);
        match self {
            ChecksumAlgorithm::Sha256 => stream_digest::<Sha256>(reader),
            ChecksumAlgorithm::Sha384 => stream_digest::<Sha384>(reader),
            ChecksumAlgorithm::Sha512 => stream_digest::<Sha512>(reader),
        }
    }
}

fn stream_digest<D: Digest>(mut reader: impl Read) -> RestoreResult<String> {
    let mut hasher = D::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

impl TryFrom<String> for ChecksumAlgorithm {
    type Error = RestoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "sha384" => Ok(ChecksumAlgorithm::Sha384),
            "sha512" => Ok(ChecksumAlgorithm::Sha512),
            _ => Err(RestoreError::Configuration(format!(
                "Unsupported checksum algorithm: {}",
                value
            ))),
        }
    }
}

impl From<ChecksumAlgorithm> for String {
    fn from(algo: ChecksumAlgorithm) -> Self {
        algo.name().to_string()
    }
}

/// File name to digest map loaded from a checksum file
#[derive(Debug, Clone, Default)]
pub struct ChecksumStore {
    entries: BTreeMap<String, String>,
}

impl ChecksumStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a decrypted checksum file
    pub fn load(path: &Path) -> RestoreResult<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            RestoreError::Io(format!("Failed to read checksums {}: {}", path.display(), e))
        })?;
        Self::parse(&contents)
    }

    /// Parse checksum file contents
    pub fn parse(contents: &str) -> RestoreResult<Self> {
        let mut entries = BTreeMap::new();
        for (line_num, line) in contents.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let (name, digest) = line.split_once('\t').ok_or_else(|| {
                RestoreError::Integrity {
                    file: PathBuf::from("checksums"),
                    found: format!("malformed line {}", line_num + 1),
                    required: "name<TAB>digest".to_string(),
                }
            })?;
            entries.insert(name.to_string(), digest.trim().to_lowercase());
        }
        Ok(Self { entries })
    }

    /// Recorded digest of a file name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    /// Record a digest (write path)
    pub fn add(&mut self, name: impl Into<String>, digest: impl Into<String>) {
        self.entries.insert(name.into(), digest.into());
    }

    /// Signing certificate digests, in name order
    pub fn cert_checksums(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(name, _)| name.starts_with(CERT_PREFIX))
            .map(|(_, digest)| digest.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Verify a file against the digest recorded under its file name
    pub fn verify(&self, algo: ChecksumAlgorithm, file: &Path) -> RestoreResult<()> {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let found = algo.hex_digest_file(file)?;
        let required = self.get(&name);
        if required != Some(found.as_str()) {
            return Err(RestoreError::integrity(file, found, required));
        }
        Ok(())
    }

    /// Verify every file, stopping at the first mismatch
    pub fn verify_all(&self, algo: ChecksumAlgorithm, files: &[PathBuf]) -> RestoreResult<()> {
        for file in files {
            self.verify(algo, file)?;
        }
        Ok(())
    }

    /// Write the store to `path` (write path)
    pub fn save(&self, path: &Path) -> RestoreResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| RestoreError::Io(format!("Failed to create checksums: {}", e)))?;
        for (name, digest) in &self.entries {
            writeln!(file, "{}\t{}", name, digest)?;
        }
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            ChecksumAlgorithm::Sha256.hex_digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_file_digest_matches_bytes() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("data_0_0.tar.gz");
        fs::write(&file, b"payload").unwrap();

        for algo in [
            ChecksumAlgorithm::Sha256,
            ChecksumAlgorithm::Sha384,
            ChecksumAlgorithm::Sha512,
        ] {
            assert_eq!(algo.hex_digest_file(&file).unwrap(), algo.hex_digest(b"payload"));
        }
    }

    #[test]
    fn test_parse_skips_blank_and_comments() {
        let store = ChecksumStore::parse("# generated\n\nmetadata.json\tABCD\r\ncert_0\tff\n").unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("metadata.json"), Some("abcd"));
        assert_eq!(store.cert_checksums(), vec!["ff"]);
    }

    #[test]
    fn test_parse_rejects_malformed_line() {
        assert!(ChecksumStore::parse("no-tab-here\n").is_err());
    }

    #[test]
    fn test_verify_mismatch_and_missing() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("source_0.tar.gz");
        fs::write(&file, b"apk").unwrap();

        let mut store = ChecksumStore::new();
        let err = store.verify(ChecksumAlgorithm::Sha256, &file).err().unwrap();
        assert!(err.is_integrity());

        store.add("source_0.tar.gz", "00");
        assert!(store.verify(ChecksumAlgorithm::Sha256, &file).is_err());

        store.add("source_0.tar.gz", ChecksumAlgorithm::Sha256.hex_digest(b"apk"));
        store.verify(ChecksumAlgorithm::Sha256, &file).unwrap();
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("checksums.txt");
        let mut store = ChecksumStore::new();
        store.add("misc.tsv", "aa");
        store.add("rules.tsv", "bb");
        store.save(&path).unwrap();

        let loaded = ChecksumStore::load(&path).unwrap();
        assert_eq!(loaded.get("misc.tsv"), Some("aa"));
        assert_eq!(loaded.get("rules.tsv"), Some("bb"));
    }

    #[test]
    fn test_algorithm_serde() {
        let algo: ChecksumAlgorithm = serde_json::from_str("\"SHA-512\"").unwrap();
        assert_eq!(algo, ChecksumAlgorithm::Sha512);
        assert_eq!(serde_json::to_string(&algo).unwrap(), "\"sha512\"");
        assert!(serde_json::from_str::<ChecksumAlgorithm>("\"md5\"").is_err());
    }
}
