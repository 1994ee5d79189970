//! Builds backups on disk for restore tests

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use crate::archive;
use crate::backup::{BackupFlags, BackupLocation, BackupMetadata, Category, ChecksumStore};
use crate::crypto::key_derivation::test_params;
use crate::crypto::{CryptoMode, CryptoProvider, SecureString};

pub(crate) const PASSPHRASE: &str = "correct horse battery staple";

pub(crate) struct BackupBuilder {
    location: BackupLocation,
    metadata: BackupMetadata,
    checksums: ChecksumStore,
    provider: CryptoProvider,
}

impl BackupBuilder {
    pub fn new(root: &Path, package: &str, flags: BackupFlags) -> Self {
        let location = BackupLocation::new(root, package, None);
        fs::create_dir_all(location.path()).unwrap();
        let provider = CryptoProvider::new(CryptoMode::None, None, None, Arc::new(Mutex::new(()))).unwrap();
        Self {
            location,
            metadata: BackupMetadata::new(package, flags),
            checksums: ChecksumStore::new(),
            provider,
        }
    }

    /// Encrypt every payload with AES under [`PASSPHRASE`]; call before adding payloads
    pub fn encrypted(mut self) -> Self {
        let params = test_params();
        let passphrase = SecureString::new(PASSPHRASE);
        self.provider =
            CryptoProvider::new(CryptoMode::Aes, Some(&params), Some(&passphrase), Arc::new(Mutex::new(()))).unwrap();
        self.metadata.crypto = CryptoMode::Aes;
        self.metadata.key_params = Some(params);
        self
    }

    pub fn user_handle(mut self, user: u32) -> Self {
        self.metadata.user_handle = user;
        self
    }

    pub fn installer(mut self, installer: &str) -> Self {
        self.metadata.installer = Some(installer.to_string());
        self
    }

    /// Base APK first, then splits
    pub fn apks(mut self, apks: &[(&str, &[u8])]) -> Self {
        self.metadata.apk_name = apks[0].0.to_string();
        self.metadata.split_configs = apks[1..].iter().map(|(name, _)| name.to_string()).collect();
        self.archive(Category::Source, apks);
        self
    }

    /// Record a base APK name without archiving anything under it
    pub fn apk_name(mut self, name: &str) -> Self {
        self.metadata.apk_name = name.to_string();
        self
    }

    pub fn cert(mut self, cert: &[u8]) -> Self {
        let name = format!("cert_{}", self.checksums.cert_checksums().len());
        let digest = self.metadata.checksum_algo.hex_digest(cert);
        self.checksums.add(name, digest);
        self
    }

    pub fn data_dir(mut self, dir: &Path, files: &[(&str, &[u8])]) -> Self {
        let index = self.metadata.data_dirs.len();
        self.metadata.data_dirs.push(dir.to_string_lossy().to_string());
        self.archive(Category::Data(index), files);
        self
    }

    pub fn keystore(mut self, files: &[(&str, &[u8])]) -> Self {
        self.metadata.key_store = true;
        self.archive(Category::KeyStore, files);
        self
    }

    pub fn misc(mut self, contents: &str) -> Self {
        self.write_payload(crate::backup::location::MISC_FILE, contents.as_bytes());
        self
    }

    pub fn rules(mut self, contents: &str) -> Self {
        self.metadata.has_rules = true;
        self.write_payload(crate::backup::location::RULES_FILE, contents.as_bytes());
        self
    }

    /// Declare rules without writing a rules file
    pub fn declare_rules(mut self) -> Self {
        self.metadata.has_rules = true;
        self
    }

    pub fn build(mut self) -> BackupLocation {
        self.metadata.write(&self.location).unwrap();
        let metadata_file = self.location.metadata_file();
        let digest = self.metadata.checksum_algo.hex_digest_file(&metadata_file).unwrap();
        self.checksums.add(crate::backup::metadata::METADATA_FILE, digest);

        let plain = self.location.path().join(crate::backup::location::CHECKSUMS_FILE);
        self.checksums.save(&plain).unwrap();
        self.seal(vec![plain]);
        self.location
    }

    fn archive(&mut self, category: Category, files: &[(&str, &[u8])]) {
        let source = TempDir::new().unwrap();
        for (name, contents) in files {
            let path = source.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }
        let prefix = self.location.path().join(category.prefix());
        let parts = archive::create(source.path(), &prefix.to_string_lossy(), self.metadata.tar_type, 0).unwrap();
        let stored = self.seal(parts);
        self.record(&stored);
    }

    fn write_payload(&mut self, name: &str, contents: &[u8]) {
        let path = self.location.path().join(name);
        fs::write(&path, contents).unwrap();
        let stored = self.seal(vec![path]);
        self.record(&stored);
    }

    /// Encrypt files when a crypto mode is active, returning the stored files
    fn seal(&mut self, files: Vec<PathBuf>) -> Vec<PathBuf> {
        let sealed = self.provider.encrypt(&files).unwrap();
        if sealed.is_empty() {
            return files;
        }
        for file in files {
            fs::remove_file(file).unwrap();
        }
        sealed
    }

    fn record(&mut self, files: &[PathBuf]) {
        for file in files {
            let digest = self.metadata.checksum_algo.hex_digest_file(file).unwrap();
            let name = file.file_name().unwrap().to_string_lossy().to_string();
            self.checksums.add(name, digest);
        }
    }
}
