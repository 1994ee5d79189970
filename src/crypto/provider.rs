//! Crypto provider
//!
//! Selected once per restore from the metadata's crypto mode. Decrypting
//! `name<ext>` produces a sibling plaintext file `name`; the encrypted file
//! is never modified. Every plaintext file the provider creates is reported
//! back to the caller, which owns it and must delete it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::{RestoreError, RestoreResult};

use super::encryption::{decrypt_file, encrypt_file};
use super::key_derivation::{derive_key, DerivedKey, KeyDerivationParams};
use super::mode::CryptoMode;
use super::secure_memory::SecureString;

/// Decrypts (and, on the write path, encrypts) backup files
pub struct CryptoProvider {
    mode: CryptoMode,
    key: Option<DerivedKey>,
    /// Global crypto lock shared by every provider touching the same key material
    lock: Arc<Mutex<()>>,
    closed: bool,
}

impl CryptoProvider {
    /// Check whether `mode` can be used with the given credentials
    pub fn is_available(
        mode: CryptoMode,
        key_params: Option<&KeyDerivationParams>,
        passphrase: Option<&SecureString>,
    ) -> bool {
        if !mode.is_supported() {
            return false;
        }
        !mode.needs_passphrase() || (key_params.is_some() && passphrase.is_some())
    }

    /// Create a provider for `mode`.
    ///
    /// Fails with a configuration error, before touching any file, when the
    /// mode is unsupported or its credentials are missing.
    pub fn new(
        mode: CryptoMode,
        key_params: Option<&KeyDerivationParams>,
        passphrase: Option<&SecureString>,
        lock: Arc<Mutex<()>>,
    ) -> RestoreResult<Self> {
        if !Self::is_available(mode, key_params, passphrase) {
            return Err(RestoreError::Configuration(format!(
                "Mode {} is currently unavailable",
                mode
            )));
        }

        let key = match (mode, key_params, passphrase) {
            (CryptoMode::Aes, Some(params), Some(passphrase)) => {
                Some(derive_key(passphrase.as_str(), params)?)
            }
            _ => None,
        };

        Ok(Self {
            mode,
            key,
            lock,
            closed: false,
        })
    }

    pub fn mode(&self) -> CryptoMode {
        self.mode
    }

    /// Decrypt `files`, returning the plaintext files created.
    ///
    /// With [`CryptoMode::None`] nothing is created and the result is empty.
    pub fn decrypt(&mut self, files: &[PathBuf]) -> RestoreResult<Vec<PathBuf>> {
        self.ensure_open()?;
        if self.mode == CryptoMode::None {
            return Ok(Vec::new());
        }

        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let key = self.key()?;
        let mut created = Vec::with_capacity(files.len());
        for file in files {
            let output = plaintext_path(file, self.mode)?;
            debug!("Decrypting {} to {}", file.display(), output.display());
            if let Err(e) = decrypt_file(file, &output, key) {
                cleanup(&created);
                return Err(e);
            }
            created.push(output);
        }
        Ok(created)
    }

    /// Encrypt `files`, returning the encrypted files created.
    ///
    /// With [`CryptoMode::None`] nothing is created and the result is empty.
    pub fn encrypt(&mut self, files: &[PathBuf]) -> RestoreResult<Vec<PathBuf>> {
        self.ensure_open()?;
        if self.mode == CryptoMode::None {
            return Ok(Vec::new());
        }

        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let key = self.key()?;
        let mut created = Vec::with_capacity(files.len());
        for file in files {
            let mut name = file.as_os_str().to_os_string();
            name.push(self.mode.extension());
            let output = PathBuf::from(name);
            if let Err(e) = encrypt_file(file, &output, key) {
                cleanup(&created);
                return Err(e);
            }
            created.push(output);
        }
        Ok(created)
    }

    /// Release key material immediately.
    ///
    /// Safe to call more than once; further decrypt calls fail.
    pub fn close(&mut self) {
        if !self.closed {
            debug!("Closing {} crypto provider", self.mode);
        }
        // DerivedKey wipes itself on drop
        self.key = None;
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> RestoreResult<()> {
        if self.closed {
            return Err(RestoreError::Configuration(
                "Crypto provider has already been closed".to_string(),
            ));
        }
        Ok(())
    }

    fn key(&self) -> RestoreResult<&DerivedKey> {
        self.key.as_ref().ok_or_else(|| {
            RestoreError::Configuration(format!("No key loaded for mode {}", self.mode))
        })
    }
}

impl Drop for CryptoProvider {
    fn drop(&mut self) {
        self.close();
    }
}

/// Plaintext sibling of an encrypted file: the mode extension is stripped
pub fn plaintext_path(file: &Path, mode: CryptoMode) -> RestoreResult<PathBuf> {
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = name
        .strip_suffix(mode.extension())
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| {
            RestoreError::Configuration(format!(
                "{} does not carry the {} extension",
                file.display(),
                mode
            ))
        })?;
    Ok(file.with_file_name(stem))
}

fn cleanup(files: &[PathBuf]) {
    for file in files {
        let _ = std::fs::remove_file(file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key_derivation::test_params;
    use std::fs;
    use tempfile::TempDir;

    fn aes_provider(params: &KeyDerivationParams, passphrase: &str) -> CryptoProvider {
        let passphrase = SecureString::new(passphrase);
        CryptoProvider::new(
            CryptoMode::Aes,
            Some(params),
            Some(&passphrase),
            Arc::new(Mutex::new(())),
        )
        .unwrap()
    }

    #[test]
    fn test_unsupported_mode_fails_fast() {
        let err = CryptoProvider::new(CryptoMode::Pgp, None, None, Arc::new(Mutex::new(())))
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_aes_without_passphrase_is_unavailable() {
        let params = test_params();
        assert!(!CryptoProvider::is_available(CryptoMode::Aes, Some(&params), None));
        assert!(CryptoProvider::new(CryptoMode::Aes, Some(&params), None, Arc::new(Mutex::new(())))
            .is_err());
    }

    #[test]
    fn test_none_mode_creates_nothing() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("checksums.txt");
        fs::write(&file, "a\tb\n").unwrap();

        let mut provider =
            CryptoProvider::new(CryptoMode::None, None, None, Arc::new(Mutex::new(()))).unwrap();
        assert!(provider.decrypt(&[file]).unwrap().is_empty());
    }

    #[test]
    fn test_decrypt_leaves_source_unchanged() {
        let temp = TempDir::new().unwrap();
        let params = test_params();
        let mut provider = aes_provider(&params, "secret");

        let plain = temp.path().join("misc.tsv");
        fs::write(&plain, b"com.example\tSTUB\tBATTERY_OPT\tfalse\n").unwrap();
        let sealed = provider.encrypt(&[plain.clone()]).unwrap();
        fs::remove_file(&plain).unwrap();
        let sealed_bytes = fs::read(&sealed[0]).unwrap();

        let opened = provider.decrypt(&sealed).unwrap();
        assert_eq!(opened, vec![plain.clone()]);
        assert!(fs::read_to_string(&plain).unwrap().contains("BATTERY_OPT"));

        fs::remove_file(&opened[0]).unwrap();
        assert_eq!(fs::read(&sealed[0]).unwrap(), sealed_bytes);
    }

    #[test]
    fn test_decrypt_after_close_fails() {
        let temp = TempDir::new().unwrap();
        let params = test_params();
        let mut provider = aes_provider(&params, "secret");
        provider.close();
        provider.close();

        assert!(provider.is_closed());
        let file = temp.path().join("x.aes");
        assert!(provider.decrypt(&[file]).is_err());
    }

    #[test]
    fn test_plaintext_path() {
        let path = plaintext_path(Path::new("/b/source_0.tar.gz.aes"), CryptoMode::Aes).unwrap();
        assert_eq!(path, PathBuf::from("/b/source_0.tar.gz"));
        assert!(plaintext_path(Path::new("/b/source_0.tar.gz"), CryptoMode::Aes).is_err());
    }
}
