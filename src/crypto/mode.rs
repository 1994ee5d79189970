//! Crypto modes recorded in backup metadata

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RestoreError;

/// Encryption mode of a backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CryptoMode {
    /// Files are stored as plain archives
    #[default]
    None,
    /// AES-256-GCM with an Argon2id passphrase key
    Aes,
    /// OpenPGP
    Pgp,
    /// RSA-wrapped AES key
    Rsa,
    /// ECC-wrapped AES key
    Ecc,
}

impl CryptoMode {
    /// File name suffix of files encrypted with this mode
    pub fn extension(self) -> &'static str {
        match self {
            CryptoMode::None => "",
            CryptoMode::Aes => ".aes",
            CryptoMode::Pgp => ".gpg",
            CryptoMode::Rsa => ".rsa",
            CryptoMode::Ecc => ".ecc",
        }
    }

    /// Whether this build can decrypt the mode at all
    pub fn is_supported(self) -> bool {
        matches!(self, CryptoMode::None | CryptoMode::Aes)
    }

    /// Whether the mode needs a passphrase to decrypt
    pub fn needs_passphrase(self) -> bool {
        matches!(self, CryptoMode::Aes)
    }
}

impl fmt::Display for CryptoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CryptoMode::None => "none",
            CryptoMode::Aes => "aes",
            CryptoMode::Pgp => "pgp",
            CryptoMode::Rsa => "rsa",
            CryptoMode::Ecc => "ecc",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for CryptoMode {
    type Err = RestoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(CryptoMode::None),
            "aes" => Ok(CryptoMode::Aes),
            "pgp" => Ok(CryptoMode::Pgp),
            "rsa" => Ok(CryptoMode::Rsa),
            "ecc" => Ok(CryptoMode::Ecc),
            other => Err(RestoreError::Configuration(format!(
                "Unknown crypto mode: {}",
                other
            ))),
        }
    }
}
