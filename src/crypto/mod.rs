//! Cryptographic functions for apkvault
//!
//! Provides the per-restore crypto provider: AES-256-GCM file streams with
//! Argon2id key derivation, behind a mode recorded in the backup metadata.

pub mod encryption;
pub mod key_derivation;
pub mod mode;
pub mod provider;
pub mod secure_memory;

pub use key_derivation::{derive_key, DerivedKey, KeyDerivationParams};
pub use mode::CryptoMode;
pub use provider::CryptoProvider;
pub use secure_memory::SecureString;
