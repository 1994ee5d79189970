//! apkvault - verifying restore engine for Android application backups
//!
//! A backup is a directory holding metadata, checksums and tar archives of a
//! package's APKs, data directories and keystore, optionally encrypted. This
//! crate restores such backups onto a device after checking their integrity.
//!
//! # Architecture
//!
//! - `config`: Paths and persisted settings
//! - `error`: Custom error types
//! - `backup`: Backup layout, metadata, flags and checksums
//! - `crypto`: Payload decryption and key derivation
//! - `archive`: Tar extraction with path safety checks
//! - `platform`: Package installer, package manager and system services
//! - `rules`: Extras and rules replay
//! - `restore`: The restore operation and batch runner
//! - `journal`: Append-only record of restore outcomes
//! - `cli`: Command handlers
//!
//! # Example
//!
//! ```rust,ignore
//! use apkvault::config::{VaultPaths, Settings};
//!
//! let paths = VaultPaths::new()?;
//! let settings = Settings::load_or_create(&paths)?;
//! ```

pub mod archive;
pub mod backup;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod journal;
pub mod logging;
pub mod platform;
pub mod restore;
pub mod rules;

pub use error::{RestoreError, RestoreResult};
