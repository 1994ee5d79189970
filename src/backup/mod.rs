//! Backup model shared by the restore path and the write path
//!
//! # Layout
//!
//! - `flags`: category bitmask carried by both the archive and a request
//! - `metadata`: the versioned `metadata.json` descriptor
//! - `checksum`: file name to digest store
//! - `location`: backup directory and file naming convention

pub mod checksum;
pub mod flags;
pub mod location;
pub mod metadata;

pub use checksum::{ChecksumAlgorithm, ChecksumStore};
pub use flags::BackupFlags;
pub use location::{BackupLocation, Category};
pub use metadata::{BackupMetadata, TarType};
