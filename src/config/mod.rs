//! Configuration module for apkvault
//!
//! - Local path resolution (settings file, journal)
//! - Persisted restore settings

pub mod paths;
pub mod settings;

pub use paths::VaultPaths;
pub use settings::Settings;
