//! Error types for apkvault
//!
//! Every fatal restore failure is one of the variants below. Rule replay
//! failures (`RuleReplay`) are the only ones that never abort a restore; they
//! are logged and counted by the rule engine.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// The main error type for restore operations
#[derive(Error, Debug)]
pub enum RestoreError {
    /// Unsupported or unavailable crypto mode, digest algorithm or setting
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A digest recorded in the checksum store did not match the file
    #[error("Integrity check failed for {file}: found {found}, required {required}")]
    Integrity {
        file: PathBuf,
        found: String,
        required: String,
    },

    /// A category was requested whose prerequisite state is absent
    #[error("State error: {0}")]
    State(String),

    /// The installed app's signing certificates could not be read, so the
    /// backup's certificate digests cannot be compared
    #[error("Signing certificates unavailable: {0}")]
    CertificatesUnavailable(String),

    /// Platform install or uninstall primitive failed
    #[error("Install error: {0}")]
    Install(String),

    /// Archive codec failure
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// metadata.json is missing, unparsable or of an unsupported version
    #[error("Malformed metadata: {0}")]
    MalformedMetadata(String),

    /// A rules or misc file could not be parsed
    #[error("Malformed rules: {0}")]
    MalformedRules(String),

    /// A single rule entry could not be replayed
    #[error("Rule replay error: {0}")]
    RuleReplay(String),

    /// A platform service call failed
    #[error("Platform error: {0}")]
    Platform(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Aggregated failure of one package in a batch restore
    #[error("Failed to restore {package}: {source}")]
    Package {
        package: String,
        #[source]
        source: Box<RestoreError>,
    },
}

impl RestoreError {
    /// Create an integrity error for a file whose recorded digest is missing
    /// or different
    pub fn integrity(file: &Path, found: impl Into<String>, required: Option<&str>) -> Self {
        Self::Integrity {
            file: file.to_path_buf(),
            found: found.into(),
            required: required.unwrap_or("<none>").to_string(),
        }
    }

    /// Wrap an error as the aggregated failure of one package
    pub fn for_package(package: impl Into<String>, source: RestoreError) -> Self {
        Self::Package {
            package: package.into(),
            source: Box::new(source),
        }
    }

    /// Check if this is an integrity error
    pub fn is_integrity(&self) -> bool {
        match self {
            Self::Integrity { .. } => true,
            Self::Package { source, .. } => source.is_integrity(),
            _ => false,
        }
    }

    /// Check if this is a state error
    pub fn is_state(&self) -> bool {
        match self {
            Self::State(_) => true,
            Self::Package { source, .. } => source.is_state(),
            _ => false,
        }
    }

    /// Check if this is a configuration error
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::Configuration(_) => true,
            Self::Package { source, .. } => source.is_configuration(),
            _ => false,
        }
    }
}

impl From<std::io::Error> for RestoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for RestoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Result type alias for restore operations
pub type RestoreResult<T> = Result<T, RestoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RestoreError::Configuration("mode pgp is unavailable".into());
        assert_eq!(err.to_string(), "Configuration error: mode pgp is unavailable");
    }

    #[test]
    fn test_integrity_error() {
        let err = RestoreError::integrity(Path::new("source_0.tar.gz"), "abcd", None);
        assert_eq!(
            err.to_string(),
            "Integrity check failed for source_0.tar.gz: found abcd, required <none>"
        );
        assert!(err.is_integrity());
    }

    #[test]
    fn test_package_wrapping_keeps_cause() {
        let err = RestoreError::for_package("com.example", RestoreError::State("not installed".into()));
        assert!(err.is_state());
        assert!(err.to_string().contains("com.example"));
        assert!(err.to_string().contains("not installed"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RestoreError = io_err.into();
        assert!(matches!(err, RestoreError::Io(_)));
    }
}
