//! Archive codec
//!
//! Multi-part tar archives compressed with gzip or zstd. Extraction filters,
//! renames and re-roots entries according to [`ExtractOptions`] and never
//! writes outside the destination directory.

mod codec;
pub mod path_safety;
pub mod split;

use std::collections::HashMap;
use std::path::PathBuf;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{RestoreError, RestoreResult};

pub use codec::{create, extract, extract_with_strategy, ExtractSummary};

/// Directories never restored unless the cache was requested
pub const CACHE_EXCLUDES: &[&str] = &["cache", "cache/**", "code_cache", "code_cache/**"];

/// How a failed extraction affects the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractStrategy {
    /// Write straight into the destination; a failure leaves what was written
    #[default]
    InPlace,
    /// Extract into a sibling directory and swap it in only on success
    Staged,
}

/// Parameters of a single extraction
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Archived path to destination path, both relative
    pub rename: HashMap<String, String>,
    /// When set, only matching entries are extracted
    pub include: Option<GlobSet>,
    /// Matching entries are skipped
    pub exclude: Option<GlobSet>,
    /// New install directory for links that pointed into `/data/app/.../lib`
    pub link_root: Option<PathBuf>,
}

impl ExtractOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_include<S: AsRef<str>>(mut self, patterns: &[S]) -> RestoreResult<Self> {
        self.include = Some(build_glob_set(patterns)?);
        Ok(self)
    }

    pub fn with_exclude<S: AsRef<str>>(mut self, patterns: &[S]) -> RestoreResult<Self> {
        self.exclude = Some(build_glob_set(patterns)?);
        Ok(self)
    }

    pub fn with_rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.rename.insert(from.into(), to.into());
        self
    }

    pub fn with_link_root(mut self, link_root: impl Into<PathBuf>) -> Self {
        self.link_root = Some(link_root.into());
        self
    }

    /// Whether an archived (normalized, relative) path is extracted
    pub fn selects(&self, path: &str) -> bool {
        if let Some(include) = &self.include {
            if !include.is_match(path) {
                return false;
            }
        }
        match &self.exclude {
            Some(exclude) => !exclude.is_match(path),
            None => true,
        }
    }
}

/// Compile glob patterns into a set
pub fn build_glob_set<S: AsRef<str>>(patterns: &[S]) -> RestoreResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern.as_ref()).map_err(|e| {
            RestoreError::Configuration(format!("Invalid pattern {}: {}", pattern.as_ref(), e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| RestoreError::Configuration(format!("Invalid pattern set: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_excludes() {
        let options = ExtractOptions::new().with_exclude(CACHE_EXCLUDES).unwrap();
        assert!(!options.selects("cache"));
        assert!(!options.selects("cache/img/1.png"));
        assert!(!options.selects("code_cache/x.dex"));
        assert!(options.selects("files/cache.db"));
        assert!(options.selects("shared_prefs/app.xml"));
    }

    #[test]
    fn test_include_then_exclude() {
        let options = ExtractOptions::new()
            .with_include(&["*.apk"])
            .unwrap()
            .with_exclude(&["split_config.x86.apk"])
            .unwrap();
        assert!(options.selects("base.apk"));
        assert!(!options.selects("split_config.x86.apk"));
        assert!(!options.selects("lib/arm64/libfoo.so"));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = ExtractOptions::new().with_include(&["a[b"]).err().unwrap();
        assert!(err.is_configuration());
    }
}
