//! Rules importer
//!
//! Loads rule files and applies them to a chosen set of packages for every
//! selected user. The restore path uses it for `rules.tsv`; the same importer
//! backs standalone rule imports.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{RestoreError, RestoreResult};
use crate::platform::{PackageManager, SystemServices};

use super::engine::{ReplayReport, RuleEngine};
use super::entry::RuleEntry;

/// Imports rules from files into the live system
pub trait RulesImporter {
    /// Queue every entry of a rules file
    fn add_rules_from_file(&mut self, path: &Path) -> RestoreResult<()>;

    /// Restrict the import to these packages
    fn set_packages_to_import(&mut self, packages: &[String]);

    /// Apply the queued entries; with `commit` unset nothing is changed and
    /// every entry is reported as skipped
    fn apply_rules(&mut self, commit: bool) -> RestoreResult<ReplayReport>;
}

/// [`RulesImporter`] over the tab-separated rules format
pub struct TsvRulesImporter {
    packages: Arc<dyn PackageManager>,
    engine: RuleEngine,
    users: Vec<u32>,
    entries: Vec<RuleEntry>,
    selected: Option<HashSet<String>>,
}

impl TsvRulesImporter {
    pub fn new(packages: Arc<dyn PackageManager>, services: Arc<dyn SystemServices>, users: Vec<u32>) -> Self {
        Self {
            packages,
            engine: RuleEngine::new(services),
            users,
            entries: Vec::new(),
            selected: None,
        }
    }

    /// Packages the import covers, in first-seen order
    fn target_packages(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .map(RuleEntry::package)
            .filter(|package| {
                self.selected
                    .as_ref()
                    .map_or(true, |selected| selected.contains(*package))
            })
            .filter(|package| seen.insert(package.to_string()))
            .map(str::to_string)
            .collect()
    }
}

impl RulesImporter for TsvRulesImporter {
    fn add_rules_from_file(&mut self, path: &Path) -> RestoreResult<()> {
        let contents = fs::read_to_string(path).map_err(|e| {
            RestoreError::Io(format!("Failed to read rules {}: {}", path.display(), e))
        })?;
        // Rules files always name their package; there is no legacy fallback
        let entries = RuleEntry::parse_all(&contents, "")?;
        self.entries.extend(entries);
        Ok(())
    }

    fn set_packages_to_import(&mut self, packages: &[String]) {
        self.selected = Some(packages.iter().cloned().collect());
    }

    fn apply_rules(&mut self, commit: bool) -> RestoreResult<ReplayReport> {
        let mut report = ReplayReport::default();
        for package in self.target_packages() {
            let entries: Vec<RuleEntry> = self
                .entries
                .iter()
                .filter(|entry| entry.package() == package)
                .cloned()
                .collect();
            for &user in &self.users {
                if !commit {
                    report.skipped += entries.len();
                    continue;
                }
                let Some(info) = self.packages.package_info(&package, user)? else {
                    warn!("{} is not installed for user {}, skipping its rules", package, user);
                    report.skipped += entries.len();
                    continue;
                };
                report.merge(self.engine.apply(&entries, &package, info.uid, user));
            }
        }
        info!(
            "Rules import: {} applied, {} skipped, {} failed",
            report.applied, report.skipped, report.failed
        );
        Ok(report)
    }
}
