//! Batch restore
//!
//! Restores several backups one after the other. A failed package is
//! recorded and the batch moves on to the next one.

use tracing::{error, info, warn};

use crate::backup::BackupLocation;
use crate::error::{RestoreError, RestoreResult};
use crate::journal::{JournalEntry, RestoreJournal};
use crate::platform::Platform;

use super::op::{RestoreLocks, RestoreOp, RestoreOptions, RestoreOutcome};

/// Outcome of a batch
#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<RestoreOutcome>,
    /// Each failure wrapped as [`RestoreError::Package`]
    pub failed: Vec<RestoreError>,
}

impl BatchReport {
    pub fn requires_restart(&self) -> bool {
        self.succeeded.iter().any(|outcome| outcome.requires_restart)
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs restores sequentially with shared locks
pub struct BatchRunner<'a> {
    platform: Platform,
    locks: RestoreLocks,
    options: RestoreOptions,
    journal: Option<&'a RestoreJournal>,
}

impl<'a> BatchRunner<'a> {
    pub fn new(platform: Platform, locks: RestoreLocks, options: RestoreOptions) -> Self {
        Self {
            platform,
            locks,
            options,
            journal: None,
        }
    }

    /// Record every outcome in `journal`
    pub fn with_journal(mut self, journal: &'a RestoreJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Restore one backup
    pub fn restore(&self, location: BackupLocation) -> RestoreResult<RestoreOutcome> {
        let mut op = RestoreOp::open(
            location,
            self.options.clone(),
            self.platform.clone(),
            self.locks.clone(),
        )?;
        let outcome = op.run();
        op.close();
        outcome
    }

    /// Restore every backup in order, continuing past failures
    pub fn run(&self, locations: Vec<BackupLocation>) -> BatchReport {
        let mut report = BatchReport::default();
        let total = locations.len();

        for (index, location) in locations.into_iter().enumerate() {
            let package = location.package().to_string();
            let label = location.label().map(str::to_string);
            info!("Restoring {} ({}/{})", package, index + 1, total);

            let entry = match self.restore(location) {
                Ok(outcome) => {
                    let entry = JournalEntry::completed(&outcome);
                    report.succeeded.push(outcome);
                    entry
                }
                Err(e) => {
                    error!("Failed to restore {}: {}", package, e);
                    let entry = JournalEntry::failed(&package, self.options.user, label.as_deref(), &e);
                    report.failed.push(RestoreError::for_package(&package, e));
                    entry
                }
            };
            if let Some(journal) = self.journal {
                if let Err(e) = journal.record(&entry) {
                    warn!("Failed to record {} in the journal: {}", package, e);
                }
            }
        }

        info!(
            "Batch finished: {} restored, {} failed",
            report.succeeded.len(),
            report.failed.len()
        );
        report
    }
}
