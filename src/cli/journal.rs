//! Journal command

use crate::config::VaultPaths;
use crate::error::RestoreResult;
use crate::journal::RestoreJournal;

/// Handle `journal`: show recent restore outcomes
pub fn handle_journal_command(paths: &VaultPaths, limit: usize, package: Option<&str>) -> RestoreResult<()> {
    let journal = RestoreJournal::new(paths.journal_file());
    let entries = journal.read_recent(limit, package)?;
    if entries.is_empty() {
        println!("No restores recorded.");
        return Ok(());
    }
    for entry in &entries {
        println!("{}", entry.format_human_readable());
    }
    let failed = entries.iter().filter(|entry| !entry.is_success()).count();
    println!();
    println!("{} restore(s), {} failed", entries.len(), failed);
    Ok(())
}
