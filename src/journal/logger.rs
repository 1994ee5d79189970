//! Append-only restore journal
//!
//! One JSON object per line, flushed after every write.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::{RestoreError, RestoreResult};

use super::entry::JournalEntry;

/// Writes and reads the restore journal (JSONL)
pub struct RestoreJournal {
    path: PathBuf,
}

impl RestoreJournal {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append an entry
    pub fn record(&self, entry: &JournalEntry) -> RestoreResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| RestoreError::Io(format!("Failed to open journal: {}", e)))?;

        let json = serde_json::to_string(entry)
            .map_err(|e| RestoreError::Json(format!("Failed to serialize journal entry: {}", e)))?;
        writeln!(file, "{}", json)
            .map_err(|e| RestoreError::Io(format!("Failed to write journal entry: {}", e)))?;
        file.flush()
            .map_err(|e| RestoreError::Io(format!("Failed to flush journal: {}", e)))?;
        Ok(())
    }

    /// Every entry, oldest first
    pub fn read_all(&self) -> RestoreResult<Vec<JournalEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)
            .map_err(|e| RestoreError::Io(format!("Failed to open journal: {}", e)))?;

        let mut entries = Vec::new();
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| {
                RestoreError::Io(format!("Failed to read journal line {}: {}", line_num + 1, e))
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: JournalEntry = serde_json::from_str(&line).map_err(|e| {
                RestoreError::Json(format!(
                    "Failed to parse journal entry at line {}: {}",
                    line_num + 1,
                    e
                ))
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// The last `count` entries, optionally only those of one package
    pub fn read_recent(&self, count: usize, package: Option<&str>) -> RestoreResult<Vec<JournalEntry>> {
        let mut entries = self.read_all()?;
        if let Some(package) = package {
            entries.retain(|entry| entry.package == package);
        }
        let start = entries.len().saturating_sub(count);
        Ok(entries.split_off(start))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
