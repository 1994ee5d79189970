//! Restore journal
//!
//! Every package restore, successful or not, is appended to a JSONL journal
//! so batch runs can be reviewed afterwards with `apkvault journal`.

mod entry;
mod logger;

pub use entry::JournalEntry;
pub use logger::RestoreJournal;
