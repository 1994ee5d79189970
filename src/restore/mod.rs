//! Restore orchestration
//!
//! [`RestoreOp`] restores one backup for one user through a fixed sequence of
//! steps (APK, data, keystore, extras, rules). [`BatchRunner`] drives many of
//! them with shared [`RestoreLocks`] and records each outcome.

mod batch;
mod op;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{BatchReport, BatchRunner};
pub use op::{
    RestoreLocks, RestoreOp, RestoreOptions, RestoreOutcome, RestoreState, KEYSTORE_PLACEHOLDER,
};
