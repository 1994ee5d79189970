//! CLI command handlers
//!
//! Bridges clap argument parsing with the restore engine.

pub mod config;
pub mod inspect;
pub mod journal;
pub mod restore;

pub use config::{handle_config_command, ConfigCommands};
pub use inspect::{handle_info_command, handle_list_command};
pub use journal::handle_journal_command;
pub use restore::{handle_restore_command, handle_verify_command, RestoreArgs, VerifyArgs};

use crate::crypto::SecureString;
use crate::error::{RestoreError, RestoreResult};

/// Environment variable consulted before prompting for a passphrase
pub const PASSPHRASE_ENV: &str = "APKVAULT_PASSPHRASE";

/// Backup passphrase from the environment, or a hidden prompt
pub fn read_passphrase() -> RestoreResult<SecureString> {
    let passphrase = match std::env::var(PASSPHRASE_ENV) {
        Ok(passphrase) => SecureString::new(passphrase),
        Err(_) => rpassword::prompt_password("Backup passphrase: ")
            .map(SecureString::new)
            .map_err(|e| RestoreError::Configuration(format!("Failed to read passphrase: {}", e)))?,
    };
    if passphrase.is_empty() {
        return Err(RestoreError::Configuration("Passphrase is empty".to_string()));
    }
    Ok(passphrase)
}

/// Format an age like "5m" or "3d"
pub fn format_age(duration: chrono::Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);

    if total_seconds < 60 {
        return format!("{}s", total_seconds);
    }

    let minutes = total_seconds / 60;
    if minutes < 60 {
        return format!("{}m", minutes);
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h", hours);
    }

    let days = hours / 24;
    if days < 30 {
        return format!("{}d", days);
    }

    format!("{}mo", days / 30)
}

/// Format a byte count for humans
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
