//! Configuration commands

use std::path::PathBuf;

use clap::Subcommand;

use crate::archive::ExtractStrategy;
use crate::backup::BackupFlags;
use crate::config::{Settings, VaultPaths};
use crate::error::{RestoreError, RestoreResult};

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show paths and settings
    Show,

    /// Change a setting
    Set {
        /// One of: backup_root, staging_dir, keystore_root, privileged,
        /// sdk_int, default_flags, log_level, extract_strategy, journal_enabled
        key: String,
        /// New value; `auto` clears optional settings
        value: String,
    },
}

/// Handle a config command
pub fn handle_config_command(paths: &VaultPaths, settings: &mut Settings, cmd: ConfigCommands) -> RestoreResult<()> {
    match cmd {
        ConfigCommands::Show => {
            println!("apkvault Configuration");
            println!("======================");
            println!("Config directory: {}", paths.base_dir().display());
            println!("Settings file:    {}", paths.settings_file().display());
            println!("Journal:          {}", paths.journal_file().display());
            println!();
            println!("Settings:");
            println!("  backup_root:      {}", settings.backup_root(paths).display());
            println!("  staging_dir:      {}", settings.staging_dir.display());
            println!("  keystore_root:    {}", settings.keystore_root.display());
            println!(
                "  privileged:       {}{}",
                settings.is_privileged(),
                if settings.privileged.is_none() { " (detected)" } else { "" }
            );
            match settings.sdk_int {
                Some(sdk) => println!("  sdk_int:          {}", sdk),
                None => println!("  sdk_int:          (detected)"),
            }
            println!("  default_flags:    {}", settings.default_flags);
            println!("  log_level:        {}", settings.log_level);
            println!("  extract_strategy: {:?}", settings.extract_strategy);
            println!("  journal_enabled:  {}", settings.journal_enabled);
        }
        ConfigCommands::Set { key, value } => {
            apply_setting(settings, &key, &value)?;
            settings.save(paths)?;
            println!("{} = {}", key, value);
        }
    }
    Ok(())
}

fn apply_setting(settings: &mut Settings, key: &str, value: &str) -> RestoreResult<()> {
    let invalid = || RestoreError::Configuration(format!("Invalid value for {}: {}", key, value));
    let auto = value.eq_ignore_ascii_case("auto");
    match key {
        "backup_root" => settings.backup_root = (!auto).then(|| PathBuf::from(value)),
        "staging_dir" => settings.staging_dir = PathBuf::from(value),
        "keystore_root" => settings.keystore_root = PathBuf::from(value),
        "privileged" => {
            settings.privileged = if auto {
                None
            } else {
                Some(value.parse().map_err(|_| invalid())?)
            }
        }
        "sdk_int" => {
            settings.sdk_int = if auto {
                None
            } else {
                Some(value.parse().map_err(|_| invalid())?)
            }
        }
        "default_flags" => settings.default_flags = parse_flags(value).ok_or_else(invalid)?,
        "log_level" => settings.log_level = value.to_string(),
        "extract_strategy" => {
            settings.extract_strategy = match value {
                "inplace" | "in-place" => ExtractStrategy::InPlace,
                "staged" => ExtractStrategy::Staged,
                _ => return Err(invalid()),
            }
        }
        "journal_enabled" => settings.journal_enabled = value.parse().map_err(|_| invalid())?,
        _ => {
            return Err(RestoreError::Configuration(format!("Unknown setting: {}", key)));
        }
    }
    Ok(())
}

/// Comma-separated category names, or a raw bitmask
fn parse_flags(value: &str) -> Option<BackupFlags> {
    if let Ok(bits) = value.parse::<u32>() {
        return Some(BackupFlags::new(bits));
    }
    let mut flags = BackupFlags::default();
    for name in value.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        let flag = match name {
            "apk" => BackupFlags::APK_FILES,
            "internal-data" | "data" => BackupFlags::INTERNAL_DATA,
            "external-data" => BackupFlags::EXTERNAL_DATA,
            "media-obb" => BackupFlags::MEDIA_OBB,
            "extras" => BackupFlags::EXTRAS,
            "rules" => BackupFlags::RULES,
            "cache" => BackupFlags::CACHE,
            _ => return None,
        };
        flags.set(flag, true);
    }
    Some(flags)
}
