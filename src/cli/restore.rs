//! Restore and verify commands

use std::sync::Arc;

use clap::Args;
use tracing::warn;

use crate::backup::{BackupFlags, BackupLocation, BackupMetadata};
use crate::config::{Settings, VaultPaths};
use crate::error::{RestoreError, RestoreResult};
use crate::journal::RestoreJournal;
use crate::platform::{Platform, SystemShell};
use crate::restore::{BatchRunner, RestoreLocks, RestoreOp, RestoreOptions};

use super::read_passphrase;

/// Which backups to restore and which parts of them
#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Packages to restore
    #[arg(required_unless_present = "all")]
    pub packages: Vec<String>,

    /// Restore every package with a backup
    #[arg(long, conflicts_with = "packages")]
    pub all: bool,

    /// Backup label (the unnamed backup when omitted)
    #[arg(short, long)]
    pub label: Option<String>,

    /// Target user
    #[arg(short, long, default_value_t = 0)]
    pub user: u32,

    /// Restore APK files
    #[arg(long)]
    pub apk: bool,

    /// Restore internal data
    #[arg(long)]
    pub data: bool,

    /// Restore external data (Android/data)
    #[arg(long)]
    pub external: bool,

    /// Restore Android/media and Android/obb
    #[arg(long)]
    pub media_obb: bool,

    /// Restore cache directories too
    #[arg(long)]
    pub cache: bool,

    /// Replay extras (permissions, app-ops, ...)
    #[arg(long)]
    pub extras: bool,

    /// Replay rules
    #[arg(long)]
    pub rules: bool,

    /// Do not verify checksums and signing certificates
    #[arg(long)]
    pub skip_signature_check: bool,
}

impl RestoreArgs {
    /// Requested flags; the configured defaults when no category is named
    pub fn flags(&self, defaults: BackupFlags) -> BackupFlags {
        let selected = [
            (self.apk, BackupFlags::APK_FILES),
            (self.data, BackupFlags::INTERNAL_DATA),
            (self.external, BackupFlags::EXTERNAL_DATA),
            (self.media_obb, BackupFlags::MEDIA_OBB),
            (self.extras, BackupFlags::EXTRAS),
            (self.rules, BackupFlags::RULES),
        ];
        let mut flags = if selected.iter().any(|(on, _)| *on) {
            let mut flags = BackupFlags::default();
            for (on, flag) in selected {
                flags.set(flag, on);
            }
            flags
        } else {
            defaults
        };
        flags.set(BackupFlags::CACHE, self.cache || flags.backup_cache());
        if self.skip_signature_check {
            flags.set(BackupFlags::SKIP_SIGNATURE_CHECK, true);
        }
        flags
    }
}

/// Arguments of `verify`
#[derive(Args, Debug)]
pub struct VerifyArgs {
    pub package: String,

    #[arg(short, long)]
    pub label: Option<String>,
}

/// Handle `restore`
pub fn handle_restore_command(paths: &VaultPaths, settings: &Settings, args: RestoreArgs) -> RestoreResult<()> {
    let root = settings.backup_root(paths);
    let packages = if args.all {
        BackupLocation::list_packages(&root)?
    } else {
        args.packages.clone()
    };
    let locations: Vec<BackupLocation> = packages
        .iter()
        .map(|package| BackupLocation::new(&root, package, args.label.as_deref()))
        .collect();
    if locations.is_empty() {
        println!("No backups found in {}", root.display());
        return Ok(());
    }

    let needs_passphrase = locations.iter().any(|location| {
        BackupMetadata::read(location)
            .map(|metadata| metadata.crypto.needs_passphrase())
            .unwrap_or(false)
    });
    let passphrase = if needs_passphrase {
        Some(read_passphrase()?)
    } else {
        None
    };

    let flags = args.flags(settings.default_flags);
    let options = RestoreOptions::from_settings(settings, flags, args.user).with_passphrase(passphrase);
    let platform = Platform::android(Arc::new(SystemShell), settings.sdk_int);

    let journal = RestoreJournal::new(paths.journal_file());
    let mut runner = BatchRunner::new(platform, RestoreLocks::new(), options);
    if settings.journal_enabled {
        paths.ensure_directories()?;
        runner = runner.with_journal(&journal);
    }

    println!("Restoring {} package(s) for user {} ({})", locations.len(), args.user, flags);
    let report = runner.run(locations);

    for outcome in &report.succeeded {
        let mut line = format!("  OK    {}", outcome.package);
        if outcome.replay.failed > 0 {
            line.push_str(&format!(" ({} rules failed)", outcome.replay.failed));
        }
        println!("{}", line);
    }
    for failure in &report.failed {
        println!("  FAIL  {}", failure);
    }
    println!();
    println!(
        "{} restored, {} failed",
        report.succeeded.len(),
        report.failed.len()
    );
    if report.requires_restart() {
        println!("A restart is required for some changes to take effect.");
    }

    let failed = report.failed.len();
    match report.failed.into_iter().next() {
        None => Ok(()),
        Some(e) if failed == 1 => Err(e),
        Some(_) => Err(RestoreError::State(format!("{} packages failed to restore", failed))),
    }
}

/// Handle `verify`
pub fn handle_verify_command(paths: &VaultPaths, settings: &Settings, args: VerifyArgs) -> RestoreResult<()> {
    let root = settings.backup_root(paths);
    let location = BackupLocation::new(&root, &args.package, args.label.as_deref());
    let metadata = BackupMetadata::read(&location)?;
    let passphrase = if metadata.crypto.needs_passphrase() {
        Some(read_passphrase()?)
    } else {
        None
    };

    let options = RestoreOptions::from_settings(settings, BackupFlags::default(), metadata.user_handle)
        .with_passphrase(passphrase);
    let platform = Platform::android(Arc::new(SystemShell), settings.sdk_int);
    let mut op = RestoreOp::open(location, options, platform, RestoreLocks::new())?;
    let checked = op.verify();
    op.close();

    match checked {
        Ok(count) => {
            println!("{}: {} file(s) verified", args.package, count);
            Ok(())
        }
        Err(e) => {
            warn!("Verification of {} failed: {}", args.package, e);
            Err(e)
        }
    }
}
