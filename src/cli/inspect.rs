//! Commands that look at backups without changing the device

use crate::backup::{BackupLocation, BackupMetadata, Category};
use crate::config::{Settings, VaultPaths};
use crate::error::RestoreResult;

use super::{format_age, format_size};

/// Handle `list`: every backup, or the backups of one package
pub fn handle_list_command(paths: &VaultPaths, settings: &Settings, package: Option<String>) -> RestoreResult<()> {
    let root = settings.backup_root(paths);
    let packages = match package {
        Some(package) => vec![package],
        None => BackupLocation::list_packages(&root)?,
    };

    let mut total = 0;
    for package in packages {
        let backups = BackupLocation::list_backups(&root, &package)?;
        if backups.is_empty() {
            continue;
        }
        println!("{}", package);
        for location in backups {
            let label = location.label().unwrap_or("(default)").to_string();
            match BackupMetadata::read(&location) {
                Ok(metadata) => {
                    let age = chrono::Utc::now().signed_duration_since(metadata.backup_time);
                    println!(
                        "  {:<16} {} ({}), {} ago, crypto {}",
                        label,
                        metadata.version_name,
                        metadata.version_code,
                        format_age(age),
                        metadata.crypto
                    );
                }
                Err(e) => println!("  {:<16} unreadable: {}", label, e),
            }
            total += 1;
        }
    }

    if total == 0 {
        println!("No backups found in {}", root.display());
    } else {
        println!();
        println!("Total: {} backup(s)", total);
    }
    Ok(())
}

/// Handle `info`: metadata and payload files of one backup
pub fn handle_info_command(
    paths: &VaultPaths,
    settings: &Settings,
    package: &str,
    label: Option<&str>,
) -> RestoreResult<()> {
    let root = settings.backup_root(paths);
    let location = BackupLocation::new(&root, package, label);
    let metadata = BackupMetadata::read(&location)?;
    let mode = metadata.crypto;

    println!("Backup Details");
    println!("==============");
    println!("Package:   {}", metadata.package_name);
    println!("Label:     {}", metadata.label.as_deref().unwrap_or("(default)"));
    println!("Version:   {} ({})", metadata.version_name, metadata.version_code);
    println!("Created:   {}", metadata.backup_time.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("User:      {}", metadata.user_handle);
    println!("Flags:     {}", metadata.flags);
    println!("Crypto:    {}", mode);
    println!("Checksums: {}", metadata.checksum_algo.name());
    println!("Archive:   tar.{}", metadata.tar_type.extension());
    if let Some(installer) = &metadata.installer {
        println!("Installer: {}", installer);
    }
    println!();

    let mut categories = vec![Category::Source];
    categories.extend((0..metadata.data_dirs.len()).map(Category::Data));
    if metadata.key_store {
        categories.push(Category::KeyStore);
    }
    println!("Contents:");
    for category in categories {
        let files = location.list_files(category, mode)?;
        let size: u64 = files
            .iter()
            .filter_map(|file| std::fs::metadata(file).ok())
            .map(|meta| meta.len())
            .sum();
        let detail = match category {
            Category::Data(index) => format!(" {}", metadata.data_dirs[index]),
            _ => String::new(),
        };
        println!(
            "  {:<10} {} part(s), {}{}",
            category.to_string(),
            files.len(),
            format_size(size),
            detail
        );
    }
    println!("  {:<10} {}", "extras", yes_no(location.misc_file(mode).is_some()));
    println!("  {:<10} {}", "rules", yes_no(location.rules_file(mode).is_some()));
    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
