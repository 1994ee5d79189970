//! Tar extraction and creation over split, compressed streams

use std::fs::{self, File, Permissions};
use std::io::{self, BufReader, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, warn};

use crate::backup::TarType;
use crate::error::{RestoreError, RestoreResult};

use super::path_safety::{normalize, safe_join};
use super::split::{SplitReader, SplitWriter};
use super::{ExtractOptions, ExtractStrategy};

/// Counts of what an extraction produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files: usize,
    pub dirs: usize,
    pub links: usize,
    pub skipped: usize,
}

/// Extract split archive `parts` into `destination`, in place
pub fn extract(
    parts: &[PathBuf],
    tar_type: TarType,
    destination: &Path,
    options: &ExtractOptions,
) -> RestoreResult<ExtractSummary> {
    fs::create_dir_all(destination).map_err(|e| {
        extraction_error(format!("Failed to create {}", destination.display()), e)
    })?;
    let reader = decompressor(tar_type, SplitReader::new(parts))?;
    unpack(reader, destination, options)
}

/// Extract using the given strategy.
///
/// [`ExtractStrategy::Staged`] unpacks into a sibling directory and replaces
/// `destination` with it only once every entry has been written.
pub fn extract_with_strategy(
    strategy: ExtractStrategy,
    parts: &[PathBuf],
    tar_type: TarType,
    destination: &Path,
    options: &ExtractOptions,
) -> RestoreResult<ExtractSummary> {
    match strategy {
        ExtractStrategy::InPlace => extract(parts, tar_type, destination, options),
        ExtractStrategy::Staged => {
            let staging = sibling(destination, "staging")?;
            let _ = fs::remove_dir_all(&staging);
            let summary = match extract(parts, tar_type, &staging, options) {
                Ok(summary) => summary,
                Err(e) => {
                    let _ = fs::remove_dir_all(&staging);
                    return Err(e);
                }
            };
            swap_into_place(&staging, destination)?;
            Ok(summary)
        }
    }
}

/// Archive `source_dir` into `<prefix><n>.tar.<gz|zst>` parts (write path)
pub fn create(
    source_dir: &Path,
    prefix: &str,
    tar_type: TarType,
    split_size: u64,
) -> RestoreResult<Vec<PathBuf>> {
    let suffix = format!(".tar.{}", tar_type.extension());
    let writer = SplitWriter::new(prefix, suffix, split_size);
    let context = || format!("Failed to archive {}", source_dir.display());

    let writer = match tar_type {
        TarType::Gz => {
            let encoder = GzEncoder::new(writer, Compression::default());
            let encoder = append_tree(encoder, source_dir).map_err(|e| extraction_error(context(), e))?;
            encoder.finish().map_err(|e| extraction_error(context(), e))?
        }
        TarType::Zst => {
            let encoder = zstd::stream::write::Encoder::new(writer, 0)
                .map_err(|e| extraction_error(context(), e))?;
            let encoder = append_tree(encoder, source_dir).map_err(|e| extraction_error(context(), e))?;
            encoder.finish().map_err(|e| extraction_error(context(), e))?
        }
    };
    writer.finish().map_err(|e| extraction_error(context(), e))
}

fn append_tree<W: Write>(writer: W, source_dir: &Path) -> io::Result<W> {
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);
    builder.append_dir_all(".", source_dir)?;
    builder.into_inner()
}

fn decompressor(tar_type: TarType, reader: SplitReader) -> RestoreResult<Box<dyn Read>> {
    Ok(match tar_type {
        TarType::Gz => Box::new(GzDecoder::new(BufReader::new(reader))),
        TarType::Zst => Box::new(
            zstd::stream::read::Decoder::new(reader)
                .map_err(|e| extraction_error("Failed to open zstd stream", e))?,
        ),
    })
}

fn unpack(reader: impl Read, destination: &Path, options: &ExtractOptions) -> RestoreResult<ExtractSummary> {
    let mut archive = tar::Archive::new(reader);
    let mut summary = ExtractSummary::default();
    // Directory modes are applied last so read-only directories can be filled
    let mut dir_attrs = Vec::new();

    let entries = archive
        .entries()
        .map_err(|e| extraction_error("Failed to read archive", e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| extraction_error("Failed to read entry", e))?;
        let archived = entry
            .path()
            .map_err(|e| extraction_error("Invalid entry path", e))?
            .into_owned();
        let rel = normalize(&archived)?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let rel_str = rel.to_string_lossy().to_string();
        if !options.selects(&rel_str) {
            summary.skipped += 1;
            continue;
        }
        let target_rel = match options.rename.get(&rel_str) {
            Some(renamed) => PathBuf::from(renamed),
            None => rel,
        };
        let dest = safe_join(destination, &target_rel)?;

        let header = entry.header();
        let entry_type = header.entry_type();
        let mode = header.mode().ok();
        let mtime = header.mtime().ok();

        if entry_type.is_dir() {
            ensure_dir(&dest)?;
            dir_attrs.push((dest, mode, mtime));
            summary.dirs += 1;
        } else if entry_type.is_symlink() {
            let target = entry
                .link_name()
                .map_err(|e| extraction_error("Invalid link target", e))?
                .ok_or_else(|| RestoreError::Extraction(format!("Link {} has no target", rel_str)))?
                .into_owned();
            let target = reroot_link(&target, options.link_root.as_deref());
            write_symlink(&target, &dest)?;
            summary.links += 1;
        } else if entry_type.is_hard_link() {
            let source = entry
                .link_name()
                .map_err(|e| extraction_error("Invalid link target", e))?
                .ok_or_else(|| RestoreError::Extraction(format!("Link {} has no target", rel_str)))?
                .into_owned();
            let source = safe_join(destination, &source)?;
            create_parent(&dest)?;
            replace_existing(&dest)?;
            fs::hard_link(&source, &dest)
                .map_err(|e| extraction_error(format!("Failed to link {}", dest.display()), e))?;
            summary.files += 1;
        } else if entry_type.is_file() {
            write_file(&mut entry, &dest, mode, mtime)?;
            summary.files += 1;
        } else {
            debug!("Skipping special entry {}", rel_str);
            summary.skipped += 1;
        }
    }

    for (dir, mode, mtime) in dir_attrs.into_iter().rev() {
        if let Some(mode) = mode {
            fs::set_permissions(&dir, Permissions::from_mode(mode & 0o7777)).map_err(|e| {
                extraction_error(format!("Failed to set mode of {}", dir.display()), e)
            })?;
        }
        if let Some(mtime) = mtime {
            if let Err(e) = File::open(&dir).and_then(|f| f.set_modified(to_system_time(mtime))) {
                warn!("Failed to set mtime of {}: {}", dir.display(), e);
            }
        }
    }

    Ok(summary)
}

/// Write a regular file to a temporary sibling and rename it into place
fn write_file(
    reader: &mut impl Read,
    dest: &Path,
    mode: Option<u32>,
    mtime: Option<u64>,
) -> RestoreResult<()> {
    create_parent(dest)?;
    let temp = sibling(dest, "tmp")?;
    let result = (|| -> io::Result<()> {
        let mut file = File::create(&temp)?;
        io::copy(reader, &mut file)?;
        if let Some(mode) = mode {
            file.set_permissions(Permissions::from_mode(mode & 0o7777))?;
        }
        if let Some(mtime) = mtime {
            file.set_modified(to_system_time(mtime))?;
        }
        file.sync_all()?;
        if fs::symlink_metadata(dest).map(|m| m.is_dir()).unwrap_or(false) {
            fs::remove_dir_all(dest)?;
        }
        fs::rename(&temp, dest)
    })();

    result.map_err(|e| {
        let _ = fs::remove_file(&temp);
        extraction_error(format!("Failed to write {}", dest.display()), e)
    })
}

fn write_symlink(target: &Path, dest: &Path) -> RestoreResult<()> {
    create_parent(dest)?;
    replace_existing(dest)?;
    std::os::unix::fs::symlink(target, dest)
        .map_err(|e| extraction_error(format!("Failed to create link {}", dest.display()), e))
}

/// Point links into an old install's native library directory at the new one
fn reroot_link(target: &Path, link_root: Option<&Path>) -> PathBuf {
    let (Some(link_root), Some(target_str)) = (link_root, target.to_str()) else {
        return target.to_path_buf();
    };
    if !target_str.starts_with("/data/app/") {
        return target.to_path_buf();
    }
    let lib_start = target_str
        .find("/lib/")
        .or_else(|| target_str.ends_with("/lib").then(|| target_str.len() - 4));
    match lib_start {
        Some(pos) => link_root.join(&target_str[pos + 1..]),
        None => target.to_path_buf(),
    }
}

fn ensure_dir(dir: &Path) -> RestoreResult<()> {
    match fs::symlink_metadata(dir) {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(_) => fs::remove_file(dir)
            .map_err(|e| extraction_error(format!("Failed to replace {}", dir.display()), e))?,
        Err(_) => {}
    }
    fs::create_dir_all(dir)
        .map_err(|e| extraction_error(format!("Failed to create {}", dir.display()), e))
}

fn create_parent(path: &Path) -> RestoreResult<()> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent)
            .map_err(|e| extraction_error(format!("Failed to create {}", parent.display()), e)),
        None => Ok(()),
    }
}

fn replace_existing(path: &Path) -> RestoreResult<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(_) => Ok(()),
    };
    result.map_err(|e| extraction_error(format!("Failed to replace {}", path.display()), e))
}

/// `.<name>.apkvault-<tag>` next to `path`
fn sibling(path: &Path, tag: &str) -> RestoreResult<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| RestoreError::Extraction(format!("{} has no file name", path.display())))?;
    Ok(path.with_file_name(format!(".{}.apkvault-{}", name.to_string_lossy(), tag)))
}

fn swap_into_place(staging: &Path, destination: &Path) -> RestoreResult<()> {
    let old = sibling(destination, "old")?;
    let _ = fs::remove_dir_all(&old);
    let had_destination = destination.exists();
    if had_destination {
        fs::rename(destination, &old).map_err(|e| {
            extraction_error(format!("Failed to move {} aside", destination.display()), e)
        })?;
    }
    if let Err(e) = fs::rename(staging, destination) {
        if had_destination {
            let _ = fs::rename(&old, destination);
        }
        let _ = fs::remove_dir_all(staging);
        return Err(extraction_error(
            format!("Failed to swap in {}", destination.display()),
            e,
        ));
    }
    if had_destination {
        if let Err(e) = fs::remove_dir_all(&old) {
            warn!("Failed to remove {}: {}", old.display(), e);
        }
    }
    Ok(())
}

fn to_system_time(mtime: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(mtime)
}

fn extraction_error(context: impl std::fmt::Display, e: io::Error) -> RestoreError {
    RestoreError::Extraction(format!("{}: {}", context, e))
}
