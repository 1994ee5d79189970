//! Single package restore
//!
//! A [`RestoreOp`] owns everything one package/user restore touches: the
//! metadata, the checksum store, the crypto provider and every plaintext
//! file decrypted along the way. Steps run in a fixed order and any fatal
//! error aborts the rest; teardown always runs, on `close` or on drop.

use std::fmt;
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::archive::{self, ExtractOptions, ExtractStrategy, CACHE_EXCLUDES};
use crate::backup::{BackupFlags, BackupLocation, BackupMetadata, Category, ChecksumStore};
use crate::config::Settings;
use crate::crypto::{CryptoProvider, SecureString};
use crate::error::{RestoreError, RestoreResult};
use crate::platform::{PackageInfo, Platform, SDK_MARSHMALLOW};
use crate::rules::{ReplayReport, RuleEngine, RuleEntry};

/// UID archived keystore entries are named with
pub const KEYSTORE_PLACEHOLDER: i32 = -1000;

const EXT_DATA: &str = "/Android/data";
const EXT_MEDIA: &str = "/Android/media";
const EXT_OBB: &str = "/Android/obb";

/// Progress of a restore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreState {
    Initialized,
    MetadataVerified,
    ApkRestored,
    DataRestored,
    KeystoreRestored,
    ExtrasRestored,
    RulesRestored,
    Completed,
    Failed,
}

impl fmt::Display for RestoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestoreState::Initialized => "initialized",
            RestoreState::MetadataVerified => "metadata verified",
            RestoreState::ApkRestored => "APK restored",
            RestoreState::DataRestored => "data restored",
            RestoreState::KeystoreRestored => "keystore restored",
            RestoreState::ExtrasRestored => "extras restored",
            RestoreState::RulesRestored => "rules restored",
            RestoreState::Completed => "completed",
            RestoreState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Locks shared by every restore in the process.
///
/// `crypto` serializes access to key material, `install` serializes the
/// package staging directory together with installs and uninstalls.
#[derive(Debug, Clone, Default)]
pub struct RestoreLocks {
    pub crypto: Arc<Mutex<()>>,
    pub install: Arc<Mutex<()>>,
}

impl RestoreLocks {
    pub fn new() -> Self {
        Self::default()
    }
}

/// What to restore and where
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Requested categories
    pub flags: BackupFlags,
    /// Target user
    pub user: u32,
    pub passphrase: Option<SecureString>,
    /// Staging directory for APKs when running privileged
    pub staging_dir: PathBuf,
    /// Keystore root; entries live in `user_<user>` below it
    pub keystore_root: PathBuf,
    pub privileged: bool,
    pub extract_strategy: ExtractStrategy,
}

impl RestoreOptions {
    pub fn new(flags: BackupFlags, user: u32) -> Self {
        Self::from_settings(&Settings::default(), flags, user)
    }

    pub fn from_settings(settings: &Settings, flags: BackupFlags, user: u32) -> Self {
        Self {
            flags,
            user,
            passphrase: None,
            staging_dir: settings.staging_dir.clone(),
            keystore_root: settings.keystore_root.clone(),
            privileged: settings.is_privileged(),
            extract_strategy: settings.extract_strategy,
        }
    }

    pub fn with_passphrase(mut self, passphrase: Option<SecureString>) -> Self {
        self.passphrase = passphrase;
        self
    }
}

/// Result of a completed restore
#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub package: String,
    pub user: u32,
    pub label: Option<String>,
    pub state: RestoreState,
    pub requires_restart: bool,
    /// Extras and rules replayed
    pub replay: ReplayReport,
}

/// A data directory selected for restore
#[derive(Debug)]
struct PlannedDir {
    index: usize,
    path: String,
    external: bool,
}

/// Restore of one backup for one user
pub struct RestoreOp {
    location: BackupLocation,
    metadata: BackupMetadata,
    options: RestoreOptions,
    platform: Platform,
    locks: RestoreLocks,
    crypto: CryptoProvider,
    checksums: ChecksumStore,
    package_info: Option<PackageInfo>,
    /// Plaintext files created by decryption, deleted on close
    decrypted: Vec<PathBuf>,
    state: RestoreState,
    replay: ReplayReport,
    closed: bool,
}

impl RestoreOp {
    /// Read and verify a backup, ready to run.
    ///
    /// Loads the metadata, selects the crypto provider, decrypts the checksum
    /// store and verifies the metadata file against it (unless signature
    /// checks are skipped), then looks up the installed package.
    pub fn open(
        location: BackupLocation,
        options: RestoreOptions,
        platform: Platform,
        locks: RestoreLocks,
    ) -> RestoreResult<Self> {
        let metadata = BackupMetadata::read(&location)?;
        if metadata.package_name != location.package() {
            return Err(RestoreError::MalformedMetadata(format!(
                "Backup of {} found in the directory of {}",
                metadata.package_name,
                location.package()
            )));
        }
        let crypto = CryptoProvider::new(
            metadata.crypto,
            metadata.key_params.as_ref(),
            options.passphrase.as_ref(),
            Arc::clone(&locks.crypto),
        )?;

        let mut op = Self {
            location,
            metadata,
            options,
            platform,
            locks,
            crypto,
            checksums: ChecksumStore::new(),
            package_info: None,
            decrypted: Vec::new(),
            state: RestoreState::Initialized,
            replay: ReplayReport::default(),
            closed: false,
        };

        let checksum_file = op.location.checksum_file(op.metadata.crypto);
        let checksum_file = op.decrypt(vec![checksum_file])?;
        op.checksums = ChecksumStore::load(&checksum_file[0])?;

        if !op.skip_checks() {
            op.checksums
                .verify(op.metadata.checksum_algo, &op.location.metadata_file())?;
        }
        if op.metadata.user_handle != op.options.user {
            warn!(
                "Restoring a backup of user {} to user {}",
                op.metadata.user_handle, op.options.user
            );
        }
        op.package_info = op
            .platform
            .packages
            .package_info(&op.metadata.package_name, op.options.user)?;
        op.state = RestoreState::MetadataVerified;
        Ok(op)
    }

    pub fn metadata(&self) -> &BackupMetadata {
        &self.metadata
    }

    pub fn state(&self) -> RestoreState {
        self.state
    }

    pub fn package_info(&self) -> Option<&PackageInfo> {
        self.package_info.as_ref()
    }

    /// Whether something restored only takes effect after a reboot
    pub fn requires_restart(&self) -> bool {
        self.replay.requires_restart
    }

    /// Run every requested step in order
    pub fn run(&mut self) -> RestoreResult<RestoreOutcome> {
        if self.state != RestoreState::MetadataVerified {
            return Err(RestoreError::State(format!(
                "Restore of {} cannot run from state {}",
                self.metadata.package_name, self.state
            )));
        }
        if let Err(e) = self.run_steps() {
            warn!(
                "Restore of {} failed after {}: {}",
                self.metadata.package_name, self.state, e
            );
            self.state = RestoreState::Failed;
            return Err(e);
        }
        self.state = RestoreState::Completed;
        info!("Restored {} for user {}", self.metadata.package_name, self.options.user);
        Ok(RestoreOutcome {
            package: self.metadata.package_name.clone(),
            user: self.options.user,
            label: self.location.label().map(str::to_string),
            state: self.state,
            requires_restart: self.requires_restart(),
            replay: self.replay.clone(),
        })
    }

    fn run_steps(&mut self) -> RestoreResult<()> {
        let requested = self.options.flags;
        if requested.backup_apk_files() {
            self.restore_apk_files()?;
        }
        self.state = RestoreState::ApkRestored;

        if requested.backup_data() {
            self.restore_data()?;
        }
        self.state = RestoreState::DataRestored;

        if requested.backup_data() && self.metadata.key_store {
            self.restore_keystore()?;
        }
        self.state = RestoreState::KeystoreRestored;

        if requested.backup_extras() {
            self.restore_extras()?;
        }
        self.state = RestoreState::ExtrasRestored;

        if requested.backup_rules() {
            self.restore_rules()?;
        }
        self.state = RestoreState::RulesRestored;
        Ok(())
    }

    /// Verify every archived file against the checksum store without
    /// restoring anything. Returns the number of files checked.
    pub fn verify(&self) -> RestoreResult<usize> {
        let mode = self.metadata.crypto;
        let algo = self.metadata.checksum_algo;
        let mut files = Vec::new();
        if self.metadata.flags.backup_apk_files() {
            files.extend(self.location.require_files(Category::Source, mode)?);
        }
        if self.metadata.flags.backup_data() {
            for index in 0..self.metadata.data_dirs.len() {
                files.extend(self.location.require_files(Category::Data(index), mode)?);
            }
            if self.metadata.key_store {
                files.extend(self.location.require_files(Category::KeyStore, mode)?);
            }
        }
        files.extend(self.location.misc_file(mode));
        files.extend(self.location.rules_file(mode));

        self.checksums.verify(algo, &self.location.metadata_file())?;
        self.checksums.verify_all(algo, &files)?;
        Ok(files.len() + 1)
    }

    /// Release key material and delete decrypted files. Runs once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        debug!("Closing restore of {}", self.metadata.package_name);
        self.crypto.close();
        for file in self.decrypted.drain(..) {
            debug!("Deleting {}", file.display());
            if let Err(e) = fs::remove_file(&file) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to delete {}: {}", file.display(), e);
                }
            }
        }
    }

    fn skip_checks(&self) -> bool {
        self.options.flags.skip_signature_check()
    }

    fn package(&self) -> &str {
        &self.metadata.package_name
    }

    /// Decrypt files, keeping track of the plaintext created.
    ///
    /// Without a crypto mode the inputs are returned as they are.
    fn decrypt(&mut self, files: Vec<PathBuf>) -> RestoreResult<Vec<PathBuf>> {
        let created = self.crypto.decrypt(&files)?;
        if created.is_empty() {
            return Ok(files);
        }
        self.decrypted.extend(created.iter().cloned());
        Ok(created)
    }

    fn verify_files(&self, files: &[PathBuf]) -> RestoreResult<()> {
        if self.skip_checks() {
            return Ok(());
        }
        self.checksums.verify_all(self.metadata.checksum_algo, files)
    }

    fn require_archived(&self, archived: bool, category: &str) -> RestoreResult<()> {
        if !archived {
            return Err(RestoreError::State(format!(
                "{} restore is requested but the backup of {} does not contain it",
                category,
                self.package()
            )));
        }
        Ok(())
    }

    fn require_installed(&self, category: &str) -> RestoreResult<PackageInfo> {
        self.package_info.clone().ok_or_else(|| {
            RestoreError::State(format!(
                "{} restore is requested but {} is not installed",
                category,
                self.package()
            ))
        })
    }

    fn restore_apk_files(&mut self) -> RestoreResult<()> {
        self.require_archived(self.metadata.flags.backup_apk_files(), "APK")?;
        let mode = self.metadata.crypto;
        let source_files = self.location.require_files(Category::Source, mode)?;
        let apk_names = self.metadata.apk_names()?;
        let algo = self.metadata.checksum_algo;

        let mut verified = true;
        if let Some(info) = &self.package_info {
            let installed: Vec<String> = info
                .signing_certs
                .iter()
                .map(|cert| algo.hex_digest(cert))
                .collect();
            let recorded = self.checksums.cert_checksums();
            if installed.is_empty() && !recorded.is_empty() && !self.skip_checks() {
                return Err(RestoreError::CertificatesUnavailable(format!(
                    "could not read the signing certificates of the installed {}; \
                     skip signature checks to restore anyway",
                    self.package()
                )));
            }
            for digest in recorded {
                if installed.iter().any(|i| i == digest) {
                    continue;
                }
                verified = false;
                if !self.skip_checks() {
                    return Err(RestoreError::integrity(
                        Path::new("signing certificate"),
                        installed.join(","),
                        Some(digest),
                    ));
                }
            }
        }
        self.verify_files(&source_files)?;

        let install_lock = Arc::clone(&self.locks.install);
        let package = self.package().to_string();
        let user = self.options.user;

        if !verified {
            // Different signer: the only way in is a fresh install
            let _guard = install_lock.lock().unwrap_or_else(|e| e.into_inner());
            warn!("Signing certificates of {} differ, uninstalling first", package);
            if !self.platform.installer.uninstall(&package, user, false)? {
                return Err(RestoreError::Install(format!(
                    "An uninstall of {} was necessary but failed",
                    package
                )));
            }
            self.package_info = None;
        }

        let _guard = install_lock.lock().unwrap_or_else(|e| e.into_inner());
        let staging = if self.options.privileged {
            fs::create_dir_all(&self.options.staging_dir).map_err(|e| {
                RestoreError::Install(format!(
                    "Could not create staging directory {}: {}",
                    self.options.staging_dir.display(),
                    e
                ))
            })?;
            self.options.staging_dir.clone()
        } else {
            self.location.path().to_path_buf()
        };

        let apks: Vec<PathBuf> = apk_names.iter().map(|name| staging.join(name)).collect();

        let installed = self.stage_and_install(source_files, &apk_names, &apks, &staging);
        for apk in &apks {
            if let Err(e) = fs::remove_file(apk) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to delete staged {}: {}", apk.display(), e);
                }
            }
        }
        if !installed? {
            return Err(RestoreError::Install(format!(
                "A (re)install of {} was necessary but failed",
                package
            )));
        }

        self.package_info = self.platform.packages.package_info(&package, user)?;
        if self.package_info.is_none() {
            return Err(RestoreError::Install(format!(
                "{} is not installed after a successful install",
                package
            )));
        }
        info!("Installed {} ({} APKs) for user {}", package, apks.len(), user);
        Ok(())
    }

    fn stage_and_install(
        &mut self,
        source_files: Vec<PathBuf>,
        apk_names: &[String],
        apks: &[PathBuf],
        staging: &Path,
    ) -> RestoreResult<bool> {
        let source_files = self.decrypt(source_files)?;
        let options = ExtractOptions::new().with_include(apk_names)?;
        archive::extract(&source_files, self.metadata.tar_type, staging, &options)?;
        if let Some(missing) = apks.iter().find(|apk| !apk.is_file()) {
            return Err(RestoreError::Extraction(format!(
                "{} is missing from the source archive",
                missing.display()
            )));
        }
        self.platform.installer.install(
            apks,
            self.package(),
            self.options.user,
            self.metadata.installer.as_deref(),
        )
    }

    /// Data directories selected by the requested flags, with the source
    /// user rewritten to the target user and, before Android 6.0, shared
    /// storage rewritten to its legacy mount point
    fn plan_data_dirs(&self) -> Vec<PlannedDir> {
        let requested = self.options.flags;
        let legacy_storage = self.platform.services.sdk_int() < SDK_MARSHMALLOW;
        let from = format!("/{}/", self.metadata.user_handle);
        let to = format!("/{}/", self.options.user);

        let mut planned = Vec::new();
        for (index, dir) in self.metadata.data_dirs.iter().enumerate() {
            let path = replace_once(dir, &from, &to);
            let external = BackupMetadata::is_external(&path);
            if external {
                if !requested.backup_external_data() && path.contains(EXT_DATA) {
                    continue;
                }
                if !requested.backup_media_obb() && (path.contains(EXT_MEDIA) || path.contains(EXT_OBB)) {
                    continue;
                }
            } else if !requested.backup_internal_data() {
                continue;
            }
            let path = if legacy_storage {
                path.replace("/storage/emulated/", "/mnt/shell/emulated/")
            } else {
                path
            };
            planned.push(PlannedDir { index, path, external });
        }
        planned
    }

    fn restore_data(&mut self) -> RestoreResult<()> {
        self.require_archived(self.metadata.flags.backup_data(), "Data")?;
        let info = self.require_installed("Data")?;
        let mode = self.metadata.crypto;
        let planned = self.plan_data_dirs();

        // Every archived directory is checked, restored or not
        let mut archived = Vec::with_capacity(self.metadata.data_dirs.len());
        for index in 0..self.metadata.data_dirs.len() {
            let parts = self.location.require_files(Category::Data(index), mode)?;
            self.verify_files(&parts)?;
            archived.push(parts);
        }

        let package = self.package().to_string();
        let user = self.options.user;
        if !self.platform.packages.clear_application_user_data(&package, user)? {
            warn!("Could not clear the data of {}", package);
        }

        let mut options = ExtractOptions::new();
        if !self.options.flags.backup_cache() {
            options = options.with_exclude(CACHE_EXCLUDES)?;
        }
        if let Some(install_dir) = info.install_dir() {
            options = options.with_link_root(install_dir);
        }

        for dir in planned {
            let parts = std::mem::take(&mut archived[dir.index]);
            let target = PathBuf::from(&dir.path);

            let owner = match fs::metadata(&target) {
                Ok(meta) => Some((meta.uid(), meta.gid())),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    fs::create_dir_all(&target).map_err(|e| {
                        RestoreError::Io(format!("Failed to create {}: {}", target.display(), e))
                    })?;
                    (!dir.external).then_some((info.uid, info.uid))
                }
                Err(e) => {
                    warn!("Failed to stat {}: {}", target.display(), e);
                    Some((info.uid, info.uid))
                }
            };

            let parts = self.decrypt(parts)?;
            let summary = archive::extract_with_strategy(
                self.options.extract_strategy,
                &parts,
                self.metadata.tar_type,
                &target,
                &options,
            )?;
            debug!(
                "Data {} of {}: {} files, {} dirs, {} links",
                dir.index, package, summary.files, summary.dirs, summary.links
            );

            if let Some((uid, gid)) = owner {
                if let Err(e) = self.platform.services.chown(&target, uid, gid, true) {
                    if !dir.external {
                        return Err(e);
                    }
                    warn!("Failed to restore ownership of {}: {}", target.display(), e);
                }
            }
            if !dir.external {
                self.platform.services.restorecon(&target, true)?;
            }
        }
        Ok(())
    }

    fn restore_keystore(&mut self) -> RestoreResult<()> {
        let info = self.require_installed("KeyStore")?;
        let mode = self.metadata.crypto;
        let parts = self.location.require_files(Category::KeyStore, mode)?;
        self.verify_files(&parts)?;
        let parts = self.decrypt(parts)?;

        let keystore = self
            .options
            .keystore_root
            .join(format!("user_{}", self.options.user));
        let meta = fs::metadata(&keystore).map_err(|e| {
            RestoreError::Platform(format!(
                "Failed to access properties of {}: {}",
                keystore.display(),
                e
            ))
        })?;
        let (dir_uid, dir_gid, dir_mode) = (meta.uid(), meta.gid(), meta.mode() & 0o777);

        archive::extract(&parts, self.metadata.tar_type, &keystore, &ExtractOptions::new())?;
        let services = Arc::clone(&self.platform.services);
        services.chown(&keystore, dir_uid, dir_gid, false)?;
        fs::set_permissions(&keystore, fs::Permissions::from_mode(dir_mode))?;

        let placeholder = KEYSTORE_PLACEHOLDER.to_string();
        let live_uid = info.uid.to_string();
        for entry in fs::read_dir(&keystore)? {
            let name = entry?.file_name().to_string_lossy().to_string();
            let named_for_placeholder = name.starts_with(&format!("{}_", placeholder))
                || name.starts_with(&format!(".{}_", placeholder));
            if !named_for_placeholder {
                continue;
            }
            let renamed = keystore.join(replace_once(&name, &placeholder, &live_uid));
            fs::rename(keystore.join(&name), &renamed).map_err(|e| {
                RestoreError::Platform(format!("Failed to rename keystore file {}: {}", name, e))
            })?;
            services.chown(&renamed, dir_uid, dir_gid, false)?;
            fs::set_permissions(&renamed, fs::Permissions::from_mode(0o600))?;
        }

        if let Err(e) = services.restorecon(&keystore, true) {
            warn!("{}", e);
        }
        Ok(())
    }

    fn restore_extras(&mut self) -> RestoreResult<()> {
        self.require_archived(self.metadata.flags.backup_extras(), "Extras")?;
        let info = self.require_installed("Extras")?;
        let Some(misc) = self.location.misc_file(self.metadata.crypto) else {
            info!("No extras stored for {}", self.package());
            return Ok(());
        };
        self.verify_files(std::slice::from_ref(&misc))?;
        let misc = self.decrypt(vec![misc])?;
        let contents = fs::read_to_string(&misc[0])?;
        let entries = RuleEntry::parse_all(&contents, self.package())?;

        let engine = RuleEngine::new(Arc::clone(&self.platform.services));
        let report = engine.apply(&entries, self.package(), info.uid, self.options.user);
        info!(
            "Extras of {}: {} applied, {} skipped, {} failed",
            self.package(),
            report.applied,
            report.skipped,
            report.failed
        );
        self.replay.merge(report);
        Ok(())
    }

    fn restore_rules(&mut self) -> RestoreResult<()> {
        self.require_archived(self.metadata.flags.backup_rules(), "Rules")?;
        self.require_installed("Rules")?;
        let Some(rules) = self.location.rules_file(self.metadata.crypto) else {
            if self.metadata.has_rules {
                return Err(RestoreError::State(format!(
                    "Rules file of {} should exist but does not",
                    self.package()
                )));
            }
            return Ok(());
        };
        self.verify_files(std::slice::from_ref(&rules))?;
        let rules = self.decrypt(vec![rules])?;

        let mut importer = self.platform.rules_importer(&[self.options.user]);
        importer.add_rules_from_file(&rules[0])?;
        importer.set_packages_to_import(&[self.package().to_string()]);
        let report = importer.apply_rules(true)?;
        self.replay.merge(report);
        Ok(())
    }
}

impl Drop for RestoreOp {
    fn drop(&mut self) {
        self.close();
    }
}

fn replace_once(value: &str, from: &str, to: &str) -> String {
    match value.find(from) {
        Some(at) => format!("{}{}{}", &value[..at], to, &value[at + from.len()..]),
        None => value.to_string(),
    }
}
