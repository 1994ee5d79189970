//! In-memory platform for tests
//!
//! Records every mutating call as a single line (`method arg arg ...`) and can
//! be told to fail calls containing a given text.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{RestoreError, RestoreResult};
use crate::rules::UriGrant;

use super::{AppOpMode, PackageInfo, PackageInstaller, PackageManager, Platform, SystemServices};

pub(crate) const FAKE_CAMERA_OP: &str = "CAMERA";

#[derive(Default)]
struct FakeState {
    calls: Vec<String>,
    failing: Vec<String>,
    sdk_int: Option<u32>,
    magisk_hide: bool,
    app_ops: HashMap<String, AppOpMode>,
    packages: HashMap<(String, u32), PackageInfo>,
    /// Directories wiped when a package's data is cleared
    data_dirs: HashMap<String, Vec<PathBuf>>,
    /// Certificates given to packages installed through `install`
    install_certs: Vec<Vec<u8>>,
    /// Staged APK names seen by the last install, with their contents
    installed_apks: Vec<(String, Vec<u8>)>,
    install_fails: bool,
}

#[derive(Clone, Default)]
pub(crate) struct FakePlatform {
    state: Arc<Mutex<FakeState>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn platform(&self) -> Platform {
        Platform {
            installer: Arc::new(self.clone()),
            packages: Arc::new(self.clone()),
            services: Arc::new(self.clone()),
        }
    }

    pub fn services(&self) -> Arc<dyn SystemServices> {
        Arc::new(self.clone())
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn fail_calls_containing(&self, text: &str) {
        self.state().failing.push(text.to_string());
    }

    pub fn set_sdk_int(&self, sdk: u32) {
        self.state().sdk_int = Some(sdk);
    }

    pub fn set_magisk_hide_available(&self, available: bool) {
        self.state().magisk_hide = available;
    }

    pub fn set_app_op(&self, op: &str, mode: AppOpMode) {
        self.state().app_ops.insert(op.to_string(), mode);
    }

    pub fn set_data_dirs(&self, package: &str, dirs: Vec<PathBuf>) {
        self.state().data_dirs.insert(package.to_string(), dirs);
    }

    pub fn set_install_certs(&self, certs: Vec<Vec<u8>>) {
        self.state().install_certs = certs;
    }

    pub fn set_install_fails(&self, fails: bool) {
        self.state().install_fails = fails;
    }

    pub fn installed_apks(&self) -> Vec<(String, Vec<u8>)> {
        self.state().installed_apks.clone()
    }

    pub fn install_package(&self, package: &str, user: u32, uid: u32) {
        self.install_package_with_certs(package, user, uid, Vec::new());
    }

    pub fn install_package_with_certs(&self, package: &str, user: u32, uid: u32, certs: Vec<Vec<u8>>) {
        let info = PackageInfo {
            package_name: package.to_string(),
            uid,
            version_code: 1,
            public_source_dir: PathBuf::from(format!("/data/app/~~fake/{}-1/base.apk", package)),
            signing_certs: certs,
        };
        self.state().packages.insert((package.to_string(), user), info);
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: String) -> RestoreResult<()> {
        let mut state = self.state();
        let fails = state.failing.iter().any(|text| call.contains(text.as_str()));
        state.calls.push(call.clone());
        if fails {
            return Err(RestoreError::Platform(format!("injected failure: {}", call)));
        }
        Ok(())
    }
}

impl PackageInstaller for FakePlatform {
    fn install(&self, apks: &[PathBuf], package: &str, user: u32, installer: Option<&str>) -> RestoreResult<bool> {
        let names: Vec<String> = apks
            .iter()
            .map(|apk| apk.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default())
            .collect();
        self.record(format!(
            "install {} {} {} {}",
            package,
            user,
            installer.unwrap_or("-"),
            names.join(",")
        ))?;

        let mut seen = Vec::new();
        for (apk, name) in apks.iter().zip(names) {
            seen.push((name, fs::read(apk).unwrap_or_default()));
        }
        let mut state = self.state();
        state.installed_apks = seen;
        if state.install_fails {
            return Ok(false);
        }
        let certs = state.install_certs.clone();
        let uid = state
            .packages
            .get(&(package.to_string(), user))
            .map_or(10_000 + state.packages.len() as u32, |info| info.uid);
        state.packages.insert(
            (package.to_string(), user),
            PackageInfo {
                package_name: package.to_string(),
                uid,
                version_code: 1,
                public_source_dir: PathBuf::from(format!("/data/app/~~fake/{}-2/base.apk", package)),
                signing_certs: certs,
            },
        );
        Ok(true)
    }

    fn uninstall(&self, package: &str, user: u32, keep_data: bool) -> RestoreResult<bool> {
        self.record(format!("uninstall {} {} {}", package, user, keep_data))?;
        Ok(self.state().packages.remove(&(package.to_string(), user)).is_some())
    }
}

impl PackageManager for FakePlatform {
    fn package_info(&self, package: &str, user: u32) -> RestoreResult<Option<PackageInfo>> {
        Ok(self.state().packages.get(&(package.to_string(), user)).cloned())
    }

    fn clear_application_user_data(&self, package: &str, user: u32) -> RestoreResult<bool> {
        self.record(format!("clear_application_user_data {} {}", package, user))?;
        let dirs = self.state().data_dirs.get(package).cloned().unwrap_or_default();
        for dir in dirs {
            if let Ok(entries) = fs::read_dir(&dir) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    let _ = if path.is_dir() {
                        fs::remove_dir_all(&path)
                    } else {
                        fs::remove_file(&path)
                    };
                }
            }
        }
        Ok(true)
    }

    fn force_stop(&self, package: &str, user: u32) -> RestoreResult<()> {
        self.record(format!("force_stop {} {}", package, user))
    }
}

impl SystemServices for FakePlatform {
    fn sdk_int(&self) -> u32 {
        self.state().sdk_int.unwrap_or(34)
    }

    fn permission_app_op(&self, permission: &str) -> Option<String> {
        (permission == "android.permission.CAMERA").then(|| FAKE_CAMERA_OP.to_string())
    }

    fn check_operation(&self, op: &str, _uid: u32, _package: &str) -> RestoreResult<AppOpMode> {
        Ok(self.state().app_ops.get(op).copied().unwrap_or(AppOpMode::Default))
    }

    fn set_app_op_mode(&self, op: &str, uid: u32, package: &str, mode: AppOpMode) -> RestoreResult<()> {
        self.record(format!("set_app_op_mode {} {} {} {}", op, uid, package, mode))?;
        self.state().app_ops.insert(op.to_string(), mode);
        Ok(())
    }

    fn set_uid_policy(&self, uid: u32, policies: u32) -> RestoreResult<()> {
        self.record(format!("set_uid_policy {} {}", uid, policies))
    }

    fn grant_permission(&self, package: &str, permission: &str, user: u32) -> RestoreResult<()> {
        self.record(format!("grant_permission {} {} {}", package, permission, user))
    }

    fn revoke_permission(&self, package: &str, permission: &str, user: u32) -> RestoreResult<()> {
        self.record(format!("revoke_permission {} {} {}", package, permission, user))
    }

    fn magisk_hide_available(&self) -> bool {
        self.state().magisk_hide
    }

    fn magisk_hide(&self, package: &str, process: &str, enable: bool) -> RestoreResult<()> {
        self.record(format!("magisk_hide {} {} {}", package, process, enable))
    }

    fn magisk_deny_list(&self, package: &str, process: &str, enable: bool) -> RestoreResult<()> {
        self.record(format!("magisk_deny_list {} {} {}", package, process, enable))
    }

    fn grant_notification_listener(&self, package: &str, component: &str, user: u32) -> RestoreResult<()> {
        self.record(format!("grant_notification_listener {}/{} {}", package, component, user))
    }

    fn grant_uri_permission(&self, grant: &UriGrant) -> RestoreResult<()> {
        self.record(format!("grant_uri_permission {}", grant))
    }

    fn set_ssaid(&self, package: &str, uid: u32, user: u32, ssaid: &str) -> RestoreResult<()> {
        self.record(format!("set_ssaid {} {} {} {}", package, uid, user, ssaid))
    }

    fn set_component_enabled(&self, package: &str, component: &str, enabled: bool, user: u32) -> RestoreResult<()> {
        self.record(format!("set_component_enabled {} {} {} {}", package, component, enabled, user))
    }

    fn whitelist_battery_optimization(&self, package: &str) -> RestoreResult<()> {
        self.record(format!("whitelist_battery_optimization {}", package))
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32, recursive: bool) -> RestoreResult<()> {
        self.record(format!("chown {} {} {} {}", path.display(), uid, gid, recursive))
    }

    fn restorecon(&self, path: &Path, recursive: bool) -> RestoreResult<()> {
        self.record(format!("restorecon {} {}", path.display(), recursive))
    }
}
