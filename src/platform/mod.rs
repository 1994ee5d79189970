//! Platform services used by a restore
//!
//! The restore engine never talks to Android directly. Package installation,
//! package queries and the system services replayed by rules are reached
//! through the traits below; [`AndroidShell`] implements all of them with
//! the stock command line tools of a rooted device.

mod shell;

#[cfg(test)]
pub(crate) mod fake;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::RestoreResult;
use crate::rules::{RulesImporter, TsvRulesImporter, UriGrant};

pub use shell::{AndroidShell, SystemShell};

/// Android 6.0
pub const SDK_MARSHMALLOW: u32 = 23;
/// Android 8.0
pub const SDK_OREO: u32 = 26;
/// Android 8.1
pub const SDK_OREO_MR1: u32 = 27;

/// What the package manager knows about an installed package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    pub package_name: String,
    pub uid: u32,
    pub version_code: i64,
    /// Path of the installed base APK
    pub public_source_dir: PathBuf,
    /// DER encoded signing certificates
    pub signing_certs: Vec<Vec<u8>>,
}

impl PackageInfo {
    /// Directory the APKs are installed in, used to re-root native library links
    pub fn install_dir(&self) -> Option<&Path> {
        self.public_source_dir.parent()
    }
}

/// Result of a shell command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// App-op mode as understood by `AppOpsManager`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppOpMode {
    Allowed,
    Ignored,
    Errored,
    Default,
    Foreground,
}

impl AppOpMode {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(AppOpMode::Allowed),
            1 => Some(AppOpMode::Ignored),
            2 => Some(AppOpMode::Errored),
            3 => Some(AppOpMode::Default),
            4 => Some(AppOpMode::Foreground),
            _ => None,
        }
    }

    /// Parse either the numeric code or the name `appops` prints
    pub fn parse(value: &str) -> Option<Self> {
        if let Ok(code) = value.trim().parse::<i32>() {
            return Self::from_code(code);
        }
        match value.trim().to_lowercase().as_str() {
            "allow" | "allowed" => Some(AppOpMode::Allowed),
            "ignore" | "ignored" => Some(AppOpMode::Ignored),
            "deny" | "errored" => Some(AppOpMode::Errored),
            "default" => Some(AppOpMode::Default),
            "foreground" => Some(AppOpMode::Foreground),
            _ => None,
        }
    }

    /// Name accepted by `appops set`
    pub fn name(self) -> &'static str {
        match self {
            AppOpMode::Allowed => "allow",
            AppOpMode::Ignored => "ignore",
            AppOpMode::Errored => "deny",
            AppOpMode::Default => "default",
            AppOpMode::Foreground => "foreground",
        }
    }
}

impl fmt::Display for AppOpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Runs external commands
pub trait ShellRunner: Send + Sync {
    fn run(&self, argv: &[&str]) -> RestoreResult<CommandOutput>;
}

/// Installs and removes packages
pub trait PackageInstaller: Send + Sync {
    /// Install the base APK followed by its splits for `user`
    fn install(
        &self,
        apks: &[PathBuf],
        package: &str,
        user: u32,
        installer: Option<&str>,
    ) -> RestoreResult<bool>;

    fn uninstall(&self, package: &str, user: u32, keep_data: bool) -> RestoreResult<bool>;
}

/// Queries and resets installed packages
pub trait PackageManager: Send + Sync {
    /// `None` when the package is not installed for `user`
    fn package_info(&self, package: &str, user: u32) -> RestoreResult<Option<PackageInfo>>;

    /// Force-stop the package and wipe its user data
    fn clear_application_user_data(&self, package: &str, user: u32) -> RestoreResult<bool>;

    fn force_stop(&self, package: &str, user: u32) -> RestoreResult<()>;
}

/// System services touched while replaying rules and fixing up restored files
pub trait SystemServices: Send + Sync {
    /// Android SDK level of the device
    fn sdk_int(&self) -> u32;

    /// App-op backing a runtime permission, if any
    fn permission_app_op(&self, permission: &str) -> Option<String>;

    fn check_operation(&self, op: &str, uid: u32, package: &str) -> RestoreResult<AppOpMode>;

    fn set_app_op_mode(&self, op: &str, uid: u32, package: &str, mode: AppOpMode) -> RestoreResult<()>;

    fn set_uid_policy(&self, uid: u32, policies: u32) -> RestoreResult<()>;

    fn grant_permission(&self, package: &str, permission: &str, user: u32) -> RestoreResult<()>;

    fn revoke_permission(&self, package: &str, permission: &str, user: u32) -> RestoreResult<()>;

    fn magisk_hide_available(&self) -> bool;

    fn magisk_hide(&self, package: &str, process: &str, enable: bool) -> RestoreResult<()>;

    fn magisk_deny_list(&self, package: &str, process: &str, enable: bool) -> RestoreResult<()>;

    /// Grant notification listener access to `package/component`
    fn grant_notification_listener(&self, package: &str, component: &str, user: u32) -> RestoreResult<()>;

    /// Grant and persist a URI permission
    fn grant_uri_permission(&self, grant: &UriGrant) -> RestoreResult<()>;

    fn set_ssaid(&self, package: &str, uid: u32, user: u32, ssaid: &str) -> RestoreResult<()>;

    fn set_component_enabled(&self, package: &str, component: &str, enabled: bool, user: u32) -> RestoreResult<()>;

    /// Exempt the package from battery optimization
    fn whitelist_battery_optimization(&self, package: &str) -> RestoreResult<()>;

    fn chown(&self, path: &Path, uid: u32, gid: u32, recursive: bool) -> RestoreResult<()>;

    /// Reset SELinux contexts
    fn restorecon(&self, path: &Path, recursive: bool) -> RestoreResult<()>;
}

/// Everything a restore needs from the device
#[derive(Clone)]
pub struct Platform {
    pub installer: Arc<dyn PackageInstaller>,
    pub packages: Arc<dyn PackageManager>,
    pub services: Arc<dyn SystemServices>,
}

impl Platform {
    /// Platform backed by the device's command line tools
    pub fn android(shell: Arc<dyn ShellRunner>, sdk_override: Option<u32>) -> Self {
        let android = Arc::new(AndroidShell::new(shell, sdk_override));
        Self {
            installer: android.clone(),
            packages: android.clone(),
            services: android,
        }
    }

    /// A rules importer that applies to `users`
    pub fn rules_importer(&self, users: &[u32]) -> Box<dyn RulesImporter> {
        Box::new(TsvRulesImporter::new(
            self.packages.clone(),
            self.services.clone(),
            users.to_vec(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_op_mode_parse() {
        assert_eq!(AppOpMode::parse("0"), Some(AppOpMode::Allowed));
        assert_eq!(AppOpMode::parse("ignore"), Some(AppOpMode::Ignored));
        assert_eq!(AppOpMode::parse(" Foreground "), Some(AppOpMode::Foreground));
        assert_eq!(AppOpMode::parse("9"), None);
        assert_eq!(AppOpMode::parse("maybe"), None);
    }

    #[test]
    fn test_install_dir() {
        let info = PackageInfo {
            package_name: "com.example".into(),
            uid: 10123,
            version_code: 1,
            public_source_dir: PathBuf::from("/data/app/~~a/com.example-b/base.apk"),
            signing_certs: Vec::new(),
        };
        assert_eq!(info.install_dir(), Some(Path::new("/data/app/~~a/com.example-b")));
    }
}
