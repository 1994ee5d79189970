//! Rule replay
//!
//! Entries are applied in order, each in isolation: a failing entry is logged
//! and counted, and the remaining entries still run.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{RestoreError, RestoreResult};
use crate::platform::{AppOpMode, SystemServices, SDK_OREO, SDK_OREO_MR1};

use super::entry::RuleEntry;

/// Outcome of replaying a list of entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
    /// One message per failed entry
    pub errors: Vec<String>,
    /// Set when an applied entry only takes effect after a reboot
    pub requires_restart: bool,
}

impl ReplayReport {
    pub fn merge(&mut self, other: ReplayReport) {
        self.applied += other.applied;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.errors.extend(other.errors);
        self.requires_restart |= other.requires_restart;
    }
}

enum Outcome {
    Applied { requires_restart: bool },
    Skipped(&'static str),
}

const APPLIED: Outcome = Outcome::Applied { requires_restart: false };

/// `PackageManager.FLAG_PERMISSION_POLICY_FIXED`
pub const PERMISSION_POLICY_FIXED: u32 = 1 << 2;
/// `PackageManager.FLAG_PERMISSION_SYSTEM_FIXED`
pub const PERMISSION_SYSTEM_FIXED: u32 = 1 << 4;

/// Applies rule entries through the system services
pub struct RuleEngine {
    services: Arc<dyn SystemServices>,
}

impl RuleEngine {
    pub fn new(services: Arc<dyn SystemServices>) -> Self {
        Self { services }
    }

    /// Replay `entries` for `package` (with `uid`) on `user`.
    ///
    /// Never fails as a whole; entries for other packages are skipped.
    pub fn apply(&self, entries: &[RuleEntry], package: &str, uid: u32, user: u32) -> ReplayReport {
        let mut report = ReplayReport::default();
        let magisk_hide_available = self.services.magisk_hide_available();

        for entry in entries {
            if entry.package() != package {
                report.skipped += 1;
                continue;
            }
            match self.apply_entry(entry, package, uid, user, magisk_hide_available) {
                Ok(Outcome::Applied { requires_restart }) => {
                    report.applied += 1;
                    report.requires_restart |= requires_restart;
                }
                Ok(Outcome::Skipped(reason)) => {
                    debug!("Skipped {} rule for {}: {}", entry.type_name(), package, reason);
                    report.skipped += 1;
                }
                Err(e) => {
                    let e = RestoreError::RuleReplay(format!("{}: {}", entry.type_name(), e));
                    warn!("Failed to apply rule for {}: {}", package, e);
                    report.failed += 1;
                    report.errors.push(e.to_string());
                }
            }
        }
        report
    }

    fn apply_entry(
        &self,
        entry: &RuleEntry,
        package: &str,
        uid: u32,
        user: u32,
        magisk_hide_available: bool,
    ) -> RestoreResult<Outcome> {
        let services = &self.services;
        match entry {
            RuleEntry::AppOp { op, mode, .. } => {
                services.set_app_op_mode(op, uid, package, *mode)?;
                Ok(APPLIED)
            }
            RuleEntry::NetPolicy { policies, .. } => {
                services.set_uid_policy(uid, *policies)?;
                Ok(APPLIED)
            }
            RuleEntry::Permission { permission, granted, flags, .. } => {
                if flags & (PERMISSION_POLICY_FIXED | PERMISSION_SYSTEM_FIXED) != 0 {
                    return Ok(Outcome::Skipped("permission is fixed by policy or system"));
                }
                let op = services.permission_app_op(permission);
                let app_op_allowed = match &op {
                    Some(op) => services.check_operation(op, uid, package)? == AppOpMode::Allowed,
                    None => false,
                };
                if *granted {
                    services.grant_permission(package, permission, user)?;
                    if let Some(op) = op.filter(|_| !app_op_allowed) {
                        services.set_app_op_mode(&op, uid, package, AppOpMode::Allowed)?;
                    }
                } else {
                    services.revoke_permission(package, permission, user)?;
                    if let Some(op) = op.filter(|_| app_op_allowed) {
                        services.set_app_op_mode(&op, uid, package, AppOpMode::Ignored)?;
                    }
                }
                Ok(APPLIED)
            }
            RuleEntry::BatteryOpt { .. } => {
                services.whitelist_battery_optimization(package)?;
                Ok(APPLIED)
            }
            RuleEntry::MagiskHide { process, enabled, .. } => {
                if magisk_hide_available {
                    services.magisk_hide(package, process, *enabled)?;
                } else {
                    services.magisk_deny_list(package, process, *enabled)?;
                }
                Ok(APPLIED)
            }
            RuleEntry::MagiskDenyList { process, enabled, .. } => {
                services.magisk_deny_list(package, process, *enabled)?;
                Ok(APPLIED)
            }
            RuleEntry::Notification { component, .. } => {
                if services.sdk_int() < SDK_OREO_MR1 {
                    return Ok(Outcome::Skipped("notification listeners need Android 8.1"));
                }
                services.grant_notification_listener(package, component, user)?;
                Ok(APPLIED)
            }
            RuleEntry::UriGrant { grant, .. } => {
                services.grant_uri_permission(&grant.retarget(user))?;
                Ok(Outcome::Applied { requires_restart: true })
            }
            RuleEntry::Ssaid { ssaid, .. } => {
                if services.sdk_int() < SDK_OREO {
                    return Ok(Outcome::Skipped("SSAID is per app only since Android 8.0"));
                }
                services.set_ssaid(package, uid, user, ssaid)?;
                Ok(Outcome::Applied { requires_restart: true })
            }
            RuleEntry::Component { component, blocked, .. } => {
                services.set_component_enabled(package, component, !blocked, user)?;
                Ok(APPLIED)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::{FakePlatform, FAKE_CAMERA_OP};

    const PKG: &str = "com.example";
    const UID: u32 = 10123;

    fn entries(contents: &str) -> Vec<RuleEntry> {
        RuleEntry::parse_all(contents, PKG).unwrap()
    }

    #[test]
    fn test_failing_entry_does_not_stop_others() {
        let fake = FakePlatform::new();
        fake.fail_calls_containing("set_app_op_mode 24");
        let engine = RuleEngine::new(fake.services());

        let rules = entries(
            "\
com.example\tandroid.permission.READ_SMS\tPERMISSION\tfalse
com.example\tnet_policy\tNET_POLICY\t1
com.example\t24\tAPP_OP\t1
com.example\tbattery_opt\tBATTERY_OPT\tfalse
com.example\t.Tracker\tRECEIVER\ttrue
",
        );
        let report = engine.apply(&rules, PKG, UID, 0);

        assert_eq!(report.applied, 4);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors.len(), 1);
        let calls = fake.calls();
        assert!(calls.iter().any(|c| c.starts_with("revoke_permission com.example android.permission.READ_SMS")));
        assert!(calls.iter().any(|c| c == "set_uid_policy 10123 1"));
        assert!(calls.iter().any(|c| c == "whitelist_battery_optimization com.example"));
        assert!(calls.iter().any(|c| c == "set_component_enabled com.example .Tracker false 0"));
    }

    #[test]
    fn test_permission_grant_allows_app_op() {
        let fake = FakePlatform::new();
        fake.set_app_op(FAKE_CAMERA_OP, AppOpMode::Ignored);
        let engine = RuleEngine::new(fake.services());

        let report = engine.apply(&entries("android.permission.CAMERA\ttrue\n"), PKG, UID, 0);

        assert_eq!(report.applied, 1);
        let calls = fake.calls();
        assert!(calls.contains(&"grant_permission com.example android.permission.CAMERA 0".to_string()));
        assert!(calls.contains(&format!("set_app_op_mode {} 10123 com.example allow", FAKE_CAMERA_OP)));
    }

    #[test]
    fn test_permission_revoke_ignores_allowed_app_op() {
        let fake = FakePlatform::new();
        fake.set_app_op(FAKE_CAMERA_OP, AppOpMode::Allowed);
        let engine = RuleEngine::new(fake.services());

        engine.apply(&entries("android.permission.CAMERA\tfalse\n"), PKG, UID, 0);

        let calls = fake.calls();
        assert!(calls.contains(&"revoke_permission com.example android.permission.CAMERA 0".to_string()));
        assert!(calls.contains(&format!("set_app_op_mode {} 10123 com.example ignore", FAKE_CAMERA_OP)));
    }

    #[test]
    fn test_fixed_permissions_left_alone() {
        let fake = FakePlatform::new();
        let engine = RuleEngine::new(fake.services());

        let rules = entries(
            "\
com.example\tandroid.permission.CAMERA\tPERMISSION\tfalse\t16
com.example\tandroid.permission.READ_SMS\tPERMISSION\ttrue\t4
com.example\tandroid.permission.RECORD_AUDIO\tPERMISSION\ttrue\t1
",
        );
        let report = engine.apply(&rules, PKG, UID, 0);

        assert_eq!(report.skipped, 2);
        assert_eq!(report.applied, 1);
        let calls = fake.calls();
        assert!(!calls.iter().any(|c| c.contains("CAMERA") || c.contains("READ_SMS")));
        assert!(calls.contains(&"grant_permission com.example android.permission.RECORD_AUDIO 0".to_string()));
    }

    #[test]
    fn test_restart_flags_and_sdk_gates() {
        let fake = FakePlatform::new();
        fake.set_sdk_int(25);
        let engine = RuleEngine::new(fake.services());

        let rules = entries(
            "\
com.example\t.Listener\tNOTIFICATION\ttrue
com.example\tssaid\tSSAID\t0123456789abcdef
com.example\turi_grant\tURI_GRANT\t0,0,0,com.android.externalstorage,com.example,false,3,1,content://x
",
        );
        let report = engine.apply(&rules, PKG, UID, 10);

        assert_eq!(report.skipped, 2);
        assert_eq!(report.applied, 1);
        assert!(report.requires_restart);
        assert!(fake
            .calls()
            .iter()
            .any(|c| c.starts_with("grant_uri_permission 0,10,0,")));
    }

    #[test]
    fn test_magisk_hide_falls_back_to_deny_list() {
        let fake = FakePlatform::new();
        let engine = RuleEngine::new(fake.services());

        engine.apply(&entries("com.example\tcom.example\tMAGISK_HIDE\ttrue\n"), PKG, UID, 0);
        assert!(fake.calls().contains(&"magisk_deny_list com.example com.example true".to_string()));

        fake.set_magisk_hide_available(true);
        engine.apply(&entries("com.example\tcom.example\tMAGISK_HIDE\ttrue\n"), PKG, UID, 0);
        assert!(fake.calls().contains(&"magisk_hide com.example com.example true".to_string()));
    }

    #[test]
    fn test_other_packages_skipped() {
        let fake = FakePlatform::new();
        let engine = RuleEngine::new(fake.services());

        let report = engine.apply(&entries("org.other\tbattery_opt\tBATTERY_OPT\tfalse\n"), PKG, UID, 0);
        assert_eq!(report.skipped, 1);
        assert!(fake.calls().is_empty());
    }
}
