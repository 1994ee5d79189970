//! Android platform over the device's command line tools
//!
//! Meant to run as root on the device. Package operations go through `pm`
//! and `am`, app-ops through `appops`, and the few services without a shell
//! interface (URI grants, SSAID) are persisted by editing the system's XML
//! state files, which the system picks up after a restart.

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, OnceLock};

use nix::unistd::{chown, Gid, Uid};
use tracing::{debug, warn};

use crate::error::{RestoreError, RestoreResult};
use crate::rules::UriGrant;

use super::{AppOpMode, CommandOutput, PackageInfo, PackageInstaller, PackageManager, ShellRunner, SystemServices};

const PACKAGES_XML: &str = "/data/system/packages.xml";
const URI_GRANTS_XML: &str = "/data/system/urigrants.xml";

/// Android binary XML files start with this magic and cannot be edited as text
const ABX_MAGIC: &[u8] = b"ABX";

/// `NetworkPolicyManager.POLICY_REJECT_METERED_BACKGROUND`
const POLICY_REJECT_METERED_BACKGROUND: u32 = 1;
/// `NetworkPolicyManager.POLICY_ALLOW_METERED_BACKGROUND`
const POLICY_ALLOW_METERED_BACKGROUND: u32 = 1 << 2;

/// Android system UID, owner of the state files under /data/system
const SYSTEM_UID: u32 = 1000;

/// Runs commands directly with [`std::process::Command`]
#[derive(Debug, Clone, Default)]
pub struct SystemShell;

impl ShellRunner for SystemShell {
    fn run(&self, argv: &[&str]) -> RestoreResult<CommandOutput> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| RestoreError::Platform("Empty command".to_string()))?;
        debug!("Running {}", argv.join(" "));
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| RestoreError::Platform(format!("Failed to run {}: {}", program, e)))?;
        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Platform implementation driving `pm`, `am`, `appops`, `cmd`, `magisk`,
/// `dumpsys`, `chown` and `restorecon`
pub struct AndroidShell {
    shell: Arc<dyn ShellRunner>,
    sdk_override: Option<u32>,
    sdk: OnceLock<u32>,
}

impl AndroidShell {
    pub fn new(shell: Arc<dyn ShellRunner>, sdk_override: Option<u32>) -> Self {
        Self {
            shell,
            sdk_override,
            sdk: OnceLock::new(),
        }
    }

    /// Run a command that must exit successfully
    fn run_ok(&self, argv: &[&str]) -> RestoreResult<CommandOutput> {
        let output = self.shell.run(argv)?;
        if !output.success() {
            return Err(RestoreError::Platform(format!(
                "`{}` exited with {}: {}",
                argv.join(" "),
                output.exit_code,
                output.stderr.trim()
            )));
        }
        Ok(output)
    }

    fn uid_of(&self, package: &str, user: u32) -> RestoreResult<Option<u32>> {
        let user = user.to_string();
        let output = self.shell.run(&["pm", "list", "packages", "-U", "--user", &user, package])?;
        Ok(parse_package_uid(&output.stdout, package))
    }

    fn base_apk(&self, package: &str, user: u32) -> RestoreResult<Option<PathBuf>> {
        let user = user.to_string();
        let output = self.shell.run(&["pm", "path", "--user", &user, package])?;
        if !output.success() {
            return Ok(None);
        }
        let paths: Vec<&str> = output
            .stdout
            .lines()
            .filter_map(|line| line.trim().strip_prefix("package:"))
            .collect();
        let base = paths
            .iter()
            .find(|path| path.ends_with("/base.apk"))
            .or_else(|| paths.first());
        Ok(base.map(PathBuf::from))
    }

    fn version_code(&self, package: &str) -> i64 {
        self.shell
            .run(&["dumpsys", "package", package])
            .ok()
            .and_then(|output| parse_version_code(&output.stdout))
            .unwrap_or(0)
    }
}

impl PackageInstaller for AndroidShell {
    fn install(&self, apks: &[PathBuf], package: &str, user: u32, installer: Option<&str>) -> RestoreResult<bool> {
        let user_arg = user.to_string();
        let mut create = vec!["pm", "install-create", "-r", "-d", "--user", &user_arg];
        if let Some(installer) = installer {
            create.extend(["-i", installer]);
        }
        let output = self.run_ok(&create)?;
        let session = parse_session_id(&output.stdout).ok_or_else(|| {
            RestoreError::Install(format!("No install session for {}: {}", package, output.stdout.trim()))
        })?;

        for (index, apk) in apks.iter().enumerate() {
            let size = fs::metadata(apk)
                .map_err(|e| RestoreError::Install(format!("Failed to stat {}: {}", apk.display(), e)))?
                .len()
                .to_string();
            let name = format!("{}.apk", index);
            let path = apk.to_string_lossy();
            let written = self
                .shell
                .run(&["pm", "install-write", "-S", &size, &session, &name, &path])?;
            if !written.success() {
                let _ = self.shell.run(&["pm", "install-abandon", &session]);
                warn!("Failed to stage {}: {}", apk.display(), written.stdout.trim());
                return Ok(false);
            }
        }

        let committed = self.shell.run(&["pm", "install-commit", &session])?;
        let installed = committed.success() && committed.stdout.contains("Success");
        if !installed {
            warn!("Install of {} failed: {}", package, committed.stdout.trim());
        }
        Ok(installed)
    }

    fn uninstall(&self, package: &str, user: u32, keep_data: bool) -> RestoreResult<bool> {
        let user = user.to_string();
        let mut argv = vec!["pm", "uninstall"];
        if keep_data {
            argv.push("-k");
        }
        argv.extend(["--user", &user, package]);
        let output = self.shell.run(&argv)?;
        Ok(output.success() && output.stdout.contains("Success"))
    }
}

impl PackageManager for AndroidShell {
    fn package_info(&self, package: &str, user: u32) -> RestoreResult<Option<PackageInfo>> {
        let Some(uid) = self.uid_of(package, user)? else {
            return Ok(None);
        };
        let Some(public_source_dir) = self.base_apk(package, user)? else {
            return Ok(None);
        };
        let signing_certs = match fs::read(PACKAGES_XML) {
            Ok(bytes) if bytes.starts_with(ABX_MAGIC) => {
                warn!("{} is binary XML; signing certificates unavailable", PACKAGES_XML);
                Vec::new()
            }
            Ok(bytes) => parse_signing_certs(&String::from_utf8_lossy(&bytes), package),
            Err(e) => {
                warn!("Failed to read {}: {}", PACKAGES_XML, e);
                Vec::new()
            }
        };
        Ok(Some(PackageInfo {
            package_name: package.to_string(),
            uid,
            version_code: self.version_code(package),
            public_source_dir,
            signing_certs,
        }))
    }

    fn clear_application_user_data(&self, package: &str, user: u32) -> RestoreResult<bool> {
        self.force_stop(package, user)?;
        let user = user.to_string();
        let output = self.shell.run(&["pm", "clear", "--user", &user, package])?;
        Ok(output.success() && output.stdout.contains("Success"))
    }

    fn force_stop(&self, package: &str, user: u32) -> RestoreResult<()> {
        let user = user.to_string();
        self.run_ok(&["am", "force-stop", "--user", &user, package])?;
        Ok(())
    }
}

impl SystemServices for AndroidShell {
    fn sdk_int(&self) -> u32 {
        if let Some(sdk) = self.sdk_override {
            return sdk;
        }
        *self.sdk.get_or_init(|| {
            self.shell
                .run(&["getprop", "ro.build.version.sdk"])
                .ok()
                .and_then(|output| output.stdout.trim().parse().ok())
                .unwrap_or_else(|| {
                    warn!("Could not read the SDK level, assuming the newest");
                    u32::MAX
                })
        })
    }

    fn permission_app_op(&self, permission: &str) -> Option<String> {
        permission_to_op(permission).map(str::to_string)
    }

    fn check_operation(&self, op: &str, uid: u32, package: &str) -> RestoreResult<AppOpMode> {
        let user = (uid / 100_000).to_string();
        let output = self.run_ok(&["appops", "get", "--user", &user, package, op])?;
        Ok(parse_app_op_mode(&output.stdout).unwrap_or(AppOpMode::Default))
    }

    fn set_app_op_mode(&self, op: &str, uid: u32, package: &str, mode: AppOpMode) -> RestoreResult<()> {
        let user = (uid / 100_000).to_string();
        self.run_ok(&["appops", "set", "--user", &user, package, op, mode.name()])?;
        Ok(())
    }

    fn set_uid_policy(&self, uid: u32, policies: u32) -> RestoreResult<()> {
        let known = POLICY_REJECT_METERED_BACKGROUND | POLICY_ALLOW_METERED_BACKGROUND;
        if policies & !known != 0 {
            return Err(RestoreError::Platform(format!("Unsupported network policy {:#x}", policies)));
        }
        let uid = uid.to_string();
        for (flag, list) in [
            (POLICY_REJECT_METERED_BACKGROUND, "restrict-background-blacklist"),
            (POLICY_ALLOW_METERED_BACKGROUND, "restrict-background-whitelist"),
        ] {
            let action = if policies & flag != 0 { "add" } else { "remove" };
            self.run_ok(&["cmd", "netpolicy", action, list, &uid])?;
        }
        Ok(())
    }

    fn grant_permission(&self, package: &str, permission: &str, user: u32) -> RestoreResult<()> {
        let user = user.to_string();
        self.run_ok(&["pm", "grant", "--user", &user, package, permission])?;
        Ok(())
    }

    fn revoke_permission(&self, package: &str, permission: &str, user: u32) -> RestoreResult<()> {
        let user = user.to_string();
        self.run_ok(&["pm", "revoke", "--user", &user, package, permission])?;
        Ok(())
    }

    fn magisk_hide_available(&self) -> bool {
        self.shell
            .run(&["magisk", "magiskhide", "status"])
            .map(|output| output.success())
            .unwrap_or(false)
    }

    fn magisk_hide(&self, package: &str, process: &str, enable: bool) -> RestoreResult<()> {
        let action = if enable { "add" } else { "rm" };
        self.run_ok(&["magisk", "magiskhide", action, package, process])?;
        Ok(())
    }

    fn magisk_deny_list(&self, package: &str, process: &str, enable: bool) -> RestoreResult<()> {
        let action = if enable { "add" } else { "rm" };
        self.run_ok(&["magisk", "--denylist", action, package, process])?;
        Ok(())
    }

    fn grant_notification_listener(&self, package: &str, component: &str, user: u32) -> RestoreResult<()> {
        let component = qualified_component(package, component);
        let user = user.to_string();
        self.run_ok(&["cmd", "notification", "allow_listener", &component, &user])?;
        Ok(())
    }

    fn grant_uri_permission(&self, grant: &UriGrant) -> RestoreResult<()> {
        let path = Path::new(URI_GRANTS_XML);
        let xml = read_text_xml(path)?.unwrap_or_else(|| {
            "<?xml version='1.0' encoding='utf-8' standalone='yes' ?>\n<uri-grants>\n</uri-grants>\n".to_string()
        });
        let element = format!(
            "<uri-grant sourceUserId=\"{}\" targetUserId=\"{}\" sourcePkg=\"{}\" targetPkg=\"{}\" uri=\"{}\" prefix=\"{}\" modeFlags=\"{}\" createdTime=\"{}\" />",
            grant.source_user_id,
            grant.target_user_id,
            xml_escape(&grant.source_pkg),
            xml_escape(&grant.target_pkg),
            xml_escape(&grant.uri),
            grant.prefix,
            grant.mode_flags,
            grant.created_time,
        );
        let updated = insert_before_closing(&xml, "</uri-grants>", &element)?;
        write_system_xml(self, path, &updated)
    }

    fn set_ssaid(&self, package: &str, uid: u32, user: u32, ssaid: &str) -> RestoreResult<()> {
        let path = PathBuf::from(format!("/data/system/users/{}/settings_ssaid.xml", user));
        let xml = read_text_xml(&path)?.unwrap_or_else(|| {
            "<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>\n<settings version=\"-1\">\n</settings>\n".to_string()
        });
        let updated = upsert_ssaid(&xml, package, uid, ssaid)?;
        write_system_xml(self, &path, &updated)
    }

    fn set_component_enabled(&self, package: &str, component: &str, enabled: bool, user: u32) -> RestoreResult<()> {
        let component = qualified_component(package, component);
        let action = if enabled { "enable" } else { "disable" };
        let user = user.to_string();
        self.run_ok(&["pm", action, "--user", &user, &component])?;
        Ok(())
    }

    fn whitelist_battery_optimization(&self, package: &str) -> RestoreResult<()> {
        let entry = format!("+{}", package);
        self.run_ok(&["dumpsys", "deviceidle", "whitelist", &entry])?;
        Ok(())
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32, recursive: bool) -> RestoreResult<()> {
        if recursive {
            let owner = format!("{}:{}", uid, gid);
            let path = path.to_string_lossy();
            self.run_ok(&["chown", "-R", &owner, &path])?;
            return Ok(());
        }
        chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid))).map_err(|e| {
            RestoreError::Platform(format!("Failed to chown {}: {}", path.display(), e))
        })
    }

    fn restorecon(&self, path: &Path, recursive: bool) -> RestoreResult<()> {
        let path = path.to_string_lossy();
        let mut argv = vec!["restorecon"];
        if recursive {
            argv.push("-R");
        }
        argv.push(&path);
        self.run_ok(&argv)?;
        Ok(())
    }
}

/// `package:<name> uid:<uid>` line of `pm list packages -U`
fn parse_package_uid(stdout: &str, package: &str) -> Option<u32> {
    stdout.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let name = fields.next()?.strip_prefix("package:")?;
        if name != package {
            return None;
        }
        fields
            .find_map(|field| field.strip_prefix("uid:"))
            .and_then(|uid| uid.split(',').next()?.parse().ok())
    })
}

/// `Success: created install session [1234]`
fn parse_session_id(stdout: &str) -> Option<String> {
    let start = stdout.find('[')? + 1;
    let end = start + stdout[start..].find(']')?;
    let id = &stdout[start..end];
    id.chars().all(|c| c.is_ascii_digit()).then(|| id.to_string())
}

fn parse_version_code(stdout: &str) -> Option<i64> {
    stdout
        .split_whitespace()
        .find_map(|field| field.strip_prefix("versionCode="))
        .and_then(|code| code.parse().ok())
}

/// `CAMERA: allow; time=...` as printed by `appops get`
fn parse_app_op_mode(stdout: &str) -> Option<AppOpMode> {
    let line = stdout.lines().find(|line| line.contains(':'))?;
    let (_, rest) = line.split_once(':')?;
    let mode = rest.split(';').next()?;
    AppOpMode::parse(mode)
}

fn qualified_component(package: &str, component: &str) -> String {
    if component.contains('/') {
        component.to_string()
    } else {
        format!("{}/{}", package, component)
    }
}

/// Runtime permissions backed by an app-op
fn permission_to_op(permission: &str) -> Option<&'static str> {
    let op = match permission.strip_prefix("android.permission.")? {
        "ACCESS_COARSE_LOCATION" => "COARSE_LOCATION",
        "ACCESS_FINE_LOCATION" => "FINE_LOCATION",
        "READ_CONTACTS" => "READ_CONTACTS",
        "WRITE_CONTACTS" => "WRITE_CONTACTS",
        "READ_CALL_LOG" => "READ_CALL_LOG",
        "WRITE_CALL_LOG" => "WRITE_CALL_LOG",
        "READ_CALENDAR" => "READ_CALENDAR",
        "WRITE_CALENDAR" => "WRITE_CALENDAR",
        "CALL_PHONE" => "CALL_PHONE",
        "READ_SMS" => "READ_SMS",
        "RECEIVE_SMS" => "RECEIVE_SMS",
        "SEND_SMS" => "SEND_SMS",
        "CAMERA" => "CAMERA",
        "RECORD_AUDIO" => "RECORD_AUDIO",
        "READ_PHONE_STATE" => "READ_PHONE_STATE",
        "BODY_SENSORS" => "BODY_SENSORS",
        "READ_EXTERNAL_STORAGE" => "READ_EXTERNAL_STORAGE",
        "WRITE_EXTERNAL_STORAGE" => "WRITE_EXTERNAL_STORAGE",
        "ACTIVITY_RECOGNITION" => "ACTIVITY_RECOGNITION",
        "POST_NOTIFICATIONS" => "POST_NOTIFICATION",
        _ => return None,
    };
    Some(op)
}

/// Signing certificates of `package` from a text `packages.xml`.
///
/// Certificates are stored once with a `key` and referenced by `index`
/// afterwards, so every keyed `<cert>` in the file is collected first.
fn parse_signing_certs(xml: &str, package: &str) -> Vec<Vec<u8>> {
    let mut keys: HashMap<String, String> = HashMap::new();
    for tag in xml.split("<cert ").skip(1) {
        let tag = tag.split('>').next().unwrap_or_default();
        if let (Some(index), Some(key)) = (xml_attr(tag, "index"), xml_attr(tag, "key")) {
            keys.entry(index.to_string()).or_insert_with(|| key.to_string());
        }
    }

    let marker = format!("<package name=\"{}\"", package);
    let Some(start) = xml.find(&marker) else {
        return Vec::new();
    };
    let block = &xml[start..];
    let block = &block[..block.find("</package>").unwrap_or(block.len())];
    let Some(sigs_start) = block.find("<sigs") else {
        return Vec::new();
    };
    let sigs = &block[sigs_start..];
    let sigs = &sigs[..sigs.find("</sigs>").unwrap_or(sigs.len())];

    sigs.split("<cert ")
        .skip(1)
        .filter_map(|tag| xml_attr(tag.split('>').next().unwrap_or_default(), "index"))
        .filter_map(|index| keys.get(index))
        .filter_map(|key| hex::decode(key).ok())
        .collect()
}

fn xml_attr<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!(" {}=\"", name);
    let padded_start = if tag.starts_with(&needle[1..]) {
        name.len() + 2
    } else {
        tag.find(&needle)? + needle.len()
    };
    let rest = &tag[padded_start..];
    Some(&rest[..rest.find('"')?])
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Read a text XML state file; `None` when it does not exist
fn read_text_xml(path: &Path) -> RestoreResult<Option<String>> {
    match fs::read(path) {
        Ok(bytes) if bytes.starts_with(ABX_MAGIC) => Err(RestoreError::Platform(format!(
            "{} is binary XML and cannot be edited",
            path.display()
        ))),
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(RestoreError::Platform(format!("Failed to read {}: {}", path.display(), e))),
    }
}

fn insert_before_closing(xml: &str, closing: &str, element: &str) -> RestoreResult<String> {
    let at = xml
        .rfind(closing)
        .ok_or_else(|| RestoreError::Platform(format!("Missing {} in state file", closing)))?;
    Ok(format!("{}{}\n{}", &xml[..at], element, &xml[at..]))
}

/// Replace or add the SSAID `<setting>` of `uid`
fn upsert_ssaid(xml: &str, package: &str, uid: u32, ssaid: &str) -> RestoreResult<String> {
    let name = uid.to_string();
    let mut next_id = 0u64;
    let mut kept = Vec::new();
    for line in xml.lines() {
        let trimmed = line.trim_start();
        if let Some(tag) = trimmed.strip_prefix("<setting ") {
            if let Some(id) = xml_attr(tag, "id").and_then(|id| id.parse::<u64>().ok()) {
                next_id = next_id.max(id + 1);
            }
            if xml_attr(tag, "name") == Some(name.as_str()) {
                continue;
            }
        }
        kept.push(line);
    }
    let element = format!(
        "  <setting id=\"{}\" name=\"{}\" value=\"{}\" package=\"{}\" defaultValue=\"{}\" defaultSysSet=\"false\" tag=\"null\" />",
        next_id,
        name,
        xml_escape(ssaid),
        xml_escape(package),
        xml_escape(ssaid)
    );
    let mut rebuilt = kept.join("\n");
    rebuilt.push('\n');
    insert_before_closing(&rebuilt, "</settings>", &element)
}

/// Write a system state file atomically, owned by the system user with mode 0600
fn write_system_xml(shell: &AndroidShell, path: &Path, contents: &str) -> RestoreResult<()> {
    let temp = path.with_extension("xml.apkvault");
    fs::write(&temp, contents)
        .map_err(|e| RestoreError::Platform(format!("Failed to write {}: {}", temp.display(), e)))?;
    fs::set_permissions(&temp, fs::Permissions::from_mode(0o600))?;
    if let Err(e) = shell.chown(&temp, SYSTEM_UID, SYSTEM_UID, false) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }
    fs::rename(&temp, path).map_err(|e| {
        let _ = fs::remove_file(&temp);
        RestoreError::Platform(format!("Failed to replace {}: {}", path.display(), e))
    })?;
    if let Err(e) = shell.restorecon(path, false) {
        warn!("{}", e);
    }
    Ok(())
}
