//! Rule entries and their tab-separated text format
//!
//! One entry per line:
//!
//! ```text
//! <package>\t<name>\t<TYPE>\t<extra>...
//! ```
//!
//! Older misc files only carried permissions as `<permission>\t<true|false>`;
//! those lines are attributed to the package being restored.

use std::fmt;

use crate::error::{RestoreError, RestoreResult};
use crate::platform::AppOpMode;

/// Kind of app component a component rule targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Activity,
    Service,
    Receiver,
    Provider,
}

impl ComponentKind {
    fn tag(self) -> &'static str {
        match self {
            ComponentKind::Activity => "ACTIVITY",
            ComponentKind::Service => "SERVICE",
            ComponentKind::Receiver => "RECEIVER",
            ComponentKind::Provider => "PROVIDER",
        }
    }
}

/// A persisted URI permission grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriGrant {
    pub source_user_id: u32,
    pub target_user_id: u32,
    pub user_handle: u32,
    pub source_pkg: String,
    pub target_pkg: String,
    pub prefix: bool,
    pub mode_flags: u32,
    pub created_time: i64,
    pub uri: String,
}

impl UriGrant {
    /// Parse the comma separated form; the URI comes last and may contain commas
    pub fn parse(value: &str) -> RestoreResult<Self> {
        let fields: Vec<&str> = value.splitn(9, ',').collect();
        if fields.len() != 9 {
            return Err(malformed(format!("URI grant has {} fields: {}", fields.len(), value)));
        }
        Ok(Self {
            source_user_id: parse_number(fields[0], "source user")?,
            target_user_id: parse_number(fields[1], "target user")?,
            user_handle: parse_number(fields[2], "user handle")?,
            source_pkg: fields[3].to_string(),
            target_pkg: fields[4].to_string(),
            prefix: parse_bool(fields[5])?,
            mode_flags: parse_number(fields[6], "mode flags")?,
            created_time: parse_number(fields[7], "created time")?,
            uri: fields[8].to_string(),
        })
    }

    /// The same grant, handed to `user` on this device
    pub fn retarget(&self, user: u32) -> Self {
        Self {
            target_user_id: user,
            ..self.clone()
        }
    }
}

impl fmt::Display for UriGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{},{},{},{}",
            self.source_user_id,
            self.target_user_id,
            self.user_handle,
            self.source_pkg,
            self.target_pkg,
            self.prefix,
            self.mode_flags,
            self.created_time,
            self.uri
        )
    }
}

/// A single rule to replay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleEntry {
    AppOp { package: String, op: String, mode: AppOpMode },
    NetPolicy { package: String, policies: u32 },
    Permission { package: String, permission: String, granted: bool, flags: u32 },
    MagiskHide { package: String, process: String, enabled: bool },
    MagiskDenyList { package: String, process: String, enabled: bool },
    Notification { package: String, component: String },
    UriGrant { package: String, grant: UriGrant },
    Ssaid { package: String, ssaid: String },
    BatteryOpt { package: String },
    Component { package: String, component: String, kind: ComponentKind, blocked: bool },
}

impl RuleEntry {
    pub fn package(&self) -> &str {
        match self {
            RuleEntry::AppOp { package, .. }
            | RuleEntry::NetPolicy { package, .. }
            | RuleEntry::Permission { package, .. }
            | RuleEntry::MagiskHide { package, .. }
            | RuleEntry::MagiskDenyList { package, .. }
            | RuleEntry::Notification { package, .. }
            | RuleEntry::UriGrant { package, .. }
            | RuleEntry::Ssaid { package, .. }
            | RuleEntry::BatteryOpt { package }
            | RuleEntry::Component { package, .. } => package,
        }
    }

    /// Type tag used in the text format
    pub fn type_name(&self) -> &'static str {
        match self {
            RuleEntry::AppOp { .. } => "APP_OP",
            RuleEntry::NetPolicy { .. } => "NET_POLICY",
            RuleEntry::Permission { .. } => "PERMISSION",
            RuleEntry::MagiskHide { .. } => "MAGISK_HIDE",
            RuleEntry::MagiskDenyList { .. } => "MAGISK_DENY_LIST",
            RuleEntry::Notification { .. } => "NOTIFICATION",
            RuleEntry::UriGrant { .. } => "URI_GRANT",
            RuleEntry::Ssaid { .. } => "SSAID",
            RuleEntry::BatteryOpt { .. } => "BATTERY_OPT",
            RuleEntry::Component { kind, .. } => kind.tag(),
        }
    }

    /// Parse one line; blank lines and `#` comments yield `None`
    pub fn parse_line(line: &str, default_package: &str) -> RestoreResult<Option<Self>> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() == 2 {
            return Ok(Some(RuleEntry::Permission {
                package: default_package.to_string(),
                permission: fields[0].to_string(),
                granted: parse_bool(fields[1])?,
                flags: 0,
            }));
        }
        if fields.len() < 4 {
            return Err(malformed(format!("Too few fields: {}", line)));
        }

        let package = fields[0].to_string();
        let name = fields[1];
        let extra = &fields[3..];
        let entry = match fields[2] {
            "APP_OP" => RuleEntry::AppOp {
                package,
                op: name.to_string(),
                mode: AppOpMode::parse(extra[0])
                    .ok_or_else(|| malformed(format!("Invalid app op mode: {}", extra[0])))?,
            },
            "NET_POLICY" => RuleEntry::NetPolicy {
                package,
                policies: parse_number(extra[0], "net policy")?,
            },
            "PERMISSION" => RuleEntry::Permission {
                package,
                permission: name.to_string(),
                granted: parse_bool(extra[0])?,
                flags: match extra.get(1) {
                    Some(flags) => parse_number(flags, "permission flags")?,
                    None => 0,
                },
            },
            "MAGISK_HIDE" => RuleEntry::MagiskHide {
                package,
                process: name.to_string(),
                enabled: parse_bool(extra[0])?,
            },
            "MAGISK_DENY_LIST" => RuleEntry::MagiskDenyList {
                package,
                process: name.to_string(),
                enabled: parse_bool(extra[0])?,
            },
            "NOTIFICATION" => RuleEntry::Notification {
                package,
                component: name.to_string(),
            },
            "URI_GRANT" => RuleEntry::UriGrant {
                package,
                grant: UriGrant::parse(extra[0])?,
            },
            "SSAID" => RuleEntry::Ssaid {
                package,
                ssaid: extra[0].to_string(),
            },
            "BATTERY_OPT" => RuleEntry::BatteryOpt { package },
            tag => {
                let kind = match tag {
                    "ACTIVITY" => ComponentKind::Activity,
                    "SERVICE" => ComponentKind::Service,
                    "RECEIVER" => ComponentKind::Receiver,
                    "PROVIDER" => ComponentKind::Provider,
                    other => return Err(malformed(format!("Unknown rule type: {}", other))),
                };
                RuleEntry::Component {
                    package,
                    component: name.to_string(),
                    kind,
                    blocked: parse_bool(extra[0])?,
                }
            }
        };
        Ok(Some(entry))
    }

    /// Parse a whole rules or misc file, keeping line order
    pub fn parse_all(contents: &str, default_package: &str) -> RestoreResult<Vec<Self>> {
        let mut entries = Vec::new();
        for (line_num, line) in contents.lines().enumerate() {
            let entry = Self::parse_line(line, default_package).map_err(|e| match e {
                RestoreError::MalformedRules(message) => {
                    malformed(format!("line {}: {}", line_num + 1, message))
                }
                other => other,
            })?;
            entries.extend(entry);
        }
        Ok(entries)
    }
}

impl fmt::Display for RuleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.type_name();
        match self {
            RuleEntry::AppOp { package, op, mode } => {
                write!(f, "{}\t{}\t{}\t{}", package, op, tag, mode)
            }
            RuleEntry::NetPolicy { package, policies } => {
                write!(f, "{}\tnet_policy\t{}\t{}", package, tag, policies)
            }
            RuleEntry::Permission { package, permission, granted, flags } => {
                write!(f, "{}\t{}\t{}\t{}\t{}", package, permission, tag, granted, flags)
            }
            RuleEntry::MagiskHide { package, process, enabled }
            | RuleEntry::MagiskDenyList { package, process, enabled } => {
                write!(f, "{}\t{}\t{}\t{}", package, process, tag, enabled)
            }
            RuleEntry::Notification { package, component } => {
                write!(f, "{}\t{}\t{}\ttrue", package, component, tag)
            }
            RuleEntry::UriGrant { package, grant } => {
                write!(f, "{}\turi_grant\t{}\t{}", package, tag, grant)
            }
            RuleEntry::Ssaid { package, ssaid } => write!(f, "{}\tssaid\t{}\t{}", package, tag, ssaid),
            RuleEntry::BatteryOpt { package } => write!(f, "{}\tbattery_opt\t{}\tfalse", package, tag),
            RuleEntry::Component { package, component, blocked, .. } => {
                write!(f, "{}\t{}\t{}\t{}", package, component, tag, blocked)
            }
        }
    }
}

fn parse_bool(value: &str) -> RestoreResult<bool> {
    match value.trim() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(malformed(format!("Expected true or false, found {}", other))),
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, what: &str) -> RestoreResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| malformed(format!("Invalid {}: {}", what, value)))
}

fn malformed(message: String) -> RestoreError {
    RestoreError::MalformedRules(message)
}
