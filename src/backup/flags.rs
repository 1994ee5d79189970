//! Backup flags
//!
//! A bitmask over independently toggleable backup categories. The same type
//! describes what an archive contains and what a caller asks to restore.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Bitmask of backup categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupFlags(u32);

impl BackupFlags {
    pub const NOTHING: u32 = 0;
    pub const APK_FILES: u32 = 1;
    pub const INTERNAL_DATA: u32 = 1 << 1;
    pub const EXTERNAL_DATA: u32 = 1 << 2;
    pub const EXTRAS: u32 = 1 << 3;
    pub const RULES: u32 = 1 << 4;
    pub const SKIP_SIGNATURE_CHECK: u32 = 1 << 5;
    pub const MULTIPLE: u32 = 1 << 6;
    pub const CACHE: u32 = 1 << 7;
    pub const CUSTOM_USERS: u32 = 1 << 8;
    pub const MEDIA_OBB: u32 = 1 << 9;

    const ALL: u32 = (1 << 10) - 1;

    /// Create flags from a raw bitmask, dropping unknown bits
    pub fn new(bits: u32) -> Self {
        Self(bits & Self::ALL)
    }

    /// The flags a plain "restore everything" request carries
    pub fn restore_all() -> Self {
        Self::new(
            Self::APK_FILES
                | Self::INTERNAL_DATA
                | Self::EXTERNAL_DATA
                | Self::MEDIA_OBB
                | Self::EXTRAS
                | Self::RULES,
        )
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, flag: u32) -> bool {
        self.0 & flag == flag
    }

    pub fn set(&mut self, flag: u32, on: bool) {
        if on {
            self.0 |= flag;
        } else {
            self.0 &= !flag;
        }
    }

    pub fn with(mut self, flag: u32) -> Self {
        self.set(flag, true);
        self
    }

    pub fn without(mut self, flag: u32) -> Self {
        self.set(flag, false);
        self
    }

    pub fn backup_apk_files(self) -> bool {
        self.contains(Self::APK_FILES)
    }

    pub fn backup_internal_data(self) -> bool {
        self.contains(Self::INTERNAL_DATA)
    }

    pub fn backup_external_data(self) -> bool {
        self.contains(Self::EXTERNAL_DATA)
    }

    pub fn backup_media_obb(self) -> bool {
        self.contains(Self::MEDIA_OBB)
    }

    /// Any kind of data directory is selected
    pub fn backup_data(self) -> bool {
        self.0 & (Self::INTERNAL_DATA | Self::EXTERNAL_DATA | Self::MEDIA_OBB) != 0
    }

    pub fn backup_cache(self) -> bool {
        self.contains(Self::CACHE)
    }

    pub fn backup_extras(self) -> bool {
        self.contains(Self::EXTRAS)
    }

    pub fn backup_rules(self) -> bool {
        self.contains(Self::RULES)
    }

    pub fn skip_signature_check(self) -> bool {
        self.contains(Self::SKIP_SIGNATURE_CHECK)
    }

    pub fn backup_multiple(self) -> bool {
        self.contains(Self::MULTIPLE)
    }

    pub fn backup_custom_users(self) -> bool {
        self.contains(Self::CUSTOM_USERS)
    }

    /// Names of the enabled categories, in bit order
    pub fn names(self) -> Vec<&'static str> {
        const NAMES: [(u32, &str); 10] = [
            (BackupFlags::APK_FILES, "apk"),
            (BackupFlags::INTERNAL_DATA, "internal-data"),
            (BackupFlags::EXTERNAL_DATA, "external-data"),
            (BackupFlags::EXTRAS, "extras"),
            (BackupFlags::RULES, "rules"),
            (BackupFlags::SKIP_SIGNATURE_CHECK, "skip-signature-check"),
            (BackupFlags::MULTIPLE, "multiple"),
            (BackupFlags::CACHE, "cache"),
            (BackupFlags::CUSTOM_USERS, "custom-users"),
            (BackupFlags::MEDIA_OBB, "media-obb"),
        ];
        NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl From<u32> for BackupFlags {
    fn from(bits: u32) -> Self {
        Self::new(bits)
    }
}

impl fmt::Display for BackupFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.names();
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_is_any_data_category() {
        assert!(!BackupFlags::new(BackupFlags::APK_FILES).backup_data());
        assert!(BackupFlags::new(BackupFlags::INTERNAL_DATA).backup_data());
        assert!(BackupFlags::new(BackupFlags::EXTERNAL_DATA).backup_data());
        assert!(BackupFlags::new(BackupFlags::MEDIA_OBB).backup_data());
    }

    #[test]
    fn test_unknown_bits_dropped() {
        let flags = BackupFlags::new(u32::MAX);
        assert_eq!(flags.bits(), (1 << 10) - 1);
    }

    #[test]
    fn test_set_and_clear() {
        let flags = BackupFlags::restore_all()
            .without(BackupFlags::EXTERNAL_DATA)
            .with(BackupFlags::SKIP_SIGNATURE_CHECK);
        assert!(!flags.backup_external_data());
        assert!(flags.backup_internal_data());
        assert!(flags.skip_signature_check());
    }

    #[test]
    fn test_serde_is_plain_number() {
        let flags = BackupFlags::new(BackupFlags::APK_FILES | BackupFlags::RULES);
        assert_eq!(serde_json::to_string(&flags).unwrap(), "17");
        let parsed: BackupFlags = serde_json::from_str("17").unwrap();
        assert_eq!(parsed, flags);
    }

    #[test]
    fn test_display() {
        let flags = BackupFlags::new(BackupFlags::APK_FILES | BackupFlags::EXTRAS);
        assert_eq!(flags.to_string(), "apk, extras");
        assert_eq!(BackupFlags::default().to_string(), "none");
    }
}
