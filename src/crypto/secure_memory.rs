//! Passphrase storage that is wiped on drop

use std::fmt;

use zeroize::Zeroizing;

/// Passphrase held in zeroized memory; never printed
#[derive(Clone)]
pub struct SecureString(Zeroizing<String>);

impl SecureString {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Zeroizing::new(s.into()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecureString(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contents_hidden_from_debug() {
        let s = SecureString::new("hunter2");
        assert_eq!(s.as_str(), "hunter2");
        assert!(!format!("{:?}", s).contains("hunter2"));
        assert!(!s.is_empty());
        assert!(SecureString::new("").is_empty());
    }
}
