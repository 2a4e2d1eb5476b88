//! Secure memory handling for the backup passphrase
//!
//! The passphrase is the only secret snapvault handles in plaintext. It is
//! wiped on drop and never rendered by `Debug` or `Display`.

use std::fmt;
use std::ops::Deref;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// A passphrase that zeros its contents on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Passphrase {
    inner: String,
}

impl Passphrase {
    /// Create a new Passphrase
    pub fn new(s: impl Into<String>) -> Self {
        Self { inner: s.into() }
    }

    /// Get the passphrase contents
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Get the passphrase bytes
    pub fn as_bytes(&self) -> &[u8] {
        self.inner.as_bytes()
    }

    /// Get the length
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Deref for Passphrase {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl From<String> for Passphrase {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Passphrase {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Passphrase")
            .field("len", &self.inner.len())
            .finish()
    }
}

impl fmt::Display for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED {} bytes]", self.inner.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passphrase_creation() {
        let p = Passphrase::new("hunter22");
        assert_eq!(p.as_str(), "hunter22");
        assert_eq!(p.len(), 8);
        assert!(!p.is_empty());
    }

    #[test]
    fn test_passphrase_debug_redacted() {
        let p = Passphrase::new("secret");
        let debug = format!("{:?}", p);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("Passphrase"));
    }

    #[test]
    fn test_passphrase_display_redacted() {
        let p: Passphrase = String::from("secret").into();
        let display = format!("{}", p);
        assert!(!display.contains("secret"));
        assert!(display.contains("REDACTED"));
    }

    #[test]
    fn test_passphrase_zeroize() {
        let mut p = Passphrase::new("secret");
        p.zeroize();
        assert!(p.is_empty());
    }
}
