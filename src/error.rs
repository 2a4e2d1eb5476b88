//! Custom error types for snapvault
//!
//! Every failure the backup and restore pipelines can surface maps onto one
//! variant of [`SnapvaultError`]. Variants are grouped into categories
//! (see [`ErrorCategory`]) which the binary turns into exit codes.

use thiserror::Error;

/// The main error type for snapvault operations
#[derive(Error, Debug)]
pub enum SnapvaultError {
    /// Missing or invalid secret, path or tool; raised before any data I/O
    #[error("Configuration error: {0}")]
    Config(String),

    /// The store to capture does not exist or cannot be opened
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// The store's export mechanism ran but did not produce a usable capture
    #[error("Export failed: {0}")]
    ExportFailed(String),

    /// Read/write failure while streaming an archive or artifact
    #[error("Archive I/O failure: {0}")]
    Archive(String),

    /// Authentication failed while decrypting.
    ///
    /// A wrong passphrase and a damaged artifact are indistinguishable to
    /// the cipher, so they share this variant.
    #[error("Wrong passphrase or corrupt artifact")]
    WrongPassphraseOrCorrupt,

    /// An archive entry would land outside the restore destination
    #[error("Path traversal rejected: {0}")]
    PathTraversalRejected(String),

    /// The restore destination already holds an entry with the same name
    #[error("Destination conflict: {0}")]
    DestinationConflict(String),

    /// A post-restore verification hook reported a problem
    #[error("Verification failed: {0}")]
    VerificationFailed(String),
}

/// Coarse error taxonomy reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Config,
    Capture,
    Archive,
    Crypto,
    Restore,
}

impl ErrorCategory {
    /// Stable name of the category
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "ConfigError",
            Self::Capture => "CaptureError",
            Self::Archive => "ArchiveError",
            Self::Crypto => "CryptoError",
            Self::Restore => "RestoreError",
        }
    }

    /// Process exit code used by the binary for this category
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config => 2,
            Self::Capture => 3,
            Self::Archive => 4,
            Self::Crypto => 5,
            Self::Restore => 6,
        }
    }
}

impl SnapvaultError {
    /// The category this error belongs to
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) => ErrorCategory::Config,
            Self::SourceUnavailable(_) | Self::ExportFailed(_) => ErrorCategory::Capture,
            Self::Archive(_) => ErrorCategory::Archive,
            Self::WrongPassphraseOrCorrupt => ErrorCategory::Crypto,
            Self::PathTraversalRejected(_)
            | Self::DestinationConflict(_)
            | Self::VerificationFailed(_) => ErrorCategory::Restore,
        }
    }

    /// Check if this is a capture-stage error
    pub fn is_capture(&self) -> bool {
        self.category() == ErrorCategory::Capture
    }

    /// Check if this is an authentication failure
    pub fn is_crypto(&self) -> bool {
        matches!(self, Self::WrongPassphraseOrCorrupt)
    }
}

impl From<std::io::Error> for SnapvaultError {
    fn from(err: std::io::Error) -> Self {
        Self::Archive(err.to_string())
    }
}

/// Result type alias for snapvault operations
pub type SnapvaultResult<T> = Result<T, SnapvaultError>;
