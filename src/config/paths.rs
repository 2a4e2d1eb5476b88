//! Path management for snapvault
//!
//! ## Path Resolution Order
//!
//! 1. `SNAPVAULT_HOME` environment variable (if set)
//! 2. The platform data directory (`~/.local/share/snapvault` on Linux,
//!    `~/Library/Application Support/snapvault` on macOS,
//!    `%APPDATA%\snapvault\data` on Windows)

use std::path::PathBuf;

use directories::ProjectDirs;

use crate::error::SnapvaultError;

/// Environment variable overriding the base directory
pub const HOME_ENV: &str = "SNAPVAULT_HOME";

/// Manages all paths used by snapvault
#[derive(Debug, Clone)]
pub struct SnapvaultPaths {
    /// Base directory for settings, artifacts and scratch space
    base_dir: PathBuf,
}

impl SnapvaultPaths {
    /// Create a new SnapvaultPaths instance
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined.
    pub fn new() -> Result<Self, SnapvaultError> {
        let base_dir = match std::env::var_os(HOME_ENV) {
            Some(custom) if !custom.is_empty() => PathBuf::from(custom),
            _ => ProjectDirs::from("", "", "snapvault")
                .map(|dirs| dirs.data_dir().to_path_buf())
                .ok_or_else(|| SnapvaultError::Config("Could not determine home directory".into()))?,
        };

        Ok(Self { base_dir })
    }

    /// Create SnapvaultPaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the path to the settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Default retention directory for artifacts
    pub fn retention_dir(&self) -> PathBuf {
        self.base_dir.join("artifacts")
    }

    /// Default root for per-run scratch directories
    pub fn scratch_dir(&self) -> PathBuf {
        self.base_dir.join("scratch")
    }

    /// Ensure the base, retention and scratch directories exist
    pub fn ensure_directories(&self) -> Result<(), SnapvaultError> {
        for dir in [self.base_dir.clone(), self.retention_dir(), self.scratch_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                SnapvaultError::Config(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }

    /// Check if a settings file has been written
    pub fn is_initialized(&self) -> bool {
        self.settings_file().exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_custom_base_dir() {
        let temp_dir = TempDir::new().unwrap();
        let paths = SnapvaultPaths::with_base_dir(temp_dir.path().to_path_buf());

        assert_eq!(paths.base_dir(), temp_dir.path());
        assert_eq!(paths.retention_dir(), temp_dir.path().join("artifacts"));
        assert_eq!(paths.scratch_dir(), temp_dir.path().join("scratch"));
        assert_eq!(paths.settings_file(), temp_dir.path().join("config.json"));
    }

    #[test]
    fn test_ensure_directories() {
        let temp_dir = TempDir::new().unwrap();
        let paths = SnapvaultPaths::with_base_dir(temp_dir.path().join("home"));

        paths.ensure_directories().unwrap();

        assert!(paths.retention_dir().is_dir());
        assert!(paths.scratch_dir().is_dir());
        assert!(!paths.is_initialized());
    }
}
