//! Persisted settings for snapvault
//!
//! Holds everything that is not secret: where sources live, where artifacts
//! go, external tool commands and encryption cost parameters. The passphrase
//! is never stored here.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::paths::SnapvaultPaths;
use super::tools::ToolOverrides;
use crate::crypto::{KdfCosts, DEFAULT_CHUNK_SIZE};
use crate::error::SnapvaultError;
use crate::kind::StoreKind;
use crate::storage::{read_json, write_json_atomic};

/// Default number of database pages copied per online-backup step
pub const DEFAULT_SQLITE_PAGES_PER_STEP: i32 = 256;

/// Source location per store kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePaths {
    /// SQLite database file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relational: Option<PathBuf>,

    /// Root of the media/blob tree
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_tree: Option<PathBuf>,

    /// Working directory for the graph export command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<PathBuf>,
}

impl SourcePaths {
    /// Get the configured source for a store kind
    pub fn for_kind(&self, kind: StoreKind) -> Option<&PathBuf> {
        match kind {
            StoreKind::Relational => self.relational.as_ref(),
            StoreKind::BlobTree => self.blob_tree.as_ref(),
            StoreKind::GraphExport => self.graph.as_ref(),
        }
    }
}

/// User settings for snapvault
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Where artifacts are written (defaults to `<base>/artifacts`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_dir: Option<PathBuf>,

    /// Root for per-run scratch directories (defaults to `<base>/scratch`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,

    /// Source locations
    #[serde(default)]
    pub sources: SourcePaths,

    /// External tool commands
    #[serde(default)]
    pub tools: ToolOverrides,

    /// Argon2id cost parameters for new artifacts
    #[serde(default)]
    pub kdf: KdfCosts,

    /// Plaintext bytes per sealed chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Pages copied per SQLite online-backup step
    #[serde(default = "default_pages_per_step")]
    pub sqlite_pages_per_step: i32,
}

fn default_schema_version() -> u32 {
    1
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_pages_per_step() -> i32 {
    DEFAULT_SQLITE_PAGES_PER_STEP
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            retention_dir: None,
            scratch_dir: None,
            sources: SourcePaths::default(),
            tools: ToolOverrides::default(),
            kdf: KdfCosts::default(),
            chunk_size: default_chunk_size(),
            sqlite_pages_per_step: default_pages_per_step(),
        }
    }
}

impl Settings {
    /// Load settings from disk, or fall back to defaults if no file exists
    pub fn load_or_create(paths: &SnapvaultPaths) -> Result<Self, SnapvaultError> {
        read_json(paths.settings_file())
    }

    /// Save settings to disk
    pub fn save(&self, paths: &SnapvaultPaths) -> Result<(), SnapvaultError> {
        paths.ensure_directories()?;
        write_json_atomic(paths.settings_file(), self)
    }

    /// Retention directory, falling back to the default location
    pub fn retention_dir(&self, paths: &SnapvaultPaths) -> PathBuf {
        self.retention_dir.clone().unwrap_or_else(|| paths.retention_dir())
    }

    /// Scratch root, falling back to the default location
    pub fn scratch_dir(&self, paths: &SnapvaultPaths) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(|| paths.scratch_dir())
    }
}
