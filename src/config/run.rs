//! Per-run configuration handed to the orchestrators

use std::path::PathBuf;
use std::time::Duration;

use super::paths::SnapvaultPaths;
use super::settings::{Settings, DEFAULT_SQLITE_PAGES_PER_STEP};
use super::tools::ToolOverrides;
use crate::crypto::{KdfCosts, Passphrase, DEFAULT_CHUNK_SIZE};
use crate::kind::StoreKind;

/// Everything one backup or restore run needs
///
/// Built once by the caller (usually from [`Settings`] plus command-line
/// overrides) and passed to the orchestrator; nothing is read from the
/// environment after construction.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Secret used to derive the artifact key
    pub passphrase: Passphrase,
    /// Store to capture (database file, blob root, or graph export working directory)
    pub source_path: Option<PathBuf>,
    /// Restore destination root
    pub destination_path: Option<PathBuf>,
    /// Append-only directory receiving artifacts
    pub retention_directory: PathBuf,
    /// External tool commands
    pub tool_overrides: ToolOverrides,
    /// Root under which private per-run scratch directories are created
    pub scratch_root: PathBuf,
    /// Argon2id costs for new artifacts
    pub kdf: KdfCosts,
    /// Plaintext bytes per sealed chunk
    pub chunk_size: usize,
    /// Pages copied per SQLite online-backup step
    pub sqlite_pages_per_step: i32,
    /// Pause between SQLite online-backup steps, letting writers through
    pub sqlite_step_pause: Duration,
}

impl RunConfig {
    /// Create a config with default tuning
    pub fn new(passphrase: Passphrase, retention_directory: PathBuf) -> Self {
        let scratch_root = std::env::temp_dir().join("snapvault-scratch");
        Self {
            passphrase,
            source_path: None,
            destination_path: None,
            retention_directory,
            tool_overrides: ToolOverrides::default(),
            scratch_root,
            kdf: KdfCosts::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            sqlite_pages_per_step: DEFAULT_SQLITE_PAGES_PER_STEP,
            sqlite_step_pause: Duration::from_millis(5),
        }
    }

    /// Build a config from persisted settings for one store kind
    pub fn from_settings(
        settings: &Settings,
        paths: &SnapvaultPaths,
        kind: Option<StoreKind>,
        passphrase: Passphrase,
    ) -> Self {
        let mut config = Self::new(passphrase, settings.retention_dir(paths));
        config.source_path = kind.and_then(|k| settings.sources.for_kind(k).cloned());
        config.tool_overrides = settings.tools.clone();
        config.scratch_root = settings.scratch_dir(paths);
        config.kdf = settings.kdf;
        config.chunk_size = settings.chunk_size;
        config.sqlite_pages_per_step = settings.sqlite_pages_per_step;
        config
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source_path = Some(source.into());
        self
    }

    pub fn with_destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination_path = Some(destination.into());
        self
    }

    pub fn with_scratch_root(mut self, scratch_root: impl Into<PathBuf>) -> Self {
        self.scratch_root = scratch_root.into();
        self
    }

    pub fn with_tools(mut self, tools: ToolOverrides) -> Self {
        self.tool_overrides = tools;
        self
    }

    pub fn with_kdf(mut self, kdf: KdfCosts) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}
