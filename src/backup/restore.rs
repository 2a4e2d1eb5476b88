//! Restore orchestrator
//!
//! Decrypts an artifact, unpacks it into a private staging directory inside
//! the destination, and only moves the result into place once the whole
//! ciphertext has authenticated. A wrong passphrase or a damaged artifact
//! therefore never leaves partial data in the destination.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use super::artifact::{checksum_file, ArtifactName};
use super::hooks::{CommandHook, SqliteIntegrityCheck, VerifyHook};
use crate::archive::unpack_archive;
use crate::config::RunConfig;
use crate::crypto::{decrypt_stream, EnvelopeReader};
use crate::error::{SnapvaultError, SnapvaultResult};
use crate::kind::StoreKind;
use crate::storage::create_private_dir_in;

const STAGING_PREFIX: &str = ".snapvault-restore-";

/// Result of a restore operation
#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub kind: StoreKind,
    pub artifact: PathBuf,
    pub destination: PathBuf,
    /// Top-level entries placed in the destination
    pub restored: Vec<PathBuf>,
    pub files: u64,
    pub directories: u64,
    pub bytes: u64,
    /// Names of the verification hooks that ran and passed
    pub verified_by: Vec<String>,
}

impl RestoreReport {
    /// Get a summary of what was restored
    pub fn summary(&self) -> String {
        format!(
            "Restored {} {} ({} files, {} directories) into {}",
            self.kind,
            self.artifact
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            self.files,
            self.directories,
            self.destination.display()
        )
    }
}

/// Result of authenticating an artifact end to end
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub artifact: PathBuf,
    pub name: Option<ArtifactName>,
    pub plaintext_bytes: u64,
    pub ciphertext_bytes: u64,
    /// SHA-256 of the ciphertext file
    pub checksum: String,
}

/// Restores artifacts for a fixed configuration
pub struct RestoreOrchestrator {
    config: RunConfig,
    hooks: Vec<Box<dyn VerifyHook>>,
}

impl RestoreOrchestrator {
    /// Create an orchestrator with the built-in hooks
    ///
    /// Relational restores get a SQLite integrity check; a configured
    /// restore verification command runs after every restore.
    pub fn new(config: RunConfig) -> Self {
        let mut hooks: Vec<Box<dyn VerifyHook>> = vec![Box::new(SqliteIntegrityCheck)];
        if let Some(command) = config.tool_overrides.restore_verify.clone() {
            hooks.push(Box::new(CommandHook::new(command)));
        }
        Self { config, hooks }
    }

    /// Append a verification hook
    pub fn with_hook(mut self, hook: Box<dyn VerifyHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Drop every verification hook, including the built-in ones
    pub fn without_hooks(mut self) -> Self {
        self.hooks.clear();
        self
    }

    /// Restore an artifact into the configured destination
    ///
    /// The store kind is taken from the artifact name unless `kind` is given.
    pub fn restore(&self, artifact: &Path, kind: Option<StoreKind>) -> SnapvaultResult<RestoreReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("restore", %run_id, artifact = %artifact.display());
        let _guard = span.enter();

        let result = self.execute(artifact, kind);
        match &result {
            Ok(report) => info!(
                kind = %report.kind,
                files = report.files,
                bytes = report.bytes,
                destination = %report.destination.display(),
                "restore complete"
            ),
            Err(e) => error!(category = e.category().as_str(), error = %e, "restore failed"),
        }
        result
    }

    fn execute(&self, artifact: &Path, kind: Option<StoreKind>) -> SnapvaultResult<RestoreReport> {
        let (kind, destination) = self.preflight(artifact, kind)?;
        debug!(kind = %kind, destination = %destination.display(), "preflight passed");

        // Authenticates the first chunk before anything is written
        let file = File::open(artifact).map_err(|e| {
            SnapvaultError::Archive(format!("Failed to open {}: {}", artifact.display(), e))
        })?;
        let mut reader = EnvelopeReader::open(BufReader::new(file), &self.config.passphrase)?;

        let staging = create_private_dir_in(&destination, STAGING_PREFIX)
            .map_err(|e| SnapvaultError::Archive(format!("Failed to create staging directory: {}", e)))?;

        let stats = unpack_archive(&mut reader, kind.archive_format(), staging.path()).map_err(|e| {
            if reader.authentication_failed() {
                SnapvaultError::WrongPassphraseOrCorrupt
            } else {
                e
            }
        })?;

        // The archive may end before the ciphertext does; the final chunk
        // must still authenticate
        io::copy(&mut reader, &mut io::sink()).map_err(|e| reader.classify_error(e))?;
        debug!(files = stats.files, bytes = stats.bytes, "artifact authenticated");

        let entries = staged_entries(staging.path())?;
        for name in &entries {
            let target = destination.join(name);
            if target.symlink_metadata().is_ok() {
                return Err(SnapvaultError::DestinationConflict(target.display().to_string()));
            }
        }

        let restored = move_into_place(staging.path(), &destination, &entries)?;
        if let Err(e) = staging.close() {
            warn!(error = %e, "failed to remove staging directory");
        }

        let mut verified_by = Vec::new();
        for hook in &self.hooks {
            hook.verify(kind, &restored)?;
            debug!(hook = hook.name(), "verification hook passed");
            verified_by.push(hook.name().to_string());
        }

        Ok(RestoreReport {
            kind,
            artifact: artifact.to_path_buf(),
            destination,
            restored,
            files: stats.files,
            directories: stats.directories,
            bytes: stats.bytes,
            verified_by,
        })
    }

    fn preflight(&self, artifact: &Path, kind: Option<StoreKind>) -> SnapvaultResult<(StoreKind, PathBuf)> {
        self.require_passphrase()?;
        require_artifact(artifact)?;

        let kind = match kind {
            Some(kind) => kind,
            None => ArtifactName::from_path(artifact).map(|n| n.kind).ok_or_else(|| {
                SnapvaultError::Config(format!(
                    "Cannot tell the store kind of {}; pass it explicitly",
                    artifact.display()
                ))
            })?,
        };

        let destination = self
            .config
            .destination_path
            .clone()
            .ok_or_else(|| SnapvaultError::Config("No restore destination configured".into()))?;
        fs::create_dir_all(&destination).map_err(|e| {
            SnapvaultError::Config(format!(
                "Failed to create destination {}: {}",
                destination.display(),
                e
            ))
        })?;
        if !destination.is_dir() {
            return Err(SnapvaultError::Config(format!(
                "Destination {} is not a directory",
                destination.display()
            )));
        }

        Ok((kind, destination))
    }

    /// Decrypt and authenticate a whole artifact without writing anything
    pub fn verify(&self, artifact: &Path) -> SnapvaultResult<VerifyReport> {
        self.require_passphrase()?;
        require_artifact(artifact)?;

        let file = File::open(artifact).map_err(|e| {
            SnapvaultError::Archive(format!("Failed to open {}: {}", artifact.display(), e))
        })?;
        let ciphertext_bytes = file.metadata()?.len();
        let plaintext_bytes = decrypt_stream(BufReader::new(file), io::sink(), &self.config.passphrase)?;
        let checksum = checksum_file(artifact)?;
        info!(artifact = %artifact.display(), plaintext_bytes, "artifact verified");

        Ok(VerifyReport {
            artifact: artifact.to_path_buf(),
            name: ArtifactName::from_path(artifact),
            plaintext_bytes,
            ciphertext_bytes,
            checksum,
        })
    }

    fn require_passphrase(&self) -> SnapvaultResult<()> {
        if self.config.passphrase.is_empty() {
            return Err(SnapvaultError::Config("Passphrase must not be empty".into()));
        }
        Ok(())
    }
}

fn require_artifact(artifact: &Path) -> SnapvaultResult<()> {
    if !artifact.is_file() {
        return Err(SnapvaultError::Config(format!(
            "Artifact {} does not exist",
            artifact.display()
        )));
    }
    Ok(())
}

fn staged_entries(staging: &Path) -> SnapvaultResult<Vec<OsString>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(staging)? {
        entries.push(entry?.file_name());
    }
    entries.sort();
    Ok(entries)
}

/// Rename staged entries into the destination, undoing earlier renames if
/// one fails
fn move_into_place(staging: &Path, destination: &Path, entries: &[OsString]) -> SnapvaultResult<Vec<PathBuf>> {
    let mut moved: Vec<PathBuf> = Vec::with_capacity(entries.len());
    for name in entries {
        let target = destination.join(name);
        if let Err(e) = fs::rename(staging.join(name), &target) {
            for done in &moved {
                if let Some(done_name) = done.file_name() {
                    if let Err(undo) = fs::rename(done, staging.join(done_name)) {
                        warn!(path = %done.display(), error = %undo, "failed to roll back restored entry");
                    }
                }
            }
            return Err(SnapvaultError::Archive(format!(
                "Failed to move {} into place: {}",
                target.display(),
                e
            )));
        }
        moved.push(target);
    }
    Ok(moved)
}
