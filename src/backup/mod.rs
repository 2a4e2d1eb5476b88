//! Backup and restore orchestration
//!
//! # Architecture
//!
//! - `BackupOrchestrator`: capture → archive → encrypt → place in the
//!   retention directory, for one store kind per run
//! - `RestoreOrchestrator`: decrypt → unpack into staging → authenticate →
//!   move into the destination → run verification hooks
//!
//! # Artifact Format
//!
//! Artifacts are named `{kind}-{YYYYMMDDHHMMSS}.{ext}.enc` (UTC), with a
//! `-{n}` sequence suffix when several runs land in the same second. The
//! retention directory is append-only; nothing here deletes artifacts.
//!
//! # Example
//!
//! ```rust,ignore
//! use snapvault::backup::{BackupOrchestrator, RestoreOrchestrator};
//! use snapvault::config::RunConfig;
//! use snapvault::kind::StoreKind;
//!
//! let config = RunConfig::new(passphrase, retention_dir).with_source("/srv/media");
//! let artifact = BackupOrchestrator::new(config).backup(StoreKind::BlobTree)?;
//!
//! let config = RunConfig::new(passphrase, retention_dir).with_destination("/srv/restore");
//! let report = RestoreOrchestrator::new(config).restore(&artifact.path, None)?;
//! println!("{}", report.summary());
//! ```

mod artifact;
mod hooks;
mod manager;
mod restore;

pub use artifact::{
    artifact_file_name, checksum_file, inspect_artifact, list_artifacts, persist_artifact, ArtifactInfo,
    ArtifactName, HashingWriter, RetainedArtifact, SnapshotArtifact,
};
pub use hooks::{CommandHook, SqliteIntegrityCheck, VerifyHook, RESTORE_KIND_ENV};
pub use manager::{BackupOrchestrator, RunStage};
pub use restore::{RestoreOrchestrator, RestoreReport, VerifyReport};
