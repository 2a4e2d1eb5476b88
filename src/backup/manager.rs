//! Backup orchestrator
//!
//! Sequences capture, archive, encryption and placement for one store
//! kind. The plaintext never reaches the retention directory: the archive
//! is encrypted as it is produced, into a temp file that only gets its
//! artifact name once it is complete and synced.

use std::fmt;
use std::fs;
use std::io::BufWriter;
use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, info_span};
use uuid::Uuid;

use super::artifact::{persist_artifact, HashingWriter, SnapshotArtifact};
use crate::archive::write_archive;
use crate::capture::{exporter_for, Exporter};
use crate::config::RunConfig;
use crate::crypto::envelope::MAX_CHUNK_SIZE;
use crate::crypto::EnvelopeWriter;
use crate::error::{SnapvaultError, SnapvaultResult};
use crate::kind::StoreKind;

/// Where a backup run currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStage {
    Idle,
    Preflight,
    Capturing,
    ArchivingEncrypting,
    Finalizing,
    Complete,
    Failed,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Preflight => "preflight",
            Self::Capturing => "capturing",
            Self::ArchivingEncrypting => "archiving-encrypting",
            Self::Finalizing => "finalizing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs backups for a fixed configuration
pub struct BackupOrchestrator {
    config: RunConfig,
    stage: RunStage,
    failed_at: Option<RunStage>,
}

impl BackupOrchestrator {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            stage: RunStage::Idle,
            failed_at: None,
        }
    }

    /// The configuration this orchestrator runs with
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Stage reached by the most recent run
    pub fn stage(&self) -> RunStage {
        self.stage
    }

    /// Stage the most recent run failed in, if it failed
    pub fn failed_at(&self) -> Option<RunStage> {
        self.failed_at
    }

    /// Back up one store kind using the exporter the configuration describes
    pub fn backup(&mut self, kind: StoreKind) -> SnapvaultResult<SnapshotArtifact> {
        let exporter = exporter_for(kind, &self.config)?;
        self.run(exporter.as_ref())
    }

    /// Back up through an explicit exporter
    pub fn run(&mut self, exporter: &dyn Exporter) -> SnapvaultResult<SnapshotArtifact> {
        let kind = exporter.kind();
        let run_id = Uuid::new_v4();
        let span = info_span!("backup", %run_id, kind = %kind);
        let _guard = span.enter();

        self.stage = RunStage::Idle;
        self.failed_at = None;

        match self.execute(exporter) {
            Ok(artifact) => {
                self.advance(RunStage::Complete);
                info!(
                    path = %artifact.path.display(),
                    size_bytes = artifact.size_bytes,
                    checksum = %artifact.checksum,
                    "backup complete"
                );
                Ok(artifact)
            }
            Err(e) => {
                error!(
                    stage = %self.stage,
                    category = e.category().as_str(),
                    error = %e,
                    "backup failed"
                );
                self.failed_at = Some(self.stage);
                self.stage = RunStage::Failed;
                Err(e)
            }
        }
    }

    fn advance(&mut self, stage: RunStage) {
        debug!(from = %self.stage, to = %stage, "stage transition");
        self.stage = stage;
    }

    fn execute(&mut self, exporter: &dyn Exporter) -> SnapvaultResult<SnapshotArtifact> {
        let kind = exporter.kind();

        self.advance(RunStage::Preflight);
        self.preflight(exporter)?;

        self.advance(RunStage::Capturing);
        let capture = exporter.capture(&self.config.scratch_root)?;
        debug!(path = %capture.path().display(), staged = capture.is_staged(), "capture ready");

        self.advance(RunStage::ArchivingEncrypting);
        let retention = self.config.retention_directory.clone();
        let created_at = Utc::now();

        // Dropping this on any error path removes the partial ciphertext
        let temp = tempfile::Builder::new()
            .prefix(&format!(".{}-", kind.slug()))
            .suffix(".partial")
            .tempfile_in(&retention)
            .map_err(|e| SnapvaultError::Archive(format!("Failed to create temp artifact: {}", e)))?;

        let sink = HashingWriter::new(BufWriter::new(temp));
        let envelope = EnvelopeWriter::new(
            sink,
            &self.config.passphrase,
            self.config.kdf,
            self.config.chunk_size,
        )?;
        let (envelope, stats) = write_archive(&capture, kind.archive_format(), envelope)?;
        let sink = envelope
            .finish()
            .map_err(|e| SnapvaultError::Archive(format!("Failed to seal artifact: {}", e)))?;
        let (buffered, checksum, size_bytes) = sink.into_parts();
        let temp = buffered
            .into_inner()
            .map_err(|e| SnapvaultError::Archive(format!("Failed to flush artifact: {}", e.error())))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| SnapvaultError::Archive(format!("Failed to sync artifact: {}", e)))?;
        debug!(
            files = stats.files,
            plaintext_bytes = stats.bytes,
            ciphertext_bytes = size_bytes,
            "artifact sealed"
        );

        self.advance(RunStage::Finalizing);
        capture.release()?;
        let path = persist_artifact(temp, &retention, kind, created_at)?;

        Ok(SnapshotArtifact {
            kind,
            created_at,
            path,
            size_bytes,
            checksum,
        })
    }

    fn preflight(&self, exporter: &dyn Exporter) -> SnapvaultResult<()> {
        if self.config.passphrase.is_empty() {
            return Err(SnapvaultError::Config("Passphrase must not be empty".into()));
        }
        self.config.kdf.validate()?;
        if self.config.chunk_size == 0 || self.config.chunk_size > MAX_CHUNK_SIZE {
            return Err(SnapvaultError::Config(format!(
                "Chunk size must be between 1 and {} bytes",
                MAX_CHUNK_SIZE
            )));
        }

        exporter.preflight()?;

        fs::create_dir_all(&self.config.retention_directory).map_err(|e| {
            SnapvaultError::Config(format!(
                "Failed to create retention directory {}: {}",
                self.config.retention_directory.display(),
                e
            ))
        })?;
        if !self.config.retention_directory.is_dir() {
            return Err(SnapvaultError::Config(format!(
                "Retention path {} is not a directory",
                self.config.retention_directory.display()
            )));
        }

        // The walk would otherwise archive its own partial artifact
        if let Some(root) = exporter.live_root() {
            fs::create_dir_all(&self.config.scratch_root).map_err(|e| {
                SnapvaultError::Config(format!(
                    "Failed to create scratch root {}: {}",
                    self.config.scratch_root.display(),
                    e
                ))
            })?;
            for (label, dir) in [
                ("Retention directory", &self.config.retention_directory),
                ("Scratch directory", &self.config.scratch_root),
            ] {
                if is_within(dir, root) {
                    return Err(SnapvaultError::Config(format!(
                        "{} {} lies inside the blob root {}",
                        label,
                        dir.display(),
                        root.display()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Whether existing directory `dir` is `root` or below it
fn is_within(dir: &Path, root: &Path) -> bool {
    match (dir.canonicalize(), root.canonicalize()) {
        (Ok(dir), Ok(root)) => dir.starts_with(root),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::artifact::ArtifactName;
    use crate::capture::{CaptureHandle, CaptureLayout};
    use crate::config::{CommandSpec, ToolOverrides};
    use crate::crypto::{decrypt_stream, KdfCosts};
    use std::fs::File;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                temp: TempDir::new().unwrap(),
            }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.temp.path().join(name)
        }

        fn config(&self, passphrase: &str) -> RunConfig {
            RunConfig::new(passphrase.into(), self.path("artifacts"))
                .with_scratch_root(self.path("scratch"))
                .with_kdf(KdfCosts::new(1024, 1, 1))
        }

        fn media(&self) -> PathBuf {
            let media = self.path("media");
            fs::create_dir_all(media.join("ab")).unwrap();
            fs::write(media.join("ab/abcdef"), b"blob one").unwrap();
            fs::write(media.join("readme"), b"blob two").unwrap();
            media
        }

        fn retention_entries(&self) -> Vec<String> {
            let mut names: Vec<String> = fs::read_dir(self.path("artifacts"))
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }

        fn scratch_is_empty(&self) -> bool {
            let scratch = self.path("scratch");
            !scratch.exists() || fs::read_dir(scratch).unwrap().count() == 0
        }
    }

    /// Exporter that stages a capture and then fails partway through
    struct FailingExporter;

    impl Exporter for FailingExporter {
        fn kind(&self) -> StoreKind {
            StoreKind::Relational
        }

        fn capture(&self, _scratch_root: &Path) -> SnapvaultResult<CaptureHandle> {
            Err(SnapvaultError::ExportFailed("database locked".into()))
        }
    }

    /// Exporter whose capture points at a file that is gone by archive time
    struct VanishingExporter {
        path: PathBuf,
    }

    impl Exporter for VanishingExporter {
        fn kind(&self) -> StoreKind {
            StoreKind::GraphExport
        }

        fn capture(&self, _scratch_root: &Path) -> SnapvaultResult<CaptureHandle> {
            Ok(CaptureHandle::live(self.path.clone(), CaptureLayout::File))
        }
    }

    #[test]
    fn test_blob_tree_backup_produces_named_artifact() {
        let fixture = Fixture::new();
        let media = fixture.media();
        let mut orchestrator = BackupOrchestrator::new(fixture.config("correct horse").with_source(&media));

        let artifact = orchestrator.backup(StoreKind::BlobTree).unwrap();
        assert_eq!(orchestrator.stage(), RunStage::Complete);
        assert_eq!(artifact.kind, StoreKind::BlobTree);

        let name = ArtifactName::from_path(&artifact.path).unwrap();
        assert_eq!(name.kind, StoreKind::BlobTree);
        assert_eq!(name.created_at.timestamp(), artifact.created_at.timestamp());
        assert_eq!(fs::metadata(&artifact.path).unwrap().len(), artifact.size_bytes);
        assert_eq!(
            crate::backup::checksum_file(&artifact.path).unwrap(),
            artifact.checksum
        );

        // Only the artifact is left behind
        assert_eq!(fixture.retention_entries().len(), 1);
    }

    #[test]
    fn test_artifact_decrypts_only_with_same_passphrase() {
        let fixture = Fixture::new();
        let media = fixture.media();
        let mut orchestrator = BackupOrchestrator::new(fixture.config("correct horse").with_source(&media));
        let artifact = orchestrator.backup(StoreKind::BlobTree).unwrap();

        let plain = decrypt_stream(File::open(&artifact.path).unwrap(), Vec::new(), &"correct horse".into());
        assert!(plain.unwrap() > 0);

        let err = decrypt_stream(File::open(&artifact.path).unwrap(), Vec::new(), &"battery staple".into())
            .unwrap_err();
        assert!(matches!(err, SnapvaultError::WrongPassphraseOrCorrupt));
    }

    #[test]
    fn test_same_second_backups_get_distinct_names() {
        let fixture = Fixture::new();
        let media = fixture.media();
        let mut orchestrator = BackupOrchestrator::new(fixture.config("pw").with_source(&media));

        let mut paths = Vec::new();
        for _ in 0..3 {
            paths.push(orchestrator.backup(StoreKind::BlobTree).unwrap().path);
        }
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 3);
        assert_eq!(fixture.retention_entries().len(), 3);
    }

    #[test]
    fn test_relational_backup_cleans_scratch() {
        let fixture = Fixture::new();
        let db = fixture.path("app.sqlite3");
        let conn = rusqlite::Connection::open(&db).unwrap();
        conn.execute_batch("CREATE TABLE t (x TEXT); INSERT INTO t VALUES ('row');")
            .unwrap();
        drop(conn);

        let mut orchestrator = BackupOrchestrator::new(fixture.config("pw").with_source(&db));
        let artifact = orchestrator.backup(StoreKind::Relational).unwrap();

        assert!(artifact.path.to_string_lossy().ends_with(".tar.gz.enc"));
        assert!(fixture.scratch_is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_graph_backup_uses_export_command() {
        let fixture = Fixture::new();
        let config = fixture.config("pw").with_tools(ToolOverrides {
            graph_export: Some(CommandSpec::new("sh", ["-c", r#"printf '{"nodes":[]}'"#])),
            restore_verify: None,
        });
        let mut orchestrator = BackupOrchestrator::new(config);

        let artifact = orchestrator.backup(StoreKind::GraphExport).unwrap();
        assert!(artifact.path.to_string_lossy().ends_with(".json.enc"));

        let mut plain = Vec::new();
        decrypt_stream(File::open(&artifact.path).unwrap(), &mut plain, &"pw".into()).unwrap();
        assert_eq!(plain, br#"{"nodes":[]}"#);
        assert!(fixture.scratch_is_empty());
    }

    #[test]
    fn test_empty_passphrase_rejected_in_preflight() {
        let fixture = Fixture::new();
        let media = fixture.media();
        let mut orchestrator = BackupOrchestrator::new(fixture.config("").with_source(&media));

        let err = orchestrator.backup(StoreKind::BlobTree).unwrap_err();
        assert!(matches!(err, SnapvaultError::Config(_)));
        assert_eq!(orchestrator.stage(), RunStage::Failed);
        assert_eq!(orchestrator.failed_at(), Some(RunStage::Preflight));
        assert!(!fixture.path("artifacts").exists());
    }

    #[test]
    fn test_capture_failure_leaves_nothing_behind() {
        let fixture = Fixture::new();
        let mut orchestrator = BackupOrchestrator::new(fixture.config("pw"));

        let err = orchestrator.run(&FailingExporter).unwrap_err();
        assert!(err.is_capture());
        assert_eq!(orchestrator.failed_at(), Some(RunStage::Capturing));
        assert!(fixture.retention_entries().is_empty());
        assert!(fixture.scratch_is_empty());
    }

    #[test]
    fn test_archive_failure_removes_partial_artifact() {
        let fixture = Fixture::new();
        let exporter = VanishingExporter {
            path: fixture.path("gone.json"),
        };
        let mut orchestrator = BackupOrchestrator::new(fixture.config("pw"));

        let err = orchestrator.run(&exporter).unwrap_err();
        assert!(matches!(err, SnapvaultError::Archive(_)));
        assert_eq!(orchestrator.failed_at(), Some(RunStage::ArchivingEncrypting));
        assert!(fixture.retention_entries().is_empty());
    }

    #[test]
    fn test_missing_source_is_capture_error() {
        let fixture = Fixture::new();
        let mut orchestrator =
            BackupOrchestrator::new(fixture.config("pw").with_source(fixture.path("no-media")));

        let err = orchestrator.backup(StoreKind::BlobTree).unwrap_err();
        assert!(matches!(err, SnapvaultError::SourceUnavailable(_)));
        assert!(fixture.retention_entries().is_empty());
    }
    #[test]
    fn test_retention_inside_blob_root_rejected() {
        let fixture = Fixture::new();
        let media = fixture.media();
        let config = RunConfig::new("pw".into(), media.join("artifacts"))
            .with_scratch_root(fixture.path("scratch"))
            .with_kdf(KdfCosts::new(1024, 1, 1))
            .with_source(&media);
        let mut orchestrator = BackupOrchestrator::new(config);

        let err = orchestrator.backup(StoreKind::BlobTree).unwrap_err();
        assert!(matches!(err, SnapvaultError::Config(_)));
        assert_eq!(orchestrator.failed_at(), Some(RunStage::Preflight));
        assert_eq!(fs::read_dir(media.join("artifacts")).unwrap().count(), 0);
    }

    #[test]
    fn test_scratch_inside_blob_root_rejected() {
        let fixture = Fixture::new();
        let media = fixture.media();
        let config = fixture.config("pw").with_scratch_root(media.join(".scratch")).with_source(&media);
        let mut orchestrator = BackupOrchestrator::new(config);

        let err = orchestrator.backup(StoreKind::BlobTree).unwrap_err();
        assert!(matches!(err, SnapvaultError::Config(_)));
        assert!(fixture.retention_entries().is_empty());
    }
}
