//! Relational capture through SQLite's online backup API
//!
//! The backup API copies the database page by page through SQLite itself,
//! so the copy is a consistent snapshot even while other connections keep
//! writing. A plain file copy could tear mid-transaction.

use std::path::PathBuf;
use std::time::Duration;

use rusqlite::backup::Backup;
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info};

use super::{scratch_dir, CaptureHandle, CaptureLayout, Exporter};
use crate::config::settings::DEFAULT_SQLITE_PAGES_PER_STEP;
use crate::error::{SnapvaultError, SnapvaultResult};
use crate::kind::StoreKind;
use crate::storage::create_private_file;

/// Captures a SQLite database file
#[derive(Debug, Clone)]
pub struct SqliteExporter {
    source: PathBuf,
    pages_per_step: i32,
    step_pause: Duration,
}

impl SqliteExporter {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            pages_per_step: DEFAULT_SQLITE_PAGES_PER_STEP,
            step_pause: Duration::from_millis(5),
        }
    }

    pub fn with_pages_per_step(mut self, pages: i32) -> Self {
        self.pages_per_step = pages;
        self
    }

    pub fn with_step_pause(mut self, pause: Duration) -> Self {
        self.step_pause = pause;
        self
    }
}

impl Exporter for SqliteExporter {
    fn kind(&self) -> StoreKind {
        StoreKind::Relational
    }

    fn capture(&self, scratch_root: &std::path::Path) -> SnapvaultResult<CaptureHandle> {
        if !self.source.is_file() {
            return Err(SnapvaultError::SourceUnavailable(format!(
                "database file {} does not exist",
                self.source.display()
            )));
        }

        let file_name = self.source.file_name().ok_or_else(|| {
            SnapvaultError::Config(format!("Invalid database path: {}", self.source.display()))
        })?;

        let source = Connection::open_with_flags(
            &self.source,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| {
            SnapvaultError::SourceUnavailable(format!(
                "cannot open {}: {}",
                self.source.display(),
                e
            ))
        })?;

        let scratch = scratch_dir(scratch_root, StoreKind::Relational)?;
        let target = scratch.path().join(file_name);

        // Pre-create the target so it is owner-only before SQLite writes a byte
        create_private_file(&target).map_err(|e| {
            SnapvaultError::Archive(format!("Failed to create {}: {}", target.display(), e))
        })?;

        let mut snapshot = Connection::open(&target)
            .map_err(|e| SnapvaultError::ExportFailed(format!("Failed to open snapshot database: {}", e)))?;

        debug!(source = %self.source.display(), pages_per_step = self.pages_per_step, "starting online backup");
        {
            let backup = Backup::new(&source, &mut snapshot)
                .map_err(|e| SnapvaultError::ExportFailed(format!("Online backup failed to start: {}", e)))?;
            backup
                .run_to_completion(self.pages_per_step, self.step_pause, None)
                .map_err(|e| SnapvaultError::ExportFailed(format!("Online backup failed: {}", e)))?;
        }

        // A WAL source yields a WAL-flagged copy, which would grow -wal/-shm
        // sidecars when opened after restore
        let journal_mode: String = snapshot
            .query_row("PRAGMA journal_mode=DELETE", [], |row| row.get(0))
            .map_err(|e| SnapvaultError::ExportFailed(format!("Failed to reset journal mode: {}", e)))?;
        debug!(journal_mode = %journal_mode, "snapshot journal mode");

        snapshot
            .close()
            .map_err(|(_, e)| SnapvaultError::ExportFailed(format!("Failed to close snapshot: {}", e)))?;

        let size = std::fs::metadata(&target).map(|m| m.len()).unwrap_or(0);
        info!(source = %self.source.display(), bytes = size, "relational snapshot captured");

        Ok(CaptureHandle::staged(scratch, target, CaptureLayout::File))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn seed_database(path: &Path, rows: usize) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE memory_entry (id INTEGER PRIMARY KEY, body TEXT NOT NULL);",
        )
        .unwrap();
        for i in 0..rows {
            conn.execute(
                "INSERT INTO memory_entry (body) VALUES (?1)",
                [format!("entry {}", i)],
            )
            .unwrap();
        }
    }

    #[test]
    fn test_capture_copies_rows() {
        let temp = tempfile::tempdir().unwrap();
        let db = temp.path().join("app.sqlite3");
        seed_database(&db, 25);

        let exporter = SqliteExporter::new(&db).with_pages_per_step(1);
        let handle = exporter.capture(&temp.path().join("scratch")).unwrap();

        assert_eq!(handle.layout(), CaptureLayout::File);
        assert_eq!(handle.path().file_name().unwrap(), "app.sqlite3");

        let copy = Connection::open(handle.path()).unwrap();
        let count: i64 = copy
            .query_row("SELECT COUNT(*) FROM memory_entry", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 25);
    }

    #[test]
    fn test_wal_source_captures_rollback_journal_copy() {
        let temp = tempfile::tempdir().unwrap();
        let db = temp.path().join("app.sqlite3");
        seed_database(&db, 3);

        let writer = Connection::open(&db).unwrap();
        let mode: String = writer
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
        writer
            .execute("INSERT INTO memory_entry (body) VALUES ('late')", [])
            .unwrap();

        let handle = SqliteExporter::new(&db).capture(&temp.path().join("scratch")).unwrap();

        // File format read/write version bytes: 1 is rollback journal, 2 is WAL
        let header = fs::read(handle.path()).unwrap();
        assert_eq!(&header[18..20], &[1, 1]);

        let copy = Connection::open(handle.path()).unwrap();
        let count: i64 = copy
            .query_row("SELECT COUNT(*) FROM memory_entry", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 4);
        drop(writer);
    }

    #[cfg(unix)]
    #[test]
    fn test_capture_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().unwrap();
        let db = temp.path().join("app.sqlite3");
        seed_database(&db, 1);

        let handle = SqliteExporter::new(&db).capture(&temp.path().join("scratch")).unwrap();
        let mode = fs::metadata(handle.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }

    #[test]
    fn test_missing_database_is_source_unavailable() {
        let temp = tempfile::tempdir().unwrap();
        let exporter = SqliteExporter::new(temp.path().join("missing.sqlite3"));

        let err = exporter.capture(&temp.path().join("scratch")).unwrap_err();
        assert!(matches!(err, SnapvaultError::SourceUnavailable(_)));
        assert!(!temp.path().join("scratch").exists());
    }

    #[test]
    fn test_not_a_database_is_export_failed_and_cleaned() {
        let temp = tempfile::tempdir().unwrap();
        let bogus = temp.path().join("notes.txt");
        fs::write(&bogus, vec![b'x'; 4096]).unwrap();
        let scratch = temp.path().join("scratch");

        let err = SqliteExporter::new(&bogus).capture(&scratch).unwrap_err();
        assert!(err.is_capture());
        assert_eq!(fs::read_dir(&scratch).unwrap().count(), 0);
    }
}
