//! Post-restore verification hooks
//!
//! After a restore the data-store owner may want to confirm the restored
//! state before bringing services back. Hooks run in order; the first
//! failure stops the restore report with `VerificationFailed`.

use std::path::PathBuf;
use std::process::Stdio;

use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info};

use crate::config::CommandSpec;
use crate::error::{SnapvaultError, SnapvaultResult};
use crate::kind::StoreKind;

/// Environment variable carrying the restored store kind to command hooks
pub const RESTORE_KIND_ENV: &str = "SNAPVAULT_RESTORE_KIND";

/// A check run against freshly restored data
pub trait VerifyHook {
    /// Short name used in logs and errors
    fn name(&self) -> &str;

    /// Inspect the restored top-level paths
    fn verify(&self, kind: StoreKind, restored: &[PathBuf]) -> SnapvaultResult<()>;
}

/// Runs `PRAGMA integrity_check` on restored SQLite databases
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteIntegrityCheck;

impl VerifyHook for SqliteIntegrityCheck {
    fn name(&self) -> &str {
        "sqlite-integrity-check"
    }

    fn verify(&self, kind: StoreKind, restored: &[PathBuf]) -> SnapvaultResult<()> {
        if kind != StoreKind::Relational {
            return Ok(());
        }

        for path in restored.iter().filter(|p| p.is_file()) {
            let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
                .map_err(|e| {
                    SnapvaultError::VerificationFailed(format!("cannot open {}: {}", path.display(), e))
                })?;
            let result: String = conn
                .query_row("PRAGMA integrity_check", [], |row| row.get(0))
                .map_err(|e| {
                    SnapvaultError::VerificationFailed(format!(
                        "integrity check of {} failed: {}",
                        path.display(),
                        e
                    ))
                })?;
            if result != "ok" {
                return Err(SnapvaultError::VerificationFailed(format!(
                    "{}: {}",
                    path.display(),
                    result
                )));
            }
            debug!(path = %path.display(), "sqlite integrity check passed");
        }
        Ok(())
    }
}

/// Runs an external program with the restored paths appended to its arguments
#[derive(Debug, Clone)]
pub struct CommandHook {
    command: CommandSpec,
}

impl CommandHook {
    pub fn new(command: CommandSpec) -> Self {
        Self { command }
    }
}

impl VerifyHook for CommandHook {
    fn name(&self) -> &str {
        &self.command.program
    }

    fn verify(&self, kind: StoreKind, restored: &[PathBuf]) -> SnapvaultResult<()> {
        let status = self
            .command
            .to_command()
            .args(restored)
            .env(RESTORE_KIND_ENV, kind.slug())
            .stdin(Stdio::null())
            .status()
            .map_err(|e| {
                SnapvaultError::VerificationFailed(format!("failed to start '{}': {}", self.command, e))
            })?;

        if !status.success() {
            return Err(SnapvaultError::VerificationFailed(format!(
                "'{}' exited with {}",
                self.command, status
            )));
        }
        info!(command = %self.command, "restore verification command passed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_sqlite_check_passes_on_valid_database() {
        let temp = tempfile::tempdir().unwrap();
        let db = temp.path().join("app.sqlite3");
        let conn = Connection::open(&db).unwrap();
        conn.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1);")
            .unwrap();
        drop(conn);

        SqliteIntegrityCheck.verify(StoreKind::Relational, &[db]).unwrap();
    }

    #[test]
    fn test_sqlite_check_rejects_garbage() {
        let temp = tempfile::tempdir().unwrap();
        let db = temp.path().join("app.sqlite3");
        fs::write(&db, vec![0xA5u8; 8192]).unwrap();

        let err = SqliteIntegrityCheck
            .verify(StoreKind::Relational, &[db])
            .unwrap_err();
        assert!(matches!(err, SnapvaultError::VerificationFailed(_)));
    }

    #[test]
    fn test_sqlite_check_ignores_other_kinds() {
        let temp = tempfile::tempdir().unwrap();
        let blob = temp.path().join("blob");
        fs::write(&blob, b"not a database").unwrap();

        SqliteIntegrityCheck.verify(StoreKind::BlobTree, &[blob]).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_command_hook_receives_paths_and_kind() {
        let temp = tempfile::tempdir().unwrap();
        let restored = temp.path().join("media");
        fs::create_dir(&restored).unwrap();

        let hook = CommandHook::new(CommandSpec::new(
            "sh",
            ["-c", r#"test -d "$1" && test "$SNAPVAULT_RESTORE_KIND" = blobtree"#, "verify"],
        ));
        hook.verify(StoreKind::BlobTree, &[restored.clone()]).unwrap();

        let err = hook.verify(StoreKind::Relational, &[restored]).unwrap_err();
        assert!(matches!(err, SnapvaultError::VerificationFailed(_)));
    }
}
