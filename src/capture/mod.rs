//! Snapshot capture adapters
//!
//! Each store kind has one [`Exporter`] that turns the live store into a
//! [`CaptureHandle`]:
//!
//! - `SqliteExporter`: online backup API into a private scratch file
//! - `BlobTreeExporter`: the live directory tree, streamed as-is
//! - `GraphExporter`: an external export command's stdout, captured to a
//!   private scratch file

mod blob_tree;
mod graph_export;
mod handle;
mod relational;

pub use blob_tree::BlobTreeExporter;
pub use graph_export::{GraphExporter, GRAPH_EXPORT_FILE};
pub use handle::{CaptureHandle, CaptureLayout};
pub use relational::SqliteExporter;

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use crate::config::RunConfig;
use crate::error::{SnapvaultError, SnapvaultResult};
use crate::kind::StoreKind;
use crate::storage::create_private_dir_in;

/// Capability interface implemented once per store kind
pub trait Exporter {
    /// The store kind this exporter captures
    fn kind(&self) -> StoreKind;

    /// Check required tools are present; runs before any data I/O
    fn preflight(&self) -> SnapvaultResult<()> {
        Ok(())
    }

    /// Directory streamed live into the archive, if the capture is not staged
    fn live_root(&self) -> Option<&Path> {
        None
    }

    /// Produce a consistent point-in-time capture
    ///
    /// Staged captures are written below `scratch_root` in a directory
    /// private to this call.
    fn capture(&self, scratch_root: &Path) -> SnapvaultResult<CaptureHandle>;
}

/// Build the exporter for a store kind from the run configuration
pub fn exporter_for(kind: StoreKind, config: &RunConfig) -> SnapvaultResult<Box<dyn Exporter>> {
    match kind {
        StoreKind::Relational => {
            let source = require_source(kind, config)?;
            Ok(Box::new(
                SqliteExporter::new(source)
                    .with_pages_per_step(config.sqlite_pages_per_step)
                    .with_step_pause(config.sqlite_step_pause),
            ))
        }
        StoreKind::BlobTree => Ok(Box::new(BlobTreeExporter::new(require_source(kind, config)?))),
        StoreKind::GraphExport => {
            let command = config.tool_overrides.graph_export.clone().ok_or_else(|| {
                SnapvaultError::Config("No graph export command configured".into())
            })?;
            let mut exporter = GraphExporter::new(command);
            if let Some(dir) = &config.source_path {
                exporter = exporter.with_working_dir(dir.clone());
            }
            Ok(Box::new(exporter))
        }
    }
}

fn require_source(kind: StoreKind, config: &RunConfig) -> SnapvaultResult<std::path::PathBuf> {
    config
        .source_path
        .clone()
        .ok_or_else(|| SnapvaultError::Config(format!("No source path configured for {}", kind)))
}

/// Create a private scratch directory for one capture
pub(crate) fn scratch_dir(scratch_root: &Path, kind: StoreKind) -> SnapvaultResult<TempDir> {
    fs::create_dir_all(scratch_root).map_err(|e| {
        SnapvaultError::Config(format!(
            "Failed to create scratch root {}: {}",
            scratch_root.display(),
            e
        ))
    })?;
    create_private_dir_in(scratch_root, &format!(".{}-capture-", kind.slug()))
        .map_err(|e| SnapvaultError::Archive(format!("Failed to create scratch directory: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommandSpec, ToolOverrides};
    use std::path::PathBuf;

    #[test]
    fn test_exporter_for_requires_source() {
        let config = RunConfig::new("pw".into(), PathBuf::from("/tmp/artifacts"));
        let err = exporter_for(StoreKind::Relational, &config).err().unwrap();
        assert!(matches!(err, SnapvaultError::Config(_)));
    }

    #[test]
    fn test_exporter_for_graph_requires_command() {
        let config = RunConfig::new("pw".into(), PathBuf::from("/tmp/artifacts"));
        let err = exporter_for(StoreKind::GraphExport, &config).err().unwrap();
        assert!(matches!(err, SnapvaultError::Config(_)));

        let config = config.with_tools(ToolOverrides {
            graph_export: Some(CommandSpec::new("python", ["manage.py", "export_graph"])),
            restore_verify: None,
        });
        let exporter = exporter_for(StoreKind::GraphExport, &config).unwrap();
        assert_eq!(exporter.kind(), StoreKind::GraphExport);
    }

    #[cfg(unix)]
    #[test]
    fn test_scratch_dir_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let dir = scratch_dir(&root.path().join("scratch"), StoreKind::Relational).unwrap();
        let mode = fs::metadata(dir.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }
}
