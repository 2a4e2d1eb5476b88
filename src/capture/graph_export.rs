//! Graph capture through an external export command
//!
//! The graph store offers no online backup primitive, so its application
//! layer is asked to dump the full model as JSON. The command's stdout is
//! redirected straight into a private scratch file; nothing passes through
//! a shell and nothing is buffered in memory.

use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tracing::{debug, info, warn};

use super::{scratch_dir, CaptureHandle, CaptureLayout, Exporter};
use crate::config::CommandSpec;
use crate::error::{SnapvaultError, SnapvaultResult};
use crate::kind::StoreKind;
use crate::storage::create_private_file;

/// File name of a captured graph export, in scratch and after restore
pub const GRAPH_EXPORT_FILE: &str = "graph-export.json";

const STDERR_FILE: &str = "export.stderr";
const STDERR_TAIL_BYTES: u64 = 2048;

/// Captures the graph model via an export command
#[derive(Debug, Clone)]
pub struct GraphExporter {
    command: CommandSpec,
    working_dir: Option<PathBuf>,
}

impl GraphExporter {
    pub fn new(command: CommandSpec) -> Self {
        Self {
            command,
            working_dir: None,
        }
    }

    /// Run the export command from this directory
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl Exporter for GraphExporter {
    fn kind(&self) -> StoreKind {
        StoreKind::GraphExport
    }

    fn preflight(&self) -> SnapvaultResult<()> {
        self.command.require("graph export").map(|_| ())
    }

    fn capture(&self, scratch_root: &Path) -> SnapvaultResult<CaptureHandle> {
        if let Some(dir) = &self.working_dir {
            if !dir.is_dir() {
                return Err(SnapvaultError::SourceUnavailable(format!(
                    "graph export working directory {} does not exist",
                    dir.display()
                )));
            }
        }

        let scratch = scratch_dir(scratch_root, StoreKind::GraphExport)?;
        let target = scratch.path().join(GRAPH_EXPORT_FILE);
        let stderr_path = scratch.path().join(STDERR_FILE);

        let stdout = create_private_file(&target).map_err(|e| {
            SnapvaultError::Archive(format!("Failed to create {}: {}", target.display(), e))
        })?;
        let stderr = create_private_file(&stderr_path).map_err(|e| {
            SnapvaultError::Archive(format!("Failed to create {}: {}", stderr_path.display(), e))
        })?;

        let mut command = self.command.to_command();
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        debug!(command = %self.command, "running graph export");
        let status = command.status().map_err(|e| {
            SnapvaultError::ExportFailed(format!("Failed to start '{}': {}", self.command, e))
        })?;

        if !status.success() {
            let tail = read_tail(&stderr_path).unwrap_or_default();
            let mut message = format!("'{}' exited with {}", self.command, status);
            if !tail.is_empty() {
                message.push_str(": ");
                message.push_str(tail.trim());
            }
            return Err(SnapvaultError::ExportFailed(message));
        }

        if let Err(e) = fs::remove_file(&stderr_path) {
            warn!(error = %e, "failed to remove export stderr");
        }

        let size = validate_export(&target)?;
        info!(command = %self.command, bytes = size, "graph export captured");

        Ok(CaptureHandle::staged(scratch, target, CaptureLayout::File))
    }
}

/// Confirm the export is a non-empty, well-formed JSON document
fn validate_export(path: &Path) -> SnapvaultResult<u64> {
    let file = File::open(path)
        .map_err(|e| SnapvaultError::ExportFailed(format!("Cannot read export output: {}", e)))?;
    let size = file
        .metadata()
        .map_err(|e| SnapvaultError::ExportFailed(format!("Cannot read export output: {}", e)))?
        .len();
    if size == 0 {
        return Err(SnapvaultError::ExportFailed(
            "Graph export produced no output".into(),
        ));
    }

    serde_json::from_reader::<_, serde::de::IgnoredAny>(BufReader::new(file)).map_err(|e| {
        SnapvaultError::ExportFailed(format!("Graph export is not valid JSON: {}", e))
    })?;
    Ok(size)
}

fn read_tail(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    file.seek(SeekFrom::Start(len.saturating_sub(STDERR_TAIL_BYTES)))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
