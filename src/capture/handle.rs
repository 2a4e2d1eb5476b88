//! Scoped ownership of a plaintext capture

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{SnapvaultError, SnapvaultResult};
use crate::storage::shred_file;

/// Shape of a capture on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureLayout {
    /// A single file
    File,
    /// A directory tree
    Tree,
}

/// A capture ready to be archived
///
/// Staged captures own their private scratch directory. The scratch
/// contents are overwritten and removed when the handle is released or
/// dropped, so every exit path of a run cleans up. Live captures point at
/// the source itself and own nothing.
#[derive(Debug)]
pub struct CaptureHandle {
    path: PathBuf,
    layout: CaptureLayout,
    scratch: Option<TempDir>,
}

impl CaptureHandle {
    /// A capture written into a scratch directory this handle now owns
    pub fn staged(scratch: TempDir, path: PathBuf, layout: CaptureLayout) -> Self {
        Self {
            path,
            layout,
            scratch: Some(scratch),
        }
    }

    /// A capture read directly from the live source
    pub fn live(path: PathBuf, layout: CaptureLayout) -> Self {
        Self {
            path,
            layout,
            scratch: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> CaptureLayout {
        self.layout
    }

    /// Whether this handle owns plaintext in a scratch directory
    pub fn is_staged(&self) -> bool {
        self.scratch.is_some()
    }

    /// Scratch directory owned by this handle, if any
    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch.as_ref().map(|dir| dir.path())
    }

    /// Destroy the scratch copy, reporting any failure
    pub fn release(mut self) -> SnapvaultResult<()> {
        if let Some(scratch) = self.scratch.take() {
            shred_tree(scratch.path()).map_err(|e| {
                SnapvaultError::Archive(format!(
                    "Failed to wipe scratch capture {}: {}",
                    scratch.path().display(),
                    e
                ))
            })?;
            let dir = scratch.path().to_path_buf();
            scratch.close().map_err(|e| {
                SnapvaultError::Archive(format!("Failed to remove scratch {}: {}", dir.display(), e))
            })?;
            debug!(scratch = %dir.display(), "scratch capture released");
        }
        Ok(())
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if let Some(scratch) = self.scratch.take() {
            if let Err(e) = shred_tree(scratch.path()) {
                warn!(scratch = %scratch.path().display(), error = %e, "failed to wipe scratch capture");
            }
            // TempDir removes whatever is left when it goes out of scope
        }
    }
}

/// Overwrite and remove every file below `root`, leaving directories
fn shred_tree(root: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(root).contents_first(true) {
        let entry = entry?;
        if entry.file_type().is_file() {
            shred_file(entry.path())?;
        }
    }
    Ok(())
}
