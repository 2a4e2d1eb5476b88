//! Blob tree capture
//!
//! There is no snapshot primitive for a plain directory tree, so the tree is
//! streamed straight into the archive builder. Files created, removed or
//! rewritten while the walk is in progress may or may not be included, and a
//! file rewritten mid-read may be torn. This best-effort consistency is the
//! accepted guarantee for media stores; content-addressed blobs are written
//! once and never modified in place.

use std::path::PathBuf;

use super::{CaptureHandle, CaptureLayout, Exporter};
use crate::error::{SnapvaultError, SnapvaultResult};
use crate::kind::StoreKind;

/// Captures a media/blob directory tree
#[derive(Debug, Clone)]
pub struct BlobTreeExporter {
    root: PathBuf,
}

impl BlobTreeExporter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Exporter for BlobTreeExporter {
    fn kind(&self) -> StoreKind {
        StoreKind::BlobTree
    }

    fn live_root(&self) -> Option<&std::path::Path> {
        Some(&self.root)
    }

    fn capture(&self, _scratch_root: &std::path::Path) -> SnapvaultResult<CaptureHandle> {
        if !self.root.is_dir() {
            return Err(SnapvaultError::SourceUnavailable(format!(
                "blob root {} is not a directory",
                self.root.display()
            )));
        }
        Ok(CaptureHandle::live(self.root.clone(), CaptureLayout::Tree))
    }
}
