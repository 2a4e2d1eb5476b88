//! Archive builder
//!
//! Packs a capture into a streaming archive and unpacks it again. Relational
//! and blob captures become a deterministic `tar.gz`; graph exports are
//! passed through untouched.

mod unpack;

pub use unpack::{unpack_archive, UnpackStats};

use std::ffi::OsString;
use std::fs::{self, File, Metadata};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Builder, EntryType, Header, HeaderMode};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::capture::{CaptureHandle, CaptureLayout};
use crate::error::{SnapvaultError, SnapvaultResult};

/// Container format of an artifact's plaintext
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// Gzip-compressed tar
    TarGz,
    /// The capture file itself
    Raw,
}

/// Counters for one packing run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    pub files: u64,
    pub directories: u64,
    pub bytes: u64,
    /// Entries skipped because they vanished or were not regular files
    pub skipped: u64,
}

/// Pack a capture into `writer`, returning the writer once the archive
/// trailer has been written
pub fn write_archive<W: Write>(
    capture: &CaptureHandle,
    format: ArchiveFormat,
    writer: W,
) -> SnapvaultResult<(W, ArchiveStats)> {
    match format {
        ArchiveFormat::Raw => write_raw(capture, writer),
        ArchiveFormat::TarGz => write_tar_gz(capture, writer),
    }
}

fn write_raw<W: Write>(capture: &CaptureHandle, mut writer: W) -> SnapvaultResult<(W, ArchiveStats)> {
    if capture.layout() != CaptureLayout::File {
        return Err(SnapvaultError::Archive(format!(
            "Raw format needs a single file, got directory {}",
            capture.path().display()
        )));
    }
    let mut file = File::open(capture.path()).map_err(|e| {
        SnapvaultError::Archive(format!("Failed to open {}: {}", capture.path().display(), e))
    })?;
    let bytes = io::copy(&mut file, &mut writer)?;
    Ok((
        writer,
        ArchiveStats {
            files: 1,
            bytes,
            ..ArchiveStats::default()
        },
    ))
}

fn write_tar_gz<W: Write>(capture: &CaptureHandle, writer: W) -> SnapvaultResult<(W, ArchiveStats)> {
    let root = capture.path();
    let base = base_name(root)?;

    // Default GzEncoder header has no file name and a zero mtime
    let mut builder = Builder::new(GzEncoder::new(writer, Compression::default()));
    builder.mode(HeaderMode::Deterministic);
    builder.follow_symlinks(false);

    let mut stats = ArchiveStats::default();
    match capture.layout() {
        CaptureLayout::File => {
            append_file(&mut builder, root, Path::new(&base), &mut stats)?;
        }
        CaptureLayout::Tree => {
            for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) if is_not_found(&e) => {
                        debug!(error = %e, "entry vanished during walk");
                        stats.skipped += 1;
                        continue;
                    }
                    Err(e) => {
                        return Err(SnapvaultError::Archive(format!("Failed to walk {}: {}", root.display(), e)))
                    }
                };

                let relative = entry.path().strip_prefix(root).map_err(|e| {
                    SnapvaultError::Archive(format!("Unexpected path {}: {}", entry.path().display(), e))
                })?;
                let mut name = PathBuf::from(&base);
                if !relative.as_os_str().is_empty() {
                    name.push(relative);
                }

                let file_type = entry.file_type();
                if file_type.is_dir() {
                    match entry.metadata() {
                        Ok(meta) => append_dir(&mut builder, &name, &meta, &mut stats)?,
                        Err(e) if is_not_found(&e) => stats.skipped += 1,
                        Err(e) => {
                            return Err(SnapvaultError::Archive(format!(
                                "Failed to stat {}: {}",
                                entry.path().display(),
                                e
                            )))
                        }
                    }
                } else if file_type.is_file() {
                    append_file(&mut builder, entry.path(), &name, &mut stats)?;
                } else {
                    warn!(path = %entry.path().display(), "skipping symlink or special file");
                    stats.skipped += 1;
                }
            }
        }
    }

    let encoder = builder.into_inner()?;
    let writer = encoder.finish()?;
    debug!(
        files = stats.files,
        directories = stats.directories,
        bytes = stats.bytes,
        skipped = stats.skipped,
        "archive written"
    );
    Ok((writer, stats))
}

fn append_dir<W: Write>(
    builder: &mut Builder<W>,
    name: &Path,
    meta: &Metadata,
    stats: &mut ArchiveStats,
) -> SnapvaultResult<()> {
    let mut header = Header::new_gnu();
    header.set_metadata_in_mode(meta, HeaderMode::Deterministic);
    header.set_entry_type(EntryType::Directory);
    header.set_size(0);
    header.set_mtime(mtime(meta));
    builder.append_data(&mut header, name, io::empty())?;
    stats.directories += 1;
    Ok(())
}

fn append_file<W: Write>(
    builder: &mut Builder<W>,
    path: &Path,
    name: &Path,
    stats: &mut ArchiveStats,
) -> SnapvaultResult<()> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "file vanished before it could be read");
            stats.skipped += 1;
            return Ok(());
        }
        Err(e) => return Err(SnapvaultError::Archive(format!("Failed to open {}: {}", path.display(), e))),
    };
    let meta = file.metadata()?;
    let len = meta.len();

    let mut header = Header::new_gnu();
    header.set_metadata_in_mode(&meta, HeaderMode::Deterministic);
    header.set_size(len);
    header.set_mtime(mtime(&meta));

    // The declared size is fixed now; pad with zeros if the file shrinks
    let body = (&mut file).take(len).chain(io::repeat(0)).take(len);
    builder.append_data(&mut header, name, body)?;

    stats.files += 1;
    stats.bytes += len;
    Ok(())
}

/// Name the archive root after the captured file or directory
fn base_name(path: &Path) -> SnapvaultResult<OsString> {
    if let Some(name) = path.file_name() {
        return Ok(name.to_os_string());
    }
    fs::canonicalize(path)
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_os_string()))
        .ok_or_else(|| SnapvaultError::Archive(format!("Cannot name archive root {}", path.display())))
}

fn mtime(meta: &Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn is_not_found(err: &walkdir::Error) -> bool {
    err.io_error()
        .map(|e| e.kind() == io::ErrorKind::NotFound)
        .unwrap_or(false)
}
