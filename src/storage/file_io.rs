//! File I/O utilities with atomic writes and private files
//!
//! Provides safe file operations that won't corrupt data on failure, and
//! helpers for plaintext scratch files that must never be readable by other
//! users.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read};
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};
use tempfile::{NamedTempFile, TempDir};

use crate::error::SnapvaultError;

/// Read JSON from a file, returning a default value if file doesn't exist
pub fn read_json<T, P>(path: P) -> Result<T, SnapvaultError>
where
    T: DeserializeOwned + Default,
    P: AsRef<Path>,
{
    let path = path.as_ref();

    if !path.exists() {
        return Ok(T::default());
    }

    let file = File::open(path)
        .map_err(|e| SnapvaultError::Config(format!("Failed to open {}: {}", path.display(), e)))?;

    let reader = BufReader::new(file);
    serde_json::from_reader(reader)
        .map_err(|e| SnapvaultError::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Write JSON to a file atomically (write to temp, then rename)
///
/// The file is either completely written or not modified at all.
pub fn write_json_atomic<T, P>(path: P, data: &T) -> Result<(), SnapvaultError>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    fs::create_dir_all(parent).map_err(|e| {
        SnapvaultError::Config(format!(
            "Failed to create directory {}: {}",
            parent.display(),
            e
        ))
    })?;

    // Temp file in the same directory so the rename stays on one filesystem
    let temp = NamedTempFile::new_in(parent)
        .map_err(|e| SnapvaultError::Config(format!("Failed to create temp file: {}", e)))?;

    let mut writer = BufWriter::new(temp);
    serde_json::to_writer_pretty(&mut writer, data)
        .map_err(|e| SnapvaultError::Config(format!("Failed to serialize data: {}", e)))?;

    let temp = writer
        .into_inner()
        .map_err(|e| SnapvaultError::Config(format!("Failed to flush data: {}", e.error())))?;

    temp.as_file()
        .sync_all()
        .map_err(|e| SnapvaultError::Config(format!("Failed to sync data: {}", e)))?;

    temp.persist(path)
        .map_err(|e| SnapvaultError::Config(format!("Failed to rename temp file: {}", e.error)))?;

    Ok(())
}

/// Create a new file readable and writable by the owner only
///
/// The mode is applied at creation, so there is no window in which the file
/// exists with wider permissions. Fails if the file already exists.
pub fn create_private_file(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

/// Create a uniquely named directory under `parent`, accessible by the owner only
///
/// Like [`create_private_file`], the mode is set by the create call itself.
pub fn create_private_dir_in(parent: &Path, prefix: &str) -> io::Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(prefix);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(0o700));
    }
    builder.tempdir_in(parent)
}

/// Overwrite a file with zeros, sync, then remove it
pub fn shred_file(path: &Path) -> io::Result<()> {
    let len = fs::symlink_metadata(path)?.len();
    {
        let mut file = OpenOptions::new().write(true).open(path)?;
        io::copy(&mut io::repeat(0).take(len), &mut file)?;
        file.sync_all()?;
    }
    fs::remove_file(path)
}
