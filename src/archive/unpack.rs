//! Confined archive extraction

use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use tracing::debug;

use super::ArchiveFormat;
use crate::capture::GRAPH_EXPORT_FILE;
use crate::error::{SnapvaultError, SnapvaultResult};
use crate::storage::create_private_file;

/// What an extraction produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnpackStats {
    pub files: u64,
    pub directories: u64,
    pub bytes: u64,
}

/// Extract an archive stream below `staging`
///
/// Every entry must resolve to a path inside `staging`; anything else, and
/// any entry that is not a plain file or directory, aborts the extraction.
pub fn unpack_archive<R: Read>(
    mut reader: R,
    format: ArchiveFormat,
    staging: &Path,
) -> SnapvaultResult<UnpackStats> {
    match format {
        ArchiveFormat::Raw => {
            let target = staging.join(GRAPH_EXPORT_FILE);
            let mut file = create_private_file(&target).map_err(|e| {
                SnapvaultError::Archive(format!("Failed to create {}: {}", target.display(), e))
            })?;
            let bytes = io::copy(&mut reader, &mut file)?;
            file.sync_all()?;
            Ok(UnpackStats {
                files: 1,
                directories: 0,
                bytes,
            })
        }
        ArchiveFormat::TarGz => unpack_tar_gz(reader, staging),
    }
}

fn unpack_tar_gz<R: Read>(reader: R, staging: &Path) -> SnapvaultResult<UnpackStats> {
    let mut archive = Archive::new(GzDecoder::new(reader));
    archive.set_preserve_mtime(true);

    let mut stats = UnpackStats::default();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let raw_path = entry.path()?.into_owned();
        let relative = confine(&raw_path)?;
        let target = staging.join(&relative);
        let entry_type = entry.header().entry_type();

        if entry_type.is_dir() {
            fs::create_dir_all(&target)?;
            stats.directories += 1;
        } else if entry_type.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            entry.unpack(&target)?;
            stats.files += 1;
            stats.bytes += entry.size();
        } else {
            return Err(SnapvaultError::PathTraversalRejected(format!(
                "{:?} entry {} is not allowed",
                entry_type,
                raw_path.display()
            )));
        }
    }

    debug!(
        files = stats.files,
        directories = stats.directories,
        bytes = stats.bytes,
        "archive unpacked"
    );
    Ok(stats)
}

/// Reduce an entry path to plain components, rejecting anything that could
/// leave the extraction root
pub(crate) fn confine(path: &Path) -> SnapvaultResult<PathBuf> {
    let mut confined = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => confined.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(SnapvaultError::PathTraversalRejected(path.display().to_string()))
            }
        }
    }
    if confined.as_os_str().is_empty() {
        return Err(SnapvaultError::PathTraversalRejected(format!(
            "empty entry path '{}'",
            path.display()
        )));
    }
    Ok(confined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::write_archive;
    use crate::capture::{CaptureHandle, CaptureLayout};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tar::{Builder, EntryType, Header};

    /// Build a tar.gz whose single entry has exactly this name
    fn crafted(name: &[u8], entry_type: EntryType) -> Vec<u8> {
        let body = b"root:x:0:0";
        let mut header = Header::new_gnu();
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_entry_type(entry_type);
        header.set_mode(0o644);
        header.set_size(if entry_type.is_file() { body.len() as u64 } else { 0 });
        header.set_cksum();

        let mut builder = Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        if entry_type.is_file() {
            builder.append(&header, &body[..]).unwrap();
        } else {
            builder.append(&header, io::empty()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_tree_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let media = temp.path().join("media");
        fs::create_dir_all(media.join("a/b")).unwrap();
        fs::create_dir_all(media.join("empty")).unwrap();
        fs::write(media.join("a/b/blob"), vec![42u8; 100_000]).unwrap();
        fs::write(media.join("top.txt"), b"top").unwrap();

        let capture = CaptureHandle::live(media.clone(), CaptureLayout::Tree);
        let (bytes, _) = write_archive(&capture, ArchiveFormat::TarGz, Vec::new()).unwrap();

        let staging = temp.path().join("staging");
        fs::create_dir(&staging).unwrap();
        let stats = unpack_archive(&bytes[..], ArchiveFormat::TarGz, &staging).unwrap();

        assert_eq!(stats.files, 2);
        assert_eq!(stats.directories, 4);
        assert_eq!(stats.bytes, 100_003);
        assert_eq!(fs::read(staging.join("media/a/b/blob")).unwrap(), vec![42u8; 100_000]);
        assert_eq!(fs::read(staging.join("media/top.txt")).unwrap(), b"top");
        assert!(staging.join("media/empty").is_dir());
    }

    #[test]
    fn test_mtime_preserved() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("app.sqlite3");
        fs::write(&file, b"rows").unwrap();
        let original = fs::metadata(&file).unwrap().modified().unwrap();

        let capture = CaptureHandle::live(file, CaptureLayout::File);
        let (bytes, _) = write_archive(&capture, ArchiveFormat::TarGz, Vec::new()).unwrap();
        let staging = tempfile::tempdir().unwrap();
        unpack_archive(&bytes[..], ArchiveFormat::TarGz, staging.path()).unwrap();

        let restored = fs::metadata(staging.path().join("app.sqlite3")).unwrap().modified().unwrap();
        let secs = |t: std::time::SystemTime| t.duration_since(std::time::UNIX_EPOCH).unwrap().as_secs();
        assert_eq!(secs(original), secs(restored));
    }

    #[test]
    fn test_raw_writes_export_file() {
        let staging = tempfile::tempdir().unwrap();
        let stats = unpack_archive(&b"{\"nodes\":[]}"[..], ArchiveFormat::Raw, staging.path()).unwrap();
        assert_eq!(stats.bytes, 12);
        assert_eq!(
            fs::read(staging.path().join(GRAPH_EXPORT_FILE)).unwrap(),
            b"{\"nodes\":[]}"
        );
    }

    #[test]
    fn test_parent_dir_entry_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let staging = temp.path().join("a/b/staging");
        fs::create_dir_all(&staging).unwrap();

        let bytes = crafted(b"../../etc/passwd", EntryType::Regular);
        let err = unpack_archive(&bytes[..], ArchiveFormat::TarGz, &staging).unwrap_err();
        assert!(matches!(err, SnapvaultError::PathTraversalRejected(_)));
        assert!(!temp.path().join("a/etc/passwd").exists());
        assert_eq!(fs::read_dir(&staging).unwrap().count(), 0);
    }

    #[test]
    fn test_absolute_entry_rejected() {
        let staging = tempfile::tempdir().unwrap();
        let bytes = crafted(b"/tmp/snapvault-absolute-entry", EntryType::Regular);
        let err = unpack_archive(&bytes[..], ArchiveFormat::TarGz, staging.path()).unwrap_err();
        assert!(matches!(err, SnapvaultError::PathTraversalRejected(_)));
    }

    #[test]
    fn test_link_entry_rejected() {
        let staging = tempfile::tempdir().unwrap();
        let bytes = crafted(b"media/link", EntryType::Symlink);
        let err = unpack_archive(&bytes[..], ArchiveFormat::TarGz, staging.path()).unwrap_err();
        assert!(matches!(err, SnapvaultError::PathTraversalRejected(_)));
        assert!(!staging.path().join("media/link").exists());
    }

    #[test]
    fn test_confine() {
        assert_eq!(confine(Path::new("./media/a")).unwrap(), PathBuf::from("media/a"));
        assert!(confine(Path::new("media/../../x")).is_err());
        assert!(confine(Path::new("/etc")).is_err());
        assert!(confine(Path::new(".")).is_err());
    }
}
