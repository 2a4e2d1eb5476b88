//! Artifact naming, placement and inspection

use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tempfile::{NamedTempFile, PersistError};
use tracing::{debug, warn};

use crate::crypto::EnvelopeHeader;
use crate::error::{SnapvaultError, SnapvaultResult};
use crate::kind::StoreKind;

/// Suffix of every artifact file
pub const ARTIFACT_SUFFIX: &str = ".enc";

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Same-second runs beyond this many are refused rather than looping forever
const MAX_SEQUENCE: u32 = 10_000;

/// An encrypted snapshot placed in the retention directory
///
/// Created once at the end of a successful backup run and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotArtifact {
    /// Store the snapshot was taken from
    pub kind: StoreKind,
    /// When archiving started (UTC, second precision in the file name)
    pub created_at: DateTime<Utc>,
    /// Final location of the artifact
    pub path: PathBuf,
    /// Ciphertext size in bytes
    pub size_bytes: u64,
    /// SHA-256 of the ciphertext file, lowercase hex
    pub checksum: String,
}

/// Build `{kind}-{YYYYMMDDHHMMSS}[-{n}].{ext}.enc`
///
/// Sequence 0 is the plain name; later sequences resolve collisions.
pub fn artifact_file_name(kind: StoreKind, created_at: DateTime<Utc>, sequence: u32) -> String {
    let timestamp = created_at.format(TIMESTAMP_FORMAT);
    if sequence == 0 {
        format!("{}-{}.{}{}", kind.slug(), timestamp, kind.extension(), ARTIFACT_SUFFIX)
    } else {
        format!(
            "{}-{}-{}.{}{}",
            kind.slug(),
            timestamp,
            sequence,
            kind.extension(),
            ARTIFACT_SUFFIX
        )
    }
}

/// Parts recovered from an artifact file name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArtifactName {
    pub kind: StoreKind,
    pub created_at: DateTime<Utc>,
    pub sequence: u32,
}

impl ArtifactName {
    /// Parse a file name produced by [`artifact_file_name`]
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(ARTIFACT_SUFFIX)?;
        StoreKind::ALL.into_iter().find_map(|kind| {
            let rest = stem.strip_prefix(kind.slug())?.strip_prefix('-')?;
            let rest = rest.strip_suffix(kind.extension())?.strip_suffix('.')?;
            let (timestamp, sequence) = match rest.split_once('-') {
                Some((ts, seq)) => (ts, seq.parse::<u32>().ok().filter(|n| *n > 0)?),
                None => (rest, 0),
            };
            if timestamp.len() != 14 {
                return None;
            }
            let naive = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
            Some(Self {
                kind,
                created_at: DateTime::from_naive_utc_and_offset(naive, Utc),
                sequence,
            })
        })
    }

    /// Parse the file name component of a path
    pub fn from_path(path: &Path) -> Option<Self> {
        path.file_name().and_then(|n| n.to_str()).and_then(Self::parse)
    }
}

/// Move a fully written temp file to its final artifact name without ever
/// replacing an existing artifact
pub fn persist_artifact(
    temp: NamedTempFile,
    retention_dir: &Path,
    kind: StoreKind,
    created_at: DateTime<Utc>,
) -> SnapvaultResult<PathBuf> {
    let mut temp = temp;
    for sequence in 0..MAX_SEQUENCE {
        let target = retention_dir.join(artifact_file_name(kind, created_at, sequence));
        match temp.persist_noclobber(&target) {
            Ok(_) => {
                sync_dir(retention_dir);
                return Ok(target);
            }
            Err(PersistError { error, file }) if error.kind() == io::ErrorKind::AlreadyExists => {
                debug!(target = %target.display(), "artifact name taken, trying next sequence");
                temp = file;
            }
            Err(PersistError { error, .. }) => {
                return Err(SnapvaultError::Archive(format!(
                    "Failed to place artifact at {}: {}",
                    target.display(),
                    error
                )))
            }
        }
    }
    Err(SnapvaultError::Archive(format!(
        "Too many artifacts for {} in one second",
        kind
    )))
}

/// Make the rename durable; failure here leaves a valid artifact behind
fn sync_dir(dir: &Path) {
    if !cfg!(unix) {
        return;
    }
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        warn!(dir = %dir.display(), error = %e, "failed to sync retention directory");
    }
}

/// `Write` adapter computing the SHA-256 and length of everything written
pub struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    bytes: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    /// Return the inner writer, the hex digest and the byte count
    pub fn into_parts(self) -> (W, String, u64) {
        (self.inner, hex::encode(self.hasher.finalize()), self.bytes)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// SHA-256 of a file, lowercase hex
pub fn checksum_file(path: &Path) -> SnapvaultResult<String> {
    let mut file = BufReader::new(File::open(path).map_err(|e| {
        SnapvaultError::Archive(format!("Failed to open {}: {}", path.display(), e))
    })?);
    let mut hashing = HashingWriter::new(io::sink());
    io::copy(&mut file, &mut hashing)?;
    let (_, checksum, _) = hashing.into_parts();
    Ok(checksum)
}

/// What can be learned about an artifact without the passphrase
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactInfo {
    pub path: PathBuf,
    /// Kind and timestamp, when the file still carries its original name
    pub name: Option<ArtifactName>,
    pub size_bytes: u64,
    pub header: EnvelopeHeader,
}

/// Read an artifact's header
pub fn inspect_artifact(path: &Path) -> SnapvaultResult<ArtifactInfo> {
    let file = File::open(path).map_err(|e| {
        SnapvaultError::Config(format!("Cannot open artifact {}: {}", path.display(), e))
    })?;
    let size_bytes = file.metadata()?.len();
    let (header, _) = EnvelopeHeader::read_from(&mut BufReader::new(file))?;
    Ok(ArtifactInfo {
        path: path.to_path_buf(),
        name: ArtifactName::from_path(path),
        size_bytes,
        header,
    })
}

/// An artifact found in the retention directory
#[derive(Debug, Clone, Serialize)]
pub struct RetainedArtifact {
    pub file_name: String,
    pub path: PathBuf,
    pub kind: StoreKind,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// List artifacts in the retention directory, newest first
///
/// Files that do not carry an artifact name (including in-progress
/// `.partial` temp files) are ignored.
pub fn list_artifacts(retention_dir: &Path) -> SnapvaultResult<Vec<RetainedArtifact>> {
    if !retention_dir.exists() {
        return Ok(Vec::new());
    }

    let mut artifacts = Vec::new();
    for entry in fs::read_dir(retention_dir).map_err(|e| {
        SnapvaultError::Archive(format!("Failed to read retention directory: {}", e))
    })? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = ArtifactName::from_path(&path) else {
            continue;
        };
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        artifacts.push((
            name.sequence,
            RetainedArtifact {
                file_name: entry.file_name().to_string_lossy().into_owned(),
                path,
                kind: name.kind,
                created_at: name.created_at,
                size_bytes: metadata.len(),
            },
        ));
    }

    artifacts.sort_by(|(seq_a, a), (seq_b, b)| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| seq_b.cmp(seq_a))
            .then_with(|| a.file_name.cmp(&b.file_name))
    });
    Ok(artifacts.into_iter().map(|(_, artifact)| artifact).collect())
}
