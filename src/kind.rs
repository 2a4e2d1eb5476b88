//! Store kinds handled by snapvault

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::archive::ArchiveFormat;
use crate::error::SnapvaultError;

/// Which of the three data stores a backup or restore run targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// SQLite database captured through the online backup API
    #[value(name = "relational", alias = "db")]
    Relational,
    /// Media/blob directory tree
    #[value(name = "blobtree", alias = "blob-tree", alias = "media")]
    #[serde(rename = "blobtree")]
    BlobTree,
    /// Graph model serialized by the application's export command
    #[value(name = "graph")]
    #[serde(rename = "graph")]
    GraphExport,
}

impl StoreKind {
    /// All store kinds, in a stable order
    pub const ALL: [StoreKind; 3] = [Self::Relational, Self::BlobTree, Self::GraphExport];

    /// Name used in artifact filenames
    pub fn slug(&self) -> &'static str {
        match self {
            Self::Relational => "relational",
            Self::BlobTree => "blobtree",
            Self::GraphExport => "graph",
        }
    }

    /// Extension of the plaintext payload, before `.enc`
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Relational | Self::BlobTree => "tar.gz",
            Self::GraphExport => "json",
        }
    }

    /// How captures of this kind are packed before encryption
    pub fn archive_format(&self) -> ArchiveFormat {
        match self {
            Self::Relational | Self::BlobTree => ArchiveFormat::TarGz,
            Self::GraphExport => ArchiveFormat::Raw,
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for StoreKind {
    type Err = SnapvaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.slug().eq_ignore_ascii_case(s))
            .ok_or_else(|| SnapvaultError::Config(format!("Unknown store kind: {}", s)))
    }
}
