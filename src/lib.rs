//! snapvault - Encrypted point-in-time backups for heterogeneous data stores
//!
//! This library captures consistent snapshots of a SQLite database, a
//! content-addressed media tree and a graph-model export, packs them into
//! archives, encrypts them with a passphrase-derived key and places them in
//! an append-only retention directory. The matching restore path decrypts,
//! authenticates and unpacks an artifact into a destination root.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Paths, persisted settings and the per-run configuration
//! - `error`: Error type and exit-code categories
//! - `kind`: The store kinds and their naming
//! - `capture`: Snapshot exporters, one per store kind
//! - `archive`: Deterministic tar.gz packing and confined unpacking
//! - `crypto`: Argon2id key derivation and the streaming AES-256-GCM envelope
//! - `backup`: Backup and restore orchestration
//! - `storage`: File helpers (atomic JSON, private files, shredding)
//! - `cli`: Command handlers for the `snapvault` binary
//!
//! # Example
//!
//! ```rust,ignore
//! use snapvault::backup::BackupOrchestrator;
//! use snapvault::config::{RunConfig, Settings, SnapvaultPaths};
//! use snapvault::kind::StoreKind;
//!
//! let paths = SnapvaultPaths::new()?;
//! let settings = Settings::load_or_create(&paths)?;
//! let config = RunConfig::from_settings(&settings, &paths, Some(StoreKind::Relational), passphrase);
//! let artifact = BackupOrchestrator::new(config).backup(StoreKind::Relational)?;
//! ```

pub mod archive;
pub mod backup;
pub mod capture;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod kind;
pub mod storage;

pub use error::{SnapvaultError, SnapvaultResult};
pub use kind::StoreKind;
