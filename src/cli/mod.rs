//! CLI command handlers
//!
//! This module contains the implementation of CLI commands,
//! bridging the clap argument parsing with the orchestrators.

pub mod backup;
pub mod passphrase;
pub mod restore;

pub use backup::{handle_backup_command, handle_list_command, BackupArgs, ListArgs};
pub use passphrase::{PassphraseArgs, DEFAULT_PASSPHRASE_ENV};
pub use restore::{
    handle_inspect_command, handle_restore_command, handle_verify_command, InspectArgs, RestoreArgs,
    VerifyArgs,
};
