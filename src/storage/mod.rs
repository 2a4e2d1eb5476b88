//! Storage helpers for snapvault
//!
//! Atomic JSON persistence for settings and owner-only file handling for
//! plaintext captures.

pub mod file_io;

pub use file_io::{
    create_private_dir_in, create_private_file, read_json, shred_file, write_json_atomic,
};
