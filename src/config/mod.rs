//! Configuration module for snapvault
//!
//! This module provides configuration management including:
//! - Base directory resolution
//! - Persisted, non-secret settings
//! - External tool descriptions
//! - The explicit per-run configuration passed to the orchestrators

pub mod paths;
pub mod run;
pub mod settings;
pub mod tools;

pub use paths::SnapvaultPaths;
pub use run::RunConfig;
pub use settings::{Settings, SourcePaths};
pub use tools::{CommandSpec, ToolOverrides};
