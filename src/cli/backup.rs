//! Backup CLI commands
//!
//! Implements `snapvault backup <kind>` and `snapvault list`.

use clap::Args;
use std::path::PathBuf;

use super::passphrase::PassphraseArgs;
use crate::backup::{list_artifacts, BackupOrchestrator};
use crate::config::{CommandSpec, RunConfig, Settings, SnapvaultPaths};
use crate::error::SnapvaultResult;
use crate::kind::StoreKind;

/// Arguments for `snapvault backup`
#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Store to back up
    #[arg(value_enum)]
    pub kind: StoreKind,

    /// Database file, blob root, or graph export working directory
    #[arg(short, long, env = "SNAPVAULT_SOURCE")]
    pub source: Option<PathBuf>,

    /// Directory receiving the artifact
    #[arg(short, long, env = "SNAPVAULT_RETENTION_DIR")]
    pub retention_dir: Option<PathBuf>,

    /// Root for private scratch directories
    #[arg(long, env = "SNAPVAULT_SCRATCH_DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Graph export program (overrides the settings file)
    #[arg(long, value_name = "PROGRAM")]
    pub graph_export_program: Option<String>,

    /// Argument for the graph export program (repeatable)
    #[arg(long = "graph-export-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub graph_export_args: Vec<String>,

    /// Print the artifact description as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub passphrase: PassphraseArgs,
}

/// Arguments for `snapvault list`
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Directory to list (defaults to the configured retention directory)
    #[arg(short, long, env = "SNAPVAULT_RETENTION_DIR")]
    pub retention_dir: Option<PathBuf>,

    /// Only list artifacts of this kind
    #[arg(short, long, value_enum)]
    pub kind: Option<StoreKind>,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

/// Handle `snapvault backup`
pub fn handle_backup_command(paths: &SnapvaultPaths, settings: &Settings, args: BackupArgs) -> SnapvaultResult<()> {
    let passphrase = args.passphrase.resolve(true)?;
    let mut config = RunConfig::from_settings(settings, paths, Some(args.kind), passphrase);

    if let Some(source) = args.source {
        config = config.with_source(source);
    }
    if let Some(dir) = args.retention_dir {
        config.retention_directory = dir;
    }
    if let Some(dir) = args.scratch_dir {
        config = config.with_scratch_root(dir);
    }
    if let Some(program) = args.graph_export_program {
        config.tool_overrides.graph_export = Some(CommandSpec::new(program, args.graph_export_args));
    }

    let mut orchestrator = BackupOrchestrator::new(config);
    let artifact = orchestrator.backup(args.kind)?;

    if args.json {
        println!("{}", to_json(&artifact)?);
    } else {
        println!("Backup created: {}", artifact.path.display());
        println!("Kind:     {}", artifact.kind);
        println!("Size:     {}", format_size(artifact.size_bytes));
        println!("SHA-256:  {}", artifact.checksum);
    }
    Ok(())
}

/// Handle `snapvault list`
pub fn handle_list_command(paths: &SnapvaultPaths, settings: &Settings, args: ListArgs) -> SnapvaultResult<()> {
    let dir = args.retention_dir.unwrap_or_else(|| settings.retention_dir(paths));
    let artifacts: Vec<_> = list_artifacts(&dir)?
        .into_iter()
        .filter(|a| args.kind.map_or(true, |kind| a.kind == kind))
        .collect();

    if args.json {
        println!("{}", to_json(&artifacts)?);
        return Ok(());
    }

    if artifacts.is_empty() {
        println!("No artifacts found in {}", dir.display());
        return Ok(());
    }

    println!("Artifacts in {}", dir.display());
    println!();
    for artifact in &artifacts {
        let age = chrono::Utc::now().signed_duration_since(artifact.created_at);
        println!(
            "  {} ({} ago, {})",
            artifact.file_name,
            format_duration(age),
            format_size(artifact.size_bytes)
        );
    }
    println!();
    println!("Total: {} artifact(s)", artifacts.len());
    Ok(())
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> SnapvaultResult<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| crate::error::SnapvaultError::Archive(format!("Failed to serialize output: {}", e)))
}

/// Format a duration in human-readable form
fn format_duration(duration: chrono::Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);

    if total_seconds < 60 {
        return format!("{}s", total_seconds);
    }

    let minutes = total_seconds / 60;
    if minutes < 60 {
        return format!("{}m", minutes);
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h", hours);
    }

    format!("{}d", hours / 24)
}

/// Format a file size in human-readable form
pub(crate) fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
