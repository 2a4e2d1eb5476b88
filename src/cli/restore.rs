//! Restore, verify and inspect CLI commands

use clap::Args;
use std::path::{Path, PathBuf};

use super::backup::{format_size, to_json};
use super::passphrase::PassphraseArgs;
use crate::backup::{inspect_artifact, list_artifacts, RestoreOrchestrator};
use crate::config::{CommandSpec, RunConfig, Settings, SnapvaultPaths};
use crate::error::{SnapvaultError, SnapvaultResult};
use crate::kind::StoreKind;

/// Arguments for `snapvault restore`
#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Artifact path, file name in the retention directory, or `latest`
    pub artifact: String,

    /// Directory to restore into
    #[arg(short, long, env = "SNAPVAULT_DEST")]
    pub dest: PathBuf,

    /// Store kind, for artifacts that no longer carry their original name
    #[arg(short, long, value_enum)]
    pub kind: Option<StoreKind>,

    /// Skip the built-in SQLite integrity check
    #[arg(long)]
    pub no_integrity_check: bool,

    /// Program run after the restore with the restored paths as arguments
    #[arg(long, value_name = "PROGRAM")]
    pub verify_program: Option<String>,

    /// Argument for the verification program (repeatable)
    #[arg(long = "verify-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub verify_args: Vec<String>,

    /// Print the restore report as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub passphrase: PassphraseArgs,
}

/// Arguments for `snapvault verify`
#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Artifact path, file name in the retention directory, or `latest`
    pub artifact: String,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub passphrase: PassphraseArgs,
}

/// Arguments for `snapvault inspect`
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Artifact path, file name in the retention directory, or `latest`
    pub artifact: String,

    /// Print the header as JSON
    #[arg(long)]
    pub json: bool,
}

/// Handle `snapvault restore`
pub fn handle_restore_command(paths: &SnapvaultPaths, settings: &Settings, args: RestoreArgs) -> SnapvaultResult<()> {
    let artifact = resolve_artifact(&settings.retention_dir(paths), &args.artifact)?;
    let passphrase = args.passphrase.resolve(false)?;

    let mut config = RunConfig::from_settings(settings, paths, None, passphrase).with_destination(&args.dest);
    if let Some(program) = args.verify_program {
        config.tool_overrides.restore_verify = Some(CommandSpec::new(program, args.verify_args));
    }

    let mut orchestrator = RestoreOrchestrator::new(config.clone());
    if args.no_integrity_check {
        orchestrator = orchestrator.without_hooks();
        if let Some(command) = config.tool_overrides.restore_verify {
            orchestrator = orchestrator.with_hook(Box::new(crate::backup::CommandHook::new(command)));
        }
    }

    let report = orchestrator.restore(&artifact, args.kind)?;

    if args.json {
        println!("{}", to_json(&report)?);
    } else {
        println!("{}", report.summary());
        for path in &report.restored {
            println!("  {}", path.display());
        }
        if !report.verified_by.is_empty() {
            println!("Verified by: {}", report.verified_by.join(", "));
        }
    }
    Ok(())
}

/// Handle `snapvault verify`
pub fn handle_verify_command(paths: &SnapvaultPaths, settings: &Settings, args: VerifyArgs) -> SnapvaultResult<()> {
    let artifact = resolve_artifact(&settings.retention_dir(paths), &args.artifact)?;
    let passphrase = args.passphrase.resolve(false)?;
    let config = RunConfig::from_settings(settings, paths, None, passphrase);

    let report = RestoreOrchestrator::new(config).verify(&artifact)?;

    if args.json {
        println!("{}", to_json(&report)?);
    } else {
        println!("OK: {}", report.artifact.display());
        println!("Plaintext:  {}", format_size(report.plaintext_bytes));
        println!("Ciphertext: {}", format_size(report.ciphertext_bytes));
        println!("SHA-256:    {}", report.checksum);
    }
    Ok(())
}

/// Handle `snapvault inspect`
pub fn handle_inspect_command(paths: &SnapvaultPaths, settings: &Settings, args: InspectArgs) -> SnapvaultResult<()> {
    let artifact = resolve_artifact(&settings.retention_dir(paths), &args.artifact)?;
    let info = inspect_artifact(&artifact)?;

    if args.json {
        println!("{}", to_json(&info)?);
        return Ok(());
    }

    println!("Artifact: {}", info.path.display());
    if let Some(name) = &info.name {
        println!("Kind:     {}", name.kind);
        println!("Created:  {}", name.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!("Size:     {}", format_size(info.size_bytes));
    println!("Format:   v{} {}", info.header.version, info.header.cipher);
    println!(
        "KDF:      {} (memory {} KiB, time {}, parallelism {})",
        info.header.kdf.algorithm,
        info.header.kdf.costs.memory_cost,
        info.header.kdf.costs.time_cost,
        info.header.kdf.costs.parallelism
    );
    println!("Chunk:    {}", format_size(u64::from(info.header.chunk_size)));
    Ok(())
}

/// Resolve an artifact identifier to a full path
fn resolve_artifact(retention_dir: &Path, artifact: &str) -> SnapvaultResult<PathBuf> {
    if artifact.eq_ignore_ascii_case("latest") {
        return list_artifacts(retention_dir)?
            .into_iter()
            .next()
            .map(|a| a.path)
            .ok_or_else(|| {
                SnapvaultError::Config(format!("No artifacts in {}", retention_dir.display()))
            });
    }

    let path = PathBuf::from(artifact);
    if path.exists() {
        return Ok(path);
    }

    let in_retention = retention_dir.join(artifact);
    if in_retention.exists() {
        return Ok(in_retention);
    }

    Err(SnapvaultError::Config(format!("Artifact not found: {}", artifact)))
}
