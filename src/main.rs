use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use snapvault::cli::{
    handle_backup_command, handle_inspect_command, handle_list_command, handle_restore_command,
    handle_verify_command, BackupArgs, InspectArgs, ListArgs, RestoreArgs, VerifyArgs,
};
use snapvault::config::{Settings, SnapvaultPaths};
use snapvault::SnapvaultError;

#[derive(Parser)]
#[command(
    name = "snapvault",
    version,
    about = "Encrypted point-in-time backups for SQLite, media trees and graph exports",
    long_about = "snapvault captures consistent snapshots of a relational database, a \
                  content-addressed media tree and a graph-model export, encrypts them \
                  with a passphrase-derived key and restores them bit-for-bit."
)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, env = "SNAPVAULT_LOG", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true, env = "SNAPVAULT_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture, encrypt and store a snapshot of one store
    Backup(BackupArgs),

    /// Decrypt an artifact and restore it into a destination directory
    Restore(RestoreArgs),

    /// Authenticate a whole artifact without restoring it
    Verify(VerifyArgs),

    /// Show an artifact's header (no passphrase needed)
    Inspect(InspectArgs),

    /// List artifacts in the retention directory
    #[command(alias = "ls")]
    List(ListArgs),

    /// Create the snapvault directories and a default settings file
    Init,

    /// Show current configuration and paths
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn init_tracing(level: &str, json: bool) {
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into());

    // Logs go to stderr so stdout stays clean for --json output
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Map the first snapvault error in the chain to its category's exit code
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<SnapvaultError>())
        .map(|e| e.category().exit_code())
        .unwrap_or(1)
}

fn run(cli: Cli) -> Result<()> {
    let paths = SnapvaultPaths::new()?;
    let settings = Settings::load_or_create(&paths)
        .with_context(|| format!("Failed to load {}", paths.settings_file().display()))?;

    match cli.command {
        Some(Commands::Backup(args)) => {
            let kind = args.kind;
            handle_backup_command(&paths, &settings, args)
                .with_context(|| format!("{} backup failed", kind))?;
        }
        Some(Commands::Restore(args)) => {
            handle_restore_command(&paths, &settings, args).context("Restore failed")?;
        }
        Some(Commands::Verify(args)) => {
            handle_verify_command(&paths, &settings, args).context("Verification failed")?;
        }
        Some(Commands::Inspect(args)) => {
            handle_inspect_command(&paths, &settings, args)?;
        }
        Some(Commands::List(args)) => {
            handle_list_command(&paths, &settings, args)?;
        }
        Some(Commands::Init) => {
            println!("Initializing snapvault at: {}", paths.base_dir().display());
            paths.ensure_directories()?;
            if !paths.is_initialized() {
                settings.save(&paths)?;
            }
            println!("Settings file:       {}", paths.settings_file().display());
            println!("Retention directory: {}", settings.retention_dir(&paths).display());
            println!("Scratch directory:   {}", settings.scratch_dir(&paths).display());
            println!();
            println!("Edit the settings file to set source paths and the graph export command.");
        }
        Some(Commands::Config) => {
            println!("snapvault Configuration");
            println!("=======================");
            println!("Base directory:      {}", paths.base_dir().display());
            println!("Settings file:       {}", paths.settings_file().display());
            println!("Retention directory: {}", settings.retention_dir(&paths).display());
            println!("Scratch directory:   {}", settings.scratch_dir(&paths).display());
            println!();
            println!("Sources:");
            for kind in snapvault::StoreKind::ALL {
                let source = settings
                    .sources
                    .for_kind(kind)
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string());
                println!("  {:<10} {}", kind.slug(), source);
            }
            println!();
            println!("Tools:");
            println!(
                "  graph export:   {}",
                settings
                    .tools
                    .graph_export
                    .as_ref()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!(
                "  restore verify: {}",
                settings
                    .tools
                    .restore_verify
                    .as_ref()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!(
                "KDF: argon2id memory {} KiB, time {}, parallelism {}",
                settings.kdf.memory_cost, settings.kdf.time_cost, settings.kdf.parallelism
            );
            println!("Chunk size: {} bytes", settings.chunk_size);
        }
        None => {
            println!("snapvault - encrypted multi-store backup and restore");
            println!();
            println!("Run 'snapvault --help' for usage information.");
        }
    }

    Ok(())
}
