use clap::{Parser, Subcommand};
use snapvault::backup::encrypt::RedactedString;
use snapvault::backup::engine::{BackupEngine, BackupOutcome};
use snapvault::backup::result_error::result::Result;
use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;
use tracing::{error, info};

/// Personal file backup with encrypted, compressed archives
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of the state document
    #[arg(short, long, default_value = "backup_config.json")]
    config: PathBuf,

    /// Encryption passphrase; prefer the environment variable over the flag
    #[arg(long, env = "SNAPVAULT_PASSPHRASE", hide_env_values = true)]
    passphrase: RedactedString,

    /// Base name of artifact files
    #[arg(long, default_value = "snapvault")]
    label: String,

    /// Glob pattern excluded from enumeration, relative to each source
    /// directory; may be given multiple times
    #[arg(long = "exclude")]
    excludes: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up every file under every source directory
    Full,
    /// Back up only files changed since the last backup
    Incremental,
    /// List artifacts in the backup directory
    List,
    /// Decrypt an artifact and unpack it
    Restore {
        /// Artifact to restore from
        archive: PathBuf,
        /// Directory to unpack into
        #[arg(long, default_value = "restored")]
        into: PathBuf,
    },
    /// Run incremental backups on a fixed interval
    Schedule {
        #[arg(long, default_value_t = 24)]
        interval_hours: u64,
    },
}

fn report_outcome(outcome: BackupOutcome) {
    match outcome {
        BackupOutcome::Completed(report) => info!(
            "{} backup created: {:?} ({} files)",
            report.kind, report.archive_path, report.files_count
        ),
        BackupOutcome::NoChanges => info!("No changes since last backup, nothing to do"),
    }
}

fn run(args: Args) -> Result<()> {
    let mut engine = BackupEngine::new(
        &args.config,
        args.label,
        &args.excludes,
        args.passphrase,
    )?;

    match args.command {
        Command::Full => {
            let report = engine.full_backup()?;
            info!(
                "Full backup created: {:?} ({} files)",
                report.archive_path, report.files_count
            );
        }
        Command::Incremental => report_outcome(engine.incremental_backup()?),
        Command::List => {
            let artifacts = engine.list_backups()?;
            if artifacts.is_empty() {
                println!("No backups found");
            }
            for artifact in artifacts {
                println!(
                    "  {} - {:.1} KB",
                    artifact.name,
                    artifact.size_bytes as f64 / 1024.0
                );
            }
        }
        Command::Restore { archive, into } => {
            let count = engine.restore(&archive, &into)?;
            info!("Restored {} entries into {:?}", count, into);
        }
        Command::Schedule { interval_hours } => {
            info!("Running an incremental backup every {} hours", interval_hours);
            loop {
                // One attempt per tick; a failed run is reported and
                // retried only at the next tick.
                match engine.incremental_backup() {
                    Ok(outcome) => report_outcome(outcome),
                    Err(e) => error!("Scheduled backup failed: {e}"),
                }
                std::thread::sleep(Duration::from_secs(interval_hours * 3600));
            }
        }
    }

    Ok(())
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    if let Err(e) = run(args) {
        error!("{e}");
        exit(1);
    }
}
