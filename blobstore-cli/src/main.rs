/*!
Blobstore backup and restore CLI.

Backs up the live object versions of the configured S3 buckets into an
artifact file, restores buckets from such an artifact, and inspects artifacts
without touching any bucket.
*/

use anyhow::{anyhow, Context};
use blobstore_core::{
    init_observability, Artifact, BackupArtifact, Backuper, BlobstoreMetrics, Bucket,
    BucketsConfig, FileArtifact, RestoreSummary, Restorer,
};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tabled::{Table, Tabled};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "blobstore-backup-restore")]
#[command(about = "Point-in-time backup and restore of versioned S3 buckets")]
#[command(version)]
struct Cli {
    /// Path to the JSON bucket configuration file
    #[arg(short, long, global = true, env = "BLOBSTORE_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the artifact file
    #[arg(long, global = true, env = "BLOBSTORE_ARTIFACT_FILE")]
    artifact_file: Option<PathBuf>,

    /// Directory holding the artifact (as blobstore.json)
    #[arg(long, global = true, env = "BBR_ARTIFACT_DIRECTORY")]
    artifact_directory: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Write Prometheus metrics to this file when the run ends
    #[arg(long, global = true)]
    metrics_output: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Record the live version of every object in the configured buckets
    Backup {
        /// List buckets concurrently
        #[arg(long)]
        parallel: bool,
    },
    /// Reconcile the configured buckets to the state in the artifact
    Restore,
    /// Show the contents of an artifact
    Inspect,
}

#[derive(Tabled, Debug, PartialEq, Eq)]
struct BucketRow {
    #[tabled(rename = "Identifier")]
    identifier: String,
    #[tabled(rename = "Bucket")]
    bucket: String,
    #[tabled(rename = "Region")]
    region: String,
    #[tabled(rename = "Objects")]
    objects: usize,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    if let Err(e) = init_observability(level, cli.json_logs) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    let result = run(&cli);

    if let Some(path) = &cli.metrics_output {
        if let Err(e) = write_metrics(path) {
            error!(path = %path.display(), error = %e, "Failed to write metrics");
        }
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(&e, &mut std::io::stderr());
            ExitCode::FAILURE
        }
    }
}

/// Print an error with its full cause chain
///
/// Core errors display their collaborator's text, which is also their
/// source, so a cause repeating the previous message is printed once.
fn report_error<W: Write>(err: &anyhow::Error, out: &mut W) {
    let mut message = String::new();
    let mut previous = String::new();
    for cause in err.chain() {
        let text = cause.to_string();
        if text == previous {
            continue;
        }
        if !message.is_empty() {
            message.push_str(": ");
        }
        message.push_str(&text);
        previous = text;
    }
    let _ = writeln!(out, "{message}");
}

fn run(cli: &Cli) -> Result<(), anyhow::Error> {
    let artifact = artifact_location(cli)?;

    match cli.command {
        Commands::Backup { parallel } => {
            let config = load_config(cli)?;
            let backup = run_backup(make_buckets(&config)?, &artifact, parallel)?;
            println!("{}", Table::new(bucket_rows(&backup)));
        }
        Commands::Restore => {
            let config = load_config(cli)?;
            let summary = run_restore(make_buckets(&config)?, &artifact)?;
            println!(
                "Restored {} bucket(s): {} object(s) copied, {} object(s) deleted",
                summary.buckets_restored, summary.objects_copied, summary.objects_deleted
            );
        }
        Commands::Inspect => {
            let backup = artifact.load()?;
            if backup.is_empty() {
                println!("Artifact {} contains no buckets", artifact.path().display());
            } else {
                println!("{}", Table::new(bucket_rows(&backup)));
            }
        }
    }

    Ok(())
}

/// Resolve the artifact path; an explicit file wins over a directory
fn artifact_location(cli: &Cli) -> Result<FileArtifact, anyhow::Error> {
    match (&cli.artifact_file, &cli.artifact_directory) {
        (Some(file), _) => Ok(FileArtifact::new(file)),
        (None, Some(dir)) => Ok(FileArtifact::in_directory(dir)),
        (None, None) => Err(anyhow!(
            "missing --artifact-file or --artifact-directory flag"
        )),
    }
}

fn load_config(cli: &Cli) -> Result<BucketsConfig, anyhow::Error> {
    let path = cli
        .config
        .as_ref()
        .ok_or_else(|| anyhow!("missing --config flag"))?;
    let config = BucketsConfig::from_file(path)?;
    info!(path = %path.display(), buckets = config.len(), "Loaded bucket configuration");
    Ok(config)
}

#[cfg(feature = "s3")]
fn make_buckets(config: &BucketsConfig) -> Result<BTreeMap<String, blobstore_core::S3Bucket>, anyhow::Error> {
    config
        .iter()
        .map(|(identifier, bucket)| {
            let s3 = blobstore_core::S3Bucket::from_config(bucket)
                .with_context(|| format!("Failed to set up bucket '{identifier}'"))?;
            Ok((identifier.clone(), s3))
        })
        .collect()
}

#[cfg(not(feature = "s3"))]
fn make_buckets(_config: &BucketsConfig) -> Result<BTreeMap<String, blobstore_core::MemoryBucket>, anyhow::Error> {
    Err(anyhow!("S3 support not enabled"))
}

fn run_backup<B, A>(
    buckets: BTreeMap<String, B>,
    artifact: A,
    parallel: bool,
) -> Result<BackupArtifact, anyhow::Error>
where
    B: Bucket + Sync,
    A: Artifact,
{
    let backuper = Backuper::new(buckets, artifact);
    let backup = if parallel {
        backuper.backup_parallel()?
    } else {
        backuper.backup()?
    };
    Ok(backup)
}

fn run_restore<B, A>(buckets: BTreeMap<String, B>, artifact: A) -> Result<RestoreSummary, anyhow::Error>
where
    B: Bucket,
    A: Artifact,
{
    Ok(Restorer::new(buckets, artifact).restore()?)
}

fn bucket_rows(backup: &BackupArtifact) -> Vec<BucketRow> {
    backup
        .iter()
        .map(|(identifier, bucket)| BucketRow {
            identifier: identifier.clone(),
            bucket: bucket.bucket_name.clone(),
            region: bucket.region_name.clone(),
            objects: bucket.len(),
        })
        .collect()
}

fn write_metrics(path: &Path) -> Result<(), anyhow::Error> {
    let text = BlobstoreMetrics::global().gather_metrics()?;
    std::fs::write(path, text)?;
    Ok(())
}
