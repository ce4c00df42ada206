//! `registry-mirror` command line

use clap::{Args, Parser, Subcommand};
use registry_mirror::{Catalog, Config, Error, LogIngestor, Mirror, run_with_shutdown};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "registry-mirror", version, about = "Mirror registry artifacts from catalog arrival logs")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Option<Command>,
}

/// Settings that take precedence over the configuration file
#[derive(Debug, Args)]
struct Overrides {
    /// Remote artifact URL prefix
    #[arg(long, global = true)]
    url_prefix: Option<String>,

    /// Local artifact store
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// Directory scanned for arrival logs
    #[arg(long, global = true)]
    pending_dir: Option<PathBuf>,

    /// Directory consumed logs are moved to
    #[arg(long, global = true)]
    archive_dir: Option<PathBuf>,

    /// Directory holding the per-worker error logs
    #[arg(long, global = true)]
    error_log_dir: Option<PathBuf>,

    /// Number of concurrent download workers
    #[arg(short, long, global = true)]
    workers: Option<usize>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the ingest/download loop until interrupted (default)
    Run,
    /// Ingest pending logs, download once, and exit
    Once,
    /// Ingest pending logs and print catalog statistics
    Ingest {
        /// Leave the logs in the pending directory
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        tracing::error!(error = %err, "registry-mirror failed");
        eprintln!("{err}");
        process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::warn!("Tracing subscriber already set; skipping re-initialization.");
    }
}

fn load_config(cli: &Cli) -> Result<Config, Error> {
    let mut config = match &cli.config {
        Some(path) => Config::from_toml_file(path)?,
        None => Config::default(),
    };

    let o = &cli.overrides;
    if let Some(prefix) = &o.url_prefix {
        config.remote.url_prefix = prefix.clone();
    }
    if let Some(dir) = &o.store_dir {
        config.paths.store_dir = dir.clone();
    }
    if let Some(dir) = &o.pending_dir {
        config.paths.pending_dir = dir.clone();
    }
    if let Some(dir) = &o.archive_dir {
        config.paths.archive_dir = dir.clone();
    }
    if let Some(dir) = &o.error_log_dir {
        config.paths.error_log_dir = dir.clone();
    }
    if let Some(workers) = o.workers {
        config.download.workers = workers;
    }

    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<(), Error> {
    let config = load_config(&cli)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let mirror = Arc::new(Mirror::new(config)?);
            run_with_shutdown(mirror).await?;
        }
        Command::Once => {
            let mirror = Mirror::new(config)?;
            let (report, summary) = mirror.run_once().await?;
            println!(
                "logs archived: {}, records merged: {}",
                report.files_archived, report.records_merged
            );
            println!(
                "downloaded: {}, already present: {}, absent upstream: {}, failed: {}",
                summary.downloaded, summary.skipped, summary.absent, summary.failed
            );
        }
        Command::Ingest { dry_run } => {
            let ingestor = LogIngestor::from_config(&config);
            let mut catalog = Catalog::new();
            let report = if dry_run {
                ingestor.ingest_without_archiving(&mut catalog).await?
            } else {
                ingestor.ingest(&mut catalog).await?
            };
            println!(
                "files: {} archived, {} left pending, {} rejected",
                report.files_archived, report.files_retained, report.files_rejected
            );
            println!(
                "records merged: {}, lines skipped: {}",
                report.records_merged, report.lines_skipped
            );
            println!(
                "catalog: {} packages, {} versions",
                catalog.package_count(),
                catalog.version_count()
            );
        }
        Command::Config => {
            let text = toml::to_string_pretty(&config)
                .map_err(|e| Error::Other(format!("failed to render configuration: {}", e)))?;
            print!("{text}");
        }
    }

    Ok(())
}
