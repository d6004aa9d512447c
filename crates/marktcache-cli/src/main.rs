//! marktcache - drive the marketplace offline cache from the command line.
//!
//! Runs the caching engine against a live origin with partitions persisted on
//! disk, so the shell can be pre-cached, requests replayed through the
//! policies and the control commands exercised without a browser.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use marktcache_core::{
    CacheWorker, Config, ControlCommand, DiskStorage, HttpNetwork, PartitionKind, Request,
    RequestMode, ShellManifest,
};

/// How long `resync` waits for the completion broadcast.
const RESYNC_WAIT_SECS: u64 = 60;

#[derive(Parser)]
#[command(name = "marktcache", version, about = "Offline cache for the marketplace web client")]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Page origin, overriding the config file
    #[arg(long, global = true, env = "MARKTCACHE_ORIGIN")]
    origin: Option<String>,

    /// Deployed version, overriding the config file
    #[arg(long = "cache-version", global = true, env = "MARKTCACHE_VERSION")]
    cache_version: Option<String>,

    /// Partition directory (defaults to the user cache directory)
    #[arg(long, global = true, env = "MARKTCACHE_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pre-cache the app shell and activate this version
    Install {
        /// Build output directory; its bundles are added to the shell
        #[arg(long)]
        dist: Option<PathBuf>,
        /// Install only, leave activation for later
        #[arg(long)]
        no_activate: bool,
    },
    /// Request a path through the caching policies
    Fetch {
        /// Path relative to the origin, e.g. /api/items
        path: String,
        /// Treat as a top-level page load
        #[arg(long)]
        navigate: bool,
        /// Print headers as well as the body
        #[arg(long)]
        headers: bool,
    },
    /// Seed the API partition from a JSON array of items ("-" for stdin)
    Seed { file: PathBuf },
    /// Delete every partition
    Clear,
    /// Show entry counts and partition names
    Status,
    /// Refresh the listings entry and report the completion broadcast
    Resync,
    /// Send a raw JSON control message
    Message { json: String },
    /// List the entries of one partition (shell, api or runtime)
    Entries { partition: String },
    /// Print the shell file list derived from a build output directory
    Manifest { dist: PathBuf },
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_dir: Option<&PathBuf>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr = fmt::layer().with_writer(io::stderr);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "marktcache.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(stderr)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(stderr).with(filter).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_dir.as_ref());

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(origin) = cli.origin.clone() {
        config.origin = origin;
    }
    if let Some(version) = cli.cache_version.clone() {
        config.version = version;
    }

    // Needs no engine and no cache directory.
    if let Command::Manifest { dist } = &cli.command {
        return print_manifest(dist);
    }

    if let Command::Install { dist: Some(dist), .. } = &cli.command {
        config.shell_urls = ShellManifest::discover(dist)?.urls;
    }

    let cache_dir = match cli.cache_dir.clone() {
        Some(dir) => dir,
        None => config.cache_dir()?,
    };
    let storage = DiskStorage::new(cache_dir.clone())
        .with_context(|| format!("Failed to open cache directory {}", cache_dir.display()))?;
    let network = HttpNetwork::from_config(&config)?;
    let worker = Arc::new(CacheWorker::new(config, Arc::new(storage), Arc::new(network))?);
    info!(origin = %worker.origin(), version = worker.partitions().version(), "marktcache starting");

    let result = run(&worker, cli.command).await;

    // Let background refreshes finish before the runtime goes away.
    let pending = worker.tasks().in_flight();
    if pending > 0 {
        info!(pending, "Waiting for background refreshes");
    }
    worker.tasks().settle().await;
    result
}

async fn run(worker: &Arc<CacheWorker>, command: Command) -> Result<()> {
    match command {
        Command::Install { no_activate, .. } => {
            let installed = worker.install().await?;
            println!("Cached {} shell file(s)", installed.cached.len());
            for url in &installed.skipped {
                println!("  skipped {}", url);
            }
            if !no_activate {
                let activated = worker.activate().await?;
                for name in &activated.deleted {
                    println!("  deleted {}", name);
                }
                println!("Activated {}", worker.partitions().version());
            }
        }
        Command::Fetch {
            path,
            navigate,
            headers,
        } => {
            let url = worker.origin().join(&path)?;
            let mut request = Request::new(marktcache_core::Method::Get, url);
            if navigate {
                request = request.with_mode(RequestMode::Navigate);
            }
            let response = match worker.handle_fetch(&request).await {
                Some(result) => result?,
                None => anyhow::bail!("{} is not intercepted", request.url),
            };
            if headers {
                eprintln!("{}", response.status);
                for (name, value) in &response.headers {
                    eprintln!("{}: {}", name, value);
                }
                eprintln!();
            }
            println!("{}", response.text());
        }
        Command::Seed { file } => {
            let contents = if file.as_os_str() == "-" {
                let mut buf = String::new();
                io::stdin().read_to_string(&mut buf)?;
                buf
            } else {
                std::fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read {}", file.display()))?
            };
            let items: serde_json::Value =
                serde_json::from_str(&contents).context("Seed file is not valid JSON")?;
            let control = worker.spawn_control();
            control.post(ControlCommand::SeedItems { items }).await?;
            print_status(&control.status().await?)?;
        }
        Command::Clear => {
            let control = worker.spawn_control();
            control.post(ControlCommand::ClearCache).await?;
            print_status(&control.status().await?)?;
        }
        Command::Status => {
            let control = worker.spawn_control();
            print_status(&control.status().await?)?;
        }
        Command::Resync => {
            let (_page, mut rx) = worker.clients().open(worker.origin().as_str());
            let control = worker.spawn_control();
            control.post(ControlCommand::Resync).await?;
            let message = tokio::time::timeout(Duration::from_secs(RESYNC_WAIT_SECS), rx.recv())
                .await
                .context("Timed out waiting for resync")?
                .context("Engine stopped before resync completed")?;
            println!("{}", serde_json::to_string_pretty(&message)?);
        }
        Command::Message { json } => {
            let value: serde_json::Value =
                serde_json::from_str(&json).context("Message is not valid JSON")?;
            let command = ControlCommand::from_value(&value);
            let control = worker.spawn_control();
            if command == ControlCommand::GetStatus {
                print_status(&control.status().await?)?;
            } else {
                control.post(command).await?;
                // Status goes through the same queue, so this waits for the command.
                control.status().await?;
            }
        }
        Command::Entries { partition } => {
            let kind = PartitionKind::parse(&partition)
                .with_context(|| format!("Unknown partition '{}' (shell, api, runtime)", partition))?;
            let partition = worker.open_partition(kind).await?;
            for key in partition.keys().await? {
                match partition.lookup(&key).await? {
                    Some(stored) => println!(
                        "{:>3}  {:>9}  {:>8}  {}",
                        stored.response.status,
                        stored.response.body.len(),
                        stored.age_display(),
                        key
                    ),
                    None => println!("  -  {:>9}  {:>8}  {}", "-", "-", key),
                }
            }
        }
        Command::Manifest { dist } => print_manifest(&dist)?,
    }
    Ok(())
}

fn print_manifest(dist: &Path) -> Result<()> {
    let manifest = ShellManifest::discover(dist)?;
    println!("{}", serde_json::to_string_pretty(&manifest.urls)?);
    Ok(())
}

fn print_status(status: &marktcache_core::StatusReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(status)?);
    Ok(())
}
