use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};

use logpond::core::config::FileSettings;
use logpond::core::{Config, Settings};
use logpond::store::{BatchedPublisher, Repository};
use logpond::Ingestor;

/// Time watchers get to finish their current read after Ctrl-C.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "logpond", about = "Tail log files, extract fields and store events")]
struct Cli {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Store directory, or ":memory:" to keep events in memory only.
    #[arg(long)]
    dbfile: Option<String>,

    /// Event delimiter regex for FILES given on the command line.
    #[arg(long)]
    delimiter: Option<String>,

    /// Field extraction regex; repeat to add more. Replaces the configured rules.
    #[arg(long = "fieldextractor")]
    field_extractors: Vec<String>,

    /// Layout of the `_time` field, e.g. "2006/01/02 15:04:05".
    #[arg(long)]
    timelayout: Option<String>,

    /// Poll interval in milliseconds for FILES given on the command line.
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Write debug logs to <tmp>/logpond-debug.log (tail -f to inspect).
    #[arg(long)]
    debug: bool,

    /// Files to watch, in addition to the configured ones.
    files: Vec<String>,
}

impl Cli {
    fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(path) = &self.dbfile {
            settings.store.path = path.clone();
        }
        if !self.field_extractors.is_empty() {
            settings.extraction.rules = self.field_extractors.clone();
        }
        if let Some(layout) = &self.timelayout {
            settings.extraction.time_layout = layout.clone();
        }
        for filename in &self.files {
            let mut file = FileSettings::new(filename.clone());
            if let Some(delimiter) = &self.delimiter {
                file.delimiter = delimiter.clone();
            }
            if let Some(ms) = self.poll_interval_ms {
                file.poll_interval_ms = ms;
            }
            settings.files.push(file);
        }
    }
}

fn init_tracing(debug: bool) -> anyhow::Result<()> {
    if debug {
        let path = std::env::temp_dir().join("logpond-debug.log");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        tracing_subscriber::fmt()
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_env("RUST_LOG")
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .init();
        info!(path = %path.display(), "logpond debug log started");
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_env("RUST_LOG")
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug)?;

    let mut settings = Settings::load(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply_overrides(&mut settings);
    let config = settings.compile().context("invalid configuration")?;

    if config.files.is_empty() {
        bail!("no files to watch: pass FILES or configure [[files]]");
    }
    run(config).await
}

async fn run(config: Config) -> anyhow::Result<()> {
    let repository = Repository::open(&config.store)
        .await
        .context("failed to open event store")?;
    let (publisher, flusher) = BatchedPublisher::spawn(config.publisher.clone(), repository);
    let mut ingestor = Ingestor::new(config.extractor.clone(), publisher);

    let mut started = Ok(());
    for file in &config.files {
        if let Err(err) = ingestor.watch_file(file.clone()).await {
            started = Err(err);
            break;
        }
    }

    if started.is_ok() {
        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    if let Err(err) = signal {
                        warn!(error = %err, "failed to listen for Ctrl-C");
                    }
                    info!("shutting down");
                    break;
                }
                exit = ingestor.next_exit() => {
                    if exit.is_none() {
                        warn!("every file watcher has stopped");
                        break;
                    }
                }
            }
        }
    }

    ingestor.stop(STOP_TIMEOUT).await;
    let stats = flusher.shutdown().await;
    started?;

    if stats.lost > 0 {
        bail!("{} events could not be stored", stats.lost);
    }
    Ok(())
}
