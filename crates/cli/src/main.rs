//! Backfill CLI: historical bar backfill and instrument master import.
//!
//! Commands:
//! - `run` - backfill bars for a symbol list or a named watchlist
//! - `import-instruments` - load the broker's instrument master into the store

mod report;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use backfill_core::{
    load_config, load_config_from_env, validate_config, BackfillRequest, Backfiller, ChannelReporter,
    CompositeReporter, Config, DataSource, Granularity, KiteConfig, KiteDataSource,
    ProgressReporter, SanitizedConfig, SqliteStore, Store, TracingReporter,
};

/// Config file used when neither `--config` nor `BACKFILL_CONFIG` is given.
const DEFAULT_CONFIG_PATH: &str = "backfill.toml";

/// Exit code for a run that finished with failed or abandoned jobs.
const EXIT_JOBS_FAILED: i32 = 2;

#[derive(Parser)]
#[command(name = "backfill", version, about = "Historical market data backfill")]
struct Cli {
    /// Path to the TOML config file. Falls back to $BACKFILL_CONFIG, then ./backfill.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backfill historical bars for a set of symbols.
    Run(RunArgs),
    /// Download the instrument master and upsert it into the store.
    ImportInstruments {
        /// Exchanges to import (repeatable). Defaults to the configured venues.
        #[arg(long = "exchange")]
        exchanges: Vec<String>,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Comma-separated symbols (e.g. RELIANCE,TCS,INFY).
    #[arg(
        long,
        value_delimiter = ',',
        required_unless_present = "watchlist",
        conflicts_with = "watchlist"
    )]
    symbols: Vec<String>,

    /// Named watchlist from the config file.
    #[arg(long)]
    watchlist: Option<String>,

    /// Start date (YYYY-MM-DD).
    #[arg(long, value_parser = parse_date)]
    from: NaiveDate,

    /// End date (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = parse_date)]
    to: Option<NaiveDate>,

    /// Bar size: minute, 5minute, 15minute or day. Defaults to the configured granularity.
    #[arg(long, value_parser = parse_granularity)]
    timeframe: Option<Granularity>,

    /// Maximum jobs running at once. Defaults to backfill.max_concurrency.
    #[arg(long)]
    concurrent: Option<usize>,

    /// Resolve instruments only; no fetch, no writes.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Cancel the run after this many seconds.
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Print the final summary as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("invalid date '{}': {}", s, e))
}

fn parse_granularity(s: &str) -> Result<Granularity, String> {
    s.parse()
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Fatal error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let config = load(cli.config.as_deref())?;
    validate_config(&config).context("Configuration validation failed")?;

    let sanitized = serde_json::to_string(&SanitizedConfig::from(&config)).unwrap_or_default();
    info!(config = %sanitized, "Configuration loaded");

    match cli.command {
        Commands::Run(args) => run_backfill(&config, args).await,
        Commands::ImportInstruments { exchanges } => {
            import_instruments(&config, exchanges).await?;
            Ok(0)
        }
    }
}

/// Load the config file, or defaults plus environment when no file is present.
fn load(explicit: Option<&Path>) -> Result<Config> {
    let from_env = std::env::var("BACKFILL_CONFIG").ok().map(PathBuf::from);

    match explicit.map(Path::to_path_buf).or(from_env) {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            load_config(&path).with_context(|| format!("Failed to load config from {:?}", path))
        }
        None => {
            let path = PathBuf::from(DEFAULT_CONFIG_PATH);
            if path.exists() {
                info!("Loading configuration from {:?}", path);
                load_config(&path)
                    .with_context(|| format!("Failed to load config from {:?}", path))
            } else {
                info!("No config file found, using defaults and environment");
                load_config_from_env().context("Failed to load config from environment")
            }
        }
    }
}

fn kite_config(config: &Config, required: bool) -> Result<KiteConfig> {
    match &config.kite {
        Some(kite) => {
            if required && (kite.api_key.is_empty() || kite.access_token.is_empty()) {
                bail!("kite.api_key and kite.access_token must be set");
            }
            Ok(kite.clone())
        }
        None if required => bail!("No [kite] section configured"),
        None => Ok(KiteConfig::default()),
    }
}

async fn run_backfill(config: &Config, args: RunArgs) -> Result<i32> {
    let symbols = match &args.watchlist {
        Some(name) => config
            .watchlist(name)
            .with_context(|| format!("Unknown watchlist '{}'", name))?
            .to_vec(),
        None => args.symbols.clone(),
    };
    if symbols.is_empty() {
        bail!("No symbols to backfill");
    }

    let settings = &config.backfill;
    let to = args.to.unwrap_or_else(|| Local::now().date_naive());
    let granularity = args.timeframe.unwrap_or(settings.granularity);
    let max_concurrency = args.concurrent.unwrap_or(settings.max_concurrency);
    let dry_run = args.dry_run || settings.dry_run;
    let deadline = args
        .deadline_secs
        .map(Duration::from_secs)
        .or_else(|| settings.deadline());

    let store = Arc::new(
        SqliteStore::new(&config.database.path)
            .with_context(|| format!("Failed to open database {:?}", config.database.path))?,
    );
    info!("Database path: {:?}", config.database.path);

    let source = KiteDataSource::new(kite_config(config, !dry_run)?)
        .context("Failed to create Kite client")?;

    let (channel, events) = ChannelReporter::channel(settings.progress_buffer);
    let reporter = CompositeReporter::new(vec![
        Box::new(TracingReporter) as Box<dyn ProgressReporter>,
        Box::new(channel),
    ]);

    let backfiller = Backfiller::new(
        Arc::new(source) as Arc<dyn DataSource>,
        store as Arc<dyn Store>,
        settings.venues.clone(),
    )
    .with_reporter(Arc::new(reporter));

    let request = BackfillRequest {
        symbols,
        from: args.from,
        to,
        granularity,
        max_concurrency,
        dry_run,
    };

    info!(
        symbols = request.symbols.len(),
        from = %args.from,
        to = %to,
        timeframe = %granularity,
        max_concurrency,
        dry_run,
        "Starting backfill run"
    );

    let printer = tokio::spawn(report::print_progress(events, request.symbols.len()));

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(cancel_on_signal(cancel.clone(), deadline));

    let outcome = backfiller.backfill_until(&request, cancel).await;
    watcher.abort();
    drop(backfiller);
    if let Err(e) = printer.await {
        warn!(error = %e, "Progress printer stopped unexpectedly");
    }

    let summary = outcome.context("Backfill rejected")?;
    report::print_summary(&summary, args.json)?;

    if let Some(path) = &config.metrics.textfile {
        report::write_metrics_textfile(path)
            .with_context(|| format!("Failed to write metrics to {:?}", path))?;
    }

    if summary.is_complete_success() {
        Ok(0)
    } else {
        Ok(EXIT_JOBS_FAILED)
    }
}

async fn import_instruments(config: &Config, exchanges: Vec<String>) -> Result<()> {
    let exchanges = if exchanges.is_empty() {
        config.backfill.venues.clone()
    } else {
        exchanges
    };

    let source =
        KiteDataSource::new(kite_config(config, true)?).context("Failed to create Kite client")?;
    let store = SqliteStore::new(&config.database.path)
        .with_context(|| format!("Failed to open database {:?}", config.database.path))?;

    for exchange in &exchanges {
        let instruments = source
            .fetch_instruments(exchange)
            .await
            .with_context(|| format!("Failed to download instruments for {}", exchange))?;
        let written = store
            .upsert_instruments(&instruments)
            .with_context(|| format!("Failed to store instruments for {}", exchange))?;
        info!(exchange = %exchange, instruments = written, "Instrument master imported");
        println!("{}: {} instruments", exchange, written);
    }

    Ok(())
}

/// Cancel `token` on Ctrl-C, SIGTERM, or when `deadline` elapses.
async fn cancel_on_signal(token: CancellationToken, deadline: Option<Duration>) {
    let timer = async {
        match deadline {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = shutdown_signal() => warn!("Interrupted, cancelling backfill"),
        _ = timer => warn!("Deadline reached, cancelling backfill"),
    }
    token.cancel();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
