//! Stock watcher CLI
//!
//! Long-running scheduler plus one-shot and diagnostic commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use clap::{Parser, Subcommand};
use stockwatch::{
    context::{AppContext, FeedRuntime},
    error::{AppError, Result},
    models::Config,
    pipeline::{CycleReport, FeedWorker, Scheduler, run_cycle},
    storage::FingerprintStore,
};
use tokio_util::sync::CancellationToken;

/// stockwatch - Shop stock and weather change publisher
#[derive(Parser, Debug)]
#[command(
    name = "stockwatch",
    version,
    about = "Publishes shop stock and weather updates when they change"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler for every feed until interrupted
    Run,

    /// Run a single cycle now
    Once {
        /// Only this feed (default: all feeds)
        #[arg(long)]
        feed: Option<String>,
    },

    /// Fetch and compare without publishing or saving
    Check {
        /// Only this feed (default: all feeds)
        #[arg(long)]
        feed: Option<String>,
    },

    /// Show stored fingerprints and the next scheduled boundary
    Status,

    /// Validate the configuration file
    Validate,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn load_config(path: &Path) -> Result<Config> {
    let mut config = Config::load(path)?;
    config.apply_env_overrides();
    config.validate()?;
    log::info!(
        "Loaded configuration from {} ({} feeds)",
        path.display(),
        config.feeds.len()
    );
    Ok(config)
}

/// All feeds, or just the named one.
fn select_feeds(ctx: &AppContext, only: Option<&str>) -> Result<Vec<FeedRuntime>> {
    match only {
        Some(name) => {
            let feed = ctx
                .config
                .feed(name)
                .ok_or_else(|| AppError::config(format!("Unknown feed '{name}'")))?;
            Ok(vec![ctx.feed_runtime(feed)?])
        }
        None => ctx.feed_runtimes(),
    }
}

async fn run_once(ctx: &AppContext, feeds: &[FeedRuntime], dry_run: bool) -> usize {
    let mut failures = 0;
    for feed in feeds {
        let report = run_cycle(ctx, feed, dry_run).await;
        if report.is_failure() {
            failures += 1;
            log::error!("[{}] {report}", feed.name);
        } else {
            log::info!("[{}] {report}", feed.name);
        }
        if let CycleReport::Checked {
            changed: true,
            countdown,
            ..
        } = report
        {
            log::info!("[{}] Would publish (next countdown: {countdown:?})", feed.name);
        }
    }
    failures
}

async fn run_schedulers(ctx: Arc<AppContext>) -> Result<()> {
    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    for feed in ctx.feed_runtimes()? {
        let name = feed.name.clone();
        let plan = feed.plan.clone();
        let worker = Arc::new(FeedWorker::new(Arc::clone(&ctx), feed));
        let (_, task) = Scheduler::new(name, plan, worker)
            .with_parent_token(&shutdown)
            .spawn();
        tasks.push(task);
    }

    tokio::signal::ctrl_c().await?;
    log::info!("Shutdown requested, waiting for cycles in flight...");
    shutdown.cancel();

    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            log::error!("Scheduler task failed: {e}");
        }
    }
    Ok(())
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    log::info!("stockwatch {} starting...", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Validate => {
            log::info!("Validating configuration...");
            if let Err(e) = load_config(&cli.config) {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK");
        }

        Command::Run => {
            let ctx = Arc::new(AppContext::from_config(load_config(&cli.config)?)?);
            run_schedulers(ctx).await?;
        }

        Command::Once { feed } => {
            let ctx = AppContext::from_config(load_config(&cli.config)?)?;
            let feeds = select_feeds(&ctx, feed.as_deref())?;
            let failures = run_once(&ctx, &feeds, false).await;
            if failures > 0 {
                return Err(AppError::validation(format!("{failures} feed(s) failed")));
            }
        }

        Command::Check { feed } => {
            let ctx = AppContext::from_config(load_config(&cli.config)?)?;
            let feeds = select_feeds(&ctx, feed.as_deref())?;
            run_once(&ctx, &feeds, true).await;
        }

        Command::Status => {
            let ctx = AppContext::from_config(load_config(&cli.config)?)?;
            let now = Utc::now();
            log::info!("State directory: {}", ctx.config.storage.state_dir.display());
            for feed in ctx.feed_runtimes()? {
                let stored = ctx.store.load(&feed.name).await?;
                let delay = TimeDelta::from_std(feed.plan.initial_delay(now))
                    .map_err(|e| AppError::validation(e.to_string()))?;
                let next = now + delay;
                log::info!(
                    "[{}] fingerprint: {} | next boundary: {} | source: {}",
                    feed.name,
                    stored.as_ref().map_or("none", |fp| fp.short()),
                    next.with_timezone(&feed.plan.tz).format("%Y-%m-%d %H:%M:%S %Z"),
                    feed.source.describe()
                );
            }
        }
    }

    log::info!("Done!");

    Ok(())
}
