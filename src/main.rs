//! Catalog-Watch main entry point
//!
//! This is the command-line interface for the Catalog-Watch crawl-and-reconcile engine.

use anyhow::Context;
use catalog_watch::config::{load_config_with_hash, Config};
use catalog_watch::crawler::run_crawl;
use catalog_watch::output::{
    load_statistics, print_changelog, print_session_summary, print_statistics,
};
use catalog_watch::storage::{RecordStore, SqliteStorage};
use catalog_watch::CrawlError;
use clap::Parser;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Catalog-Watch: track a product catalogue over time
///
/// Catalog-Watch walks a paginated catalogue, fetches every item page with
/// bounded concurrency, and records which items are new, changed or gone
/// since the previous crawl.
#[derive(Parser, Debug)]
#[command(name = "catalog-watch")]
#[command(version)]
#[command(about = "Crawl a product catalogue and keep a changelog", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Re-fetch every item, including ones already in the store
    #[arg(long)]
    full: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.full {
        config.crawler.skip_existing = false;
    }

    if cli.dry_run {
        handle_dry_run(&config);
        Ok(())
    } else if cli.stats {
        handle_stats(&config)
    } else {
        handle_crawl(config).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("catalog_watch=info,warn"),
            1 => EnvFilter::new("catalog_watch=debug,info"),
            2 => EnvFilter::new("catalog_watch=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config) {
    let crawler = &config.crawler;

    println!("=== Catalog-Watch Dry Run ===\n");

    println!("Target:");
    println!("  Index: {}", config.target.base_url);
    println!("  Page pattern: {}", config.target.page_pattern);

    println!("\nCrawler Configuration:");
    println!("  Max concurrent requests: {}", crawler.max_concurrent_requests);
    println!("  Batch size: {}", crawler.batch_size);
    println!("  Max attempts per item: {}", crawler.max_retries);
    println!(
        "  Retry backoff: {}ms doubling, capped at {}ms",
        crawler.retry_base_delay_ms, crawler.retry_max_delay_ms
    );
    println!("  Store attempts: {}", crawler.store_retries);
    println!("  Request timeout: {}ms", crawler.request_timeout_ms);
    println!("  Skip existing: {}", crawler.skip_existing);

    println!("\nUser Agent: {}", config.user_agent.header_value());

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = SqliteStorage::new(Path::new(&config.output.database_path))
        .context("Failed to open database")?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config) -> anyhow::Result<()> {
    let database_path = config.output.database_path.clone();
    let cancel = CancellationToken::new();

    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight items");
            signal_token.cancel();
        }
    });

    match run_crawl(config, cancel).await {
        Ok(summary) => {
            print_session_summary(&summary);
            print_run_changelog(&database_path, summary.run_id);
            Ok(())
        }
        Err(CrawlError::AllItemsFailed(summary)) => {
            print_session_summary(&summary);
            Err(anyhow::anyhow!(
                "Crawl failed: all {} attempted items failed",
                summary.attempted
            ))
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}

fn print_run_changelog(database_path: &str, run_id: i64) {
    let entries = SqliteStorage::new(Path::new(database_path))
        .and_then(|storage| storage.changelog_for_run(run_id));

    match entries {
        Ok(entries) => print_changelog(&entries),
        Err(e) => tracing::warn!("Could not read changelog of run {}: {}", run_id, e),
    }
}
