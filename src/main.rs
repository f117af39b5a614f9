//! Social-Trawl main entry point
//!
//! This is the command-line interface for the Social-Trawl graph crawler.

use anyhow::Context;
use clap::Parser;
use social_trawl::config::{load_config_with_hash, Config};
use social_trawl::crawler::{run_crawl, CrawlOptions};
use social_trawl::output::{export_timelines, load_statistics, print_statistics};
use social_trawl::storage::SqliteStorage;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Social-Trawl: a resumable social graph crawler
///
/// Social-Trawl collects profiles, timelines and follower/friend lists starting
/// from a set of seed accounts. Progress is stored per account and task, so an
/// interrupted crawl resumes where it stopped.
#[derive(Parser, Debug)]
#[command(name = "social-trawl")]
#[command(version = "1.0.0")]
#[command(about = "A resumable social graph crawler", long_about = None)]
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

    /// Delete the database and start over
    #[arg(long, conflicts_with_all = ["stats", "export"])]
    fresh: bool,

    /// Mark tasks complete when their data is already stored, then crawl
    #[arg(long)]
    reconcile: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with_all = ["stats", "export"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "export"])]
    stats: bool,

    /// Write completed timelines as TSV files and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    export: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config)?;
    } else if cli.stats {
        handle_stats(&config)?;
    } else if cli.export {
        handle_export(&config)?;
    } else {
        let options = CrawlOptions {
            reconcile: cli.reconcile,
        };
        handle_crawl(config, config_hash, cli.fresh, options).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("social_trawl=info,warn"),
            1 => EnvFilter::new("social_trawl=debug,info"),
            2 => EnvFilter::new("social_trawl=trace,debug"),
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
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== Social-Trawl Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Workers: {}", config.crawler.workers);
    println!("  Profile batch size: {}", config.crawler.profile_batch_size);
    println!(
        "  Progress every {} units",
        config.crawler.progress_interval
    );
    println!(
        "  Task retries: {} attempts per run, backoff from {}ms",
        config.crawler.max_task_attempts, config.crawler.retry_backoff_ms
    );

    println!("\nAPI:");
    println!("  Base URL: {}", config.api.base_url);
    println!(
        "  Bearer token: {}",
        if config.api.bearer_token.is_some() {
            "configured"
        } else {
            "none"
        }
    );
    println!("  Timeout: {}s", config.api.timeout_secs);
    println!(
        "  Retries: {} ({}ms apart)",
        config.api.max_retries, config.api.retry_delay_ms
    );
    println!(
        "  Wait on rate limit: {} (up to {}s)",
        config.api.wait_on_rate_limit, config.api.max_rate_limit_wait_secs
    );

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Export directory: {}", config.output.export_dir);

    println!("\nSeeds:");
    println!("  Inline ids: {}", config.seeds.ids.len());
    for id in &config.seeds.ids {
        println!("    * {}", id);
    }

    let mut source_records = 0;
    if let Some(path) = &config.seeds.source_file {
        let records = social_trawl::seeds::load_source_records(path)
            .with_context(|| format!("Failed to read seed source file {}", path.display()))?;
        source_records = records.len();
        println!("  Source file: {} ({} records)", path.display(), source_records);
    }

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would start crawling from {} seed accounts",
        config.seeds.ids.len() + source_records
    );

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = open_database(config)?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --export mode: writes completed timelines as TSV
fn handle_export(config: &Config) -> anyhow::Result<()> {
    println!("=== Exporting Timelines ===\n");
    println!("Database: {}", config.output.database_path);
    println!("Output: {}", config.output.export_dir);
    println!();

    let storage = open_database(config)?;
    let export_dir = Path::new(&config.output.export_dir);
    let summary = export_timelines(&storage, export_dir)
        .with_context(|| format!("Failed to export to {}", export_dir.display()))?;

    println!(
        "✓ Wrote {} files ({} already present, {} timelines incomplete)",
        summary.written, summary.existing, summary.incomplete
    );

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(
    config: Config,
    config_hash: String,
    fresh: bool,
    options: CrawlOptions,
) -> anyhow::Result<()> {
    if fresh {
        tracing::info!("Starting fresh crawl (removing previous database)");
        remove_database(Path::new(&config.output.database_path))?;
    } else {
        tracing::info!("Starting crawl (resuming any unfinished work)");
    }

    tracing::info!(
        "Seeds: {} inline ids{}",
        config.seeds.ids.len(),
        config
            .seeds
            .source_file
            .as_ref()
            .map(|p| format!(", source file {}", p.display()))
            .unwrap_or_default()
    );

    match run_crawl(config, config_hash, options).await {
        Ok(report) => {
            tracing::info!("Crawl completed successfully: {}", report);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}

fn open_database(config: &Config) -> anyhow::Result<SqliteStorage> {
    let path = Path::new(&config.output.database_path);
    SqliteStorage::new(path).with_context(|| format!("Failed to open database {}", path.display()))
}

/// Removes the database file along with its WAL side files
fn remove_database(path: &Path) -> anyhow::Result<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut file = path.as_os_str().to_owned();
        file.push(suffix);
        let file = PathBuf::from(file);

        if file.exists() {
            std::fs::remove_file(&file)
                .with_context(|| format!("Failed to remove {}", file.display()))?;
        }
    }
    Ok(())
}
