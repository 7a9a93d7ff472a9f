//! Menagerie main entry point
//!
//! This is the command-line interface for the Menagerie listing crawler.

use clap::Parser;
use menagerie::config::{load_config_with_hash, starvation_warning, validate, Config};
use menagerie::output::{generate_markdown_summary, print_report};
use menagerie::storage::export_snapshot;
use menagerie::Coordinator;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Menagerie: a concurrent listing crawler
///
/// Menagerie reads the animal names listing, groups animals by collateral
/// adjective, follows every animal's page and stores its infobox image
/// locally as `<name>.jpg`.
#[derive(Parser, Debug)]
#[command(name = "menagerie")]
#[command(version)]
#[command(about = "A concurrent listing crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file (built-in defaults when omitted)
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Directory receiving the downloaded images
    #[arg(long, value_name = "DIR")]
    asset_dir: Option<PathBuf>,

    /// Write a markdown summary of the run to this file
    #[arg(long, value_name = "PATH")]
    summary: Option<PathBuf>,

    /// Export the collected data to this SQLite file
    #[arg(long, value_name = "PATH")]
    export_db: Option<PathBuf>,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let (mut config, config_hash) = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            match load_config_with_hash(path) {
                Ok((cfg, hash)) => {
                    tracing::info!("Configuration loaded successfully (hash: {})", hash);
                    (cfg, hash)
                }
                Err(e) => {
                    tracing::error!("Failed to load configuration: {}", e);
                    return Err(e.into());
                }
            }
        }
        None => {
            tracing::info!("No configuration file given, using defaults");
            (Config::default(), String::new())
        }
    };

    // Command-line overrides
    if let Some(dir) = cli.asset_dir {
        config.output.asset_dir = Some(dir);
    }
    if let Some(path) = cli.summary {
        config.output.summary_path = Some(path);
    }
    if let Some(path) = cli.export_db {
        config.output.database_path = Some(path);
    }
    validate(&config)?;

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }

    handle_crawl(config, config_hash, cli.quiet).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("menagerie=info,warn"),
            1 => EnvFilter::new("menagerie=debug,info"),
            2 => EnvFilter::new("menagerie=trace,debug"),
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

/// Handles the --dry-run mode: shows the effective configuration
fn handle_dry_run(config: &Config) {
    println!("=== Menagerie Dry Run ===\n");

    println!("Source:");
    println!("  Listing: {}", config.source.listing_url);
    println!("  Detail base: {}", config.source.detail_base_url);
    println!("  Table selector: {}", config.source.table_selector);
    println!("  Tag column: {}", config.source.tag_column);
    println!("  Empty tag glyph: {}", config.source.empty_tag_glyph);
    println!("  Infobox selector: {}", config.source.infobox_selector);

    println!("\nFetching:");
    println!("  Timeout: {}s", config.fetch.timeout_secs);
    println!("  Max connections per gateway: {}", config.fetch.max_connections);
    println!("  Discovery batch size: {}", config.fetch.discovery_batch_size);

    println!("\nPipeline:");
    println!("  Detail workers: {}", config.pipeline.detail_workers);
    println!("  Persistence workers: {}", config.pipeline.persistence_workers);
    match config.pipeline.capacity() {
        Some(capacity) => println!("  Queue capacity: {}", capacity),
        None => println!("  Queue capacity: unbounded"),
    }
    println!(
        "  Max concurrent writes: {}",
        config.pipeline.max_concurrent_writes
    );

    println!("\nBackoff:");
    println!("  Queue wait: {}ms", config.backoff.wait_timeout_ms);
    println!(
        "  Delay: {}ms x{} (+ up to {}ms jitter), {} attempts",
        config.backoff.initial_delay_ms,
        config.backoff.multiplier,
        config.backoff.max_jitter_ms,
        config.backoff.max_attempts
    );
    if let Some(warning) = starvation_warning(config) {
        println!("  Warning: {}", warning);
    }

    println!("\nUser Agent:");
    println!("  {}", config.user_agent.header_value());

    println!("\nOutput:");
    println!(
        "  Images: {}",
        config.output.resolved_asset_dir().display()
    );
    if let Some(path) = &config.output.summary_path {
        println!("  Summary: {}", path.display());
    }
    if let Some(path) = &config.output.database_path {
        println!("  Database: {}", path.display());
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the main crawl operation
async fn handle_crawl(
    config: Config,
    config_hash: String,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let summary_path = config.output.summary_path.clone();
    let database_path = config.output.database_path.clone();

    let report = match Coordinator::new(config)
        .with_config_hash(config_hash)
        .run()
        .await
    {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Crawl could not start: {}", e);
            return Err(e.into());
        }
    };

    if !quiet {
        print_report(&report);
    }

    if let Some(path) = summary_path {
        generate_markdown_summary(&report, &path)?;
        tracing::info!("Summary written to {}", path.display());
    }

    if let Some(path) = database_path {
        let export = export_snapshot(&path, &report.run_record(), &report.snapshot)?;
        tracing::info!(
            run_id = export.run_id,
            tags = export.tags,
            images = export.asset_refs,
            "Snapshot exported to {}",
            path.display()
        );
    }

    Ok(())
}
