//! rustarxiv - arXiv listing and detail crawler
//!
//! ## Usage
//!
//! ### CLI Mode
//! ```bash
//! rustarxiv crawl --category cs=30 --category math=50
//! rustarxiv crawl --classification computer_science --from 2024-01 --fields-file fields.json
//! ```
//!
//! ### HTTP Server Mode
//! ```bash
//! rustarxiv serve --port 3000
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rustarxiv::{
    api,
    config::{CategoryQuota, CrawlConfig},
    crawler::CrawlMode,
    pipeline,
    urls::{AdvancedSearch, DEFAULT_SEARCH_ORDER, DEFAULT_SEARCH_SIZE},
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// arXiv crawler with CSV persistence
#[derive(Parser)]
#[command(name = "rustarxiv")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// JSON settings file (see CrawlConfig); flags override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl once and merge the results into the CSV table
    Crawl {
        /// Quota file: {"arxiv_fields": {"cs": 100, ...}} or a bare map
        #[arg(long)]
        fields_file: Option<PathBuf>,

        /// Category quota entry, e.g. "cs=30" (repeatable)
        #[arg(long = "category", value_name = "CODE=COUNT")]
        categories: Vec<String>,

        /// Use the advanced search with this classification (e.g. computer_science)
        #[arg(long)]
        classification: Option<String>,

        /// Advanced search lower date bound (YYYY-MM or YYYY-MM-DD)
        #[arg(long = "from")]
        from_date: Option<String>,

        /// Advanced search upper date bound (YYYY-MM or YYYY-MM-DD)
        #[arg(long = "to")]
        to_date: Option<String>,

        /// Advanced search page size
        #[arg(long, default_value_t = DEFAULT_SEARCH_SIZE)]
        size: u32,

        /// Advanced search ordering
        #[arg(long, default_value = DEFAULT_SEARCH_ORDER)]
        order: String,

        /// CSV table to merge into
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Detail fetch pool size (1-4)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Retries for transient failures
        #[arg(long)]
        max_retries: Option<u32>,

        /// Site root (for mirrors)
        #[arg(long)]
        base_url: Option<String>,

        /// Stop issuing requests after this many seconds
        #[arg(long)]
        deadline_secs: Option<u64>,
    },

    /// Run as HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if cli.json_logs {
        fmt().json().with_env_filter(filter).with_target(true).init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .init();
    }

    let config = match &cli.config {
        Some(path) => CrawlConfig::from_file(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => CrawlConfig::default(),
    };

    match cli.command {
        Commands::Crawl {
            fields_file,
            categories,
            classification,
            from_date,
            to_date,
            size,
            order,
            output,
            concurrency,
            max_retries,
            base_url,
            deadline_secs,
        } => {
            let mut config = config;
            if let Some(output) = output {
                config.output_path = output;
            }
            if let Some(concurrency) = concurrency {
                config.concurrency = concurrency;
            }
            if let Some(max_retries) = max_retries {
                config.max_retries = max_retries;
            }
            if let Some(base_url) = base_url {
                config.base_url = base_url;
            }
            config.validate().context("Invalid configuration")?;

            let quota = build_quota(fields_file, &categories)?;
            let mode = match classification {
                Some(classification) => CrawlMode::AdvancedSearch {
                    query: AdvancedSearch {
                        classification,
                        from_date,
                        to_date,
                        size,
                        order,
                    },
                    fallback: quota,
                },
                None => CrawlMode::Categories(quota),
            };

            run_crawl(config, mode, deadline_secs).await
        }
        Commands::Serve { port, host } => run_server(config, host, port).await,
    }
}

// ============================================================================
// Crawl
// ============================================================================

/// Quota from file and/or `CODE=COUNT` flags; the built-in table when neither is given.
fn build_quota(fields_file: Option<PathBuf>, categories: &[String]) -> Result<CategoryQuota> {
    if fields_file.is_none() && categories.is_empty() {
        return Ok(CategoryQuota::default());
    }

    let mut fields: Vec<(String, i64)> = match fields_file {
        Some(path) => CategoryQuota::from_json_file(&path)
            .with_context(|| format!("Invalid quota file {:?}", path))?
            .iter()
            .map(|(k, v)| (k.to_string(), i64::from(v)))
            .collect(),
        None => Vec::new(),
    };

    for entry in categories {
        let (code, count) = entry
            .split_once('=')
            .with_context(|| format!("Expected CODE=COUNT, got '{}'", entry))?;
        let count: i64 = count
            .trim()
            .parse()
            .with_context(|| format!("Invalid count in '{}'", entry))?;
        fields.push((code.trim().to_string(), count));
    }

    CategoryQuota::new(fields).context("Invalid category quota")
}

async fn run_crawl(config: CrawlConfig, mode: CrawlMode, deadline_secs: Option<u64>) -> Result<()> {
    let cancel = CancellationToken::new();

    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight requests");
            on_signal.cancel();
        }
    });

    if let Some(secs) = deadline_secs {
        let on_deadline = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            warn!(deadline_secs = secs, "Deadline reached, stopping crawl");
            on_deadline.cancel();
        });
    }

    println!("Output table: {}", config.output_path.display());

    let summary = pipeline::run_scrape(&config, &mode, &cancel)
        .await
        .context("Crawl failed")?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    println!(
        "\n✓ Crawl complete: {} ids, {} rows saved to {}",
        summary.total_ids,
        summary.saved_rows,
        config.output_path.display()
    );
    Ok(())
}

// ============================================================================
// HTTP Server
// ============================================================================

async fn run_server(config: CrawlConfig, host: String, port: u16) -> Result<()> {
    info!(host = %host, port = port, "Starting HTTP server");

    let state = Arc::new(api::AppState::new(config));
    let shutdown = state.shutdown_token();
    let app = api::build_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("Invalid host:port")?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down");
            }
            shutdown.cancel();
        })
        .await
        .context("Server error")?;

    Ok(())
}
