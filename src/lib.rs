//! # rustarxiv
//!
//! Polite arXiv crawler: discovers paper ids from category listings or an
//! advanced search, scrapes each abstract page and merges the results into
//! a CSV table keyed by paper id.
//!
//! ## Modules
//!
//! - [`config`] - Category quota table and crawl settings
//! - [`urls`] - Listing, advanced-search and abstract URLs
//! - [`extract`] - HTML to paper ids / paper metadata
//! - [`limiter`] - Shared request pacing
//! - [`fetcher`] - Rate-limited GET with retry and outcome classification
//! - [`crawler`] - Phase orchestration, dedup, block policy
//! - [`store`] - CSV merge with last-write-wins per id
//! - [`pipeline`] - Crawl + store in one call
//! - [`api`] - HTTP service
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rustarxiv::{config::{CategoryQuota, CrawlConfig}, crawler::CrawlMode, pipeline};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let quota = CategoryQuota::new([("cs", 30)])?;
//!     let summary = pipeline::run_scrape(
//!         &CrawlConfig::default(),
//!         &CrawlMode::Categories(quota),
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//!     println!("Saved {} rows", summary.saved_rows);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod crawler;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod limiter;
pub mod pipeline;
pub mod store;
pub mod urls;

pub use error::{ArxivError, Result};
