//! End-to-end scrape: crawl, then merge into the record store.

use crate::config::CrawlConfig;
use crate::crawler::{CrawlMode, CrawlReport, Crawler};
use crate::error::Result;
use crate::fetcher::{PageSource, PoliteFetcher};
use crate::store::{MergeSummary, RecordStore};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Result of one scrape run, as reported at the service boundary.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeSummary {
    /// Unique ids discovered
    pub total_ids: usize,
    /// Records written by this run
    pub saved_rows: usize,
    /// Row counts of the merge; all zero when nothing was scraped
    pub merge: MergeSummary,
    pub report: CrawlReport,
}

/// Crawl with the network fetcher and merge the result into the configured table.
///
/// # Errors
///
/// Configuration errors (before any request), HTTP client construction
/// failure and persistence failures. Page-level failures are only counted
/// in the report.
pub async fn run_scrape(
    config: &CrawlConfig,
    mode: &CrawlMode,
    cancel: &CancellationToken,
) -> Result<ScrapeSummary> {
    config.validate()?;
    let fetcher = PoliteFetcher::new(config)?;
    let store = RecordStore::new(config.output_path.clone());
    scrape_with(Crawler::new(fetcher, config), &store, mode, cancel).await
}

/// Same as [`run_scrape`] with an explicit crawler and store.
pub async fn scrape_with<S: PageSource>(
    crawler: Crawler<S>,
    store: &RecordStore,
    mode: &CrawlMode,
    cancel: &CancellationToken,
) -> Result<ScrapeSummary> {
    let output = crawler.run(mode, cancel).await?;
    let total_ids = output.ids.len();

    let merge: MergeSummary = store.merge(output.papers)?;

    info!(
        total_ids,
        saved_rows = merge.incoming_rows,
        table_rows = merge.table_rows,
        path = ?store.path(),
        "Scrape complete"
    );

    Ok(ScrapeSummary {
        total_ids,
        saved_rows: merge.incoming_rows,
        merge,
        report: output.report,
    })
}
