//! Crawl orchestration.
//!
//! A run goes through fixed phases: build URLs, fetch listing pages and
//! collect ids, deduplicate, fetch one abstract page per id, emit. Page
//! failures only shrink the result; the run itself is never aborted by
//! them, except through the block policy (too many consecutive 403s).

use crate::config::{CategoryQuota, CrawlConfig};
use crate::error::Result;
use crate::extract::{extract_ids, extract_paper, Paper, PaperId};
use crate::fetcher::{FetchOutcome, PageKind, PageSource};
use crate::urls::{detail_url, listing_pages, AdvancedSearch};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Label used for ids found through the advanced search
const ADVANCED_LABEL: &str = "advanced-search";

/// How the run discovers paper ids.
#[derive(Debug, Clone)]
pub enum CrawlMode {
    /// Walk the "past week" listing of every category in the quota
    Categories(CategoryQuota),
    /// One advanced-search page; falls back to the category listings when
    /// the search yields no ids
    AdvancedSearch {
        query: AdvancedSearch,
        fallback: CategoryQuota,
    },
}

/// Outcome counts for one phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhaseStats {
    /// Pages the phase intended to fetch
    pub planned: usize,
    pub ok: usize,
    pub not_found: usize,
    pub blocked: usize,
    pub failed: usize,
    /// Pages never requested because the run was cancelled or aborted
    pub skipped: usize,
}

impl PhaseStats {
    fn record(&mut self, outcome: OutcomeKind) {
        match outcome {
            OutcomeKind::Ok => self.ok += 1,
            OutcomeKind::NotFound => self.not_found += 1,
            OutcomeKind::Blocked => self.blocked += 1,
            OutcomeKind::Failed => self.failed += 1,
            OutcomeKind::Skipped => self.skipped += 1,
        }
    }
}

/// Structured per-phase report of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlReport {
    pub listing: PhaseStats,
    /// Ids extracted before deduplication
    pub ids_found: usize,
    /// Ids left after deduplication
    pub unique_ids: usize,
    pub details: PhaseStats,
    /// Papers extracted from detail pages
    pub records: usize,
    /// Advanced search returned nothing and the category listings were used
    pub fell_back_to_categories: bool,
    /// The caller cancelled the run
    pub cancelled: bool,
    /// The run stopped itself after repeated 403 responses
    pub aborted_blocked: bool,
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct CrawlOutput {
    /// Deduplicated ids, in first-seen order
    pub ids: Vec<PaperId>,
    pub papers: Vec<Paper>,
    pub report: CrawlReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutcomeKind {
    Ok,
    NotFound,
    Blocked,
    Failed,
    Skipped,
}

impl From<&FetchOutcome> for OutcomeKind {
    fn from(outcome: &FetchOutcome) -> Self {
        match outcome {
            FetchOutcome::Page(_) => Self::Ok,
            FetchOutcome::NotFound => Self::NotFound,
            FetchOutcome::Blocked => Self::Blocked,
            FetchOutcome::Failed(_) => Self::Failed,
            FetchOutcome::Cancelled => Self::Skipped,
        }
    }
}

/// Per-run state shared by every fetch of the run.
struct RunState {
    /// Cancelled by the caller or by the block policy
    token: CancellationToken,
    block_streak: AtomicU32,
    aborted: AtomicBool,
}

/// Drives a crawl over any [`PageSource`].
pub struct Crawler<S> {
    source: S,
    base_url: String,
    concurrency: usize,
    block_cooldown: Duration,
    max_consecutive_blocks: u32,
}

impl<S: PageSource> Crawler<S> {
    pub fn new(source: S, config: &CrawlConfig) -> Self {
        Self {
            source,
            base_url: config.site_root().to_string(),
            concurrency: config.effective_concurrency(),
            block_cooldown: config.block_cooldown(),
            max_consecutive_blocks: config.max_consecutive_blocks.max(1),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Run all phases.
    ///
    /// Cancelling `cancel` stops new requests; in-flight requests finish or
    /// time out and whatever was collected so far is returned.
    ///
    /// # Errors
    ///
    /// Only configuration problems (an invalid advanced-search query) are
    /// errors, and they are raised before any request is made.
    pub async fn run(&self, mode: &CrawlMode, cancel: &CancellationToken) -> Result<CrawlOutput> {
        let state = RunState {
            token: cancel.child_token(),
            block_streak: AtomicU32::new(0),
            aborted: AtomicBool::new(false),
        };
        let mut report = CrawlReport::default();

        // BuildURLs
        let plan = match mode {
            CrawlMode::Categories(quota) => listing_pages(&self.base_url, quota),
            CrawlMode::AdvancedSearch { query, .. } => {
                let url = query.to_url(&self.base_url)?;
                BTreeMap::from([(ADVANCED_LABEL.to_string(), vec![url])])
            }
        };
        info!(
            phase = "build_urls",
            categories = plan.len(),
            pages = plan.values().map(Vec::len).sum::<usize>(),
            "Crawl plan ready"
        );

        // FetchIds
        let mut found = self.collect_ids(&plan, &state, &mut report).await;

        if let CrawlMode::AdvancedSearch { fallback, .. } = mode {
            if found.is_empty() && !state.token.is_cancelled() {
                warn!(
                    phase = "fetch_ids",
                    "Advanced search returned no ids, falling back to category listings"
                );
                report.fell_back_to_categories = true;
                let plan = listing_pages(&self.base_url, fallback);
                found = self.collect_ids(&plan, &state, &mut report).await;
            }
        }

        // Dedup
        report.ids_found = found.len();
        let ids = dedup(found);
        report.unique_ids = ids.len();
        info!(
            phase = "dedup",
            found = report.ids_found,
            unique = report.unique_ids,
            "Deduplicated ids"
        );

        // FetchDetails
        let papers = self.fetch_details(&ids, &state, &mut report).await;
        report.records = papers.len();

        // Emit
        report.cancelled = cancel.is_cancelled();
        report.aborted_blocked = state.aborted.load(Ordering::SeqCst);
        info!(
            phase = "emit",
            records = report.records,
            cancelled = report.cancelled,
            aborted_blocked = report.aborted_blocked,
            "Crawl finished"
        );

        Ok(CrawlOutput {
            ids,
            papers,
            report,
        })
    }

    /// Fetch listing pages category by category, pages in offset order.
    async fn collect_ids(
        &self,
        plan: &BTreeMap<String, Vec<String>>,
        state: &RunState,
        report: &mut CrawlReport,
    ) -> Vec<PaperId> {
        let mut all_ids = Vec::new();

        for (category, urls) in plan {
            info!(phase = "fetch_ids", category = %category, pages = urls.len(), "Processing category");
            report.listing.planned += urls.len();
            let mut category_count = 0;

            for url in urls {
                if state.token.is_cancelled() {
                    report.listing.record(OutcomeKind::Skipped);
                    continue;
                }

                let outcome = self.source.fetch(url, PageKind::Listing, &state.token).await;
                self.observe(&outcome, state);
                report.listing.record(OutcomeKind::from(&outcome));

                if let FetchOutcome::Page(html) = outcome {
                    let ids = extract_ids(&html);
                    debug!(url = %url, count = ids.len(), "Extracted ids");
                    category_count += ids.len();
                    all_ids.extend(ids);
                }
            }

            info!(phase = "fetch_ids", category = %category, ids = category_count, "Category done");
        }

        all_ids
    }

    /// Fetch one abstract page per id through a bounded pool.
    async fn fetch_details(
        &self,
        ids: &[PaperId],
        state: &RunState,
        report: &mut CrawlReport,
    ) -> Vec<Paper> {
        let total = ids.len();
        report.details.planned += total;
        info!(
            phase = "fetch_details",
            total,
            concurrency = self.concurrency,
            "Fetching paper details"
        );

        let results: Vec<(OutcomeKind, Option<Paper>)> = stream::iter(ids.iter().cloned().enumerate())
            .map(|(index, id)| async move {
                if state.token.is_cancelled() {
                    return (OutcomeKind::Skipped, None);
                }

                let url = detail_url(&self.base_url, id.as_str());
                debug!(id = %id, progress = index + 1, total, "Fetching detail");
                let outcome = self.source.fetch(&url, PageKind::Detail, &state.token).await;
                self.observe(&outcome, state);

                let kind = OutcomeKind::from(&outcome);
                let paper = outcome
                    .into_page()
                    .map(|html| extract_paper(&html, id, url));

                if (index + 1) % 10 == 0 {
                    info!(phase = "fetch_details", done = index + 1, total, "Detail progress");
                }
                (kind, paper)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut papers = Vec::with_capacity(results.len());
        for (kind, paper) in results {
            report.details.record(kind);
            papers.extend(paper);
        }
        papers
    }

    /// Apply the block policy to a finished fetch.
    ///
    /// Each 403 pauses the source; `max_consecutive_blocks` in a row stop
    /// the run. Any other completed request resets the streak.
    fn observe(&self, outcome: &FetchOutcome, state: &RunState) {
        match outcome {
            FetchOutcome::Blocked => {
                let streak = state.block_streak.fetch_add(1, Ordering::SeqCst) + 1;
                if streak >= self.max_consecutive_blocks {
                    if !state.aborted.swap(true, Ordering::SeqCst) {
                        error!(
                            streak,
                            "Repeated 403 responses, stopping the crawl"
                        );
                    }
                    state.token.cancel();
                } else {
                    warn!(
                        streak,
                        cooldown_secs = self.block_cooldown.as_secs(),
                        "Blocked, cooling down"
                    );
                    self.source.pause(self.block_cooldown);
                }
            }
            FetchOutcome::Cancelled => {}
            _ => state.block_streak.store(0, Ordering::SeqCst),
        }
    }
}

/// Drop repeated ids, keeping the first occurrence.
pub fn dedup(ids: Vec<PaperId>) -> Vec<PaperId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}
