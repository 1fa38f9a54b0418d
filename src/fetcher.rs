//! Polite page fetching.
//!
//! [`PoliteFetcher`] performs one GET per call, waits for a paced slot on
//! the shared [`RequestGate`] before every attempt, retries transient
//! failures with exponential backoff and classifies the result into a
//! [`FetchOutcome`]. It never returns an error: a bad page costs missing
//! data, not the run.

use crate::config::{CrawlConfig, DelayBounds};
use crate::error::{ArxivError, Result};
use crate::limiter::RequestGate;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Which kind of page is being requested; selects the politeness bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// Category listing or advanced-search result page
    Listing,
    /// Abstract page of a single paper
    Detail,
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listing => f.write_str("listing"),
            Self::Detail => f.write_str("detail"),
        }
    }
}

/// Why a request produced no page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// Unexpected HTTP status (neither 200, 403 nor 404)
    Status(u16),
    /// Request or body read exceeded the timeout
    Timeout,
    /// Connection, TLS or body decoding problem
    Transport(String),
}

impl FetchFailure {
    /// Failures worth another attempt after a backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Status(code) => *code == 429 || (500..600).contains(code),
        }
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(code) => write!(f, "HTTP {}", code),
            Self::Timeout => f.write_str("timed out"),
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

/// Classified result of one fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// HTTP 200 with the response body
    Page(String),
    /// HTTP 404
    NotFound,
    /// HTTP 403; the site is refusing this client
    Blocked,
    /// Anything else, after retries were exhausted
    Failed(FetchFailure),
    /// The run was cancelled before the request was sent
    Cancelled,
}

impl FetchOutcome {
    pub fn into_page(self) -> Option<String> {
        match self {
            Self::Page(body) => Some(body),
            _ => None,
        }
    }
}

/// Anything that can hand the crawler a page for a URL.
///
/// [`PoliteFetcher`] is the network implementation; tests drive the crawler
/// with in-memory sources.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch one page. Implementations must not issue a request once
    /// `cancel` has fired.
    async fn fetch(&self, url: &str, kind: PageKind, cancel: &CancellationToken) -> FetchOutcome;

    /// Hold back further requests for `pause`.
    fn pause(&self, _pause: Duration) {}
}

/// HTTP fetcher with randomized delays, timeout and bounded retries.
#[derive(Debug, Clone)]
pub struct PoliteFetcher {
    client: reqwest::Client,
    gate: RequestGate,
    listing_delay: DelayBounds,
    detail_delay: DelayBounds,
    max_retries: u32,
    retry_backoff: Duration,
}

impl PoliteFetcher {
    /// Build a fetcher with its own pacing gate.
    ///
    /// # Errors
    ///
    /// Returns [`ArxivError::Client`] if the HTTP client cannot be built.
    pub fn new(config: &CrawlConfig) -> Result<Self> {
        Self::with_gate(config, RequestGate::new())
    }

    /// Build a fetcher that shares `gate` with other fetchers.
    pub fn with_gate(config: &CrawlConfig, gate: RequestGate) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout())
            .cookie_store(true)
            .build()
            .map_err(|e| ArxivError::Client(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            gate,
            listing_delay: config.listing_delay,
            detail_delay: config.detail_delay,
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff(),
        })
    }

    fn bounds(&self, kind: PageKind) -> DelayBounds {
        match kind {
            PageKind::Listing => self.listing_delay,
            PageKind::Detail => self.detail_delay,
        }
    }

    /// One request, no pacing, no retry.
    async fn attempt(&self, url: &str) -> FetchOutcome {
        let response = match self
            .client
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return FetchOutcome::Failed(FetchFailure::Timeout),
            Err(e) => return FetchOutcome::Failed(FetchFailure::Transport(e.to_string())),
        };

        match response.status() {
            StatusCode::OK => match response.text().await {
                Ok(body) => FetchOutcome::Page(body),
                Err(e) if e.is_timeout() => FetchOutcome::Failed(FetchFailure::Timeout),
                Err(e) => FetchOutcome::Failed(FetchFailure::Transport(e.to_string())),
            },
            StatusCode::NOT_FOUND => FetchOutcome::NotFound,
            StatusCode::FORBIDDEN => FetchOutcome::Blocked,
            status => FetchOutcome::Failed(FetchFailure::Status(status.as_u16())),
        }
    }
}

#[async_trait]
impl PageSource for PoliteFetcher {
    async fn fetch(&self, url: &str, kind: PageKind, cancel: &CancellationToken) -> FetchOutcome {
        let bounds = self.bounds(kind);
        let mut backoff = self.retry_backoff;
        let mut attempt = 0u32;

        loop {
            if !self.gate.wait_turn(bounds, cancel).await {
                debug!(url, %kind, "Cancelled before request");
                return FetchOutcome::Cancelled;
            }

            let outcome = self.attempt(url).await;
            match &outcome {
                FetchOutcome::Page(body) => {
                    debug!(url, %kind, bytes = body.len(), "Fetched page");
                }
                FetchOutcome::NotFound => {
                    warn!(url, %kind, "Page not found (404)");
                }
                FetchOutcome::Blocked => {
                    warn!(url, %kind, "Access denied (403), client may be blocked");
                }
                FetchOutcome::Failed(failure)
                    if failure.is_transient() && attempt < self.max_retries =>
                {
                    attempt += 1;
                    warn!(
                        url,
                        %kind,
                        error = %failure,
                        attempt,
                        wait_ms = backoff.as_millis() as u64,
                        "Transient failure, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancel.cancelled() => return FetchOutcome::Cancelled,
                    }
                    backoff = backoff.saturating_mul(2);
                    continue;
                }
                FetchOutcome::Failed(failure) => {
                    warn!(url, %kind, error = %failure, attempts = attempt + 1, "Fetch failed");
                }
                FetchOutcome::Cancelled => {}
            }
            return outcome;
        }
    }

    fn pause(&self, pause: Duration) {
        info!(pause_secs = pause.as_secs(), "Pausing requests");
        self.gate.pause(pause);
    }
}
