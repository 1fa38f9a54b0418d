//! Crawl configuration.
//!
//! [`CategoryQuota`] is the category → article count table that drives the
//! listing phase, [`CrawlConfig`] carries everything else (politeness
//! bounds, retry policy, output path). Both are plain values handed to the
//! crawler; nothing here is global.

use crate::error::{ArxivError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default arXiv host
pub const DEFAULT_BASE_URL: &str = "https://arxiv.org";

/// User agent string for requests
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Default location of the persisted table
pub const DEFAULT_OUTPUT_PATH: &str = "data/arxiv_papers_daily.csv";

/// Upper bound for the detail fetch pool
pub const MAX_CONCURRENCY: usize = 4;

/// Largest accepted politeness delay, in seconds
pub const MAX_DELAY_SECS: f64 = 3_600.0;

/// Largest accepted retry count
pub const MAX_RETRIES: u32 = 10;

/// Largest accepted first retry backoff, in milliseconds
pub const MAX_RETRY_BACKOFF_MS: u64 = 600_000;

/// Largest accepted block cooldown / request timeout, in seconds
pub const MAX_WAIT_SECS: u64 = 86_400;

/// Built-in category table used when a request does not supply one.
const DEFAULT_FIELDS: &[(&str, u32)] = &[
    // Mathematics
    ("math", 100),
    // Statistics
    ("stat", 50),
    // Computer Science
    ("cs", 100),
    // Physics
    ("physics", 50),
    ("astro-ph", 40),
    ("cond-mat", 40),
    ("gr-qc", 30),
    ("hep-ex", 30),
    ("hep-lat", 30),
    ("hep-ph", 30),
    ("hep-th", 30),
    ("quant-ph", 30),
    ("nucl-ex", 20),
    ("nucl-th", 20),
    // Electrical Engineering & Systems Science
    ("eess", 40),
    // Economics
    ("econ", 30),
    // Quantitative Biology
    ("q-bio", 30),
    // Quantitative Finance
    ("q-fin", 30),
];

/// Validated mapping from category code to the number of articles wanted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CategoryQuota(BTreeMap<String, u32>);

/// On-disk / wire shape of a quota table: `{"arxiv_fields": {...}}` or a bare map.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QuotaDocument {
    Envelope { arxiv_fields: BTreeMap<String, i64> },
    Bare(BTreeMap<String, i64>),
}

impl CategoryQuota {
    /// Validate raw `(category, count)` pairs.
    ///
    /// Category codes must be non-empty and contain only ASCII letters,
    /// digits, `.` or `-`. Counts must be non-negative; zero is allowed and
    /// simply produces no listing pages.
    pub fn new<I, K>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, i64)>,
        K: Into<String>,
    {
        let mut table = BTreeMap::new();
        for (category, count) in fields {
            let category = category.into();
            let valid_code = !category.is_empty()
                && category
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
            if !valid_code {
                return Err(ArxivError::Config(format!(
                    "Invalid category code '{}'",
                    category
                )));
            }
            let count = u32::try_from(count).map_err(|_| {
                ArxivError::Config(format!(
                    "Article count for '{}' must be between 0 and {}, got {}",
                    category,
                    u32::MAX,
                    count
                ))
            })?;
            table.insert(category, count);
        }
        Ok(Self(table))
    }

    /// Parse a JSON quota document (envelope or bare map).
    pub fn from_json_str(json: &str) -> Result<Self> {
        let fields = match serde_json::from_str::<QuotaDocument>(json)
            .map_err(|e| ArxivError::Config(format!("Invalid quota document: {}", e)))?
        {
            QuotaDocument::Envelope { arxiv_fields } => arxiv_fields,
            QuotaDocument::Bare(fields) => fields,
        };
        Self::new(fields)
    }

    /// Read a JSON quota document from disk.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ArxivError::Config(format!("Cannot read quota file {:?}: {}", path, e))
        })?;
        Self::from_json_str(&content)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn get(&self, category: &str) -> Option<u32> {
        self.0.get(category).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of all requested article counts
    pub fn total_requested(&self) -> u64 {
        self.0.values().map(|v| u64::from(*v)).sum()
    }
}

impl Default for CategoryQuota {
    fn default() -> Self {
        Self(
            DEFAULT_FIELDS
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
        )
    }
}

/// Inclusive bounds, in seconds, for a randomized politeness delay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelayBounds {
    pub min_secs: f64,
    pub max_secs: f64,
}

impl DelayBounds {
    pub const fn new(min_secs: f64, max_secs: f64) -> Self {
        Self { min_secs, max_secs }
    }

    /// No delay at all
    pub const fn none() -> Self {
        Self::new(0.0, 0.0)
    }

    /// Draw a delay uniformly from the bounds.
    ///
    /// Out-of-range bounds are clamped to `0..=MAX_DELAY_SECS` so sampling
    /// never panics, even on a config that skipped validation.
    pub fn sample(&self) -> Duration {
        let min = clamp_secs(self.min_secs);
        let max = clamp_secs(self.max_secs);
        let secs = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };
        Duration::from_secs_f64(secs)
    }

    fn validate(&self, name: &str) -> Result<()> {
        let finite = self.min_secs.is_finite() && self.max_secs.is_finite();
        if !finite
            || self.min_secs < 0.0
            || self.max_secs < self.min_secs
            || self.max_secs > MAX_DELAY_SECS
        {
            return Err(ArxivError::Config(format!(
                "{} delay bounds must satisfy 0 <= min <= max <= {}, got {}..{}",
                name, MAX_DELAY_SECS, self.min_secs, self.max_secs
            )));
        }
        Ok(())
    }
}

fn clamp_secs(secs: f64) -> f64 {
    if secs.is_finite() {
        secs.clamp(0.0, MAX_DELAY_SECS)
    } else {
        0.0
    }
}

/// Runtime settings for a crawl.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Site root, e.g. `https://arxiv.org`
    pub base_url: String,
    /// User-Agent header sent on every request
    pub user_agent: String,
    /// Per-request timeout
    pub timeout_secs: u64,
    /// Delay before each listing/search page request
    pub listing_delay: DelayBounds,
    /// Delay before each detail page request
    pub detail_delay: DelayBounds,
    /// Extra attempts for transient failures (timeouts, 5xx, 429)
    pub max_retries: u32,
    /// First retry backoff, doubled on each further attempt
    pub retry_backoff_ms: u64,
    /// Detail fetch pool size (clamped to 1..=4)
    pub concurrency: usize,
    /// Pause after a 403 before issuing the next request
    pub block_cooldown_secs: u64,
    /// Consecutive 403 responses after which the run stops issuing requests
    pub max_consecutive_blocks: u32,
    /// CSV table the results are merged into
    pub output_path: PathBuf,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 12,
            listing_delay: DelayBounds::new(5.0, 10.0),
            detail_delay: DelayBounds::new(10.0, 20.0),
            max_retries: 2,
            retry_backoff_ms: 2_000,
            concurrency: 1,
            block_cooldown_secs: 60,
            max_consecutive_blocks: 3,
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
        }
    }
}

impl CrawlConfig {
    /// Load settings from a JSON file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ArxivError::Config(format!("Cannot read config file {:?}: {}", path, e))
        })?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| ArxivError::Config(format!("Invalid config file {:?}: {}", path, e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings before any network activity.
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.base_url)
            .map_err(|e| ArxivError::Config(format!("Invalid base URL '{}': {}", self.base_url, e)))?;
        if self.timeout_secs == 0 || self.timeout_secs > MAX_WAIT_SECS {
            return Err(ArxivError::Config(format!(
                "timeout_secs must be between 1 and {}",
                MAX_WAIT_SECS
            )));
        }
        if self.max_retries > MAX_RETRIES {
            return Err(ArxivError::Config(format!(
                "max_retries must be at most {}",
                MAX_RETRIES
            )));
        }
        if self.retry_backoff_ms > MAX_RETRY_BACKOFF_MS {
            return Err(ArxivError::Config(format!(
                "retry_backoff_ms must be at most {}",
                MAX_RETRY_BACKOFF_MS
            )));
        }
        if self.block_cooldown_secs > MAX_WAIT_SECS {
            return Err(ArxivError::Config(format!(
                "block_cooldown_secs must be at most {}",
                MAX_WAIT_SECS
            )));
        }
        if self.max_consecutive_blocks == 0 {
            return Err(ArxivError::Config(
                "max_consecutive_blocks must be positive".to_string(),
            ));
        }
        self.listing_delay.validate("listing")?;
        self.detail_delay.validate("detail")?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn block_cooldown(&self) -> Duration {
        Duration::from_secs(self.block_cooldown_secs)
    }

    /// Pool size actually used for detail fetches
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, MAX_CONCURRENCY)
    }

    /// Base URL without a trailing slash
    pub fn site_root(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}
