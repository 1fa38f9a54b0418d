//! Custom error types for rustarxiv.
//!
//! Only configuration, client construction and persistence failures are
//! errors. Per-page fetch problems are reported as [`crate::fetcher::FetchOutcome`]
//! values and missing HTML fields degrade to `"N/A"`.

use thiserror::Error;

/// Main error type for rustarxiv operations.
#[derive(Debug, Error)]
pub enum ArxivError {
    /// Malformed category/quota table or other invalid settings
    #[error("Config error: {0}")]
    Config(String),

    /// Date bound for the advanced search is not `YYYY-MM` or `YYYY-MM-DD`
    #[error("Invalid {field} date '{value}': expected YYYY-MM or YYYY-MM-DD")]
    InvalidDate {
        /// Which bound was rejected (`from` or `to`)
        field: &'static str,
        /// The rejected input
        value: String,
    },

    /// The HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    Client(String),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The persisted table could not be read back or replaced
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl ArxivError {
    /// True for errors raised while validating input, before any network activity.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::InvalidDate { .. })
    }
}

/// Result type alias using `ArxivError`
pub type Result<T> = std::result::Result<T, ArxivError>;
