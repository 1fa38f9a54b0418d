//! URL construction for arXiv listing, advanced search and abstract pages.
//!
//! Everything here is pure: the same inputs always produce the same strings,
//! which keeps crawl plans easy to snapshot in tests.

use crate::config::CategoryQuota;
use crate::error::{ArxivError, Result};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Entries shown per listing page
pub const PAGE_SIZE: u32 = 25;

/// Default result count for an advanced search page
pub const DEFAULT_SEARCH_SIZE: u32 = 200;

/// Default ordering for advanced search results
pub const DEFAULT_SEARCH_ORDER: &str = "-announced_date_first";

/// Build the paginated "past week" listing URLs for every category.
///
/// Each category gets `ceil(quota / PAGE_SIZE)` pages at offsets
/// `0, 25, 50, ...`, in increasing offset order. A zero quota yields an
/// empty list rather than an error.
pub fn listing_pages(base_url: &str, quota: &CategoryQuota) -> BTreeMap<String, Vec<String>> {
    let base_url = base_url.trim_end_matches('/');
    quota
        .iter()
        .map(|(category, total)| {
            let pages = (0..total)
                .step_by(PAGE_SIZE as usize)
                .map(|skip| {
                    format!(
                        "{}/list/{}/pastweek?skip={}&show={}",
                        base_url, category, skip, PAGE_SIZE
                    )
                })
                .collect();
            (category.to_string(), pages)
        })
        .collect()
}

/// Abstract page URL for a paper id
pub fn detail_url(base_url: &str, id: &str) -> String {
    format!("{}/abs/{}", base_url.trim_end_matches('/'), id)
}

/// A single advanced-search query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvancedSearch {
    /// Classification tag to enable, e.g. `computer_science` or `physics`
    pub classification: String,
    /// Lower date bound (`YYYY-MM` or `YYYY-MM-DD`)
    pub from_date: Option<String>,
    /// Upper date bound (`YYYY-MM` or `YYYY-MM-DD`)
    pub to_date: Option<String>,
    /// Results per page
    pub size: u32,
    /// Sort order, e.g. `-announced_date_first`
    pub order: String,
}

impl AdvancedSearch {
    /// Create a query with the default size/order and no date bounds.
    pub fn new(classification: impl Into<String>) -> Self {
        Self {
            classification: classification.into(),
            from_date: None,
            to_date: None,
            size: DEFAULT_SEARCH_SIZE,
            order: DEFAULT_SEARCH_ORDER.to_string(),
        }
    }

    pub fn with_dates(mut self, from: Option<String>, to: Option<String>) -> Self {
        self.from_date = from;
        self.to_date = to;
        self
    }

    /// Check the query before it is turned into a request.
    pub fn validate(&self) -> Result<()> {
        let tag_ok = !self.classification.is_empty()
            && self
                .classification
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !tag_ok {
            return Err(ArxivError::Config(format!(
                "Invalid classification '{}'",
                self.classification
            )));
        }
        if self.size == 0 {
            return Err(ArxivError::Config("Search size must be positive".to_string()));
        }
        if let Some(from) = &self.from_date {
            validate_date("from", from)?;
        }
        if let Some(to) = &self.to_date {
            validate_date("to", to)?;
        }
        Ok(())
    }

    /// Render the advanced-search URL.
    ///
    /// The date filter is switched to `date_range` only when at least one
    /// bound is present. All values are percent-encoded.
    pub fn to_url(&self, base_url: &str) -> Result<String> {
        self.validate()?;

        let from = self.from_date.as_deref().unwrap_or("");
        let to = self.to_date.as_deref().unwrap_or("");
        let filter_by = if self.from_date.is_some() || self.to_date.is_some() {
            "date_range"
        } else {
            ""
        };
        let size = self.size.to_string();
        let classification_key = format!("classification-{}", self.classification);

        let params = [
            ("advanced", ""),
            ("terms-0-operator", "AND"),
            ("terms-0-term", ""),
            ("terms-0-field", "title"),
            ("classification-physics_archives", "all"),
            ("classification-include_cross_list", "include"),
            ("date-year", ""),
            ("date-filter_by", filter_by),
            ("date-from_date", from),
            ("date-to_date", to),
            ("date-date_type", "submitted_date"),
            ("abstracts", "show"),
            ("size", size.as_str()),
            ("order", self.order.as_str()),
            (classification_key.as_str(), "y"),
        ];

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        Ok(format!(
            "{}/search/advanced?{}",
            base_url.trim_end_matches('/'),
            query
        ))
    }
}

/// Accept `YYYY-MM` or `YYYY-MM-DD` as long as it names a real date.
fn validate_date(field: &'static str, value: &str) -> Result<()> {
    let invalid = || ArxivError::InvalidDate {
        field,
        value: value.to_string(),
    };
    let parsed = match value.len() {
        7 => NaiveDate::parse_from_str(&format!("{}-01", value), "%Y-%m-%d"),
        10 => NaiveDate::parse_from_str(value, "%Y-%m-%d"),
        _ => return Err(invalid()),
    };
    parsed.map(|_| ()).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://arxiv.org";

    fn quota(fields: &[(&str, i64)]) -> CategoryQuota {
        CategoryQuota::new(fields.iter().map(|(k, v)| (k.to_string(), *v))).expect("valid quota")
    }

    #[test]
    fn test_listing_page_counts() {
        for (q, expected) in [(0, 0), (1, 1), (25, 1), (26, 2), (30, 2), (100, 4), (101, 5)] {
            let pages = listing_pages(BASE, &quota(&[("cs", q)]));
            assert_eq!(pages["cs"].len(), expected, "quota {}", q);
        }
    }

    #[test]
    fn test_listing_page_offsets_increase() {
        let pages = listing_pages(BASE, &quota(&[("math", 80)]));
        let offsets: Vec<u32> = pages["math"]
            .iter()
            .filter_map(|u| {
                u.split("skip=")
                    .nth(1)
                    .and_then(|rest| rest.split('&').next())
                    .and_then(|s| s.parse().ok())
            })
            .collect();
        assert_eq!(offsets, vec![0, 25, 50, 75]);
    }

    #[test]
    fn test_listing_url_shape() {
        let pages = listing_pages("https://arxiv.org/", &quota(&[("cs", 30)]));
        assert_eq!(
            pages["cs"],
            vec![
                "https://arxiv.org/list/cs/pastweek?skip=0&show=25".to_string(),
                "https://arxiv.org/list/cs/pastweek?skip=25&show=25".to_string(),
            ]
        );
    }

    #[test]
    fn test_zero_quota_keeps_category() {
        let pages = listing_pages(BASE, &quota(&[("cs", 0), ("stat", 10)]));
        assert!(pages["cs"].is_empty());
        assert_eq!(pages["stat"].len(), 1);
    }

    #[test]
    fn test_detail_url() {
        assert_eq!(detail_url(BASE, "2401.01234"), "https://arxiv.org/abs/2401.01234");
    }

    #[test]
    fn test_advanced_url_without_dates() {
        let url = AdvancedSearch::new("computer_science")
            .to_url(BASE)
            .expect("valid query");
        assert_eq!(
            url,
            "https://arxiv.org/search/advanced?advanced=&terms-0-operator=AND&terms-0-term=\
             &terms-0-field=title&classification-physics_archives=all\
             &classification-include_cross_list=include&date-year=&date-filter_by=\
             &date-from_date=&date-to_date=&date-date_type=submitted_date&abstracts=show\
             &size=200&order=-announced_date_first&classification-computer_science=y"
        );
        assert!(!url.contains("date_range"));
    }

    #[test]
    fn test_advanced_url_with_one_bound() {
        let url = AdvancedSearch::new("physics")
            .with_dates(Some("2024-01".to_string()), None)
            .to_url(BASE)
            .expect("valid query");
        assert!(url.contains("date-filter_by=date_range"));
        assert!(url.contains("date-from_date=2024-01&"));
        assert!(url.contains("date-to_date=&"));
        assert!(url.ends_with("classification-physics=y"));
    }

    #[test]
    fn test_advanced_url_is_deterministic_and_encoded() {
        let query = AdvancedSearch {
            classification: "math".to_string(),
            from_date: Some("2024-01-15".to_string()),
            to_date: Some("2024-02-29".to_string()),
            size: 50,
            order: "submitted date".to_string(),
        };
        let a = query.to_url(BASE).expect("valid query");
        let b = query.clone().to_url(BASE).expect("valid query");
        assert_eq!(a, b);
        assert!(a.contains("order=submitted%20date"));
        assert!(a.contains("size=50"));
    }

    #[test]
    fn test_advanced_rejects_bad_dates() {
        for bad in ["2024", "2024-13", "2023-02-29", "24-01-01", "2024/01/01"] {
            let err = AdvancedSearch::new("cs")
                .with_dates(Some(bad.to_string()), None)
                .to_url(BASE)
                .expect_err("bad date accepted");
            assert!(err.is_config(), "{}", bad);
        }
    }

    #[test]
    fn test_advanced_rejects_bad_classification() {
        assert!(AdvancedSearch::new("").validate().is_err());
        assert!(AdvancedSearch::new("cs&x=1").validate().is_err());
    }
}
