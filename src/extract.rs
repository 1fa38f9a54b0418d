//! HTML extraction for arXiv listing, search and abstract pages.
//!
//! Both extractors are infallible: links that do not carry a valid paper id
//! are skipped and missing detail fields become [`NOT_AVAILABLE`].

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Sentinel for detail fields that are absent from the page
pub const NOT_AVAILABLE: &str = "N/A";

/// arXiv identifier, new style (`2401.01234v2`) or old style (`hep-th/9901001`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PaperId(String);

fn id_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^(?:\d{4}\.\d{4,5}|[a-z]+(?:-[a-z]+)*(?:\.[A-Z]{2})?/\d{7})(?:v\d+)?$")
                .map_err(|e| warn!(error = %e, "Invalid paper id pattern"))
                .ok()
        })
        .as_ref()
}

impl PaperId {
    /// Validate a raw token against the arXiv id scheme.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let pattern = id_pattern()?;
        pattern.is_match(raw).then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PaperId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid arXiv id '{}'", value))
    }
}

impl From<PaperId> for String {
    fn from(id: PaperId) -> Self {
        id.0
    }
}

/// Metadata scraped from one abstract page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paper {
    pub id: PaperId,
    pub title: String,
    pub authors: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub published_date: String,
    pub url: String,
}

/// Build a selector from a constant CSS string.
fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css)
        .map_err(|e| warn!(css, error = %e, "Invalid selector"))
        .ok()
}

/// Extract paper ids from a listing or advanced-search result page.
///
/// The search-result layout (`li.arxiv-result` with a `p.list-title` link)
/// is tried first. When it yields nothing, every link labelled "Abstract"
/// is used instead, which covers the `/list/` layout. Ids keep document
/// order and are not deduplicated.
pub fn extract_ids(html: &str) -> Vec<PaperId> {
    let document = Html::parse_document(html);

    let ids = extract_result_entry_ids(&document);
    if !ids.is_empty() {
        return ids;
    }

    let ids = extract_abstract_link_ids(&document);
    debug!(count = ids.len(), "Used abstract-link fallback");
    ids
}

fn extract_result_entry_ids(document: &Html) -> Vec<PaperId> {
    let (Some(entry_sel), Some(link_sel)) = (selector("li.arxiv-result"), selector("p.list-title a"))
    else {
        return Vec::new();
    };

    document
        .select(&entry_sel)
        .filter_map(|entry| entry.select(&link_sel).next())
        .filter_map(|link| link.value().attr("href"))
        .filter_map(id_from_href)
        .collect()
}

fn extract_abstract_link_ids(document: &Html) -> Vec<PaperId> {
    let Some(link_sel) = selector(r#"a[title="Abstract"], a[aria-label="Abstract"]"#) else {
        return Vec::new();
    };

    document
        .select(&link_sel)
        .filter_map(|link| link.value().attr("href"))
        .filter_map(id_from_href)
        .collect()
}

/// Turn a link target into a paper id.
///
/// Everything after `/abs/` is used when present so that old-style ids
/// (`hep-th/9901001`) survive; otherwise the last path segment.
fn id_from_href(href: &str) -> Option<PaperId> {
    let path = href.split(['?', '#']).next().unwrap_or_default();
    let path = path.trim_end_matches('/');
    let raw = match path.split_once("/abs/") {
        Some((_, rest)) => rest,
        None => path.rsplit('/').next().unwrap_or_default(),
    };
    PaperId::parse(raw)
}

/// Collapse runs of whitespace into single spaces.
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn field_text(document: &Html, css: &str, label: &str) -> String {
    let Some(sel) = selector(css) else {
        return NOT_AVAILABLE.to_string();
    };
    let Some(element) = document.select(&sel).next() else {
        return NOT_AVAILABLE.to_string();
    };

    let text = element_text(element);
    let text = text.strip_prefix(label).unwrap_or(&text).trim();
    if text.is_empty() {
        NOT_AVAILABLE.to_string()
    } else {
        text.to_string()
    }
}

/// Parse an abstract page into a [`Paper`].
///
/// `id` and `url` come from the caller since the page alone does not
/// reliably carry them.
pub fn extract_paper(html: &str, id: PaperId, url: String) -> Paper {
    let document = Html::parse_document(html);

    let dateline = field_text(&document, "div.dateline", "");
    let published_date = dateline
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim()
        .to_string();

    Paper {
        id,
        title: field_text(&document, "h1.title", "Title:"),
        authors: field_text(&document, "div.authors", "Authors:"),
        abstract_text: field_text(&document, "blockquote.abstract", "Abstract:"),
        published_date: if published_date.is_empty() {
            NOT_AVAILABLE.to_string()
        } else {
            published_date
        },
        url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING_HTML: &str = r#"
        <html><body><dl id="articles">
          <dt><a name="item1">[1]</a>
            <a href="/abs/2401.00001" title="Abstract" id="2401.00001">arXiv:2401.00001</a>
            [<a href="/pdf/2401.00001" title="Download PDF">pdf</a>]
          </dt>
          <dt><a name="item2">[2]</a>
            <a href="/abs/2401.00002v2" title="Abstract">arXiv:2401.00002</a>
          </dt>
          <dt><a href="/abs/hep-th/9901001" aria-label="Abstract">hep-th/9901001</a></dt>
          <dt><a href="" title="Abstract">broken</a></dt>
          <dt><a title="Abstract">no href</a></dt>
        </dl></body></html>
    "#;

    const SEARCH_HTML: &str = r#"
        <html><body><ol class="breathe-horizontal">
          <li class="arxiv-result">
            <div class="is-marginless">
              <p class="list-title is-inline-block">
                <a href="https://arxiv.org/abs/2402.11111">arXiv:2402.11111</a>
              </p>
            </div>
          </li>
          <li class="arxiv-result">
            <p class="list-title"><a href="https://arxiv.org/abs/2402.22222?context=cs">arXiv:2402.22222</a></p>
          </li>
          <li class="arxiv-result"><p class="title">No link here</p></li>
        </ol>
        <a href="/abs/2402.99999" title="Abstract">ignored while primary matches</a>
        </body></html>
    "#;

    const DETAIL_HTML: &str = r#"
        <html><body>
          <h1 class="title mathjax"><span class="descriptor">Title:</span>
            Attention Is   All You Need</h1>
          <div class="authors"><span class="descriptor">Authors:</span>
            <a href="/a/vaswani_a_1">Ashish Vaswani</a>, <a href="/a/shazeer_n_1">Noam Shazeer</a></div>
          <div class="dateline">[Submitted on 12 Jun 2017 (v1), last revised 2 Aug 2023 (this version, v7)]</div>
          <blockquote class="abstract mathjax">
            <span class="descriptor">Abstract:</span>The dominant sequence transduction models...
          </blockquote>
        </body></html>
    "#;

    fn id(raw: &str) -> PaperId {
        PaperId::parse(raw).expect("valid id")
    }

    #[test]
    fn test_paper_id_scheme() {
        assert!(PaperId::parse("2401.01234").is_some());
        assert!(PaperId::parse("2401.1234v3").is_some());
        assert!(PaperId::parse("math.CO/0601001").is_some());
        assert!(PaperId::parse("hep-th/9901001v1").is_some());
        assert!(PaperId::parse("").is_none());
        assert!(PaperId::parse("pdf").is_none());
        assert!(PaperId::parse("2401.01234/extra").is_none());
    }

    #[test]
    fn test_listing_uses_abstract_links() {
        let ids = extract_ids(LISTING_HTML);
        assert_eq!(
            ids,
            vec![id("2401.00001"), id("2401.00002v2"), id("hep-th/9901001")]
        );
    }

    #[test]
    fn test_search_uses_result_entries() {
        let ids = extract_ids(SEARCH_HTML);
        assert_eq!(ids, vec![id("2402.11111"), id("2402.22222")]);
    }

    #[test]
    fn test_duplicates_are_kept() {
        let html = r#"<a href="/abs/2401.00001" title="Abstract">a</a>
                      <a href="/abs/2401.00001" title="Abstract">b</a>"#;
        assert_eq!(extract_ids(html).len(), 2);
    }

    #[test]
    fn test_empty_page_yields_no_ids() {
        assert!(extract_ids("<html><body><p>No papers</p></body></html>").is_empty());
        assert!(extract_ids("").is_empty());
        assert!(extract_ids("<<<not html").is_empty());
    }

    #[test]
    fn test_extract_paper_fields() {
        let paper = extract_paper(
            DETAIL_HTML,
            id("1706.03762"),
            "https://arxiv.org/abs/1706.03762".to_string(),
        );
        assert_eq!(paper.id.as_str(), "1706.03762");
        assert_eq!(paper.title, "Attention Is All You Need");
        assert_eq!(paper.authors, "Ashish Vaswani, Noam Shazeer");
        assert_eq!(paper.abstract_text, "The dominant sequence transduction models...");
        assert_eq!(
            paper.published_date,
            "Submitted on 12 Jun 2017 (v1), last revised 2 Aug 2023 (this version, v7)"
        );
        assert_eq!(paper.url, "https://arxiv.org/abs/1706.03762");
    }

    #[test]
    fn test_missing_abstract_degrades_to_sentinel() {
        let html = DETAIL_HTML.replace("blockquote", "section");
        let paper = extract_paper(&html, id("1706.03762"), String::new());
        assert_eq!(paper.abstract_text, NOT_AVAILABLE);
        assert_eq!(paper.title, "Attention Is All You Need");
        assert_eq!(paper.authors, "Ashish Vaswani, Noam Shazeer");
        assert_ne!(paper.published_date, NOT_AVAILABLE);
    }

    #[test]
    fn test_blank_page_is_all_sentinels() {
        let paper = extract_paper("", id("2401.00001"), String::new());
        assert_eq!(paper.title, NOT_AVAILABLE);
        assert_eq!(paper.authors, NOT_AVAILABLE);
        assert_eq!(paper.abstract_text, NOT_AVAILABLE);
        assert_eq!(paper.published_date, NOT_AVAILABLE);
    }
}
