//! CSV persistence for scraped papers.
//!
//! The table is unique by paper id. Merging appends the new batch after the
//! existing rows and keeps the last record per id, so a fresh scrape always
//! replaces what was stored before, field for field. The file is rewritten
//! through a temporary file in the same directory and renamed into place.

use crate::error::{ArxivError, Result};
use crate::extract::{Paper, PaperId};
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Column order of the persisted table
pub const COLUMNS: &[&str] = &[
    "id",
    "title",
    "authors",
    "abstract",
    "published_date",
    "url",
    "last_updated",
];

/// A stored paper: the scraped fields plus the merge timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperRecord {
    pub id: PaperId,
    pub title: String,
    pub authors: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub published_date: String,
    pub url: String,
    #[serde(with = "timestamp")]
    pub last_updated: NaiveDateTime,
}

impl PaperRecord {
    pub fn stamped(paper: Paper, at: NaiveDateTime) -> Self {
        Self {
            id: paper.id,
            title: paper.title,
            authors: paper.authors,
            abstract_text: paper.abstract_text,
            published_date: paper.published_date,
            url: paper.url,
            last_updated: at,
        }
    }
}

/// Row counts of one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    /// Rows in the table before the merge
    pub previous_rows: usize,
    /// Records in the merged batch
    pub incoming_rows: usize,
    /// Rows in the table after the merge
    pub table_rows: usize,
}

/// The persisted paper table.
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole table. A missing file is an empty table.
    pub fn load(&self) -> Result<Vec<PaperRecord>> {
        if !self.path.exists() {
            debug!(path = ?self.path, "No existing table");
            return Ok(Vec::new());
        }

        let mut reader = csv::Reader::from_path(&self.path)?;
        let records = reader
            .deserialize()
            .collect::<std::result::Result<Vec<PaperRecord>, csv::Error>>()
            .map_err(|e| {
                ArxivError::Persistence(format!("Cannot read table {:?}: {}", self.path, e))
            })?;
        Ok(records)
    }

    /// Merge `papers` stamped with the current local time.
    pub fn merge(&self, papers: Vec<Paper>) -> Result<MergeSummary> {
        self.merge_at(papers, Local::now().naive_local())
    }

    /// Merge `papers` stamped with `at`.
    ///
    /// An empty batch leaves the table untouched. On id conflicts the
    /// incoming record wins entirely, even when it carries less data; it
    /// takes the row position of the id's first appearance.
    pub fn merge_at(&self, papers: Vec<Paper>, at: NaiveDateTime) -> Result<MergeSummary> {
        if papers.is_empty() {
            debug!(path = ?self.path, "Empty batch, table untouched");
            return Ok(MergeSummary::default());
        }

        let existing = self.load()?;
        let previous_rows = existing.len();
        let incoming_rows = papers.len();
        let incoming = papers.into_iter().map(|p| PaperRecord::stamped(p, at));

        let rows = keep_last_by_id(existing.into_iter().chain(incoming));
        self.write_atomic(&rows)?;

        let summary = MergeSummary {
            previous_rows,
            incoming_rows,
            table_rows: rows.len(),
        };
        info!(
            path = ?self.path,
            previous = summary.previous_rows,
            incoming = summary.incoming_rows,
            total = summary.table_rows,
            "Merged records"
        );
        Ok(summary)
    }

    /// Replace the table with `rows` via temp file + rename.
    fn write_atomic(&self, rows: &[PaperRecord]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(tmp.as_file_mut());
            writer.write_record(COLUMNS)?;
            for row in rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
        if let Ok(existing) = std::fs::metadata(&self.path) {
            tmp.as_file().set_permissions(existing.permissions())?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| {
            ArxivError::Persistence(format!("Cannot replace {:?}: {}", self.path, e.error))
        })?;
        Ok(())
    }
}

/// Keep the last record per id at the position where the id first appeared.
fn keep_last_by_id(records: impl Iterator<Item = PaperRecord>) -> Vec<PaperRecord> {
    let mut position: HashMap<PaperId, usize> = HashMap::new();
    let mut rows: Vec<PaperRecord> = Vec::new();

    for record in records {
        match position.get(&record.id) {
            Some(&index) => rows[index] = record,
            None => {
                position.insert(record.id.clone(), rows.len());
                rows.push(record);
            }
        }
    }
    rows
}

/// `last_updated` column format, compatible with pandas' default datetime output.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

    const ACCEPTED: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
    ];

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp '{}'", raw)))
    }

    pub fn parse(raw: &str) -> Option<NaiveDateTime> {
        let raw = raw.trim();
        ACCEPTED
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_local()))
    }
}
