//! Report files written next to an imported release.

use crate::summary::ReleaseSummary;
use riskfeed_data::DataError;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Markdown summary file name.
pub const SUMMARY_MARKDOWN: &str = "SUMMARY.md";

/// JSON summary file name.
pub const SUMMARY_JSON: &str = "summary.json";

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Table loading error.
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    /// Polars error.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),
}

/// Paths of the written report files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportFiles {
    /// Markdown summary
    pub markdown: PathBuf,
    /// JSON summary
    pub json: PathBuf,
}

/// Write `SUMMARY.md` and `summary.json` into `dir`.
pub fn write_summary_files(dir: &Path, summary: &ReleaseSummary) -> Result<ReportFiles, ReportError> {
    let markdown = dir.join(SUMMARY_MARKDOWN);
    let json = dir.join(SUMMARY_JSON);

    fs::write(&markdown, summary.to_markdown())?;
    fs::write(&json, summary.to_json()?)?;
    debug!("Wrote {} and {}", markdown.display(), json.display());

    Ok(ReportFiles { markdown, json })
}

/// Read a previously written `summary.json`.
pub fn read_summary(dir: &Path) -> Result<ReleaseSummary, ReportError> {
    let content = fs::read_to_string(dir.join(SUMMARY_JSON))?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    #[test]
    fn test_write_and_read_summary() {
        let dir = tempfile::tempdir().unwrap();
        let summary = ReleaseSummary {
            date: NaiveDate::from_ymd_opt(2024, 5, 31).unwrap(),
            generated_at: Utc::now(),
            tables: Vec::new(),
            missing: Vec::new(),
        };

        let files = write_summary_files(dir.path(), &summary).unwrap();
        assert!(files.markdown.exists());
        assert!(files.json.ends_with(SUMMARY_JSON));

        let back = read_summary(dir.path()).unwrap();
        assert_eq!(back, summary);
    }

    #[test]
    fn test_read_summary_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(read_summary(dir.path()), Err(ReportError::Io(_))));
    }
}
