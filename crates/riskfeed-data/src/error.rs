//! Error types for data operations.

use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for data operations.
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors that can occur during data operations.
#[derive(Debug, Error)]
pub enum DataError {
    /// No dated release found under a directory
    #[error("No release found under {}", .0.display())]
    NoRelease(PathBuf),

    /// Release for a specific date not found
    #[error("Release {date} not found under {}", root.display())]
    ReleaseNotFound {
        /// Directory that was scanned
        root: PathBuf,
        /// Requested release date
        date: NaiveDate,
    },

    /// Table file missing from a release
    #[error("Release {date} has no {table} table")]
    MissingTable {
        /// Release date
        date: NaiveDate,
        /// File stem of the missing table
        table: &'static str,
    },

    /// Required column missing from a table
    #[error("Table {table} is missing column '{column}'")]
    MissingColumn {
        /// File stem of the table
        table: &'static str,
        /// Name of the missing column
        column: String,
    },

    /// Null value in a required column
    #[error("Table {table} has a null '{column}' at row {row}")]
    NullValue {
        /// File stem of the table
        table: &'static str,
        /// Column name
        column: String,
        /// Zero-based row index
        row: usize,
    },

    /// Invalid GVKEY
    #[error("Invalid GVKEY: '{0}'")]
    InvalidGvkey(String),

    /// Data parsing error
    #[error("Data parsing error: {0}")]
    Parse(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Polars error
    #[error("Polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// XML parsing error
    #[error("XML parsing error: {0}")]
    XmlParse(String),

    /// XBRL parsing error
    #[error("XBRL parsing error: {0}")]
    XbrlParse(String),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
