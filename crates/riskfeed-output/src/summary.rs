//! Release summaries.
//!
//! A [`ReleaseSummary`] describes the shape of every table in a release: row
//! and column counts, the month-end dates covered and the number of distinct
//! factors and securities.

use crate::report::ReportError;
use chrono::{DateTime, NaiveDate, Utc};
use polars::prelude::*;
use riskfeed_data::loader::parse_date;
use riskfeed_data::schema::MONTH_END_DATE;
use riskfeed_data::{FileFormat, ReleaseLoader, TableKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Shape of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSummary {
    /// Table kind
    pub table: TableKind,
    /// Format of the file that was read
    pub format: FileFormat,
    /// File name
    pub file_name: String,
    /// Number of data rows
    pub rows: usize,
    /// Number of columns
    pub columns: usize,
    /// Number of distinct month-end dates
    pub dates: usize,
    /// Earliest month-end date
    pub first_date: Option<NaiveDate>,
    /// Latest month-end date
    pub last_date: Option<NaiveDate>,
    /// Number of distinct factors, for tables keyed by factor
    pub factors: Option<usize>,
    /// Number of distinct GVKEYs, for tables keyed by security
    pub gvkeys: Option<usize>,
}

fn distinct(df: &DataFrame, column: &str) -> Result<Option<usize>, ReportError> {
    match df.column(column) {
        Ok(c) => Ok(Some(c.as_materialized_series().n_unique()?)),
        Err(_) => Ok(None),
    }
}

impl TableSummary {
    /// Summarize a loaded table.
    pub fn from_frame(
        table: TableKind,
        format: FileFormat,
        file_name: String,
        df: &DataFrame,
    ) -> Result<Self, ReportError> {
        let dates: BTreeSet<NaiveDate> = match df.column(MONTH_END_DATE) {
            Ok(c) => c
                .cast(&DataType::String)?
                .str()?
                .into_iter()
                .flatten()
                .filter_map(parse_date)
                .collect(),
            Err(_) => BTreeSet::new(),
        };

        let factors = match distinct(df, "factor")? {
            Some(n) => Some(n),
            None => match (df.column("factor_i"), df.column("factor_j")) {
                (Ok(i), Ok(j)) => {
                    let mut names: BTreeSet<String> = BTreeSet::new();
                    for c in [i, j] {
                        let s = c.cast(&DataType::String)?;
                        names.extend(s.str()?.into_iter().flatten().map(str::to_string));
                    }
                    Some(names.len())
                }
                _ => None,
            },
        };

        Ok(Self {
            table,
            format,
            file_name,
            rows: df.height(),
            columns: df.width(),
            dates: dates.len(),
            first_date: dates.first().copied(),
            last_date: dates.last().copied(),
            factors,
            gvkeys: distinct(df, "gvkey")?,
        })
    }
}

/// Summary of a whole release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseSummary {
    /// Release date
    pub date: NaiveDate,
    /// When the summary was generated
    pub generated_at: DateTime<Utc>,
    /// Tables present, in canonical order
    pub tables: Vec<TableSummary>,
    /// Tables absent from the release
    pub missing: Vec<TableKind>,
}

impl ReleaseSummary {
    /// Summarize every table of a release.
    pub fn from_loader(loader: &ReleaseLoader) -> Result<Self, ReportError> {
        let release = loader.release();
        let mut tables = Vec::new();
        for kind in TableKind::all() {
            let Some(file) = release.file(kind) else {
                continue;
            };
            let df = loader.load_table(kind)?;
            let file_name = file
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            tables.push(TableSummary::from_frame(kind, file.format, file_name, &df)?);
        }

        Ok(Self {
            date: release.date,
            generated_at: Utc::now(),
            tables,
            missing: release.missing_tables(),
        })
    }

    /// Total rows across all tables
    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(|t| t.rows).sum()
    }

    /// Summary of one table
    pub fn table(&self, kind: TableKind) -> Option<&TableSummary> {
        self.tables.iter().find(|t| t.table == kind)
    }

    /// Convert to a pretty JSON string.
    pub fn to_json(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Format as Markdown.
    pub fn to_markdown(&self) -> String {
        let opt = |v: Option<usize>| v.map_or_else(|| "-".to_string(), |n| n.to_string());
        let mut output = String::new();

        output.push_str(&format!("# Release {}\n\n", self.date));
        output.push_str(&format!(
            "Generated {}\n\n",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));

        output.push_str("| Table | File | Rows | Columns | Dates | Range | Factors | GVKEYs |\n");
        output.push_str("|-------|------|------|---------|-------|-------|---------|--------|\n");
        for t in &self.tables {
            let range = match (t.first_date, t.last_date) {
                (Some(a), Some(b)) if a == b => a.to_string(),
                (Some(a), Some(b)) => format!("{} .. {}", a, b),
                _ => "-".to_string(),
            };
            output.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} | {} | {} |\n",
                t.table,
                t.file_name,
                t.rows,
                t.columns,
                t.dates,
                range,
                opt(t.factors),
                opt(t.gvkeys),
            ));
        }

        if !self.missing.is_empty() {
            let names: Vec<String> = self.missing.iter().map(|k| k.to_string()).collect();
            output.push_str(&format!("\nMissing tables: {}\n", names.join(", ")));
        }

        output
    }
}

impl fmt::Display for ReleaseSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Release {}", self.date)?;
        for t in &self.tables {
            writeln!(
                f,
                "  {:<20} {:>10} rows  {:>3} dates  ({})",
                t.table.to_string(),
                t.rows,
                t.dates,
                t.format.extension()
            )?;
        }
        for kind in &self.missing {
            writeln!(f, "  {:<20} missing", kind.to_string())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn loader() -> (tempfile::TempDir, ReleaseLoader) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("factor_covariance_2024-05-31.csv"),
            "month_end_date,factor_i,factor_j,covariance\n\
             2024-04-30,BETA,BETA,0.05\n\
             2024-05-31,BETA,BETA,0.04\n\
             2024-05-31,BETA,SIZE,0.01\n\
             2024-05-31,SIZE,SIZE,0.09\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("specific_risk_2024-05-31.csv"),
            "month_end_date,gvkey,specific_var\n2024-05-31,1690,0.02\n2024-05-31,12141,0.01\n",
        )
        .unwrap();
        let loader = ReleaseLoader::open(dir.path()).unwrap();
        (dir, loader)
    }

    #[test]
    fn test_release_summary() {
        let (_dir, loader) = loader();
        let summary = ReleaseSummary::from_loader(&loader).unwrap();

        assert_eq!(summary.tables.len(), 2);
        assert_eq!(summary.total_rows(), 6);
        assert_eq!(summary.missing.len(), 3);

        let cov = summary.table(TableKind::FactorCovariance).unwrap();
        assert_eq!(cov.rows, 4);
        assert_eq!(cov.dates, 2);
        assert_eq!(cov.factors, Some(2));
        assert_eq!(cov.gvkeys, None);
        assert_eq!(cov.first_date, NaiveDate::from_ymd_opt(2024, 4, 30));

        let spec = summary.table(TableKind::SpecificRisk).unwrap();
        assert_eq!(spec.gvkeys, Some(2));
        assert_eq!(spec.factors, None);
    }

    #[test]
    fn test_markdown_and_json() {
        let (_dir, loader) = loader();
        let summary = ReleaseSummary::from_loader(&loader).unwrap();

        let md = summary.to_markdown();
        assert!(md.starts_with("# Release 2024-05-31"));
        assert!(md.contains("| factor_covariance | factor_covariance_2024-05-31.csv | 4 |"));
        assert!(md.contains("2024-04-30 .. 2024-05-31"));
        assert!(md.contains("Missing tables: factor_returns"));

        let json = summary.to_json().unwrap();
        let back: ReleaseSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, summary);
    }
}
