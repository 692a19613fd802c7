//! Discovery of dated risk-model releases on disk.
//!
//! A release is the set of table exports sharing one date. Files are named
//! `<table>_<YYYY-MM-DD>.<csv|parquet>` and live either directly under the
//! scanned directory or inside a subdirectory named after the release date:
//!
//! ```text
//! barra/
//! ├── 2024-05-31/
//! │   ├── factor_covariance_2024-05-31.csv
//! │   ├── factor_covariance_2024-05-31.parquet
//! │   └── ...
//! └── specific_risk_2024-04-30.csv
//! ```

use crate::error::{DataError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Date format used in release directory and file names.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Tables exported by the risk-model vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    /// Factor-by-factor covariance, long format
    FactorCovariance,
    /// Monthly factor returns
    FactorReturns,
    /// Security exposures to each factor
    StyleExposures,
    /// Security specific (idiosyncratic) variance
    SpecificRisk,
    /// Per-factor portfolio risk summary
    PortfolioSummary,
}

impl TableKind {
    /// Returns all tables in export order.
    pub const fn all() -> [Self; 5] {
        [
            Self::FactorCovariance,
            Self::FactorReturns,
            Self::StyleExposures,
            Self::SpecificRisk,
            Self::PortfolioSummary,
        ]
    }

    /// File name stem of the table.
    pub const fn file_stem(&self) -> &'static str {
        match self {
            Self::FactorCovariance => "factor_covariance",
            Self::FactorReturns => "factor_returns",
            Self::StyleExposures => "style_exposures",
            Self::SpecificRisk => "specific_risk",
            Self::PortfolioSummary => "portfolio_summary",
        }
    }

    /// Parse a table from its file stem.
    pub fn from_stem(stem: &str) -> Option<Self> {
        Self::all().into_iter().find(|kind| kind.file_stem() == stem)
    }

    /// Whether rows of this table carry a `month_end_date` column.
    pub const fn is_dated(&self) -> bool {
        !matches!(self, Self::PortfolioSummary)
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_stem())
    }
}

impl FromStr for TableKind {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        let stem = match normalized.as_str() {
            "covariance" | "cov" => "factor_covariance",
            "returns" => "factor_returns",
            "exposures" => "style_exposures",
            "specific" => "specific_risk",
            "portfolio" | "summary" => "portfolio_summary",
            other => other,
        };
        Self::from_stem(stem).ok_or_else(|| DataError::Parse(format!("Unknown table: {}", s)))
    }
}

/// On-disk format of a table file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// Comma-separated values
    Csv,
    /// Apache Parquet
    Parquet,
}

impl FileFormat {
    /// File extension for this format.
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Parquet => "parquet",
        }
    }

    /// Parse a format from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "parquet" | "pq" => Some(Self::Parquet),
            _ => None,
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A single table export file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFile {
    /// Which table the file holds
    pub kind: TableKind,
    /// Release date encoded in the file name
    pub date: NaiveDate,
    /// File format
    pub format: FileFormat,
    /// Full path to the file
    pub path: PathBuf,
}

impl TableFile {
    /// Canonical file name for a table export.
    pub fn file_name(kind: TableKind, date: NaiveDate, format: FileFormat) -> String {
        format!(
            "{}_{}.{}",
            kind.file_stem(),
            date.format(DATE_FORMAT),
            format.extension()
        )
    }

    /// Build a table file from a path, if its name follows the export convention.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let (kind, date, format) = parse_file_name(name)?;
        Some(Self {
            kind,
            date,
            format,
            path: path.to_path_buf(),
        })
    }
}

/// Parse `<table>_<YYYY-MM-DD>.<ext>` into its parts.
pub fn parse_file_name(name: &str) -> Option<(TableKind, NaiveDate, FileFormat)> {
    let (stem, ext) = name.rsplit_once('.')?;
    let format = FileFormat::from_extension(ext)?;
    let (table, date) = stem.rsplit_once('_')?;
    let kind = TableKind::from_stem(table)?;
    let date = NaiveDate::parse_from_str(date, DATE_FORMAT).ok()?;
    Some((kind, date, format))
}

/// A dated snapshot of risk-model exports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Release date
    pub date: NaiveDate,
    /// Every file found for this date
    pub files: Vec<TableFile>,
}

impl Release {
    /// Preferred file for a table. Parquet wins over CSV when both exist.
    pub fn file(&self, kind: TableKind) -> Option<&TableFile> {
        self.file_with_format(kind, FileFormat::Parquet)
            .or_else(|| self.file_with_format(kind, FileFormat::Csv))
    }

    /// File for a table in a specific format.
    pub fn file_with_format(&self, kind: TableKind, format: FileFormat) -> Option<&TableFile> {
        self.files
            .iter()
            .find(|f| f.kind == kind && f.format == format)
    }

    /// Tables present in this release, in export order.
    pub fn tables(&self) -> Vec<TableKind> {
        TableKind::all()
            .into_iter()
            .filter(|kind| self.files.iter().any(|f| f.kind == *kind))
            .collect()
    }

    /// Tables absent from this release.
    pub fn missing_tables(&self) -> Vec<TableKind> {
        TableKind::all()
            .into_iter()
            .filter(|kind| self.files.iter().all(|f| f.kind != *kind))
            .collect()
    }

    /// Whether every table is present.
    pub fn is_complete(&self) -> bool {
        self.missing_tables().is_empty()
    }

    /// Directory holding the release files.
    pub fn directory(&self) -> Option<&Path> {
        self.files.first().and_then(|f| f.path.parent())
    }
}

/// List every release under `root`, oldest first.
///
/// Loose files directly under `root` and files inside `YYYY-MM-DD`
/// subdirectories are both considered. Other entries are ignored.
pub fn list_releases(root: &Path) -> Result<Vec<Release>> {
    let mut by_date: BTreeMap<NaiveDate, Vec<TableFile>> = BTreeMap::new();

    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            let dir_date = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| NaiveDate::parse_from_str(n, DATE_FORMAT).ok());
            let Some(dir_date) = dir_date else {
                debug!("Skipping non-release directory {}", path.display());
                continue;
            };
            for inner in fs::read_dir(&path)? {
                collect_file(&inner?.path(), Some(dir_date), &mut by_date);
            }
        } else {
            collect_file(&path, None, &mut by_date);
        }
    }

    Ok(by_date
        .into_iter()
        .map(|(date, mut files)| {
            files.sort_by(|a, b| (a.kind, a.format).cmp(&(b.kind, b.format)));
            Release { date, files }
        })
        .collect())
}

/// Files inside a dated directory belong to that directory's release,
/// whatever date their name carries.
fn collect_file(
    path: &Path,
    dir_date: Option<NaiveDate>,
    by_date: &mut BTreeMap<NaiveDate, Vec<TableFile>>,
) {
    let Some(file) = TableFile::from_path(path) else {
        debug!("Ignoring unrecognized file {}", path.display());
        return;
    };
    let release_date = dir_date.unwrap_or(file.date);
    if release_date != file.date {
        debug!(
            "{} is stamped {} but filed under release {}",
            path.display(),
            file.date,
            release_date
        );
    }
    let files = by_date.entry(release_date).or_default();
    if files
        .iter()
        .any(|f| f.kind == file.kind && f.format == file.format)
    {
        debug!("Duplicate export {}, keeping the first", path.display());
        return;
    }
    files.push(file);
}

/// Find the most recent release under `root`.
pub fn find_latest_release(root: &Path) -> Result<Release> {
    list_releases(root)?
        .pop()
        .ok_or_else(|| DataError::NoRelease(root.to_path_buf()))
}

/// Find the release for a specific date under `root`.
pub fn find_release(root: &Path, date: NaiveDate) -> Result<Release> {
    list_releases(root)?
        .into_iter()
        .find(|r| r.date == date)
        .ok_or_else(|| DataError::ReleaseNotFound {
            root: root.to_path_buf(),
            date,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn touch(path: &Path) {
        File::create(path).unwrap();
    }

    #[test]
    fn test_parse_file_name() {
        let parsed = parse_file_name("factor_covariance_2024-05-31.csv").unwrap();
        assert_eq!(parsed.0, TableKind::FactorCovariance);
        assert_eq!(parsed.1, date(2024, 5, 31));
        assert_eq!(parsed.2, FileFormat::Csv);

        let parsed = parse_file_name("specific_risk_2023-12-29.parquet").unwrap();
        assert_eq!(parsed.0, TableKind::SpecificRisk);
        assert_eq!(parsed.2, FileFormat::Parquet);
    }

    #[test]
    fn test_parse_file_name_rejects_noise() {
        assert!(parse_file_name("README.md").is_none());
        assert!(parse_file_name("factor_covariance.csv").is_none());
        assert!(parse_file_name("factor_covariance_2024-13-01.csv").is_none());
        assert!(parse_file_name("unknown_table_2024-05-31.csv").is_none());
        assert!(parse_file_name("factor_covariance_2024-05-31.xlsx").is_none());
    }

    #[test]
    fn test_file_name_round_trip() {
        let name = TableFile::file_name(
            TableKind::StyleExposures,
            date(2024, 1, 31),
            FileFormat::Parquet,
        );
        assert_eq!(name, "style_exposures_2024-01-31.parquet");
        assert!(parse_file_name(&name).is_some());
    }

    #[test]
    fn test_table_kind_from_str_aliases() {
        assert_eq!(
            "covariance".parse::<TableKind>().unwrap(),
            TableKind::FactorCovariance
        );
        assert_eq!(
            "style-exposures".parse::<TableKind>().unwrap(),
            TableKind::StyleExposures
        );
        assert!("nope".parse::<TableKind>().is_err());
    }

    #[test]
    fn test_find_latest_release_prefers_newest_date() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("2024-04-30");
        let new = dir.path().join("2024-05-31");
        fs::create_dir(&old).unwrap();
        fs::create_dir(&new).unwrap();
        touch(&old.join("factor_returns_2024-04-30.csv"));
        touch(&new.join("factor_returns_2024-05-31.csv"));
        touch(&new.join("specific_risk_2024-05-31.csv"));
        touch(&dir.path().join("notes.txt"));

        let release = find_latest_release(dir.path()).unwrap();
        assert_eq!(release.date, date(2024, 5, 31));
        assert_eq!(release.files.len(), 2);
        assert_eq!(release.directory(), Some(new.as_path()));
        assert!(!release.is_complete());
        assert_eq!(
            release.tables(),
            vec![TableKind::FactorReturns, TableKind::SpecificRisk]
        );
    }

    #[test]
    fn test_loose_files_form_a_release() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("factor_returns_2024-06-28.csv"));
        touch(&dir.path().join("factor_returns_2024-06-28.parquet"));

        let releases = list_releases(dir.path()).unwrap();
        assert_eq!(releases.len(), 1);

        let release = &releases[0];
        let preferred = release.file(TableKind::FactorReturns).unwrap();
        assert_eq!(preferred.format, FileFormat::Parquet);
        assert!(
            release
                .file_with_format(TableKind::FactorReturns, FileFormat::Csv)
                .is_some()
        );
    }

    #[test]
    fn test_dated_directory_groups_mismatched_file_dates() {
        let dir = tempfile::tempdir().unwrap();
        let release_dir = dir.path().join("2024-05-31");
        fs::create_dir(&release_dir).unwrap();
        touch(&release_dir.join("factor_returns_2024-05-30.csv"));
        touch(&release_dir.join("specific_risk_2024-05-31.csv"));

        let releases = list_releases(dir.path()).unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].date, date(2024, 5, 31));
        assert_eq!(
            releases[0].tables(),
            vec![TableKind::FactorReturns, TableKind::SpecificRisk]
        );
        let returns = releases[0].file(TableKind::FactorReturns).unwrap();
        assert_eq!(returns.date, date(2024, 5, 30));
    }

    #[test]
    fn test_undated_directories_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("archive");
        fs::create_dir(&archive).unwrap();
        touch(&archive.join("factor_returns_2030-01-31.csv"));
        touch(&dir.path().join("factor_returns_2024-06-28.csv"));

        let release = find_latest_release(dir.path()).unwrap();
        assert_eq!(release.date, date(2024, 6, 28));
    }

    #[test]
    fn test_no_release() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_latest_release(dir.path()).unwrap_err();
        assert!(matches!(err, DataError::NoRelease(_)));

        let err = find_release(dir.path(), date(2024, 1, 31)).unwrap_err();
        assert!(matches!(err, DataError::ReleaseNotFound { .. }));
    }
}
