//! Loading risk-model tables from a release.
//!
//! [`ReleaseLoader`] resolves a dated release and reads its tables either as
//! raw polars [`DataFrame`]s or as typed rows.
//!
//! # Example
//!
//! ```no_run
//! use riskfeed_data::loader::ReleaseLoader;
//!
//! # fn main() -> riskfeed_data::Result<()> {
//! let loader = ReleaseLoader::open("data/barra")?;
//! println!("Latest release: {}", loader.date());
//!
//! let exposures = loader.load_style_exposures()?;
//! println!("{} exposure rows", exposures.len());
//! # Ok(())
//! # }
//! ```

use crate::error::{DataError, Result};
use crate::mapping::normalize_gvkey;
use crate::release::{FileFormat, Release, TableFile, TableKind, find_latest_release, find_release};
use crate::schema::{
    ExposureFlags, FactorCovarianceRow, FactorKind, FactorReturnRow, MONTH_END_DATE,
    PortfolioSummaryRow, SpecificRiskRow, StyleExposureRow, required_columns,
};
use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::BTreeSet;
use std::fs::File;
use std::path::Path;
use tracing::debug;

/// Rows scanned when inferring a CSV schema.
const INFER_SCHEMA_ROWS: usize = 10_000;

/// Read a table file into a DataFrame with lower-cased column names.
pub fn read_table(path: &Path, format: FileFormat) -> Result<DataFrame> {
    let mut df = match format {
        FileFormat::Csv => CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(INFER_SCHEMA_ROWS))
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?,
        FileFormat::Parquet => ParquetReader::new(File::open(path)?).finish()?,
    };

    let lowered: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.trim().to_lowercase())
        .collect();
    df.set_column_names(lowered)?;

    debug!(
        "Read {} rows x {} columns from {}",
        df.height(),
        df.width(),
        path.display()
    );
    Ok(df)
}

/// Write a DataFrame to a table file.
pub fn write_table(df: &mut DataFrame, path: &Path, format: FileFormat) -> Result<()> {
    let mut file = File::create(path)?;
    match format {
        FileFormat::Csv => {
            CsvWriter::new(&mut file).include_header(true).finish(df)?;
        }
        FileFormat::Parquet => {
            ParquetWriter::new(&mut file).finish(df)?;
        }
    }
    Ok(())
}

/// Parse a date cell. Accepts `YYYY-MM-DD`, `YYYYMMDD`, and datetime
/// renderings whose first ten characters are a date.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.len() == 8 && raw.chars().all(|c| c.is_ascii_digit()) {
        return NaiveDate::parse_from_str(raw, "%Y%m%d").ok();
    }
    let head = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

/// Typed column access over a loaded table.
struct Columns<'a> {
    df: &'a DataFrame,
    table: &'static str,
}

impl<'a> Columns<'a> {
    fn new(df: &'a DataFrame, kind: TableKind) -> Result<Self> {
        let table = kind.file_stem();
        for name in required_columns(kind) {
            if df.column(name).is_err() {
                return Err(DataError::MissingColumn {
                    table,
                    column: (*name).to_string(),
                });
            }
        }
        Ok(Self { df, table })
    }

    fn column(&self, name: &str) -> Result<&Column> {
        self.df
            .column(name)
            .map_err(|_| DataError::MissingColumn {
                table: self.table,
                column: name.to_string(),
            })
    }

    fn null(&self, name: &str, row: usize) -> DataError {
        DataError::NullValue {
            table: self.table,
            column: name.to_string(),
            row,
        }
    }

    fn strings(&self, name: &str) -> Result<Vec<String>> {
        let casted = self.column(name)?.cast(&DataType::String)?;
        casted
            .str()?
            .into_iter()
            .enumerate()
            .map(|(row, v)| {
                v.map(|s| s.trim().to_string())
                    .ok_or_else(|| self.null(name, row))
            })
            .collect()
    }

    fn floats(&self, name: &str) -> Result<Vec<f64>> {
        let casted = self.column(name)?.cast(&DataType::Float64)?;
        casted
            .f64()?
            .into_iter()
            .enumerate()
            .map(|(row, v)| v.ok_or_else(|| self.null(name, row)))
            .collect()
    }

    fn ints(&self, name: &str) -> Result<Vec<i64>> {
        let casted = self.column(name)?.cast(&DataType::Int64)?;
        casted
            .i64()?
            .into_iter()
            .enumerate()
            .map(|(row, v)| v.ok_or_else(|| self.null(name, row)))
            .collect()
    }

    fn dates(&self, name: &str) -> Result<Vec<NaiveDate>> {
        self.strings(name)?
            .iter()
            .map(|s| {
                parse_date(s).ok_or_else(|| {
                    DataError::Parse(format!("Invalid date '{}' in {}.{}", s, self.table, name))
                })
            })
            .collect()
    }

    fn gvkeys(&self, name: &str) -> Result<Vec<String>> {
        self.strings(name)?
            .iter()
            .map(|s| normalize_gvkey(s))
            .collect()
    }

    /// Optional flag column; missing column or null cells read as no flags.
    fn flags(&self, name: &str) -> Result<Vec<ExposureFlags>> {
        let Ok(column) = self.df.column(name) else {
            return Ok(vec![ExposureFlags::NONE; self.df.height()]);
        };
        let casted = column.cast(&DataType::UInt32)?;
        Ok(casted
            .u32()?
            .into_iter()
            .map(|v| ExposureFlags(v.unwrap_or(0)))
            .collect())
    }
}

/// Restrict dated rows to one month-end date, defaulting to the latest.
fn rows_for_date<T>(
    rows: Vec<T>,
    date: Option<NaiveDate>,
    date_of: impl Fn(&T) -> NaiveDate,
) -> (Option<NaiveDate>, Vec<T>) {
    let target = date.or_else(|| rows.iter().map(&date_of).max());
    let Some(target) = target else {
        return (None, rows);
    };
    let rows = rows.into_iter().filter(|r| date_of(r) == target).collect();
    (Some(target), rows)
}

/// Accessor over the tables of one release.
#[derive(Debug, Clone)]
pub struct ReleaseLoader {
    release: Release,
}

impl ReleaseLoader {
    /// Open the latest release under `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let release = find_latest_release(root.as_ref())?;
        debug!("Opened release {} under {}", release.date, root.as_ref().display());
        Ok(Self { release })
    }

    /// Open the release for a specific date under `root`.
    pub fn open_date<P: AsRef<Path>>(root: P, date: NaiveDate) -> Result<Self> {
        Ok(Self {
            release: find_release(root.as_ref(), date)?,
        })
    }

    /// Wrap an already discovered release.
    pub const fn for_release(release: Release) -> Self {
        Self { release }
    }

    /// The underlying release.
    pub const fn release(&self) -> &Release {
        &self.release
    }

    /// Release date.
    pub const fn date(&self) -> NaiveDate {
        self.release.date
    }

    /// Whether the release carries a table.
    pub fn has_table(&self, kind: TableKind) -> bool {
        self.release.file(kind).is_some()
    }

    fn table_file(&self, kind: TableKind) -> Result<&TableFile> {
        self.release.file(kind).ok_or(DataError::MissingTable {
            date: self.release.date,
            table: kind.file_stem(),
        })
    }

    /// Load a table as a DataFrame, preferring parquet over CSV.
    pub fn load_table(&self, kind: TableKind) -> Result<DataFrame> {
        let file = self.table_file(kind)?;
        read_table(&file.path, file.format)
    }

    /// Load the factor covariance table.
    pub fn load_factor_covariance(&self) -> Result<Vec<FactorCovarianceRow>> {
        let df = self.load_table(TableKind::FactorCovariance)?;
        let cols = Columns::new(&df, TableKind::FactorCovariance)?;
        let dates = cols.dates(MONTH_END_DATE)?;
        let factor_i = cols.strings("factor_i")?;
        let factor_j = cols.strings("factor_j")?;
        let covariance = cols.floats("covariance")?;

        Ok(dates
            .into_iter()
            .zip(factor_i)
            .zip(factor_j)
            .zip(covariance)
            .map(
                |(((month_end_date, factor_i), factor_j), covariance)| FactorCovarianceRow {
                    month_end_date,
                    factor_i,
                    factor_j,
                    covariance,
                },
            )
            .collect())
    }

    /// Covariance rows for one month-end date (latest when `None`).
    ///
    /// Returns the resolved date alongside the rows.
    pub fn load_factor_covariance_for(
        &self,
        date: Option<NaiveDate>,
    ) -> Result<(NaiveDate, Vec<FactorCovarianceRow>)> {
        let rows = self.load_factor_covariance()?;
        match rows_for_date(rows, date, |r| r.month_end_date) {
            (Some(date), rows) if !rows.is_empty() => Ok((date, rows)),
            (date, _) => Err(DataError::Parse(format!(
                "No covariance rows for {}",
                date.map_or_else(|| "any date".to_string(), |d| d.to_string())
            ))),
        }
    }

    /// Load the factor returns table.
    pub fn load_factor_returns(&self) -> Result<Vec<FactorReturnRow>> {
        let df = self.load_table(TableKind::FactorReturns)?;
        let cols = Columns::new(&df, TableKind::FactorReturns)?;
        let dates = cols.dates(MONTH_END_DATE)?;
        let factors = cols.strings("factor")?;
        let returns = cols.floats("factor_return")?;

        Ok(dates
            .into_iter()
            .zip(factors)
            .zip(returns)
            .map(|((month_end_date, factor), factor_return)| FactorReturnRow {
                month_end_date,
                factor,
                factor_return,
            })
            .collect())
    }

    /// Load the style exposures table. GVKEYs are normalized.
    pub fn load_style_exposures(&self) -> Result<Vec<StyleExposureRow>> {
        let df = self.load_table(TableKind::StyleExposures)?;
        let cols = Columns::new(&df, TableKind::StyleExposures)?;
        let dates = cols.dates(MONTH_END_DATE)?;
        let gvkeys = cols.gvkeys("gvkey")?;
        let factors = cols.strings("factor")?;
        let exposures = cols.floats("exposure")?;
        let flags = cols.flags("flags")?;

        Ok(dates
            .into_iter()
            .zip(gvkeys)
            .zip(factors)
            .zip(exposures)
            .zip(flags)
            .map(
                |((((month_end_date, gvkey), factor), exposure), flags)| StyleExposureRow {
                    month_end_date,
                    gvkey,
                    factor,
                    exposure,
                    flags,
                },
            )
            .collect())
    }

    /// Exposure rows for one month-end date (latest when `None`).
    pub fn load_style_exposures_for(
        &self,
        date: Option<NaiveDate>,
    ) -> Result<Vec<StyleExposureRow>> {
        let rows = self.load_style_exposures()?;
        Ok(rows_for_date(rows, date, |r| r.month_end_date).1)
    }

    /// Load the specific risk table. GVKEYs are normalized.
    pub fn load_specific_risk(&self) -> Result<Vec<SpecificRiskRow>> {
        let df = self.load_table(TableKind::SpecificRisk)?;
        let cols = Columns::new(&df, TableKind::SpecificRisk)?;
        let dates = cols.dates(MONTH_END_DATE)?;
        let gvkeys = cols.gvkeys("gvkey")?;
        let vars = cols.floats("specific_var")?;

        Ok(dates
            .into_iter()
            .zip(gvkeys)
            .zip(vars)
            .map(|((month_end_date, gvkey), specific_var)| SpecificRiskRow {
                month_end_date,
                gvkey,
                specific_var,
            })
            .collect())
    }

    /// Specific risk rows for one month-end date (latest when `None`).
    pub fn load_specific_risk_for(&self, date: Option<NaiveDate>) -> Result<Vec<SpecificRiskRow>> {
        let rows = self.load_specific_risk()?;
        Ok(rows_for_date(rows, date, |r| r.month_end_date).1)
    }

    /// Load the portfolio summary table.
    pub fn load_portfolio_summary(&self) -> Result<Vec<PortfolioSummaryRow>> {
        let df = self.load_table(TableKind::PortfolioSummary)?;
        let cols = Columns::new(&df, TableKind::PortfolioSummary)?;
        let factors = cols.strings("factor")?;
        let exposures = cols.floats("portfolio_exposure")?;
        let contributions = cols.floats("variance_contribution")?;
        let types = cols.strings("type")?;
        let ranks = cols.ints("top_n")?;

        factors
            .into_iter()
            .zip(exposures)
            .zip(contributions)
            .zip(types)
            .zip(ranks)
            .map(
                |((((factor, portfolio_exposure), variance_contribution), kind), top_n)| {
                    Ok(PortfolioSummaryRow {
                        factor,
                        portfolio_exposure,
                        variance_contribution,
                        factor_type: kind.parse::<FactorKind>()?,
                        top_n,
                    })
                },
            )
            .collect()
    }

    /// Distinct month-end dates present in a dated table, ascending.
    pub fn month_end_dates(&self, kind: TableKind) -> Result<Vec<NaiveDate>> {
        if !kind.is_dated() {
            return Ok(Vec::new());
        }
        let df = self.load_table(kind)?;
        let cols = Columns::new(&df, kind)?;
        let dates: BTreeSet<NaiveDate> = cols.dates(MONTH_END_DATE)?.into_iter().collect();
        Ok(dates.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("2024-05-31"), Some(date(2024, 5, 31)));
        assert_eq!(parse_date("20240531"), Some(date(2024, 5, 31)));
        assert_eq!(parse_date("2024-05-31 00:00:00"), Some(date(2024, 5, 31)));
        assert_eq!(parse_date("31/05/2024"), None);
    }

    #[test]
    fn test_load_style_exposures_normalizes_gvkeys() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "style_exposures_2024-05-31.csv",
            "month_end_date,gvkey,factor,exposure,flags\n\
             2024-05-31,1690,USFASTD_SIZE,1.25,0\n\
             2024-05-31,012141,USFASTD_SIZE,1.10,\n\
             2024-04-30,1690,USFASTD_SIZE,1.20,2\n",
        );

        let loader = ReleaseLoader::open(dir.path()).unwrap();
        let rows = loader.load_style_exposures().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].gvkey, "001690");
        assert_eq!(rows[1].gvkey, "012141");
        assert!(rows[1].flags.is_empty());
        assert_eq!(rows[2].flags, ExposureFlags(2));

        let latest = loader.load_style_exposures_for(None).unwrap();
        assert_eq!(latest.len(), 2);
    }

    #[test]
    fn test_missing_column_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "specific_risk_2024-05-31.csv",
            "month_end_date,gvkey\n2024-05-31,1690\n",
        );

        let loader = ReleaseLoader::open(dir.path()).unwrap();
        let err = loader.load_specific_risk().unwrap_err();
        assert!(matches!(err, DataError::MissingColumn { .. }));
    }

    #[test]
    fn test_missing_table_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "factor_returns_2024-05-31.csv",
            "month_end_date,factor,factor_return\n2024-05-31,USFASTD_BETA,0.01\n",
        );

        let loader = ReleaseLoader::open(dir.path()).unwrap();
        assert!(loader.has_table(TableKind::FactorReturns));
        let err = loader.load_factor_covariance().unwrap_err();
        assert!(matches!(err, DataError::MissingTable { .. }));
    }

    #[test]
    fn test_upper_case_headers_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "factor_returns_2024-05-31.csv",
            "MONTH_END_DATE,FACTOR,FACTOR_RETURN\n20240531,USFASTD_BETA,0.01\n",
        );

        let loader = ReleaseLoader::open(dir.path()).unwrap();
        let rows = loader.load_factor_returns().unwrap();
        assert_eq!(rows[0].month_end_date, date(2024, 5, 31));
        assert_eq!(rows[0].factor, "USFASTD_BETA");
    }

    #[test]
    fn test_portfolio_summary_rejects_unknown_type() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "portfolio_summary_2024-05-31.csv",
            "factor,portfolio_exposure,variance_contribution,type,top_n\n\
             USFASTD_BETA,0.9,0.002,sector,1\n",
        );

        let loader = ReleaseLoader::open(dir.path()).unwrap();
        assert!(loader.load_portfolio_summary().is_err());
    }
}
