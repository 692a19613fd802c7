//! Data-shape checks over the tables of a release.
//!
//! Checks never fail on bad data; each problem becomes a [`Finding`] in the
//! [`QualityReport`]. Only errors reading the tables themselves are returned
//! as `Err`.

use chrono::NaiveDate;
use riskfeed_data::schema::{
    FactorCovarianceRow, FactorReturnRow, PortfolioSummaryRow, SpecificRiskRow, StyleExposureRow,
    key_columns,
};
use riskfeed_data::{GvkeyMapper, ReleaseLoader, TableKind};
use riskfeed_risk::{CovarianceMatrix, expected_pair_count};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::hash::Hash;
use tracing::{debug, info};

/// Identifiers listed in a finding before the rest is elided.
const SAMPLE_SIZE: usize = 5;

/// Default tolerance for the positive semi-definite check.
pub const DEFAULT_PSD_TOLERANCE: f64 = 1e-10;

/// Severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational
    Info,
    /// Suspicious but usable
    Warning,
    /// The table cannot be relied on
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => f.write_str("info"),
            Self::Warning => f.write_str("warning"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// One problem found in a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Severity
    pub severity: Severity,
    /// Table the finding is about, if any
    pub table: Option<TableKind>,
    /// Human-readable description
    pub message: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.table {
            Some(table) => write!(f, "[{}] {}: {}", self.severity, table, self.message),
            None => write!(f, "[{}] {}", self.severity, self.message),
        }
    }
}

/// Findings for one release.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Release date, when the report covers a release on disk
    pub date: Option<NaiveDate>,
    /// Findings in the order they were raised
    pub findings: Vec<Finding>,
}

impl QualityReport {
    /// Empty report.
    pub fn new(date: Option<NaiveDate>) -> Self {
        Self {
            date,
            findings: Vec::new(),
        }
    }

    /// Whether no finding is an error.
    pub fn is_ok(&self) -> bool {
        !self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    /// Number of findings of a severity.
    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    /// Findings of a severity.
    pub fn with_severity(&self, severity: Severity) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.severity == severity)
    }

    /// Highest severity raised, if any.
    pub fn worst(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }

    fn push(&mut self, severity: Severity, table: Option<TableKind>, message: impl Into<String>) {
        self.findings.push(Finding {
            severity,
            table,
            message: message.into(),
        });
    }
}

impl fmt::Display for QualityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.date {
            Some(date) => writeln!(f, "Release {}", date)?,
            None => writeln!(f, "Release")?,
        }
        for finding in &self.findings {
            writeln!(f, "  {}", finding)?;
        }
        write!(
            f,
            "{} errors, {} warnings, {} info",
            self.count(Severity::Error),
            self.count(Severity::Warning),
            self.count(Severity::Info)
        )
    }
}

fn sample<'a, I: IntoIterator<Item = &'a String>>(ids: I, total: usize) -> String {
    let mut out: Vec<&str> = ids.into_iter().take(SAMPLE_SIZE).map(String::as_str).collect();
    if total > SAMPLE_SIZE {
        out.push("...");
    }
    out.join(", ")
}

fn count_duplicates<K: Eq + Hash, I: IntoIterator<Item = K>>(keys: I) -> usize {
    let mut seen = HashSet::new();
    let mut duplicates = 0;
    for key in keys {
        if !seen.insert(key) {
            duplicates += 1;
        }
    }
    duplicates
}

fn check_duplicates(report: &mut QualityReport, kind: TableKind, duplicates: usize) {
    if duplicates > 0 {
        report.push(
            Severity::Error,
            Some(kind),
            format!(
                "{} rows repeat a key ({})",
                duplicates,
                key_columns(kind).join(", ")
            ),
        );
    }
}

/// Release checks, optionally against a GVKEY mapping.
#[derive(Debug, Clone, Copy)]
pub struct QualityChecker<'a> {
    mapper: Option<&'a GvkeyMapper>,
    psd_tolerance: Option<f64>,
}

impl Default for QualityChecker<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> QualityChecker<'a> {
    /// Checker with the positive semi-definite check enabled.
    pub const fn new() -> Self {
        Self {
            mapper: None,
            psd_tolerance: Some(DEFAULT_PSD_TOLERANCE),
        }
    }

    /// Also check exposure GVKEYs against a mapping.
    pub const fn with_mapper(mut self, mapper: &'a GvkeyMapper) -> Self {
        self.mapper = Some(mapper);
        self
    }

    /// Tolerance for the positive semi-definite check; `None` disables it.
    pub const fn with_psd_tolerance(mut self, tolerance: Option<f64>) -> Self {
        self.psd_tolerance = tolerance;
        self
    }

    /// Load every table present in the release and check it.
    pub fn check_release(&self, loader: &ReleaseLoader) -> riskfeed_data::Result<QualityReport> {
        let mut report = QualityReport::new(Some(loader.date()));

        for kind in loader.release().missing_tables() {
            report.push(Severity::Info, Some(kind), "table absent from release");
        }

        let covariance = if loader.has_table(TableKind::FactorCovariance) {
            loader.load_factor_covariance()?
        } else {
            Vec::new()
        };
        let returns = if loader.has_table(TableKind::FactorReturns) {
            loader.load_factor_returns()?
        } else {
            Vec::new()
        };
        let exposures = if loader.has_table(TableKind::StyleExposures) {
            loader.load_style_exposures()?
        } else {
            Vec::new()
        };
        let specific = if loader.has_table(TableKind::SpecificRisk) {
            loader.load_specific_risk()?
        } else {
            Vec::new()
        };
        let summary = if loader.has_table(TableKind::PortfolioSummary) {
            loader.load_portfolio_summary()?
        } else {
            Vec::new()
        };

        self.check_rows(
            &mut report,
            &covariance,
            &returns,
            &exposures,
            &specific,
            &summary,
        );
        info!(
            "Checked release {}: {} findings, ok = {}",
            loader.date(),
            report.findings.len(),
            report.is_ok()
        );
        Ok(report)
    }

    /// Check already loaded rows. Empty slices stand for absent tables.
    pub fn check_rows(
        &self,
        report: &mut QualityReport,
        covariance: &[FactorCovarianceRow],
        returns: &[FactorReturnRow],
        exposures: &[StyleExposureRow],
        specific: &[SpecificRiskRow],
        summary: &[PortfolioSummaryRow],
    ) {
        if !covariance.is_empty() {
            self.check_covariance(report, covariance);
        }

        let cov_factors: BTreeSet<&str> = covariance
            .iter()
            .flat_map(|r| [r.factor_i.as_str(), r.factor_j.as_str()])
            .collect();

        if !returns.is_empty() {
            check_duplicates(
                report,
                TableKind::FactorReturns,
                count_duplicates(returns.iter().map(|r| (r.month_end_date, &r.factor))),
            );
            let nan = returns.iter().filter(|r| !r.factor_return.is_finite()).count();
            if nan > 0 {
                report.push(
                    Severity::Error,
                    Some(TableKind::FactorReturns),
                    format!("{} non-finite returns", nan),
                );
            }
            if !covariance.is_empty() {
                check_subset(
                    report,
                    TableKind::FactorReturns,
                    returns.iter().map(|r| r.factor.as_str()),
                    &cov_factors,
                );
            }
        }

        if !exposures.is_empty() {
            check_duplicates(
                report,
                TableKind::StyleExposures,
                count_duplicates(
                    exposures
                        .iter()
                        .map(|r| (r.month_end_date, &r.gvkey, &r.factor)),
                ),
            );
            let nan = exposures.iter().filter(|r| !r.exposure.is_finite()).count();
            if nan > 0 {
                report.push(
                    Severity::Error,
                    Some(TableKind::StyleExposures),
                    format!("{} non-finite exposures", nan),
                );
            }
            if !covariance.is_empty() {
                check_subset(
                    report,
                    TableKind::StyleExposures,
                    exposures.iter().map(|r| r.factor.as_str()),
                    &cov_factors,
                );
            }
            if let Some(mapper) = self.mapper {
                check_mapping(report, exposures, mapper);
            }
        }

        if !specific.is_empty() {
            check_specific(report, specific);
        }

        if !exposures.is_empty() && !specific.is_empty() {
            check_coverage(report, exposures, specific);
        }

        if !summary.is_empty() {
            check_duplicates(
                report,
                TableKind::PortfolioSummary,
                count_duplicates(summary.iter().map(|r| &r.factor)),
            );
        }
    }

    fn check_covariance(&self, report: &mut QualityReport, rows: &[FactorCovarianceRow]) {
        let kind = Some(TableKind::FactorCovariance);

        check_duplicates(
            report,
            TableKind::FactorCovariance,
            count_duplicates(
                rows.iter()
                    .map(|r| (r.month_end_date, &r.factor_i, &r.factor_j)),
            ),
        );

        let mut by_date: BTreeMap<NaiveDate, Vec<&FactorCovarianceRow>> = BTreeMap::new();
        for row in rows {
            by_date.entry(row.month_end_date).or_default().push(row);
        }

        for (date, date_rows) in &by_date {
            let factors: BTreeSet<&str> = date_rows
                .iter()
                .flat_map(|r| [r.factor_i.as_str(), r.factor_j.as_str()])
                .collect();
            let n = factors.len();
            let triangle = expected_pair_count(n);
            if date_rows.len() != triangle && date_rows.len() != n * n {
                report.push(
                    Severity::Error,
                    kind,
                    format!(
                        "{}: {} rows for {} factors, expected {} or {}",
                        date,
                        date_rows.len(),
                        n,
                        triangle,
                        n * n
                    ),
                );
            }

            let nan = date_rows.iter().filter(|r| !r.covariance.is_finite()).count();
            if nan > 0 {
                report.push(
                    Severity::Error,
                    kind,
                    format!("{}: {} non-finite covariances", date, nan),
                );
            }
        }

        let Some((latest, latest_rows)) = by_date.iter().next_back() else {
            return;
        };
        let owned: Vec<FactorCovarianceRow> = latest_rows.iter().map(|r| (*r).clone()).collect();
        match CovarianceMatrix::from_rows(&owned) {
            Ok(matrix) => {
                let Some(tolerance) = self.psd_tolerance else {
                    return;
                };
                match matrix.eigenvalues() {
                    Ok(values) => {
                        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                        if min < -tolerance {
                            report.push(
                                Severity::Warning,
                                kind,
                                format!(
                                    "{}: matrix is not positive semi-definite (min eigenvalue {:.3e})",
                                    latest, min
                                ),
                            );
                        }
                        debug!("Minimum eigenvalue at {}: {:.3e}", latest, min);
                    }
                    Err(e) => report.push(
                        Severity::Warning,
                        kind,
                        format!("{}: eigenvalues unavailable: {}", latest, e),
                    ),
                }
            }
            Err(e) => report.push(Severity::Error, kind, format!("{}: {}", latest, e)),
        }
    }
}

fn check_subset<'r, I: Iterator<Item = &'r str>>(
    report: &mut QualityReport,
    kind: TableKind,
    factors: I,
    cov_factors: &BTreeSet<&str>,
) {
    let unknown: BTreeSet<String> = factors
        .filter(|f| !cov_factors.contains(f))
        .map(str::to_string)
        .collect();
    if !unknown.is_empty() {
        report.push(
            Severity::Error,
            Some(kind),
            format!(
                "{} factors not in the covariance matrix: {}",
                unknown.len(),
                sample(&unknown, unknown.len())
            ),
        );
    }
}

fn check_specific(report: &mut QualityReport, rows: &[SpecificRiskRow]) {
    let kind = Some(TableKind::SpecificRisk);
    check_duplicates(
        report,
        TableKind::SpecificRisk,
        count_duplicates(rows.iter().map(|r| (r.month_end_date, &r.gvkey))),
    );

    let nan = rows.iter().filter(|r| !r.specific_var.is_finite()).count();
    if nan > 0 {
        report.push(
            Severity::Error,
            kind,
            format!("{} non-finite specific variances", nan),
        );
    }

    let negative: BTreeSet<String> = rows
        .iter()
        .filter(|r| r.specific_var < 0.0)
        .map(|r| r.gvkey.clone())
        .collect();
    if !negative.is_empty() {
        report.push(
            Severity::Error,
            kind,
            format!(
                "{} securities with negative specific variance: {}",
                negative.len(),
                sample(&negative, negative.len())
            ),
        );
    }
}

fn check_coverage(
    report: &mut QualityReport,
    exposures: &[StyleExposureRow],
    specific: &[SpecificRiskRow],
) {
    let mut exposed: BTreeMap<NaiveDate, BTreeSet<&String>> = BTreeMap::new();
    for row in exposures {
        exposed.entry(row.month_end_date).or_default().insert(&row.gvkey);
    }
    let mut risked: BTreeMap<NaiveDate, BTreeSet<&String>> = BTreeMap::new();
    for row in specific {
        risked.entry(row.month_end_date).or_default().insert(&row.gvkey);
    }

    let shared: Vec<NaiveDate> = exposed
        .keys()
        .filter(|d| risked.contains_key(*d))
        .copied()
        .collect();
    if shared.is_empty() {
        report.push(
            Severity::Warning,
            None,
            "style exposures and specific risk share no month-end date",
        );
        return;
    }

    for date in shared {
        let (Some(e), Some(s)) = (exposed.get(&date), risked.get(&date)) else {
            continue;
        };
        let no_specific: Vec<&String> = e.difference(s).copied().collect();
        if !no_specific.is_empty() {
            report.push(
                Severity::Warning,
                Some(TableKind::SpecificRisk),
                format!(
                    "{}: {} exposed securities have no specific risk: {}",
                    date,
                    no_specific.len(),
                    sample(no_specific.iter().copied(), no_specific.len())
                ),
            );
        }
        let no_exposure: Vec<&String> = s.difference(e).copied().collect();
        if !no_exposure.is_empty() {
            report.push(
                Severity::Warning,
                Some(TableKind::StyleExposures),
                format!(
                    "{}: {} securities with specific risk have no exposures: {}",
                    date,
                    no_exposure.len(),
                    sample(no_exposure.iter().copied(), no_exposure.len())
                ),
            );
        }
    }
}

fn check_mapping(report: &mut QualityReport, exposures: &[StyleExposureRow], mapper: &GvkeyMapper) {
    let gvkeys: BTreeSet<&String> = exposures.iter().map(|r| &r.gvkey).collect();
    let unmapped: Vec<&String> = gvkeys
        .iter()
        .copied()
        .filter(|g| !mapper.contains_gvkey(g))
        .collect();
    if !unmapped.is_empty() {
        report.push(
            Severity::Warning,
            Some(TableKind::StyleExposures),
            format!(
                "{} of {} securities have no ticker: {}",
                unmapped.len(),
                gvkeys.len(),
                sample(unmapped.iter().copied(), unmapped.len())
            ),
        );
    }

    let unused = mapper
        .gvkeys()
        .into_iter()
        .filter(|g| !gvkeys.iter().any(|e| e.as_str() == *g))
        .count();
    if unused > 0 {
        report.push(
            Severity::Info,
            None,
            format!("{} mapped GVKEYs have no exposures", unused),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riskfeed_data::FactorKind;
    use riskfeed_data::schema::ExposureFlags;
    use rstest::rstest;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 31).unwrap()
    }

    fn cov(i: &str, j: &str, v: f64) -> FactorCovarianceRow {
        FactorCovarianceRow {
            month_end_date: date(),
            factor_i: i.to_string(),
            factor_j: j.to_string(),
            covariance: v,
        }
    }

    fn exposure(gvkey: &str, factor: &str) -> StyleExposureRow {
        StyleExposureRow {
            month_end_date: date(),
            gvkey: gvkey.to_string(),
            factor: factor.to_string(),
            exposure: 1.0,
            flags: ExposureFlags::NONE,
        }
    }

    fn specific(gvkey: &str, v: f64) -> SpecificRiskRow {
        SpecificRiskRow {
            month_end_date: date(),
            gvkey: gvkey.to_string(),
            specific_var: v,
        }
    }

    fn triangle() -> Vec<FactorCovarianceRow> {
        vec![
            cov("BETA", "BETA", 0.04),
            cov("BETA", "SIZE", 0.01),
            cov("SIZE", "SIZE", 0.09),
        ]
    }

    fn check(
        covariance: &[FactorCovarianceRow],
        exposures: &[StyleExposureRow],
        specific: &[SpecificRiskRow],
    ) -> QualityReport {
        let mut report = QualityReport::new(Some(date()));
        QualityChecker::new().check_rows(&mut report, covariance, &[], exposures, specific, &[]);
        report
    }

    #[test]
    fn test_clean_release() {
        let report = check(
            &triangle(),
            &[exposure("001690", "BETA"), exposure("001690", "SIZE")],
            &[specific("001690", 0.02)],
        );
        assert!(report.is_ok());
        assert!(report.findings.is_empty(), "{report}");
        assert_eq!(report.worst(), None);
    }

    #[test]
    fn test_full_square_accepted() {
        let mut rows = triangle();
        rows.push(cov("SIZE", "BETA", 0.01));
        assert!(check(&rows, &[], &[]).findings.is_empty());
    }

    #[rstest]
    #[case::short(vec![cov("BETA", "BETA", 0.04), cov("SIZE", "SIZE", 0.09)])]
    #[case::nan(vec![cov("BETA", "BETA", f64::NAN), cov("BETA", "SIZE", 0.0), cov("SIZE", "SIZE", 0.09)])]
    #[case::duplicate(vec![cov("BETA", "BETA", 0.04), cov("BETA", "BETA", 0.04), cov("BETA", "SIZE", 0.01), cov("SIZE", "SIZE", 0.09)])]
    fn test_covariance_errors(#[case] rows: Vec<FactorCovarianceRow>) {
        let report = check(&rows, &[], &[]);
        assert!(!report.is_ok(), "{report}");
        assert!(
            report
                .with_severity(Severity::Error)
                .all(|f| f.table == Some(TableKind::FactorCovariance))
        );
    }

    #[test]
    fn test_missing_factor_pair() {
        let rows = vec![
            cov("BETA", "BETA", 0.04),
            cov("BETA", "SIZE", 0.01),
            cov("SIZE", "SIZE", 0.09),
            cov("BETA", "MOMENTUM", 0.0),
            cov("MOMENTUM", "MOMENTUM", 0.01),
        ];
        let report = check(&rows, &[], &[]);
        assert_eq!(report.count(Severity::Error), 2, "{report}");
        let messages: Vec<&str> = report.findings.iter().map(|f| f.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.contains("5 rows for 3 factors, expected 6 or 9")));
        assert!(messages.iter().any(|m| m.contains("SIZE") && m.contains("MOMENTUM")));
    }

    #[test]
    fn test_not_psd_warns() {
        let rows = vec![
            cov("BETA", "BETA", 0.01),
            cov("BETA", "SIZE", 0.5),
            cov("SIZE", "SIZE", 0.01),
        ];
        let report = check(&rows, &[], &[]);
        assert!(report.is_ok());
        assert_eq!(report.count(Severity::Warning), 1);
        assert!(report.findings[0].message.contains("positive semi-definite"));

        let mut quiet = QualityReport::default();
        QualityChecker::new()
            .with_psd_tolerance(None)
            .check_rows(&mut quiet, &rows, &[], &[], &[], &[]);
        assert!(quiet.findings.is_empty());
    }

    #[test]
    fn test_unknown_exposure_factor() {
        let report = check(
            &triangle(),
            &[exposure("001690", "BETA"), exposure("001690", "GROWTH")],
            &[specific("001690", 0.02)],
        );
        assert!(!report.is_ok());
        let finding = report.with_severity(Severity::Error).next().unwrap();
        assert_eq!(finding.table, Some(TableKind::StyleExposures));
        assert!(finding.message.contains("GROWTH"));
    }

    #[test]
    fn test_gvkey_coverage_both_directions() {
        let report = check(
            &triangle(),
            &[exposure("001690", "BETA"), exposure("012141", "BETA")],
            &[specific("001690", 0.02), specific("006066", 0.03)],
        );
        assert!(report.is_ok());
        assert_eq!(report.count(Severity::Warning), 2);
        let messages: Vec<&str> = report.findings.iter().map(|f| f.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.contains("have no specific risk: 012141")));
        assert!(messages.iter().any(|m| m.contains("have no exposures: 006066")));
    }

    #[test]
    fn test_negative_specific_variance() {
        let report = check(&[], &[], &[specific("001690", -0.01), specific("012141", 0.01)]);
        assert!(!report.is_ok());
        assert!(report.findings[0].message.contains("negative specific variance: 001690"));
    }

    #[test]
    fn test_mapping_coverage() {
        let mapper = GvkeyMapper::from_pairs([("001690", "AAPL"), ("006066", "IBM")]);
        let mut report = QualityReport::default();
        QualityChecker::new().with_mapper(&mapper).check_rows(
            &mut report,
            &[],
            &[],
            &[exposure("001690", "BETA"), exposure("012141", "BETA")],
            &[],
            &[],
        );
        assert_eq!(report.count(Severity::Warning), 1);
        assert_eq!(report.count(Severity::Info), 1);
        assert!(report.findings[0].message.starts_with("1 of 2 securities have no ticker"));
    }

    #[test]
    fn test_duplicate_summary_factor() {
        let row = PortfolioSummaryRow {
            factor: "USFASTD_SIZE".to_string(),
            portfolio_exposure: 0.1,
            variance_contribution: 0.001,
            factor_type: FactorKind::Style,
            top_n: 1,
        };
        let mut report = QualityReport::default();
        QualityChecker::new().check_rows(&mut report, &[], &[], &[], &[], &[row.clone(), row]);
        assert!(!report.is_ok());
        assert!(report.findings[0].message.contains("(factor)"));
    }

    #[test]
    fn test_sample_elides() {
        let ids: Vec<String> = (0..7).map(|i| i.to_string()).collect();
        assert_eq!(sample(&ids, ids.len()), "0, 1, 2, 3, 4, ...");
        assert_eq!(sample(&ids[..2], 2), "0, 1");
    }

    #[test]
    fn test_report_display() {
        let mut report = QualityReport::new(Some(date()));
        report.push(Severity::Warning, Some(TableKind::SpecificRisk), "odd");
        let text = report.to_string();
        assert!(text.starts_with("Release 2024-05-31"));
        assert!(text.contains("[warning] specific_risk: odd"));
        assert!(text.ends_with("0 errors, 1 warnings, 0 info"));
    }
}
