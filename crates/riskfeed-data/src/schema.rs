//! Row types and column schemas for the risk-model tables.

use crate::error::{DataError, Result};
use crate::release::TableKind;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Column holding the month-end date on every dated table.
pub const MONTH_END_DATE: &str = "month_end_date";

/// The ten style factors of the model, by their short code.
pub const STYLE_FACTORS: [&str; 10] = [
    "BETA", "MOMENTUM", "SIZE", "SIZENL", "EARNYILD", "RESVOL", "GROWTH", "BTOP", "LEVERAGE",
    "LIQUIDTY",
];

/// Long-form spellings that map onto a style code.
const STYLE_ALIASES: [(&str, &str); 6] = [
    ("LIQUIDITY", "LIQUIDTY"),
    ("EARNINGSYIELD", "EARNYILD"),
    ("BOOKTOPRICE", "BTOP"),
    ("RESIDUALVOLATILITY", "RESVOL"),
    ("NONLINEARSIZE", "SIZENL"),
    ("VALUE", "BTOP"),
];

/// Columns a table must carry to be loaded.
pub const fn required_columns(kind: TableKind) -> &'static [&'static str] {
    match kind {
        TableKind::FactorCovariance => &[MONTH_END_DATE, "factor_i", "factor_j", "covariance"],
        TableKind::FactorReturns => &[MONTH_END_DATE, "factor", "factor_return"],
        TableKind::StyleExposures => &[MONTH_END_DATE, "gvkey", "factor", "exposure"],
        TableKind::SpecificRisk => &[MONTH_END_DATE, "gvkey", "specific_var"],
        TableKind::PortfolioSummary => &[
            "factor",
            "portfolio_exposure",
            "variance_contribution",
            "type",
            "top_n",
        ],
    }
}

/// Key columns of a table; a release must not repeat a key.
pub const fn key_columns(kind: TableKind) -> &'static [&'static str] {
    match kind {
        TableKind::FactorCovariance => &[MONTH_END_DATE, "factor_i", "factor_j"],
        TableKind::FactorReturns => &[MONTH_END_DATE, "factor"],
        TableKind::StyleExposures => &[MONTH_END_DATE, "gvkey", "factor"],
        TableKind::SpecificRisk => &[MONTH_END_DATE, "gvkey"],
        TableKind::PortfolioSummary => &["factor"],
    }
}

/// Category of a systematic risk factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactorKind {
    /// Style factor (size, momentum, ...)
    Style,
    /// Industry one-hot factor
    Industry,
    /// Country (market) factor
    Country,
}

impl FactorKind {
    /// Returns all factor kinds.
    pub const fn all() -> [Self; 3] {
        [Self::Style, Self::Industry, Self::Country]
    }

    /// Lower-case name as written in the exports.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Style => "style",
            Self::Industry => "industry",
            Self::Country => "country",
        }
    }

    /// Classify a factor by its identifier.
    ///
    /// A model prefix such as `USFASTD_` is ignored. Any factor that is neither
    /// a style nor a country factor is an industry.
    pub fn classify(factor: &str) -> Self {
        let code = factor_code(factor);
        if code == "COUNTRY" || code == "MARKET" || code.ends_with("COUNTRY") {
            Self::Country
        } else if style_code(&code).is_some() {
            Self::Style
        } else {
            Self::Industry
        }
    }
}

impl fmt::Display for FactorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FactorKind {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "style" => Ok(Self::Style),
            "industry" => Ok(Self::Industry),
            "country" | "market" => Ok(Self::Country),
            _ => Err(DataError::Parse(format!("Invalid factor type: {}", s))),
        }
    }
}

/// Upper-cased factor identifier with any model prefix removed.
pub fn factor_code(factor: &str) -> String {
    let upper = factor.trim().to_uppercase();
    match upper.split_once('_') {
        Some((prefix, rest))
            if !rest.is_empty() && prefix.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            rest.to_string()
        }
        _ => upper,
    }
}

/// Canonical style code for a factor code, if it names a style factor.
pub fn style_code(code: &str) -> Option<&'static str> {
    let compact = code.replace('_', "");
    STYLE_FACTORS
        .iter()
        .copied()
        .find(|s| *s == compact)
        .or_else(|| {
            STYLE_ALIASES
                .iter()
                .find(|(alias, _)| *alias == compact)
                .map(|(_, s)| *s)
        })
}

/// Per-exposure flag bits as exported by the vendor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExposureFlags(pub u32);

impl ExposureFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);

    /// Whether all bits of `other` are set.
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no bit is set.
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ExposureFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06b}", self.0)
    }
}

/// One entry of the factor covariance matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorCovarianceRow {
    /// Month-end date of the estimate
    pub month_end_date: NaiveDate,
    /// Row factor
    pub factor_i: String,
    /// Column factor
    pub factor_j: String,
    /// Covariance between the two factors
    pub covariance: f64,
}

/// One factor return observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorReturnRow {
    /// Month-end date of the return
    pub month_end_date: NaiveDate,
    /// Factor identifier
    pub factor: String,
    /// Monthly factor return
    pub factor_return: f64,
}

/// Exposure of one security to one factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleExposureRow {
    /// Month-end date of the exposure
    pub month_end_date: NaiveDate,
    /// Compustat GVKEY, six digits zero-padded
    pub gvkey: String,
    /// Factor identifier
    pub factor: String,
    /// Exposure (loading)
    pub exposure: f64,
    /// Vendor flag bits
    #[serde(default)]
    pub flags: ExposureFlags,
}

/// Specific variance of one security.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecificRiskRow {
    /// Month-end date of the estimate
    pub month_end_date: NaiveDate,
    /// Compustat GVKEY, six digits zero-padded
    pub gvkey: String,
    /// Specific (idiosyncratic) variance
    pub specific_var: f64,
}

/// Per-factor row of a portfolio risk summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummaryRow {
    /// Factor identifier
    pub factor: String,
    /// Portfolio exposure to the factor
    pub portfolio_exposure: f64,
    /// Contribution of the factor to portfolio variance
    pub variance_contribution: f64,
    /// Factor category
    #[serde(rename = "type")]
    pub factor_type: FactorKind,
    /// Rank of the factor by absolute variance contribution (1 = largest)
    pub top_n: i64,
}
