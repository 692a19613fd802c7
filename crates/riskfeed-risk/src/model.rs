//! Risk Model
//!
//! Combines a factor covariance matrix, security exposures and specific
//! variances into a multi-factor risk model.
//!
//! Portfolio variance decomposition:
//! Var(R_p) = w^T * (X * F * X^T + Δ) * w
//!
//! where:
//! - w = portfolio weights
//! - X = factor exposures matrix
//! - F = factor covariance matrix
//! - Δ = diagonal specific risk matrix

use crate::covariance::{CovarianceError, CovarianceMatrix};
use ndarray::Array1;
use riskfeed_data::schema::{FactorKind, PortfolioSummaryRow, SpecificRiskRow, StyleExposureRow};
use riskfeed_data::{DataError, normalize_gvkey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::debug;

/// Risk model errors
#[derive(Debug, Error)]
pub enum RiskModelError {
    /// Covariance error
    #[error("Covariance error: {0}")]
    Covariance(#[from] CovarianceError),

    /// Data loading error
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    /// Security without exposures
    #[error("Unknown security: {0}")]
    UnknownSecurity(String),

    /// Security without a specific variance
    #[error("No specific risk for security {0}")]
    MissingSpecificRisk(String),

    /// Exposure to a factor absent from the covariance matrix
    #[error("Exposure to factor {0} which is not in the covariance matrix")]
    UnknownFactor(String),

    /// Invalid portfolio weights
    #[error("Invalid portfolio weights: {0}")]
    InvalidWeights(String),
}

/// Portfolio variance split into factor and specific parts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskDecomposition {
    /// Variance explained by factors
    pub factor_variance: f64,
    /// Idiosyncratic variance
    pub specific_variance: f64,
    /// Total variance
    pub total_variance: f64,
}

impl RiskDecomposition {
    /// Factor volatility
    pub fn factor_risk(&self) -> f64 {
        self.factor_variance.max(0.0).sqrt()
    }

    /// Specific volatility
    pub fn specific_risk(&self) -> f64 {
        self.specific_variance.max(0.0).sqrt()
    }

    /// Total volatility
    pub fn total_risk(&self) -> f64 {
        self.total_variance.max(0.0).sqrt()
    }

    /// Share of total variance explained by factors
    pub fn factor_share(&self) -> f64 {
        if self.total_variance > 0.0 {
            self.factor_variance / self.total_variance
        } else {
            0.0
        }
    }
}

/// Multi-factor risk model for one month-end date.
#[derive(Debug, Clone)]
pub struct RiskModel {
    covariance: CovarianceMatrix,
    /// Exposure vector per GVKEY, in covariance factor order
    exposures: HashMap<String, Array1<f64>>,
    specific_variances: HashMap<String, f64>,
}

impl RiskModel {
    /// Build a model from exposure and specific risk rows.
    ///
    /// Rows should belong to the covariance date; exposures to a factor the
    /// covariance does not know are an error. A security missing a factor has
    /// zero exposure to it.
    pub fn new(
        covariance: CovarianceMatrix,
        exposure_rows: &[StyleExposureRow],
        specific_rows: &[SpecificRiskRow],
    ) -> Result<Self, RiskModelError> {
        let k = covariance.dim();
        let mut exposures: HashMap<String, Array1<f64>> = HashMap::new();
        for row in exposure_rows {
            let idx = covariance
                .index_of(&row.factor)
                .ok_or_else(|| RiskModelError::UnknownFactor(row.factor.clone()))?;
            exposures
                .entry(row.gvkey.clone())
                .or_insert_with(|| Array1::zeros(k))[idx] = row.exposure;
        }

        let specific_variances = specific_rows
            .iter()
            .map(|r| (r.gvkey.clone(), r.specific_var))
            .collect();

        debug!(
            "Risk model for {}: {} factors, {} securities",
            covariance.date(),
            k,
            exposures.len()
        );
        Ok(Self {
            covariance,
            exposures,
            specific_variances,
        })
    }

    /// The factor covariance matrix
    pub const fn covariance(&self) -> &CovarianceMatrix {
        &self.covariance
    }

    /// Number of securities with exposures
    pub fn n_securities(&self) -> usize {
        self.exposures.len()
    }

    /// Exposure vector of a security
    pub fn exposures_of(&self, gvkey: &str) -> Option<&Array1<f64>> {
        let gvkey = normalize_gvkey(gvkey).ok()?;
        self.exposures.get(&gvkey)
    }

    /// Specific variance of a security
    pub fn specific_variance_of(&self, gvkey: &str) -> Option<f64> {
        let gvkey = normalize_gvkey(gvkey).ok()?;
        self.specific_variances.get(&gvkey).copied()
    }

    /// Weights keyed by normalized GVKEY. Spellings of the same GVKEY are summed.
    fn normalized_weights(
        &self,
        weights: &HashMap<String, f64>,
    ) -> Result<BTreeMap<String, f64>, RiskModelError> {
        let mut out: BTreeMap<String, f64> = BTreeMap::new();
        for (gvkey, &w) in weights {
            if !w.is_finite() {
                return Err(RiskModelError::InvalidWeights(format!(
                    "non-finite weight for {}",
                    gvkey
                )));
            }
            let gvkey = normalize_gvkey(gvkey)
                .map_err(|_| RiskModelError::InvalidWeights(format!("bad GVKEY '{}'", gvkey)))?;
            if !self.exposures.contains_key(&gvkey) {
                return Err(RiskModelError::UnknownSecurity(gvkey));
            }
            *out.entry(gvkey).or_default() += w;
        }

        let total: f64 = out.values().sum();
        if (total - 1.0).abs() > 1e-6 {
            debug!("Portfolio weights sum to {:.6}", total);
        }
        Ok(out)
    }

    /// Portfolio factor exposures x_p = X^T w
    pub fn portfolio_exposures(
        &self,
        weights: &HashMap<String, f64>,
    ) -> Result<Array1<f64>, RiskModelError> {
        let mut x = Array1::<f64>::zeros(self.covariance.dim());
        for (gvkey, w) in self.normalized_weights(weights)? {
            if let Some(exp) = self.exposures.get(&gvkey) {
                x.scaled_add(w, exp);
            }
        }
        Ok(x)
    }

    /// Factor variance x_p^T F x_p
    pub fn factor_variance(&self, weights: &HashMap<String, f64>) -> Result<f64, RiskModelError> {
        let x = self.portfolio_exposures(weights)?;
        Ok(x.dot(&self.covariance.matrix().dot(&x)))
    }

    /// Specific variance sum(w_i^2 * δ_i)
    pub fn specific_variance(&self, weights: &HashMap<String, f64>) -> Result<f64, RiskModelError> {
        let mut total = 0.0;
        for (gvkey, w) in self.normalized_weights(weights)? {
            let delta = self
                .specific_variances
                .get(&gvkey)
                .ok_or_else(|| RiskModelError::MissingSpecificRisk(gvkey.clone()))?;
            total += w * w * delta;
        }
        Ok(total)
    }

    /// Total portfolio variance
    pub fn total_variance(&self, weights: &HashMap<String, f64>) -> Result<f64, RiskModelError> {
        Ok(self.factor_variance(weights)? + self.specific_variance(weights)?)
    }

    /// Total portfolio volatility
    pub fn total_volatility(&self, weights: &HashMap<String, f64>) -> Result<f64, RiskModelError> {
        Ok(self.total_variance(weights)?.max(0.0).sqrt())
    }

    /// Decompose portfolio variance into factor and specific components
    pub fn risk_decomposition(
        &self,
        weights: &HashMap<String, f64>,
    ) -> Result<RiskDecomposition, RiskModelError> {
        let factor_variance = self.factor_variance(weights)?;
        let specific_variance = self.specific_variance(weights)?;
        Ok(RiskDecomposition {
            factor_variance,
            specific_variance,
            total_variance: factor_variance + specific_variance,
        })
    }

    /// Per-factor variance contributions x_p,k * (F x_p)_k, in covariance
    /// factor order. They sum to the factor variance.
    pub fn factor_contributions(
        &self,
        weights: &HashMap<String, f64>,
    ) -> Result<Array1<f64>, RiskModelError> {
        let x = self.portfolio_exposures(weights)?;
        let fx = self.covariance.matrix().dot(&x);
        Ok(&x * &fx)
    }

    /// Per-factor summary ranked by absolute variance contribution.
    ///
    /// `top_n` on each row is its 1-based rank; at most `top_n` rows are returned.
    pub fn portfolio_summary(
        &self,
        weights: &HashMap<String, f64>,
        top_n: usize,
    ) -> Result<Vec<PortfolioSummaryRow>, RiskModelError> {
        let x = self.portfolio_exposures(weights)?;
        let contributions = &x * &self.covariance.matrix().dot(&x);

        let mut rows: Vec<PortfolioSummaryRow> = self
            .covariance
            .factors()
            .iter()
            .enumerate()
            .map(|(k, factor)| PortfolioSummaryRow {
                factor: factor.clone(),
                portfolio_exposure: x[k],
                variance_contribution: contributions[k],
                factor_type: FactorKind::classify(factor),
                top_n: 0,
            })
            .collect();

        rows.sort_by(|a, b| {
            b.variance_contribution
                .abs()
                .total_cmp(&a.variance_contribution.abs())
                .then_with(|| a.factor.cmp(&b.factor))
        });
        rows.truncate(top_n);
        for (rank, row) in rows.iter_mut().enumerate() {
            row.top_n = rank as i64 + 1;
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use ndarray::array;
    use rstest::rstest;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 31).unwrap()
    }

    fn exposure(gvkey: &str, factor: &str, value: f64) -> StyleExposureRow {
        StyleExposureRow {
            month_end_date: date(),
            gvkey: gvkey.to_string(),
            factor: factor.to_string(),
            exposure: value,
            flags: Default::default(),
        }
    }

    fn specific(gvkey: &str, var: f64) -> SpecificRiskRow {
        SpecificRiskRow {
            month_end_date: date(),
            gvkey: gvkey.to_string(),
            specific_var: var,
        }
    }

    fn model() -> RiskModel {
        let cov = CovarianceMatrix::new(
            date(),
            vec![
                "USFASTD_BETA".to_string(),
                "USFASTD_SIZE".to_string(),
                "USFASTD_SOFTWARE".to_string(),
            ],
            array![[0.04, 0.01, 0.0], [0.01, 0.09, 0.0], [0.0, 0.0, 0.0025]],
        )
        .unwrap();
        RiskModel::new(
            cov,
            &[
                exposure("001690", "USFASTD_BETA", 1.0),
                exposure("001690", "USFASTD_SIZE", 2.0),
                exposure("012141", "USFASTD_BETA", 0.5),
                exposure("012141", "USFASTD_SOFTWARE", 1.0),
            ],
            &[specific("001690", 0.02), specific("012141", 0.01)],
        )
        .unwrap()
    }

    fn weights(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(g, w)| (g.to_string(), *w)).collect()
    }

    #[test]
    fn test_portfolio_exposures() {
        let m = model();
        let x = m
            .portfolio_exposures(&weights(&[("1690", 0.5), ("12141", 0.5)]))
            .unwrap();
        assert_relative_eq!(x[0], 0.75);
        assert_relative_eq!(x[1], 1.0);
        assert_relative_eq!(x[2], 0.5);
    }

    #[test]
    fn test_variance_decomposition() {
        let m = model();
        let w = weights(&[("001690", 0.5), ("012141", 0.5)]);

        // x = [0.75, 1.0, 0.5]; Fx = [0.04, 0.0975, 0.00125]
        let factor = 0.75 * 0.04 + 1.0 * 0.0975 + 0.5 * 0.00125;
        let specific = 0.25 * 0.02 + 0.25 * 0.01;

        let d = m.risk_decomposition(&w).unwrap();
        assert_relative_eq!(d.factor_variance, factor, epsilon = 1e-12);
        assert_relative_eq!(d.specific_variance, specific, epsilon = 1e-12);
        assert_relative_eq!(m.total_variance(&w).unwrap(), factor + specific, epsilon = 1e-12);
        assert_relative_eq!(d.total_risk(), (factor + specific).sqrt(), epsilon = 1e-12);

        let contributions = m.factor_contributions(&w).unwrap();
        assert_relative_eq!(contributions.sum(), factor, epsilon = 1e-12);
    }

    #[test]
    fn test_portfolio_summary_ranking() {
        let m = model();
        let w = weights(&[("001690", 0.5), ("012141", 0.5)]);

        let summary = m.portfolio_summary(&w, 2).unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].factor, "USFASTD_SIZE");
        assert_eq!(summary[0].top_n, 1);
        assert_eq!(summary[0].factor_type, FactorKind::Style);
        assert_eq!(summary[1].factor, "USFASTD_BETA");
        assert_eq!(summary[1].top_n, 2);

        let all = m.portfolio_summary(&w, 10).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].factor_type, FactorKind::Industry);
    }

    #[test]
    fn test_unknown_security() {
        let m = model();
        let err = m
            .portfolio_exposures(&weights(&[("999999", 1.0)]))
            .unwrap_err();
        assert!(matches!(err, RiskModelError::UnknownSecurity(g) if g == "999999"));
    }

    #[test]
    fn test_invalid_weights() {
        let m = model();
        assert!(matches!(
            m.portfolio_exposures(&weights(&[("AAPL", 1.0)])),
            Err(RiskModelError::InvalidWeights(_))
        ));
        assert!(matches!(
            m.portfolio_exposures(&weights(&[("001690", f64::NAN)])),
            Err(RiskModelError::InvalidWeights(_))
        ));
    }

    #[test]
    fn test_weights_for_same_gvkey_are_merged() {
        let m = model();
        let split = weights(&[("1690", 0.25), ("001690", 0.25), ("012141", 0.5)]);
        let whole = weights(&[("001690", 0.5), ("012141", 0.5)]);

        assert_relative_eq!(
            m.specific_variance(&split).unwrap(),
            0.25 * 0.02 + 0.25 * 0.01,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            m.total_variance(&split).unwrap(),
            m.total_variance(&whole).unwrap(),
            epsilon = 1e-12
        );
    }

    #[rstest]
    #[case("001690", Some(vec![1.0, 2.0, 0.0]), Some(0.02))]
    #[case("1690", Some(vec![1.0, 2.0, 0.0]), Some(0.02))]
    #[case(" 12141 ", Some(vec![0.5, 0.0, 1.0]), Some(0.01))]
    #[case("999999", None, None)]
    #[case("AAPL", None, None)]
    fn test_security_lookups(
        #[case] gvkey: &str,
        #[case] expected_exposures: Option<Vec<f64>>,
        #[case] expected_specific: Option<f64>,
    ) {
        let m = model();
        assert_eq!(
            m.exposures_of(gvkey).map(|x| x.to_vec()),
            expected_exposures
        );
        assert_eq!(m.specific_variance_of(gvkey), expected_specific);
    }

    #[rstest]
    #[case(&[("001690", 1.0)], 0.04 + 2.0 * 0.01 * 2.0 + 4.0 * 0.09 + 0.02)]
    #[case(&[("012141", 1.0)], 0.25 * 0.04 + 0.0025 + 0.01)]
    #[case(&[], 0.0)]
    fn test_total_volatility(#[case] pairs: &[(&str, f64)], #[case] variance: f64) {
        let m = model();
        let vol = m.total_volatility(&weights(pairs)).unwrap();
        assert_relative_eq!(vol, variance.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_total_volatility_unknown_security() {
        let m = model();
        assert!(matches!(
            m.total_volatility(&weights(&[("001690", 0.5), ("999999", 0.5)])),
            Err(RiskModelError::UnknownSecurity(g)) if g == "999999"
        ));
    }

    #[test]
    fn test_unknown_factor_in_exposures() {
        let cov = CovarianceMatrix::new(date(), vec!["BETA".to_string()], array![[0.04]]).unwrap();
        let err = RiskModel::new(cov, &[exposure("001690", "SIZE", 1.0)], &[]).unwrap_err();
        assert!(matches!(err, RiskModelError::UnknownFactor(_)));
    }

    #[test]
    fn test_missing_specific_risk() {
        let cov = CovarianceMatrix::new(date(), vec!["BETA".to_string()], array![[0.04]]).unwrap();
        let m = RiskModel::new(cov, &[exposure("001690", "BETA", 1.0)], &[]).unwrap();
        let w = weights(&[("001690", 1.0)]);
        assert_relative_eq!(m.factor_variance(&w).unwrap(), 0.04);
        assert!(matches!(
            m.specific_variance(&w),
            Err(RiskModelError::MissingSpecificRisk(_))
        ));
    }
}
