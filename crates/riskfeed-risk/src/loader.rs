//! Risk-model accessors on a [`ReleaseLoader`].

use crate::covariance::{CovarianceError, CovarianceMatrix};
use crate::model::{RiskModel, RiskModelError};
use chrono::NaiveDate;
use riskfeed_data::ReleaseLoader;

/// Covariance and risk-model loading for a release.
pub trait ReleaseRiskExt {
    /// Factor covariance matrix for a month-end date, the latest in the table
    /// when `date` is `None`.
    fn get_factor_covariance_matrix(
        &self,
        date: Option<NaiveDate>,
    ) -> Result<CovarianceMatrix, CovarianceError>;

    /// Full risk model (covariance, exposures and specific risk) for a
    /// month-end date, the latest covariance date when `date` is `None`.
    fn load_risk_model(&self, date: Option<NaiveDate>) -> Result<RiskModel, RiskModelError>;
}

impl ReleaseRiskExt for ReleaseLoader {
    fn get_factor_covariance_matrix(
        &self,
        date: Option<NaiveDate>,
    ) -> Result<CovarianceMatrix, CovarianceError> {
        let (_, rows) = self.load_factor_covariance_for(date)?;
        CovarianceMatrix::from_rows(&rows)
    }

    fn load_risk_model(&self, date: Option<NaiveDate>) -> Result<RiskModel, RiskModelError> {
        let covariance = self.get_factor_covariance_matrix(date)?;
        let as_of = Some(covariance.date());
        let exposures = self.load_style_exposures_for(as_of)?;
        let specific = self.load_specific_risk_for(as_of)?;
        RiskModel::new(covariance, &exposures, &specific)
    }
}
