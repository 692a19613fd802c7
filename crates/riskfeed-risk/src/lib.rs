#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/riskfeed/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod covariance;
pub mod loader;
pub mod model;
pub mod weights;

// Re-export main types
pub use covariance::{CovarianceError, CovarianceMatrix, expected_pair_count};
pub use loader::ReleaseRiskExt;
pub use model::{RiskDecomposition, RiskModel, RiskModelError};
pub use weights::{load_weights, read_weights};
