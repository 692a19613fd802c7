#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/riskfeed/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod quality;
pub mod universe;

// Re-export main types from sub-crates
pub use riskfeed_data as data;
pub use riskfeed_output as output;
pub use riskfeed_risk as risk;

pub use quality::{Finding, QualityChecker, QualityReport, Severity};
pub use universe::{FactorUniverse, STYLE_FACTORS, Universe};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
