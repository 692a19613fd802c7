#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/riskfeed/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod catalog;
pub mod error;
pub mod loader;
pub mod mapping;
pub mod release;
pub mod schema;
pub mod xbrl;

pub use catalog::{Catalog, ReleaseRecord, TableRecord};
pub use error::{DataError, Result};
pub use loader::ReleaseLoader;
pub use mapping::{GvkeyMapper, normalize_gvkey};
pub use release::{
    FileFormat, Release, TableFile, TableKind, find_latest_release, find_release, list_releases,
};
pub use schema::{ExposureFlags, FactorKind};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
