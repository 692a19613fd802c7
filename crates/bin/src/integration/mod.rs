//! Pipelines driven by the command-line interface.
//!
//! Release import, XBRL extraction and the default locations of the data
//! directory and catalog.

pub(crate) mod catalog_manager;
pub(crate) mod import_pipeline;
pub(crate) mod xbrl_pipeline;
