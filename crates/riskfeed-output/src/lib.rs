#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/riskfeed/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod export;
pub mod readme;
pub mod report;
pub mod summary;

pub use export::{ExportError, ExportFormat, Exporter};
pub use readme::{render_release_index, update_readme};
pub use report::{ReportError, ReportFiles, read_summary, write_summary_files};
pub use summary::{ReleaseSummary, TableSummary};
