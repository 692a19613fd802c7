//! Catalog of imported releases and extracted fundamentals.

pub mod sqlite;

pub use sqlite::{Catalog, CatalogStats, ReleaseRecord, TableRecord};
