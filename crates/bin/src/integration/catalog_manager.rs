//! Default locations of the data directory and the catalog.
//!
//! Platform-specific defaults come from `dirs`:
//! - Linux: `~/.local/share/riskfeed/` and `~/.cache/riskfeed/catalog.db`
//! - macOS: `~/Library/Application Support/riskfeed/` and `~/Library/Caches/riskfeed/catalog.db`
//! - Windows: `%APPDATA%\riskfeed\` and `%LOCALAPPDATA%\riskfeed\catalog.db`

use riskfeed_data::{Catalog, DataError};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default directory holding imported releases.
pub(crate) fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("riskfeed")
}

/// Default catalog database path.
pub(crate) fn default_catalog_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("riskfeed")
        .join("catalog.db")
}

/// Configured data directory, falling back to the default.
pub(crate) fn data_dir(configured: Option<&Path>) -> PathBuf {
    configured.map_or_else(default_data_dir, Path::to_path_buf)
}

/// Open the catalog, creating its directory if needed.
pub(crate) fn open_catalog(configured: Option<&Path>) -> Result<Catalog, DataError> {
    let path = configured.map_or_else(default_catalog_path, Path::to_path_buf);

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    debug!("Opening catalog {}", path.display());
    Catalog::new(&path)
}
