//! Managed release index inside a data directory README.
//!
//! The section between [`START_MARKER`] and [`END_MARKER`] is regenerated on
//! every import; text outside the markers is left untouched.

use crate::report::{ReportError, SUMMARY_MARKDOWN};
use riskfeed_data::Release;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Opening marker of the managed section.
pub const START_MARKER: &str = "<!-- releases:start -->";

/// Closing marker of the managed section.
pub const END_MARKER: &str = "<!-- releases:end -->";

/// README file name.
pub const README: &str = "README.md";

const DEFAULT_HEADER: &str = "# Risk model releases\n\n\
Dated exports of the factor risk model. Each directory holds one release.\n";

/// Render the managed section for a set of releases, newest first.
pub fn render_release_index(releases: &[Release]) -> String {
    let mut out = String::new();
    out.push_str(START_MARKER);
    out.push('\n');
    out.push_str("| Release | Tables | Complete | Summary |\n");
    out.push_str("|---------|--------|----------|---------|\n");

    let mut sorted: Vec<&Release> = releases.iter().collect();
    sorted.sort_by(|a, b| b.date.cmp(&a.date));
    for release in sorted {
        out.push_str(&format!(
            "| {} | {} | {} | [{}]({}/{}) |\n",
            release.date,
            release.tables().len(),
            if release.is_complete() { "yes" } else { "no" },
            SUMMARY_MARKDOWN,
            release.date,
            SUMMARY_MARKDOWN,
        ));
    }

    out.push_str(END_MARKER);
    out
}

/// Replace the managed section of `existing`, or append one if it has none.
pub fn splice_release_index(existing: &str, index: &str) -> String {
    if let Some(start) = existing.find(START_MARKER)
        && let Some(end_rel) = existing[start..].find(END_MARKER)
    {
        let end = start + end_rel + END_MARKER.len();
        return format!("{}{}{}", &existing[..start], index, &existing[end..]);
    }

    let mut out = existing.trim_end().to_string();
    if !out.is_empty() {
        out.push_str("\n\n");
    }
    out.push_str(index);
    out.push('\n');
    out
}

/// Rewrite the release index in `<dest_root>/README.md`, creating the file if needed.
pub fn update_readme(dest_root: &Path, releases: &[Release]) -> Result<PathBuf, ReportError> {
    let path = dest_root.join(README);
    let existing = if path.exists() {
        fs::read_to_string(&path)?
    } else {
        DEFAULT_HEADER.to_string()
    };

    let updated = splice_release_index(&existing, &render_release_index(releases));
    fs::write(&path, updated)?;
    debug!("Updated {} with {} releases", path.display(), releases.len());
    Ok(path)
}
