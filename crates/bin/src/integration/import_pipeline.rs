//! Release import pipeline.
//!
//! Finds the latest release in a source directory, copies its files to
//! `<dest>/<date>/`, optionally writes parquet twins of CSV-only tables,
//! writes the release summary, refreshes the data directory README and
//! records the import in the catalog.

use chrono::{NaiveDate, Utc};
use indicatif::ProgressBar;
use riskfeed_data::loader::{read_table, write_table};
use riskfeed_data::release::DATE_FORMAT;
use riskfeed_data::{
    Catalog, DataError, FileFormat, Release, ReleaseLoader, ReleaseRecord, TableFile,
    TableRecord, find_latest_release, find_release, list_releases,
};
use riskfeed_output::{ReleaseSummary, ReportError, ReportFiles, update_readme, write_summary_files};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Error type for import operations.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ImportError {
    /// Release discovery or table IO error.
    #[error("Data error: {0}")]
    Data(#[from] DataError),
    /// Summary or README error.
    #[error("Report error: {0}")]
    Report(#[from] ReportError),
    /// Filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// A forced import would delete its own source files.
    #[error("Source files live in {}, which --force would replace", .0.display())]
    SourceIsDestination(PathBuf),
    /// Destination already holds the release.
    #[error("Release {date} already imported at {}; use --force to replace it", path.display())]
    AlreadyImported {
        /// Release date
        date: NaiveDate,
        /// Existing release directory
        path: PathBuf,
    },
}

/// Configuration for an import.
#[derive(Debug, Clone)]
pub(crate) struct ImportConfig {
    /// Directory holding the vendor exports.
    pub source: PathBuf,
    /// Data directory receiving `<date>/` release directories.
    pub dest: PathBuf,
    /// Write parquet twins of CSV-only tables.
    pub parquet: bool,
    /// Replace an existing release directory.
    pub force: bool,
}

/// Result of a finished import.
#[derive(Debug)]
pub(crate) struct ImportOutcome {
    /// Release as found in the destination.
    pub release: Release,
    /// Release directory.
    pub directory: PathBuf,
    /// Summary of the imported tables.
    pub summary: ReleaseSummary,
    /// Written summary files.
    pub report: ReportFiles,
    /// Data directory README.
    pub readme: PathBuf,
    /// Catalog entry.
    pub record: ReleaseRecord,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Tables present only as CSV.
fn csv_only(release: &Release) -> Vec<&TableFile> {
    release
        .tables()
        .into_iter()
        .filter(|kind| release.file_with_format(*kind, FileFormat::Parquet).is_none())
        .filter_map(|kind| release.file_with_format(kind, FileFormat::Csv))
        .collect()
}

/// Whether any source file already lives inside `directory`.
fn source_inside(source: &Release, directory: &Path) -> std::io::Result<bool> {
    let directory = directory.canonicalize()?;
    for file in &source.files {
        if file.path.canonicalize()?.starts_with(&directory) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Import the latest release under `config.source`.
///
/// Files are staged in a temporary directory under `config.dest` and moved
/// to `<dest>/<date>/` only once every file and the summary are written, so
/// a failed import leaves no release directory behind.
pub(crate) fn import_latest(
    config: &ImportConfig,
    catalog: Option<&Catalog>,
    progress: Option<&ProgressBar>,
) -> Result<ImportOutcome, ImportError> {
    let source = find_latest_release(&config.source)?;
    let date = source.date;
    let directory = config.dest.join(date.format(DATE_FORMAT).to_string());
    info!(
        "Importing release {} ({} files) from {}",
        date,
        source.files.len(),
        config.source.display()
    );

    if directory.exists() {
        if !config.force {
            return Err(ImportError::AlreadyImported {
                date,
                path: directory,
            });
        }
        if source_inside(&source, &directory)? {
            return Err(ImportError::SourceIsDestination(directory));
        }
    }

    fs::create_dir_all(&config.dest)?;
    let staging = tempfile::Builder::new()
        .prefix(".import-")
        .tempdir_in(&config.dest)?;
    debug!("Staging release {} in {}", date, staging.path().display());

    let twins = if config.parquet { csv_only(&source) } else { Vec::new() };
    if let Some(pb) = progress {
        pb.set_length((source.files.len() + twins.len()) as u64);
        pb.set_message("Copying files...");
    }

    let mut staged = Vec::with_capacity(source.files.len() + twins.len());
    for file in &source.files {
        let target = staging.path().join(file_name(&file.path));
        fs::copy(&file.path, &target)?;
        debug!("Copied {} to {}", file.path.display(), target.display());
        staged.push(TableFile {
            path: target,
            ..file.clone()
        });
        if let Some(pb) = progress {
            pb.inc(1);
        }
    }

    if let Some(pb) = progress
        && !twins.is_empty()
    {
        pb.set_message("Writing parquet...");
    }
    for file in twins {
        let mut df = read_table(&file.path, FileFormat::Csv)?;
        let target = staging
            .path()
            .join(TableFile::file_name(file.kind, date, FileFormat::Parquet));
        write_table(&mut df, &target, FileFormat::Parquet)?;
        debug!("Wrote {} ({} rows)", target.display(), df.height());
        staged.push(TableFile {
            kind: file.kind,
            date,
            format: FileFormat::Parquet,
            path: target,
        });
        if let Some(pb) = progress {
            pb.inc(1);
        }
    }

    if let Some(pb) = progress {
        pb.set_message("Writing summary...");
    }
    let staged = Release {
        date,
        files: staged,
    };
    let summary = ReleaseSummary::from_loader(&ReleaseLoader::for_release(staged))?;
    let written = write_summary_files(staging.path(), &summary)?;

    if directory.exists() {
        warn!("Replacing existing release directory {}", directory.display());
        fs::remove_dir_all(&directory)?;
    }
    fs::rename(staging.path(), &directory)?;
    let report = ReportFiles {
        markdown: directory.join(file_name(&written.markdown)),
        json: directory.join(file_name(&written.json)),
    };

    let release = find_release(&config.dest, date)?;
    let readme = update_readme(&config.dest, &list_releases(&config.dest)?)?;

    let record = ReleaseRecord {
        date,
        source: config.source.display().to_string(),
        destination: directory.display().to_string(),
        imported_at: Utc::now(),
        tables: summary
            .tables
            .iter()
            .map(|t| TableRecord {
                kind: t.table,
                format: t.format,
                file_name: t.file_name.clone(),
                rows: t.rows,
            })
            .collect(),
    };
    if let Some(catalog) = catalog {
        catalog.record_release(&record)?;
    }

    info!(
        "Imported release {}: {} tables, {} rows",
        date,
        summary.tables.len(),
        summary.total_rows()
    );
    Ok(ImportOutcome {
        release,
        directory,
        summary,
        report,
        readme,
        record,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use riskfeed_data::TableKind;

    fn write_source(dir: &Path) {
        fs::write(
            dir.join("factor_covariance_2024-04-30.csv"),
            "month_end_date,factor_i,factor_j,covariance\n2024-04-30,BETA,BETA,0.05\n",
        )
        .unwrap();
        fs::write(
            dir.join("factor_covariance_2024-05-31.csv"),
            "month_end_date,factor_i,factor_j,covariance\n\
             2024-05-31,BETA,BETA,0.04\n\
             2024-05-31,BETA,SIZE,0.01\n\
             2024-05-31,SIZE,SIZE,0.09\n",
        )
        .unwrap();
        fs::write(
            dir.join("specific_risk_2024-05-31.csv"),
            "month_end_date,gvkey,specific_var\n2024-05-31,1690,0.02\n",
        )
        .unwrap();
        fs::write(dir.join("notes.txt"), "not an export").unwrap();
    }

    fn config(source: &Path, dest: &Path) -> ImportConfig {
        ImportConfig {
            source: source.to_path_buf(),
            dest: dest.to_path_buf(),
            parquet: false,
            force: false,
        }
    }

    #[test]
    fn test_import_latest_release() {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        write_source(source.path());
        let catalog = Catalog::in_memory().unwrap();

        let outcome = import_latest(&config(source.path(), dest.path()), Some(&catalog), None).unwrap();

        let expected = NaiveDate::from_ymd_opt(2024, 5, 31).unwrap();
        assert_eq!(outcome.release.date, expected);
        assert_eq!(outcome.directory, dest.path().join("2024-05-31"));
        assert!(outcome.directory.join("specific_risk_2024-05-31.csv").exists());
        assert!(!outcome.directory.join("factor_covariance_2024-04-30.csv").exists());
        assert!(!outcome.directory.join("notes.txt").exists());
        assert!(outcome.report.markdown.exists());
        assert_eq!(outcome.summary.tables.len(), 2);

        let readme = fs::read_to_string(&outcome.readme).unwrap();
        assert!(readme.contains("| 2024-05-31 | 2 | no |"));

        let recorded = catalog.latest_release().unwrap().unwrap();
        assert_eq!(recorded, outcome.record);
        assert_eq!(recorded.tables[0].kind, TableKind::FactorCovariance);
        assert_eq!(recorded.tables[0].rows, 3);
    }

    #[test]
    fn test_import_refuses_existing_without_force() {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        write_source(source.path());

        let mut cfg = config(source.path(), dest.path());
        import_latest(&cfg, None, None).unwrap();
        assert!(matches!(
            import_latest(&cfg, None, None),
            Err(ImportError::AlreadyImported { .. })
        ));

        cfg.force = true;
        let outcome = import_latest(&cfg, None, None).unwrap();
        assert_eq!(outcome.release.files.len(), 2);
    }

    #[test]
    fn test_import_writes_parquet_twins() {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        write_source(source.path());

        let mut cfg = config(source.path(), dest.path());
        cfg.parquet = true;
        let outcome = import_latest(&cfg, None, None).unwrap();

        assert_eq!(outcome.release.files.len(), 4);
        let cov = outcome.release.file(TableKind::FactorCovariance).unwrap();
        assert_eq!(cov.format, FileFormat::Parquet);
        assert_eq!(
            outcome.summary.table(TableKind::FactorCovariance).unwrap().rows,
            3
        );
    }

    #[test]
    fn test_failed_import_leaves_nothing_behind() {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        write_source(source.path());
        let corrupt = source.path().join("factor_returns_2024-05-31.parquet");
        fs::write(&corrupt, "not a parquet file").unwrap();

        let cfg = config(source.path(), dest.path());
        assert!(matches!(
            import_latest(&cfg, None, None),
            Err(ImportError::Report(_))
        ));
        assert!(!dest.path().join("2024-05-31").exists());
        assert_eq!(fs::read_dir(dest.path()).unwrap().count(), 0);

        fs::remove_file(&corrupt).unwrap();
        let outcome = import_latest(&cfg, None, None).unwrap();
        assert_eq!(outcome.release.files.len(), 2);
        assert!(outcome.report.json.exists());
        assert_eq!(outcome.report.json.parent(), Some(outcome.directory.as_path()));
    }

    #[test]
    fn test_force_refuses_to_replace_its_own_source() {
        let dest = tempfile::tempdir().unwrap();
        let release_dir = dest.path().join("2024-05-31");
        fs::create_dir(&release_dir).unwrap();
        write_source(&release_dir);

        let mut cfg = config(dest.path(), dest.path());
        cfg.force = true;
        assert!(matches!(
            import_latest(&cfg, None, None),
            Err(ImportError::SourceIsDestination(_))
        ));
        assert!(release_dir.join("specific_risk_2024-05-31.csv").exists());
    }

    #[test]
    fn test_import_empty_source() {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        assert!(matches!(
            import_latest(&config(source.path(), dest.path()), None, None),
            Err(ImportError::Data(DataError::NoRelease(_)))
        ));
    }
}
