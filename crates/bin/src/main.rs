//! Riskfeed CLI binary.
//!
//! Imports risk-model releases and inspects the tables, covariance matrix,
//! identifier mapping and portfolio risk of the imported data.

mod integration;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use integration::catalog_manager::{data_dir, open_catalog};
use integration::import_pipeline::{ImportConfig, import_latest};
use integration::xbrl_pipeline::{extract_ciks, extract_file, load_tag_map};
use riskfeed::data::xbrl::{FundamentalItem, PeriodType, XbrlClient};
use riskfeed::data::{GvkeyMapper, ReleaseLoader, TableKind, list_releases, normalize_gvkey};
use riskfeed::output::{ExportFormat, Exporter};
use riskfeed::risk::{ReleaseRiskExt, load_weights};
use riskfeed::{FactorUniverse, QualityChecker};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "riskfeed")]
#[command(about = "Riskfeed: factor risk-model releases and XBRL fundamentals", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory holding imported releases
    #[arg(long, global = true, env = "RISKFEED_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Catalog database
    #[arg(long, global = true, env = "RISKFEED_CATALOG")]
    catalog: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import the latest release from a vendor export directory
    Import {
        /// Directory holding the vendor exports
        #[arg(long)]
        source: PathBuf,

        /// Destination data directory (defaults to the data dir)
        #[arg(long)]
        dest: Option<PathBuf>,

        /// Also write parquet copies of CSV tables
        #[arg(long)]
        parquet: bool,

        /// Replace an already imported release
        #[arg(long)]
        force: bool,

        /// Do not record the import in the catalog
        #[arg(long)]
        no_catalog: bool,
    },

    /// List releases in the data directory
    Releases {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Print the rows of one table
    Show {
        /// Table name (factor_covariance, factor_returns, style_exposures,
        /// specific_risk, portfolio_summary)
        table: String,

        /// Release date (defaults to the latest)
        #[arg(long)]
        release: Option<NaiveDate>,

        /// Maximum number of rows (0 for all)
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Output format (text, csv, json or pretty-json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Print the factor covariance matrix
    Covariance {
        /// Month-end date (defaults to the latest in the table)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Release date (defaults to the latest)
        #[arg(long)]
        release: Option<NaiveDate>,

        /// Restrict to these factors
        #[arg(long, value_delimiter = ',')]
        factors: Vec<String>,

        /// Print correlations instead of covariances
        #[arg(long)]
        correlation: bool,

        /// Output format (text, csv, json or pretty-json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Translate a GVKEY to a ticker, or a ticker to a GVKEY
    Map {
        /// GVKEY (or ticker with --reverse)
        id: String,

        /// Map a ticker to its GVKEY
        #[arg(long)]
        reverse: bool,

        /// Mapping CSV with gvkey and ticker columns
        #[arg(long, env = "RISKFEED_MAPPING")]
        mapping: PathBuf,
    },

    /// Check the shape of a release
    Validate {
        /// Release date (defaults to the latest)
        #[arg(long)]
        release: Option<NaiveDate>,

        /// Mapping CSV to check GVKEY coverage against
        #[arg(long, env = "RISKFEED_MAPPING")]
        mapping: Option<PathBuf>,

        /// Skip the positive semi-definite check
        #[arg(long)]
        skip_psd: bool,

        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Decompose the risk of a portfolio
    Portfolio {
        /// CSV with gvkey and weight columns
        #[arg(long)]
        weights: PathBuf,

        /// Number of factors in the summary
        #[arg(long, default_value = "12")]
        top_n: usize,

        /// Month-end date (defaults to the latest covariance date)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Release date (defaults to the latest)
        #[arg(long)]
        release: Option<NaiveDate>,

        /// Output format (text, csv, json or pretty-json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// XBRL fundamentals
    Xbrl {
        #[command(subcommand)]
        command: XbrlCommands,
    },
}

#[derive(Subcommand)]
enum XbrlCommands {
    /// Extract Compustat items from company facts
    Extract {
        /// Company-facts JSON or XBRL instance file
        #[arg(long, conflicts_with = "fetch")]
        file: Option<PathBuf>,

        /// CIK of the company (repeat or comma-separate to fetch several)
        #[arg(long, value_delimiter = ',')]
        cik: Vec<String>,

        /// Fetch company facts from the SEC for every --cik
        #[arg(long)]
        fetch: bool,

        /// Extract quarterly instead of annual items
        #[arg(long)]
        quarterly: bool,

        /// Extra tag mappings (CSV with item, concept[, priority][, description])
        #[arg(long)]
        tags: Option<PathBuf>,

        /// SEC User-Agent ("Company Name contact@email.com")
        #[arg(long, env = "RISKFEED_USER_AGENT")]
        user_agent: Option<String>,

        /// Store extracted items in the catalog
        #[arg(long)]
        store: bool,

        /// Output format (text, csv, json or pretty-json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let root = data_dir(cli.data_dir.as_deref());
    let catalog_path = cli.catalog.as_deref();

    match cli.command {
        Commands::Import {
            source,
            dest,
            parquet,
            force,
            no_catalog,
        } => {
            let config = ImportConfig {
                source,
                dest: dest.unwrap_or(root),
                parquet,
                force,
            };
            import_release(&config, if no_catalog { None } else { Some(catalog_path) })?;
        }
        Commands::Releases { format } => {
            show_releases(&root, catalog_path, &format)?;
        }
        Commands::Show {
            table,
            release,
            limit,
            format,
        } => {
            show_table(&open_loader(&root, release)?, &table, limit, &format)?;
        }
        Commands::Covariance {
            date,
            release,
            factors,
            correlation,
            format,
        } => {
            show_covariance(
                &open_loader(&root, release)?,
                date,
                &factors,
                correlation,
                &format,
            )?;
        }
        Commands::Map {
            id,
            reverse,
            mapping,
        } => {
            map_identifier(&id, reverse, &mapping)?;
        }
        Commands::Validate {
            release,
            mapping,
            skip_psd,
            format,
        } => {
            validate_release(
                &open_loader(&root, release)?,
                mapping.as_deref(),
                skip_psd,
                &format,
            )?;
        }
        Commands::Portfolio {
            weights,
            top_n,
            date,
            release,
            format,
        } => {
            portfolio_risk(&open_loader(&root, release)?, &weights, top_n, date, &format)?;
        }
        Commands::Xbrl {
            command:
                XbrlCommands::Extract {
                    file,
                    cik,
                    fetch,
                    quarterly,
                    tags,
                    user_agent,
                    store,
                    format,
                },
        } => {
            let period_type = if quarterly {
                PeriodType::Quarterly
            } else {
                PeriodType::Annual
            };
            let tag_map = load_tag_map(tags.as_deref())?;

            let items = if let Some(path) = file {
                extract_file(&path, cik.first().map(String::as_str), &tag_map, period_type)?
            } else if fetch && !cik.is_empty() {
                let client = match user_agent.as_deref() {
                    Some(agent) => XbrlClient::with_user_agent(agent)?,
                    None => XbrlClient::new()?,
                };
                let pb = progress_bar(cik.len() as u64);
                let (items, failures) =
                    extract_ciks(&client, &cik, &tag_map, period_type, Some(&pb)).await;
                pb.finish_and_clear();
                if !failures.is_empty() {
                    warn!("{} of {} companies failed", failures.len(), cik.len());
                }
                if items.is_empty() && !failures.is_empty() {
                    return Err(format!("No items extracted; {} fetches failed", failures.len()).into());
                }
                items
            } else {
                return Err("Pass --file <path>, or --fetch with at least one --cik".into());
            };

            if store {
                let catalog = open_catalog(catalog_path)?;
                catalog.put_items(&items)?;
                info!("Stored {} items in the catalog", items.len());
            }
            print_items(&items, &format)?;
        }
    }

    Ok(())
}

fn progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if let Ok(style) =
        ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("█▓░"));
    }
    pb.enable_steady_tick(StdDuration::from_millis(100));
    pb
}

/// `None` for the text rendering, otherwise an export format.
fn export_format(format: &str) -> Result<Option<ExportFormat>, Box<dyn std::error::Error>> {
    if format.eq_ignore_ascii_case("text") {
        Ok(None)
    } else {
        Ok(Some(format.parse()?))
    }
}

fn open_loader(
    root: &Path,
    release: Option<NaiveDate>,
) -> Result<ReleaseLoader, Box<dyn std::error::Error>> {
    let loader = match release {
        Some(date) => ReleaseLoader::open_date(root, date)?,
        None => ReleaseLoader::open(root)?,
    };
    debug!("Using release {} under {}", loader.date(), root.display());
    Ok(loader)
}

fn import_release(
    config: &ImportConfig,
    catalog_path: Option<Option<&Path>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = catalog_path.map(open_catalog).transpose()?;

    let pb = progress_bar(0);
    pb.set_message("Finding latest release...");
    let outcome = import_latest(config, catalog.as_ref(), Some(&pb));
    pb.finish_and_clear();
    let outcome = outcome?;

    println!(
        "Imported release {} into {}",
        outcome.release.date,
        outcome.directory.display()
    );
    println!();
    print!("{}", outcome.summary);
    println!();
    println!("Summary: {}", outcome.report.markdown.display());
    println!("Index:   {}", outcome.readme.display());
    if catalog.is_some() {
        println!("Catalog: {} tables recorded", outcome.record.tables.len());
    }
    Ok(())
}

fn show_releases(
    root: &Path,
    catalog_path: Option<&Path>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let releases = list_releases(root)?;
    let catalog = match open_catalog(catalog_path) {
        Ok(catalog) => Some(catalog),
        Err(e) => {
            debug!("Catalog unavailable: {}", e);
            None
        }
    };
    let imported = |date: NaiveDate| {
        catalog
            .as_ref()
            .and_then(|c| c.has_release(date).ok())
            .unwrap_or(false)
    };

    if format.eq_ignore_ascii_case("json") {
        let rows: Vec<_> = releases
            .iter()
            .map(|r| {
                json!({
                    "date": r.date,
                    "tables": r.tables(),
                    "missing": r.missing_tables(),
                    "complete": r.is_complete(),
                    "cataloged": imported(r.date),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if releases.is_empty() {
        println!("No releases under {}", root.display());
        return Ok(());
    }

    println!("Releases under {}", root.display());
    println!("{:<12} {:>6} {:>9} {:>9}", "Date", "Tables", "Complete", "Cataloged");
    for release in releases.iter().rev() {
        println!(
            "{:<12} {:>6} {:>9} {:>9}",
            release.date.to_string(),
            release.tables().len(),
            if release.is_complete() { "yes" } else { "no" },
            if imported(release.date) { "yes" } else { "no" },
        );
    }
    Ok(())
}

fn take<T: Clone>(rows: Vec<T>, limit: usize) -> Vec<T> {
    if limit == 0 || rows.len() <= limit {
        rows
    } else {
        rows[..limit].to_vec()
    }
}

fn show_table(
    loader: &ReleaseLoader,
    table: &str,
    limit: usize,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let kind: TableKind = table.parse()?;
    let Some(format) = export_format(format)? else {
        let df = loader.load_table(kind)?;
        let shown = if limit == 0 { df.height() } else { limit };
        println!("{} ({} rows)", kind, df.height());
        println!("{}", df.head(Some(shown)));
        return Ok(());
    };

    let out = match kind {
        TableKind::FactorCovariance => {
            take(loader.load_factor_covariance()?, limit).export_to_string(format)?
        }
        TableKind::FactorReturns => {
            take(loader.load_factor_returns()?, limit).export_to_string(format)?
        }
        TableKind::StyleExposures => {
            take(loader.load_style_exposures()?, limit).export_to_string(format)?
        }
        TableKind::SpecificRisk => {
            take(loader.load_specific_risk()?, limit).export_to_string(format)?
        }
        TableKind::PortfolioSummary => {
            take(loader.load_portfolio_summary()?, limit).export_to_string(format)?
        }
    };
    print_export(&out);
    Ok(())
}

fn print_export(out: &str) {
    if out.ends_with('\n') {
        print!("{}", out);
    } else {
        println!("{}", out);
    }
}

fn show_covariance(
    loader: &ReleaseLoader,
    date: Option<NaiveDate>,
    factors: &[String],
    correlation: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut cov = loader.get_factor_covariance_matrix(date)?;
    if !factors.is_empty() {
        cov = cov.subset(factors)?;
    }

    if let Some(format) = export_format(format)? {
        print_export(&cov.export_to_string(format)?);
        return Ok(());
    }

    let universe = FactorUniverse::new(cov.factors());
    println!(
        "Factor {} matrix, {} ({} factors: {} style, {} industry, {} country)",
        if correlation { "correlation" } else { "covariance" },
        cov.date(),
        universe.len(),
        universe.style_factors().len(),
        universe.industries().len(),
        universe.countries().len()
    );
    println!("─────────────────────────────────────────────────────────────");

    let values = if correlation {
        cov.correlation_matrix()
    } else {
        cov.matrix().clone()
    };
    print!("{:<20}", "");
    for name in cov.factors() {
        print!(" {:>10}", truncate(name, 10));
    }
    println!();
    for (name, row) in cov.factors().iter().zip(values.rows()) {
        print!("{:<20}", truncate(name, 20));
        for v in row {
            print!(" {:>10.6}", v);
        }
        println!();
    }

    println!("\nFactor Volatilities:");
    println!("─────────────────────────────────────────────────────────────");
    for name in cov.factors() {
        println!("  {:<20} {:>10.4}", name, cov.volatility(name)?);
    }
    Ok(())
}

fn truncate(name: &str, width: usize) -> &str {
    match name.char_indices().nth(width) {
        Some((idx, _)) => &name[..idx],
        None => name,
    }
}

fn map_identifier(id: &str, reverse: bool, mapping: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mapper = GvkeyMapper::from_csv(mapping)?;
    debug!(
        "Loaded {} mappings ({} conflicts, {} skipped)",
        mapper.len(),
        mapper.conflicts(),
        mapper.skipped()
    );

    if reverse {
        let gvkey = mapper
            .ticker_to_gvkey(id)
            .ok_or_else(|| format!("No GVKEY for ticker '{}'", id))?;
        println!("{}", gvkey);
    } else {
        let gvkey = normalize_gvkey(id)?;
        let ticker = mapper
            .gvkey_to_ticker(&gvkey)
            .ok_or_else(|| format!("No ticker for GVKEY {}", gvkey))?;
        println!("{}", ticker);
    }
    Ok(())
}

fn validate_release(
    loader: &ReleaseLoader,
    mapping: Option<&Path>,
    skip_psd: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mapper = mapping.map(GvkeyMapper::from_csv).transpose()?;

    let mut checker = QualityChecker::new();
    if skip_psd {
        checker = checker.with_psd_tolerance(None);
    }
    if let Some(mapper) = mapper.as_ref() {
        checker = checker.with_mapper(mapper);
    }
    let report = checker.check_release(loader)?;

    if format.eq_ignore_ascii_case("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report);
    }

    if report.is_ok() {
        Ok(())
    } else {
        Err(format!(
            "Release {} failed validation with {} errors",
            loader.date(),
            report.count(riskfeed::Severity::Error)
        )
        .into())
    }
}

fn portfolio_risk(
    loader: &ReleaseLoader,
    weights_path: &Path,
    top_n: usize,
    date: Option<NaiveDate>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let weights = load_weights(weights_path)?;
    let model = loader.load_risk_model(date)?;
    let summary = model.portfolio_summary(&weights, top_n)?;

    if let Some(format) = export_format(format)? {
        print_export(&summary.export_to_string(format)?);
        return Ok(());
    }

    let decomposition = model.risk_decomposition(&weights)?;
    println!(
        "Portfolio risk, {} ({} holdings, {} securities in model)",
        model.covariance().date(),
        weights.len(),
        model.n_securities()
    );
    println!("─────────────────────────────────────────────────────────────");
    println!("  Total risk:      {:>10.4}", decomposition.total_risk());
    println!("  Factor risk:     {:>10.4}", decomposition.factor_risk());
    println!("  Specific risk:   {:>10.4}", decomposition.specific_risk());
    println!(
        "  Factor share:    {:>9.1}%",
        decomposition.factor_share() * 100.0
    );

    println!("\nTop {} factors by variance contribution:", summary.len());
    println!("─────────────────────────────────────────────────────────────");
    println!(
        "  {:>3} {:<24} {:<9} {:>10} {:>12}",
        "#", "Factor", "Type", "Exposure", "Contribution"
    );
    for row in &summary {
        println!(
            "  {:>3} {:<24} {:<9} {:>10.4} {:>12.6}",
            row.top_n,
            truncate(&row.factor, 24),
            row.factor_type.to_string(),
            row.portfolio_exposure,
            row.variance_contribution
        );
    }
    Ok(())
}

fn print_items(items: &[FundamentalItem], format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(format) = export_format(format)? {
        print_export(&items.export_to_string(format)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("No items extracted");
        return Ok(());
    }
    println!(
        "{:<12} {:<6} {:>6} {:<4} {:<12} {:>16}  {}",
        "CIK", "Item", "FY", "FP", "Period end", "Value", "Concept"
    );
    for item in items {
        println!(
            "{:<12} {:<6} {:>6} {:<4} {:<12} {:>16.3}  {}",
            item.cik,
            item.item,
            item.fiscal_year,
            item.fiscal_period,
            item.period_end.to_string(),
            item.value,
            item.concept
        );
    }
    Ok(())
}
