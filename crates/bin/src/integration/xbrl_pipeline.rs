//! XBRL extraction pipeline.
//!
//! Reads company facts from a local file or fetches them from the SEC for a
//! batch of CIKs, and maps them onto Compustat items.

use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use riskfeed_data::DataError;
use riskfeed_data::xbrl::{
    FundamentalItem, PeriodType, TagMap, XbrlClient, XbrlDocument, extract_items, pad_cik,
};
use std::path::Path;
use tracing::{debug, warn};

/// Default number of concurrent fetches. The client rate limit still applies.
const DEFAULT_CONCURRENCY: usize = 4;

/// Tag map to extract with: the built-in map, extended by an override file.
pub(crate) fn load_tag_map(overrides: Option<&Path>) -> Result<TagMap, DataError> {
    match overrides {
        Some(path) => Ok(TagMap::default().merge(TagMap::from_csv(path)?)),
        None => Ok(TagMap::default()),
    }
}

/// Parse a company-facts JSON file or an XBRL instance document.
pub(crate) fn load_document(path: &Path) -> Result<XbrlDocument, DataError> {
    let content = std::fs::read_to_string(path)?;
    let is_xml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("xml") || e.eq_ignore_ascii_case("xbrl"));

    let doc = if is_xml {
        XbrlDocument::parse_xml(&content)?
    } else {
        XbrlDocument::parse_json(&content)?
    };
    debug!("Parsed {} facts from {}", doc.facts.len(), path.display());
    Ok(doc)
}

/// Extract items from a local document. The CIK defaults to the one in the document.
pub(crate) fn extract_file(
    path: &Path,
    cik: Option<&str>,
    tag_map: &TagMap,
    period_type: PeriodType,
) -> Result<Vec<FundamentalItem>, DataError> {
    let doc = load_document(path)?;
    let cik = cik
        .map(str::to_string)
        .or_else(|| doc.cik.clone())
        .ok_or_else(|| {
            DataError::Parse(format!("No CIK in {}; pass --cik", path.display()))
        })?;
    Ok(extract_items(&doc, tag_map, period_type, &cik))
}

/// Fetch and extract items for several CIKs concurrently.
///
/// Failed CIKs are logged and returned alongside the items of the others.
pub(crate) async fn extract_ciks(
    client: &XbrlClient,
    ciks: &[String],
    tag_map: &TagMap,
    period_type: PeriodType,
    progress: Option<&ProgressBar>,
) -> (Vec<FundamentalItem>, Vec<(String, DataError)>) {
    if let Some(pb) = progress {
        pb.set_length(ciks.len() as u64);
        pb.set_message(format!(
            "Fetching {} companies ({} concurrent)...",
            ciks.len(),
            DEFAULT_CONCURRENCY
        ));
    }

    let results: Vec<(String, Result<Vec<FundamentalItem>, DataError>)> = stream::iter(ciks)
        .map(|cik| async move {
            let items = client
                .fetch_company_facts(cik)
                .await
                .map(|doc| extract_items(&doc, tag_map, period_type, cik));
            (pad_cik(cik), items)
        })
        .buffer_unordered(DEFAULT_CONCURRENCY)
        .inspect(|_| {
            if let Some(pb) = progress {
                pb.inc(1);
            }
        })
        .collect()
        .await;

    let mut items = Vec::new();
    let mut failures = Vec::new();
    for (cik, result) in results {
        match result {
            Ok(found) => {
                debug!("Extracted {} items for CIK {}", found.len(), cik);
                items.extend(found);
            }
            Err(e) => {
                if let Some(pb) = progress {
                    pb.suspend(|| warn!("Failed to fetch CIK {}: {}", cik, e));
                } else {
                    warn!("Failed to fetch CIK {}: {}", cik, e);
                }
                failures.push((cik, e));
            }
        }
    }

    items.sort_by(|a, b| {
        (&a.cik, a.period_end, &a.item).cmp(&(&b.cik, b.period_end, &b.item))
    });
    (items, failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const COMPANY_FACTS: &str = r#"{
        "cik": 320193,
        "entityName": "Apple Inc.",
        "facts": {
            "us-gaap": {
                "Assets": {
                    "units": {
                        "USD": [
                            {"end": "2023-09-30", "val": 352583000000, "fy": 2023, "fp": "FY", "form": "10-K", "filed": "2023-11-03"}
                        ]
                    }
                }
            }
        }
    }"#;

    #[test]
    fn test_extract_file_uses_document_cik() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CIK0000320193.json");
        fs::write(&path, COMPANY_FACTS).unwrap();

        let items = extract_file(&path, None, &TagMap::default(), PeriodType::Annual).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].cik, "0000320193");
        assert_eq!(items[0].item, "AT");
        assert_eq!(items[0].fiscal_year, 2023);
        assert!((items[0].value - 352_583.0).abs() < 1e-9);
    }

    #[test]
    fn test_extract_file_quarterly_skips_annual() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.json");
        fs::write(&path, COMPANY_FACTS).unwrap();

        let items =
            extract_file(&path, Some("320193"), &TagMap::default(), PeriodType::Quarterly).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_load_tag_map_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tags.csv");
        fs::write(
            &path,
            "item,concept,description\nXRD,ResearchAndDevelopmentExpense,R&D Expense\n",
        )
        .unwrap();

        let merged = load_tag_map(Some(&path)).unwrap();
        assert!(merged.get("XRD").is_some());
        assert!(merged.get("AT").is_some());
        assert_eq!(load_tag_map(None).unwrap(), TagMap::default());
    }

    #[test]
    fn test_load_document_missing_file() {
        assert!(matches!(
            load_document(Path::new("/nonexistent/facts.json")),
            Err(DataError::Io(_))
        ));
    }
}
