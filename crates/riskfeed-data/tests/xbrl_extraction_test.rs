//! Integration tests for XBRL parsing, Compustat extraction and the catalog

use approx::assert_relative_eq;
use chrono::NaiveDate;
use riskfeed_data::catalog::Catalog;
use riskfeed_data::xbrl::{PeriodType, TagMap, XbrlDocument, extract_items};

const COMPANY_FACTS: &str = r#"{
    "cik": 1234,
    "entityName": "Example Corp",
    "facts": {
        "dei": {
            "EntityCommonStockSharesOutstanding": {
                "units": {"shares": [
                    {"end": "2024-01-31", "val": 50000000, "form": "10-K", "fy": 2023, "fp": "FY", "filed": "2024-02-20"}
                ]}
            }
        },
        "us-gaap": {
            "Assets": {
                "units": {"USD": [
                    {"end": "2023-12-31", "val": 1250000000, "form": "10-K", "fy": 2023, "fp": "FY", "filed": "2024-02-20"},
                    {"end": "2023-06-30", "val": 1200000000, "form": "10-Q", "fy": 2023, "fp": "Q2", "filed": "2023-08-01"}
                ]}
            },
            "NetIncomeLoss": {
                "units": {"USD": [
                    {"start": "2023-01-01", "end": "2023-12-31", "val": 80000000, "form": "10-K", "fy": 2023, "fp": "FY", "filed": "2024-02-20"},
                    {"start": "2023-04-01", "end": "2023-06-30", "val": 21000000, "form": "10-Q", "fy": 2023, "fp": "Q2", "filed": "2023-08-01"},
                    {"start": "2023-01-01", "end": "2023-06-30", "val": 39000000, "form": "10-Q", "fy": 2023, "fp": "Q2", "filed": "2023-08-01"}
                ]}
            },
            "EarningsPerShareDiluted": {
                "units": {"USD/shares": [
                    {"start": "2023-01-01", "end": "2023-12-31", "val": 1.58, "form": "10-K", "fy": 2023, "fp": "FY", "filed": "2024-02-20"}
                ]}
            }
        }
    }
}"#;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn test_annual_items_from_company_facts() {
    let doc = XbrlDocument::parse_json(COMPANY_FACTS).unwrap();
    assert_eq!(doc.cik.as_deref(), Some("1234"));

    let items = extract_items(&doc, &TagMap::default(), PeriodType::Annual, "1234");
    let get = |name: &str| items.iter().find(|i| i.item == name).unwrap();

    assert_relative_eq!(get("AT").value, 1250.0);
    assert_relative_eq!(get("NI").value, 80.0);
    assert_relative_eq!(get("EPSFX").value, 1.58);
    assert_eq!(get("AT").period_end, date(2023, 12, 31));
    assert_eq!(get("AT").cik, "0000001234");

    let csho = get("CSHO");
    assert_eq!(csho.concept, "dei:EntityCommonStockSharesOutstanding");
    assert_relative_eq!(csho.value, 50.0);
    assert_eq!(csho.fiscal_year, 2023);
}

#[test]
fn test_quarterly_items_use_three_month_durations() {
    let doc = XbrlDocument::parse_json(COMPANY_FACTS).unwrap();
    let items = extract_items(&doc, &TagMap::default(), PeriodType::Quarterly, "1234");

    let ni: Vec<_> = items.iter().filter(|i| i.item == "NI").collect();
    assert_eq!(ni.len(), 1);
    assert_relative_eq!(ni[0].value, 21.0);
    assert_eq!(ni[0].fiscal_period, "Q2");

    let at: Vec<_> = items.iter().filter(|i| i.item == "AT").collect();
    assert_eq!(at.len(), 1);
    assert_eq!(at[0].period_end, date(2023, 6, 30));
}

#[test]
fn test_custom_tag_map_overrides_defaults() {
    let doc = XbrlDocument::parse_json(COMPANY_FACTS).unwrap();
    let custom = TagMap::from_reader("item,concept\nAT,Liabilities\n".as_bytes()).unwrap();
    let tags = TagMap::default().merge(custom);

    let items = extract_items(&doc, &tags, PeriodType::Annual, "1234");
    assert!(items.iter().all(|i| i.item != "AT"));
}

#[test]
fn test_extracted_items_round_trip_through_catalog() {
    let doc = XbrlDocument::parse_json(COMPANY_FACTS).unwrap();
    let mut items = extract_items(&doc, &TagMap::default(), PeriodType::Annual, "1234");
    for item in &mut items {
        item.gvkey = Some("009999".to_string());
    }

    let catalog = Catalog::in_memory().unwrap();
    catalog.put_items(&items).unwrap();

    let stored = catalog.get_items("0000001234", Some(2023)).unwrap();
    assert_eq!(stored.len(), items.len());
    assert!(stored.iter().all(|i| i.gvkey.as_deref() == Some("009999")));
}
