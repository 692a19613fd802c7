//! Extraction of Compustat-style fundamental items from XBRL facts.
//!
//! Each Compustat item (mnemonic such as `AT` or `NI`) maps to one or more
//! US-GAAP concepts in priority order. For every fiscal period the first
//! concept with a usable fact wins; among facts of that concept the most
//! recently filed one wins, so restatements replace original figures.
//!
//! Monetary and share amounts are scaled to millions, matching Compustat.
//! Per-share amounts are left as reported.

use super::facts::{XbrlDocument, XbrlFact};
use crate::error::{DataError, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::ops::RangeInclusive;
use std::path::Path;

/// Divisor applied to monetary and share amounts.
const MILLIONS: f64 = 1_000_000.0;

/// Period type for extracted items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PeriodType {
    /// Quarterly report (10-Q)
    Quarterly,
    /// Annual report (10-K)
    Annual,
}

impl PeriodType {
    /// Convert to database string representation.
    pub const fn to_db_str(&self) -> &'static str {
        match self {
            Self::Quarterly => "Q",
            Self::Annual => "A",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self> {
        match s {
            "Q" => Ok(Self::Quarterly),
            "A" => Ok(Self::Annual),
            _ => Err(DataError::Parse(format!("Invalid period type: {}", s))),
        }
    }

    /// Period type of a form, amendments included.
    pub fn from_form(form: &str) -> Option<Self> {
        if form.starts_with("10-K") || form.starts_with("20-F") {
            Some(Self::Annual)
        } else if form.starts_with("10-Q") {
            Some(Self::Quarterly)
        } else {
            None
        }
    }

    /// Accepted length of a duration fact, in days.
    pub const fn duration_days(&self) -> RangeInclusive<i64> {
        match self {
            Self::Quarterly => 80..=100,
            Self::Annual => 300..=400,
        }
    }
}

/// A Compustat item and the XBRL concepts that report it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompustatItem {
    /// Compustat mnemonic (e.g. "AT")
    pub mnemonic: String,
    /// Human readable description
    pub description: String,
    /// Candidate concepts, highest priority first
    pub concepts: Vec<String>,
}

impl CompustatItem {
    fn new(mnemonic: &str, description: &str, concepts: &[&str]) -> Self {
        Self {
            mnemonic: mnemonic.to_string(),
            description: description.to_string(),
            concepts: concepts.iter().map(|c| (*c).to_string()).collect(),
        }
    }
}

/// Mapping from Compustat items to XBRL concepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagMap {
    items: Vec<CompustatItem>,
}

impl Default for TagMap {
    fn default() -> Self {
        Self {
            items: vec![
                CompustatItem::new("AT", "Assets - Total", &["us-gaap:Assets"]),
                CompustatItem::new("LT", "Liabilities - Total", &["us-gaap:Liabilities"]),
                CompustatItem::new(
                    "SEQ",
                    "Stockholders' Equity - Parent",
                    &[
                        "us-gaap:StockholdersEquity",
                        "us-gaap:StockholdersEquityIncludingPortionAttributableToNoncontrollingInterest",
                    ],
                ),
                CompustatItem::new(
                    "CHE",
                    "Cash and Short-Term Investments",
                    &[
                        "us-gaap:CashCashEquivalentsAndShortTermInvestments",
                        "us-gaap:CashAndCashEquivalentsAtCarryingValue",
                    ],
                ),
                CompustatItem::new("ACT", "Current Assets - Total", &["us-gaap:AssetsCurrent"]),
                CompustatItem::new(
                    "LCT",
                    "Current Liabilities - Total",
                    &["us-gaap:LiabilitiesCurrent"],
                ),
                CompustatItem::new(
                    "DLTT",
                    "Long-Term Debt - Total",
                    &["us-gaap:LongTermDebtNoncurrent", "us-gaap:LongTermDebt"],
                ),
                CompustatItem::new(
                    "REVT",
                    "Revenue - Total",
                    &[
                        "us-gaap:Revenues",
                        "us-gaap:RevenueFromContractWithCustomerExcludingAssessedTax",
                        "us-gaap:SalesRevenueNet",
                    ],
                ),
                CompustatItem::new(
                    "COGS",
                    "Cost of Goods Sold",
                    &[
                        "us-gaap:CostOfRevenue",
                        "us-gaap:CostOfGoodsAndServicesSold",
                    ],
                ),
                CompustatItem::new(
                    "OIADP",
                    "Operating Income After Depreciation",
                    &["us-gaap:OperatingIncomeLoss"],
                ),
                CompustatItem::new("XINT", "Interest and Related Expense", &["us-gaap:InterestExpense"]),
                CompustatItem::new("NI", "Net Income (Loss)", &["us-gaap:NetIncomeLoss"]),
                CompustatItem::new(
                    "EPSPX",
                    "EPS (Basic) - Excluding Extraordinary Items",
                    &["us-gaap:EarningsPerShareBasic"],
                ),
                CompustatItem::new(
                    "EPSFX",
                    "EPS (Diluted) - Excluding Extraordinary Items",
                    &["us-gaap:EarningsPerShareDiluted"],
                ),
                CompustatItem::new(
                    "OANCF",
                    "Operating Activities - Net Cash Flow",
                    &["us-gaap:NetCashProvidedByUsedInOperatingActivities"],
                ),
                CompustatItem::new(
                    "CAPX",
                    "Capital Expenditures",
                    &["us-gaap:PaymentsToAcquirePropertyPlantAndEquipment"],
                ),
                CompustatItem::new(
                    "DVC",
                    "Dividends Common",
                    &["us-gaap:PaymentsOfDividendsCommonStock"],
                ),
                CompustatItem::new(
                    "CSHO",
                    "Common Shares Outstanding",
                    &[
                        "us-gaap:CommonStockSharesOutstanding",
                        "dei:EntityCommonStockSharesOutstanding",
                    ],
                ),
            ],
        }
    }
}

#[derive(Debug, Deserialize)]
struct TagRow {
    item: String,
    concept: String,
    #[serde(default)]
    priority: Option<u32>,
    #[serde(default)]
    description: Option<String>,
}

impl TagMap {
    /// An empty mapping.
    pub const fn empty() -> Self {
        Self { items: Vec::new() }
    }

    /// Items in declaration order.
    pub fn items(&self) -> &[CompustatItem] {
        &self.items
    }

    /// Look up an item by mnemonic (case-insensitive).
    pub fn get(&self, mnemonic: &str) -> Option<&CompustatItem> {
        self.items
            .iter()
            .find(|i| i.mnemonic.eq_ignore_ascii_case(mnemonic))
    }

    /// Load a mapping from a CSV file with `item,concept[,priority][,description]` columns.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }

    /// Load a mapping from any CSV reader. Lower priority numbers are tried first;
    /// rows without a priority keep file order.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut grouped: Vec<(String, String, Vec<(u32, usize, String)>)> = Vec::new();

        for (line, row) in rdr.deserialize::<TagRow>().enumerate() {
            let row = row?;
            let mnemonic = row.item.to_uppercase();
            let concept = if row.concept.contains(':') {
                row.concept
            } else {
                format!("us-gaap:{}", row.concept)
            };
            let priority = row.priority.unwrap_or(u32::MAX);

            match grouped.iter_mut().find(|(m, _, _)| *m == mnemonic) {
                Some((_, description, concepts)) => {
                    if description.is_empty() {
                        *description = row.description.unwrap_or_default();
                    }
                    concepts.push((priority, line, concept));
                }
                None => grouped.push((
                    mnemonic,
                    row.description.unwrap_or_default(),
                    vec![(priority, line, concept)],
                )),
            }
        }

        let items = grouped
            .into_iter()
            .map(|(mnemonic, description, mut concepts)| {
                concepts.sort();
                CompustatItem {
                    mnemonic,
                    description,
                    concepts: concepts.into_iter().map(|(_, _, c)| c).collect(),
                }
            })
            .collect();
        Ok(Self { items })
    }

    /// Overlay another mapping: its items replace same-named items, new items are appended.
    pub fn merge(mut self, other: Self) -> Self {
        for item in other.items {
            match self
                .items
                .iter_mut()
                .find(|i| i.mnemonic == item.mnemonic)
            {
                Some(existing) => *existing = item,
                None => self.items.push(item),
            }
        }
        self
    }
}

/// One extracted fundamental value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundamentalItem {
    /// SEC Central Index Key, ten digits zero-padded
    pub cik: String,
    /// Compustat GVKEY, when known
    pub gvkey: Option<String>,
    /// Compustat mnemonic
    pub item: String,
    /// Value in Compustat units (millions, or per share)
    pub value: f64,
    /// Annual or quarterly
    pub period_type: PeriodType,
    /// Compustat fiscal year
    pub fiscal_year: i32,
    /// Fiscal period label ("FY", "Q1".."Q4")
    pub fiscal_period: String,
    /// End of the reporting period
    pub period_end: NaiveDate,
    /// Concept the value came from
    pub concept: String,
    /// Unit as reported
    pub unit: String,
    /// Form of the source filing
    pub form: Option<String>,
    /// Filing date of the source filing
    pub filed: Option<NaiveDate>,
}

/// Compustat fiscal year: periods ending January through May belong to the prior year.
pub fn compustat_fiscal_year(period_end: NaiveDate) -> i32 {
    if period_end.month() <= 5 {
        period_end.year() - 1
    } else {
        period_end.year()
    }
}

/// Scale a reported value to Compustat units.
pub fn scale_value(value: f64, unit: &str) -> f64 {
    if unit.contains('/') || unit.eq_ignore_ascii_case("pure") {
        value
    } else {
        value / MILLIONS
    }
}

/// Pad a CIK to ten digits.
pub fn pad_cik(cik: &str) -> String {
    format!("{:0>10}", cik.trim())
}

fn matches_period(fact: &XbrlFact, period_type: PeriodType) -> bool {
    if let Some(form) = fact.form.as_deref()
        && PeriodType::from_form(form) != Some(period_type)
    {
        return false;
    }
    fact.duration_days()
        .is_none_or(|days| period_type.duration_days().contains(&days))
}

fn fiscal_period_label(fact: &XbrlFact, period_type: PeriodType) -> String {
    match period_type {
        PeriodType::Annual => "FY".to_string(),
        PeriodType::Quarterly => fact
            .fiscal_period
            .clone()
            .filter(|fp| fp.starts_with('Q'))
            .unwrap_or_else(|| "Q".to_string()),
    }
}

/// Extract Compustat items from a document.
///
/// Items are keyed by period end date; the result is sorted by period end
/// and then by the mnemonic's position in the tag map.
pub fn extract_items(
    doc: &XbrlDocument,
    tag_map: &TagMap,
    period_type: PeriodType,
    cik: &str,
) -> Vec<FundamentalItem> {
    let cik = pad_cik(cik);
    let mut out = Vec::new();

    for item in tag_map.items() {
        let mut best: BTreeMap<NaiveDate, (usize, &XbrlFact)> = BTreeMap::new();

        for (priority, concept) in item.concepts.iter().enumerate() {
            for fact in doc.facts_for(concept) {
                if !matches_period(fact, period_type) {
                    continue;
                }
                let replace = match best.get(&fact.period_end) {
                    None => true,
                    Some((p, current)) => {
                        priority < *p || (priority == *p && fact.filed > current.filed)
                    }
                };
                if replace {
                    best.insert(fact.period_end, (priority, fact));
                }
            }
        }

        out.extend(best.into_values().map(|(_, fact)| FundamentalItem {
            cik: cik.clone(),
            gvkey: None,
            item: item.mnemonic.clone(),
            value: scale_value(fact.value, &fact.unit),
            period_type,
            fiscal_year: compustat_fiscal_year(fact.period_end),
            fiscal_period: fiscal_period_label(fact, period_type),
            period_end: fact.period_end,
            concept: fact.concept.clone(),
            unit: fact.unit.clone(),
            form: fact.form.clone(),
            filed: fact.filed,
        }));
    }

    let order = |mnemonic: &str| {
        tag_map
            .items()
            .iter()
            .position(|i| i.mnemonic == mnemonic)
            .unwrap_or(usize::MAX)
    };
    out.sort_by(|a, b| {
        a.period_end
            .cmp(&b.period_end)
            .then_with(|| order(&a.item).cmp(&order(&b.item)))
    });
    out
}
