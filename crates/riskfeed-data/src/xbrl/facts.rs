//! XBRL facts and the SEC company-facts JSON format.
//!
//! The SEC publishes every XBRL fact a company has filed at
//! `https://data.sec.gov/api/xbrl/companyfacts/CIK{cik_padded}.json`.
//! Concepts are stored taxonomy-qualified, e.g. `us-gaap:Assets`.

use crate::error::{DataError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One reported value of a concept for one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XbrlFact {
    /// Taxonomy-qualified concept, e.g. `us-gaap:NetIncomeLoss`
    pub concept: String,
    /// Reported value, unscaled
    pub value: f64,
    /// Unit as published (`USD`, `shares`, `USD/shares`)
    pub unit: String,
    /// Period end, or the instant for balance sheet facts
    pub period_end: NaiveDate,
    /// Period start; `None` for instant facts
    pub period_start: Option<NaiveDate>,
    /// Filing form (`10-K`, `10-Q`, `10-K/A`)
    pub form: Option<String>,
    /// Fiscal year of the filing that reported the fact
    pub fiscal_year: Option<i32>,
    /// Fiscal period of that filing (`FY`, `Q1`..)
    pub fiscal_period: Option<String>,
    /// Filing date; later filings restate earlier ones
    pub filed: Option<NaiveDate>,
    /// Accession number
    pub accession: Option<String>,
}

impl XbrlFact {
    /// Length of the reporting period in days, `None` for instant facts.
    pub fn duration_days(&self) -> Option<i64> {
        self.period_start
            .map(|start| (self.period_end - start).num_days())
    }
}

/// Facts reported by one company.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XbrlDocument {
    /// Every fact, in no particular order
    pub facts: Vec<XbrlFact>,
    /// Registrant name, when published
    pub entity_name: Option<String>,
    /// CIK as published (not padded)
    pub cik: Option<String>,
}

impl XbrlDocument {
    /// Parse a company-facts JSON document.
    pub fn parse_json(json: &str) -> Result<Self> {
        let response: CompanyFacts = serde_json::from_str(json)
            .map_err(|e| DataError::Parse(format!("Failed to parse company facts: {}", e)))?;

        let mut facts = Vec::new();
        for (taxonomy, concepts) in &response.facts {
            for (name, concept) in concepts {
                let qualified = format!("{}:{}", taxonomy, name);
                for (unit, reported) in &concept.units {
                    for raw in reported {
                        facts.push(raw.to_fact(&qualified, unit)?);
                    }
                }
            }
        }

        Ok(Self {
            facts,
            entity_name: response.entity_name,
            cik: response.cik.map(|v| match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            }),
        })
    }

    /// Facts reported for a concept, newest period first.
    pub fn facts_for(&self, concept: &str) -> Vec<&XbrlFact> {
        let mut found: Vec<&XbrlFact> =
            self.facts.iter().filter(|f| f.concept == concept).collect();
        found.sort_by(|a, b| (b.period_end, b.filed).cmp(&(a.period_end, a.filed)));
        found
    }
}

fn parse_sec_date(raw: &str, field: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| DataError::Parse(format!("Invalid {} date '{}': {}", field, raw, e)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompanyFacts {
    #[serde(default)]
    cik: Option<serde_json::Value>,
    #[serde(default)]
    entity_name: Option<String>,
    facts: HashMap<String, HashMap<String, ConceptFacts>>,
}

#[derive(Debug, Deserialize)]
struct ConceptFacts {
    units: HashMap<String, Vec<ReportedValue>>,
}

#[derive(Debug, Deserialize)]
struct ReportedValue {
    end: String,
    val: f64,
    #[serde(default)]
    start: Option<String>,
    #[serde(default)]
    accn: Option<String>,
    #[serde(default)]
    fy: Option<i32>,
    #[serde(default)]
    fp: Option<String>,
    #[serde(default)]
    form: Option<String>,
    #[serde(default)]
    filed: Option<String>,
}

impl ReportedValue {
    fn to_fact(&self, concept: &str, unit: &str) -> Result<XbrlFact> {
        let optional = |raw: &Option<String>, field: &str| {
            raw.as_deref().map(|s| parse_sec_date(s, field)).transpose()
        };
        Ok(XbrlFact {
            concept: concept.to_string(),
            value: self.val,
            unit: unit.to_string(),
            period_end: parse_sec_date(&self.end, "end")?,
            period_start: optional(&self.start, "start")?,
            form: self.form.clone(),
            fiscal_year: self.fy,
            fiscal_period: self.fp.clone(),
            filed: optional(&self.filed, "filed")?,
            accession: self.accn.clone(),
        })
    }
}
