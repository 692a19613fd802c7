//! Parsing of raw XBRL instance documents.
//!
//! Only non-dimensional numeric facts are kept: a fact whose context carries a
//! `segment` or `scenario` describes a slice of the entity (a business line, a
//! class of stock) rather than the consolidated figure.

use super::facts::{XbrlDocument, XbrlFact};
use crate::error::{DataError, Result};
use chrono::NaiveDate;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;

const DOCUMENT_TYPE: &str = "dei:DocumentType";
const FISCAL_YEAR_FOCUS: &str = "dei:DocumentFiscalYearFocus";
const FISCAL_PERIOD_FOCUS: &str = "dei:DocumentFiscalPeriodFocus";
const REGISTRANT_NAME: &str = "dei:EntityRegistrantName";
const CENTRAL_INDEX_KEY: &str = "dei:EntityCentralIndexKey";

#[derive(Debug, Default)]
struct Context {
    id: String,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    instant: Option<NaiveDate>,
    dimensional: bool,
}

#[derive(Debug)]
struct RawFact {
    concept: String,
    context_ref: String,
    unit_ref: Option<String>,
    nil: bool,
    value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    StartDate,
    EndDate,
    Instant,
    Measure,
    Fact,
}

fn xml_err(e: impl std::fmt::Display) -> DataError {
    DataError::XmlParse(e.to_string())
}

fn attribute(e: &BytesStart<'_>, local: &[u8]) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(xml_err)?;
        if attr.key.local_name().as_ref() == local {
            return Ok(Some(attr.unescape_value().map_err(xml_err)?.into_owned()));
        }
    }
    Ok(None)
}

fn qualified_name(e: &BytesStart<'_>) -> Result<String> {
    std::str::from_utf8(e.name().as_ref())
        .map(str::to_string)
        .map_err(xml_err)
}

fn parse_xbrl_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim().get(..10)?, "%Y-%m-%d").ok()
}

/// `iso4217:USD` → `USD`, and `USD` over `shares` → `USD/shares`.
fn unit_label(measures: &[String]) -> String {
    let strip = |m: &String| {
        m.rsplit_once(':')
            .map_or_else(|| m.clone(), |(_, local)| local.to_string())
    };
    measures.iter().map(strip).collect::<Vec<_>>().join("/")
}

impl XbrlDocument {
    /// Parses an XBRL instance document (the `.xml` attached to a filing).
    ///
    /// Form type, fiscal year, and fiscal period come from the `dei` cover
    /// facts and apply to every fact of the document.
    pub fn parse_xml(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut contexts: HashMap<String, Context> = HashMap::new();
        let mut units: HashMap<String, String> = HashMap::new();
        let mut raw_facts: Vec<RawFact> = Vec::new();
        let mut cover: HashMap<String, String> = HashMap::new();

        let mut context: Option<Context> = None;
        let mut unit: Option<(String, Vec<String>)> = None;
        let mut fact: Option<RawFact> = None;
        let mut capture: Option<Capture> = None;
        let mut text = String::new();

        loop {
            match reader.read_event().map_err(xml_err)? {
                Event::Start(e) => {
                    let local = e.local_name();
                    match local.as_ref() {
                        b"context" => {
                            context = Some(Context {
                                id: attribute(&e, b"id")?.unwrap_or_default(),
                                ..Context::default()
                            });
                        }
                        b"segment" | b"scenario" => {
                            if let Some(ctx) = context.as_mut() {
                                ctx.dimensional = true;
                            }
                        }
                        b"startDate" => capture = Some(Capture::StartDate),
                        b"endDate" => capture = Some(Capture::EndDate),
                        b"instant" => capture = Some(Capture::Instant),
                        b"unit" => {
                            unit = Some((attribute(&e, b"id")?.unwrap_or_default(), Vec::new()));
                        }
                        b"measure" => capture = Some(Capture::Measure),
                        _ if context.is_none() && unit.is_none() => {
                            if let Some(context_ref) = attribute(&e, b"contextRef")? {
                                fact = Some(RawFact {
                                    concept: qualified_name(&e)?,
                                    context_ref,
                                    unit_ref: attribute(&e, b"unitRef")?,
                                    nil: attribute(&e, b"nil")?.is_some_and(|v| v == "true"),
                                    value: String::new(),
                                });
                                capture = Some(Capture::Fact);
                            }
                        }
                        _ => {}
                    }
                    text.clear();
                }
                Event::Text(t) => {
                    if capture.is_some() {
                        text.push_str(&t.unescape().map_err(xml_err)?);
                    }
                }
                Event::End(e) => {
                    match (e.local_name().as_ref(), capture) {
                        (b"context", _) => {
                            if let Some(ctx) = context.take() {
                                contexts.insert(ctx.id.clone(), ctx);
                            }
                        }
                        (b"unit", _) => {
                            if let Some((id, measures)) = unit.take() {
                                units.insert(id, unit_label(&measures));
                            }
                        }
                        (_, Some(Capture::StartDate)) => {
                            if let Some(ctx) = context.as_mut() {
                                ctx.start = parse_xbrl_date(&text);
                            }
                        }
                        (_, Some(Capture::EndDate)) => {
                            if let Some(ctx) = context.as_mut() {
                                ctx.end = parse_xbrl_date(&text);
                            }
                        }
                        (_, Some(Capture::Instant)) => {
                            if let Some(ctx) = context.as_mut() {
                                ctx.instant = parse_xbrl_date(&text);
                            }
                        }
                        (_, Some(Capture::Measure)) => {
                            if let Some((_, measures)) = unit.as_mut() {
                                measures.push(text.trim().to_string());
                            }
                        }
                        (_, Some(Capture::Fact)) => {
                            if let Some(mut raw) = fact.take() {
                                raw.value = text.trim().to_string();
                                if raw.concept.starts_with("dei:") {
                                    cover
                                        .entry(raw.concept.clone())
                                        .or_insert_with(|| raw.value.clone());
                                }
                                raw_facts.push(raw);
                            }
                        }
                        _ => {}
                    }
                    capture = None;
                    text.clear();
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if contexts.is_empty() {
            return Err(DataError::XbrlParse(
                "No contexts found; not an XBRL instance document".to_string(),
            ));
        }

        let form = cover.get(DOCUMENT_TYPE).cloned();
        let fiscal_year = cover
            .get(FISCAL_YEAR_FOCUS)
            .and_then(|v| v.trim().parse::<i32>().ok());
        let fiscal_period = cover.get(FISCAL_PERIOD_FOCUS).cloned();

        let mut facts = Vec::new();
        for raw in raw_facts {
            if raw.nil {
                continue;
            }
            let (Some(unit_ref), Ok(value)) = (raw.unit_ref.as_ref(), raw.value.parse::<f64>())
            else {
                continue;
            };
            let (Some(ctx), Some(unit)) = (contexts.get(&raw.context_ref), units.get(unit_ref))
            else {
                continue;
            };
            if ctx.dimensional {
                continue;
            }
            let (period_start, period_end) = match (ctx.instant, ctx.start, ctx.end) {
                (Some(instant), _, _) => (None, instant),
                (None, Some(start), Some(end)) => (Some(start), end),
                _ => continue,
            };

            facts.push(XbrlFact {
                concept: raw.concept,
                value,
                unit: unit.clone(),
                period_end,
                period_start,
                form: form.clone(),
                fiscal_year,
                fiscal_period: fiscal_period.clone(),
                filed: None,
                accession: None,
            });
        }

        Ok(Self {
            facts,
            entity_name: cover.get(REGISTRANT_NAME).cloned(),
            cik: cover.get(CENTRAL_INDEX_KEY).cloned(),
        })
    }
}
