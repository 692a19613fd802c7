//! GVKEY ↔ ticker mapping.

use crate::error::{DataError, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

/// Width of a Compustat GVKEY.
pub const GVKEY_WIDTH: usize = 6;

/// Normalize a GVKEY to its six-digit, zero-padded form.
///
/// Accepts the spellings that show up in exports: surrounding whitespace,
/// missing leading zeros, and a float rendering such as `1690.0`.
///
/// # Examples
///
/// ```
/// use riskfeed_data::mapping::normalize_gvkey;
///
/// assert_eq!(normalize_gvkey("1690").unwrap(), "001690");
/// assert_eq!(normalize_gvkey(" 001690 ").unwrap(), "001690");
/// assert_eq!(normalize_gvkey("1690.0").unwrap(), "001690");
/// assert!(normalize_gvkey("AAPL").is_err());
/// ```
pub fn normalize_gvkey(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let digits = match trimmed.split_once('.') {
        Some((int, frac)) if frac.chars().all(|c| c == '0') => int,
        Some(_) => return Err(DataError::InvalidGvkey(raw.to_string())),
        None => trimmed,
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(DataError::InvalidGvkey(raw.to_string()));
    }

    if digits.len() > GVKEY_WIDTH {
        return Err(DataError::InvalidGvkey(raw.to_string()));
    }

    Ok(format!("{:0>width$}", digits, width = GVKEY_WIDTH))
}

fn normalize_ticker(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Bidirectional lookup between Compustat GVKEYs and exchange tickers.
#[derive(Debug, Clone, Default)]
pub struct GvkeyMapper {
    by_gvkey: HashMap<String, String>,
    by_ticker: HashMap<String, String>,
    conflicts: usize,
    skipped: usize,
}

impl GvkeyMapper {
    /// Create an empty mapper.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a mapping from a CSV file with `gvkey` and `ticker` (or `tic`) columns.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mapper = Self::from_reader(file)?;
        debug!(
            "Loaded {} GVKEY mappings from {}",
            mapper.len(),
            path.as_ref().display()
        );
        Ok(mapper)
    }

    /// Load a mapping from any CSV reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let headers = rdr.headers()?.clone();
        let find = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
        };
        let gvkey_idx = find(&["gvkey"]).ok_or_else(|| DataError::MissingColumn {
            table: "gvkey_ticker_map",
            column: "gvkey".to_string(),
        })?;
        let ticker_idx = find(&["ticker", "tic"]).ok_or_else(|| DataError::MissingColumn {
            table: "gvkey_ticker_map",
            column: "ticker".to_string(),
        })?;

        let mut mapper = Self::new();
        for record in rdr.records() {
            let record = record?;
            let gvkey = record.get(gvkey_idx).unwrap_or_default();
            let ticker = record.get(ticker_idx).unwrap_or_default();
            mapper.insert(gvkey, ticker);
        }

        if mapper.skipped > 0 {
            warn!("Skipped {} unusable GVKEY mapping rows", mapper.skipped);
        }
        Ok(mapper)
    }

    /// Build a mapping from `(gvkey, ticker)` pairs.
    pub fn from_pairs<I, G, T>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (G, T)>,
        G: AsRef<str>,
        T: AsRef<str>,
    {
        let mut mapper = Self::new();
        for (gvkey, ticker) in pairs {
            mapper.insert(gvkey.as_ref(), ticker.as_ref());
        }
        mapper
    }

    /// Add one mapping. The first mapping seen for a GVKEY or ticker wins,
    /// and a conflicting row leaves both directions untouched.
    ///
    /// Returns `false` if the row was skipped or conflicted.
    pub fn insert(&mut self, gvkey: &str, ticker: &str) -> bool {
        let ticker = normalize_ticker(ticker);
        let Ok(gvkey) = normalize_gvkey(gvkey) else {
            self.skipped += 1;
            return false;
        };
        if ticker.is_empty() {
            self.skipped += 1;
            return false;
        }

        if let Some(existing) = self.by_gvkey.get(&gvkey).filter(|t| **t != ticker) {
            warn!(
                "GVKEY {} already maps to {}, ignoring {}",
                gvkey, existing, ticker
            );
            self.conflicts += 1;
            return false;
        }
        if let Some(existing) = self.by_ticker.get(&ticker).filter(|g| **g != gvkey) {
            warn!(
                "Ticker {} already maps to {}, ignoring {}",
                ticker, existing, gvkey
            );
            self.conflicts += 1;
            return false;
        }

        self.by_gvkey.insert(gvkey.clone(), ticker.clone());
        self.by_ticker.insert(ticker, gvkey);
        true
    }

    /// Ticker for a GVKEY, in any accepted spelling.
    pub fn gvkey_to_ticker(&self, gvkey: &str) -> Option<&str> {
        let gvkey = normalize_gvkey(gvkey).ok()?;
        self.by_gvkey.get(&gvkey).map(String::as_str)
    }

    /// GVKEY for a ticker (case-insensitive).
    pub fn ticker_to_gvkey(&self, ticker: &str) -> Option<&str> {
        self.by_ticker
            .get(&normalize_ticker(ticker))
            .map(String::as_str)
    }

    /// Whether a GVKEY has a mapping.
    pub fn contains_gvkey(&self, gvkey: &str) -> bool {
        self.gvkey_to_ticker(gvkey).is_some()
    }

    /// All mapped GVKEYs, sorted.
    pub fn gvkeys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.by_gvkey.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Number of mapped GVKEYs.
    pub fn len(&self) -> usize {
        self.by_gvkey.len()
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.by_gvkey.is_empty()
    }

    /// Rows ignored because they disagreed with an earlier mapping.
    pub const fn conflicts(&self) -> usize {
        self.conflicts
    }

    /// Rows ignored because the GVKEY or ticker was unusable.
    pub const fn skipped(&self) -> usize {
        self.skipped
    }
}
