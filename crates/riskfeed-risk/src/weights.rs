//! Portfolio weight files.

use crate::model::RiskModelError;
use riskfeed_data::normalize_gvkey;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct WeightRow {
    gvkey: String,
    weight: f64,
}

/// Read `gvkey,weight` rows from a CSV file.
pub fn load_weights<P: AsRef<Path>>(path: P) -> Result<HashMap<String, f64>, RiskModelError> {
    let file = File::open(path.as_ref()).map_err(|e| {
        RiskModelError::InvalidWeights(format!("{}: {}", path.as_ref().display(), e))
    })?;
    read_weights(file)
}

/// Read `gvkey,weight` rows from any CSV reader. GVKEYs are normalized and
/// repeated securities have their weights summed.
pub fn read_weights<R: Read>(reader: R) -> Result<HashMap<String, f64>, RiskModelError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut weights: HashMap<String, f64> = HashMap::new();
    for (line, row) in rdr.deserialize::<WeightRow>().enumerate() {
        let row = row.map_err(|e| RiskModelError::InvalidWeights(e.to_string()))?;
        let gvkey = normalize_gvkey(&row.gvkey)?;
        let entry = weights.entry(gvkey).or_insert(0.0);
        if *entry != 0.0 {
            warn!("Repeated security {} on line {}, summing weights", row.gvkey, line + 2);
        }
        *entry += row.weight;
    }

    if weights.is_empty() {
        return Err(RiskModelError::InvalidWeights("no weights".to_string()));
    }
    Ok(weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_read_weights() {
        let data = "gvkey,weight\n1690,0.6\n012141, 0.3\n1690,0.1\n";
        let weights = read_weights(data.as_bytes()).unwrap();
        assert_eq!(weights.len(), 2);
        assert_relative_eq!(weights["001690"], 0.7);
        assert_relative_eq!(weights["012141"], 0.3);
    }

    #[test]
    fn test_read_weights_errors() {
        assert!(read_weights("gvkey,weight\n".as_bytes()).is_err());
        assert!(matches!(
            read_weights("gvkey,weight\nAAPL,1.0\n".as_bytes()),
            Err(RiskModelError::Data(_))
        ));
        assert!(matches!(
            read_weights("gvkey,weight\n1690,heavy\n".as_bytes()),
            Err(RiskModelError::InvalidWeights(_))
        ));
    }
}
