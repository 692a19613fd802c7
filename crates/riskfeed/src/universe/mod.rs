//! Factor universe of a risk-model release.
//!
//! Every factor of the model is one of the ten style factors, an industry
//! one-hot factor or the country factor. A [`FactorUniverse`] groups the
//! factor identifiers found in a release by that classification.

use riskfeed_data::FactorKind;
use riskfeed_data::schema::factor_code;
use std::collections::BTreeMap;

pub use riskfeed_data::schema::STYLE_FACTORS;

/// Trait for sets of identifiers a release is keyed by.
pub trait Universe {
    /// Get all members of the universe.
    fn members(&self) -> Vec<String>;

    /// Check if an identifier is in the universe.
    fn contains(&self, id: &str) -> bool {
        self.members().iter().any(|m| m == id)
    }

    /// Get the number of members.
    fn size(&self) -> usize {
        self.members().len()
    }
}

/// Factors of a release grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactorUniverse {
    factors: BTreeMap<String, FactorKind>,
}

impl FactorUniverse {
    /// Build a universe from factor identifiers. Repeated names are kept once.
    pub fn new<I, S>(factors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let factors = factors
            .into_iter()
            .map(|f| {
                let name = f.as_ref().trim().to_string();
                let kind = FactorKind::classify(&name);
                (name, kind)
            })
            .filter(|(name, _)| !name.is_empty())
            .collect();
        Self { factors }
    }

    /// Whether the factor is part of the universe. Matching ignores case
    /// and any model prefix.
    pub fn contains(&self, factor: &str) -> bool {
        if self.factors.contains_key(factor) {
            return true;
        }
        let code = factor_code(factor);
        self.factors.keys().any(|f| factor_code(f) == code)
    }

    /// Kind of a factor in the universe.
    pub fn kind_of(&self, factor: &str) -> Option<FactorKind> {
        self.factors.get(factor).copied()
    }

    /// Number of factors.
    pub fn len(&self) -> usize {
        self.factors.len()
    }

    /// Whether the universe has no factors.
    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    /// Number of factors of one kind.
    pub fn count(&self, kind: FactorKind) -> usize {
        self.factors.values().filter(|k| **k == kind).count()
    }

    /// Factor counts for every kind, in [`FactorKind::all`] order.
    pub fn counts(&self) -> Vec<(FactorKind, usize)> {
        FactorKind::all()
            .into_iter()
            .map(|kind| (kind, self.count(kind)))
            .collect()
    }

    fn of_kind(&self, kind: FactorKind) -> Vec<&str> {
        self.factors
            .iter()
            .filter(|(_, k)| **k == kind)
            .map(|(f, _)| f.as_str())
            .collect()
    }

    /// Style factors, sorted by name.
    pub fn style_factors(&self) -> Vec<&str> {
        self.of_kind(FactorKind::Style)
    }

    /// Industry factors, sorted by name.
    pub fn industries(&self) -> Vec<&str> {
        self.of_kind(FactorKind::Industry)
    }

    /// Country factors, sorted by name.
    pub fn countries(&self) -> Vec<&str> {
        self.of_kind(FactorKind::Country)
    }

    /// Style codes from [`STYLE_FACTORS`] with no factor in the universe.
    pub fn missing_styles(&self) -> Vec<&'static str> {
        let present: Vec<String> = self
            .style_factors()
            .iter()
            .filter_map(|f| riskfeed_data::schema::style_code(&factor_code(f)))
            .map(str::to_string)
            .collect();
        STYLE_FACTORS
            .iter()
            .copied()
            .filter(|s| !present.iter().any(|p| p == s))
            .collect()
    }

    /// Iterate over factors and their kinds, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, FactorKind)> {
        self.factors.iter().map(|(f, k)| (f.as_str(), *k))
    }
}

impl Universe for FactorUniverse {
    fn members(&self) -> Vec<String> {
        self.factors.keys().cloned().collect()
    }

    fn contains(&self, id: &str) -> bool {
        Self::contains(self, id)
    }

    fn size(&self) -> usize {
        self.len()
    }
}

impl<S: AsRef<str>> FromIterator<S> for FactorUniverse {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn universe() -> FactorUniverse {
        FactorUniverse::new([
            "USFASTD_BETA",
            "USFASTD_SIZE",
            "USFASTD_MOMENTUM",
            "USFASTD_BANKS",
            "USFASTD_SOFTWARE",
            "USFASTD_AERODEF",
            "USFASTD_COUNTRY",
            "USFASTD_BETA",
        ])
    }

    #[test]
    fn test_counts_by_kind() {
        let u = universe();
        assert_eq!(u.len(), 7);
        assert_eq!(u.count(FactorKind::Style), 3);
        assert_eq!(u.count(FactorKind::Industry), 3);
        assert_eq!(u.count(FactorKind::Country), 1);
        assert_eq!(
            u.counts(),
            vec![
                (FactorKind::Style, 3),
                (FactorKind::Industry, 3),
                (FactorKind::Country, 1)
            ]
        );
    }

    #[test]
    fn test_groups_are_sorted() {
        let u = universe();
        assert_eq!(
            u.industries(),
            vec!["USFASTD_AERODEF", "USFASTD_BANKS", "USFASTD_SOFTWARE"]
        );
        assert_eq!(u.countries(), vec!["USFASTD_COUNTRY"]);
        assert_eq!(u.kind_of("USFASTD_SIZE"), Some(FactorKind::Style));
        assert_eq!(u.kind_of("SIZE"), None);
    }

    #[test]
    fn test_contains_ignores_prefix() {
        let u = universe();
        assert!(u.contains("USFASTD_BANKS"));
        assert!(u.contains("banks"));
        assert!(!u.contains("USFASTD_GROWTH"));
        assert!(Universe::contains(&u, "BETA"));
        assert_eq!(Universe::size(&u), 7);
    }

    #[test]
    fn test_missing_styles() {
        let missing = universe().missing_styles();
        assert_eq!(missing.len(), STYLE_FACTORS.len() - 3);
        assert!(missing.contains(&"LIQUIDTY"));
        assert!(!missing.contains(&"BETA"));
    }

    #[test]
    fn test_empty_universe() {
        let u: FactorUniverse = Vec::<String>::new().into_iter().collect();
        assert!(u.is_empty());
        assert_eq!(u.missing_styles().len(), STYLE_FACTORS.len());
    }
}
