//! Factor covariance matrix
//!
//! Risk-model exports carry the factor covariance in long format, one row per
//! `(factor_i, factor_j)` pair. [`CovarianceMatrix`] assembles those rows into
//! a dense symmetric matrix indexed by factor name.

pub mod eigen;

pub use eigen::{EigenDecomposition, jacobi_eigendecomp};

use chrono::NaiveDate;
use ndarray::Array2;
use riskfeed_data::DataError;
use riskfeed_data::schema::FactorCovarianceRow;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// Relative tolerance when a pair is given in both orders.
pub const SYMMETRY_TOLERANCE: f64 = 1e-12;

/// Errors that can occur while assembling or querying a covariance matrix
#[derive(Debug, Error)]
pub enum CovarianceError {
    /// No rows to assemble from
    #[error("No covariance rows")]
    Empty,

    /// Rows from more than one month-end date
    #[error("Covariance rows span several dates: {first} and {other}")]
    MixedDates {
        /// First date seen
        first: NaiveDate,
        /// Conflicting date
        other: NaiveDate,
    },

    /// A pair has no entry
    #[error("Missing covariance for ({factor_i}, {factor_j})")]
    MissingPair {
        /// Row factor
        factor_i: String,
        /// Column factor
        factor_j: String,
    },

    /// A pair was given twice with different values
    #[error("Asymmetric covariance for ({factor_i}, {factor_j}): {first} vs {second}")]
    Asymmetric {
        /// Row factor
        factor_i: String,
        /// Column factor
        factor_j: String,
        /// First value seen
        first: f64,
        /// Conflicting value
        second: f64,
    },

    /// Factor not in the matrix
    #[error("Unknown factor: {0}")]
    UnknownFactor(String),

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension
        expected: usize,
        /// Actual dimension
        actual: usize,
    },

    /// Error loading the underlying table
    #[error("Data error: {0}")]
    Data(#[from] DataError),
}

/// Number of distinct pairs in the upper triangle of an `n x n` matrix,
/// diagonal included.
pub const fn expected_pair_count(n: usize) -> usize {
    n * (n + 1) / 2
}

fn values_agree(a: f64, b: f64) -> bool {
    a == b || (a - b).abs() <= SYMMETRY_TOLERANCE * a.abs().max(b.abs())
}

/// Dense symmetric factor covariance matrix for one date.
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceMatrix {
    date: NaiveDate,
    factors: Vec<String>,
    index: HashMap<String, usize>,
    matrix: Array2<f64>,
}

impl CovarianceMatrix {
    /// Build from an existing matrix. The matrix must be square, match the
    /// factor list and be symmetric.
    pub fn new(
        date: NaiveDate,
        factors: Vec<String>,
        matrix: Array2<f64>,
    ) -> Result<Self, CovarianceError> {
        let n = factors.len();
        if matrix.nrows() != n {
            return Err(CovarianceError::DimensionMismatch {
                expected: n,
                actual: matrix.nrows(),
            });
        }
        if matrix.ncols() != n {
            return Err(CovarianceError::DimensionMismatch {
                expected: n,
                actual: matrix.ncols(),
            });
        }
        for i in 0..n {
            for j in (i + 1)..n {
                if !values_agree(matrix[[i, j]], matrix[[j, i]]) {
                    return Err(CovarianceError::Asymmetric {
                        factor_i: factors[i].clone(),
                        factor_j: factors[j].clone(),
                        first: matrix[[i, j]],
                        second: matrix[[j, i]],
                    });
                }
            }
        }

        let index = factors
            .iter()
            .enumerate()
            .map(|(i, f)| (f.clone(), i))
            .collect();
        Ok(Self {
            date,
            factors,
            index,
            matrix,
        })
    }

    /// Assemble from long-format rows of one date. Every pair must be present.
    pub fn from_rows(rows: &[FactorCovarianceRow]) -> Result<Self, CovarianceError> {
        Self::assemble(rows, false)
    }

    /// Assemble from long-format rows, filling absent pairs with zero.
    pub fn from_rows_allow_missing(rows: &[FactorCovarianceRow]) -> Result<Self, CovarianceError> {
        Self::assemble(rows, true)
    }

    fn assemble(rows: &[FactorCovarianceRow], allow_missing: bool) -> Result<Self, CovarianceError> {
        let first = rows.first().ok_or(CovarianceError::Empty)?;
        let date = first.month_end_date;

        let mut factors: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for row in rows {
            if row.month_end_date != date {
                return Err(CovarianceError::MixedDates {
                    first: date,
                    other: row.month_end_date,
                });
            }
            for name in [&row.factor_i, &row.factor_j] {
                if !index.contains_key(name) {
                    index.insert(name.clone(), factors.len());
                    factors.push(name.clone());
                }
            }
        }

        let n = factors.len();
        let mut matrix = Array2::<f64>::zeros((n, n));
        let mut filled = Array2::<bool>::from_elem((n, n), false);

        for row in rows {
            let i = index[&row.factor_i];
            let j = index[&row.factor_j];
            if filled[[i, j]] {
                if !values_agree(matrix[[i, j]], row.covariance) {
                    return Err(CovarianceError::Asymmetric {
                        factor_i: row.factor_i.clone(),
                        factor_j: row.factor_j.clone(),
                        first: matrix[[i, j]],
                        second: row.covariance,
                    });
                }
                continue;
            }
            matrix[[i, j]] = row.covariance;
            matrix[[j, i]] = row.covariance;
            filled[[i, j]] = true;
            filled[[j, i]] = true;
        }

        let mut missing = 0usize;
        for i in 0..n {
            for j in i..n {
                if filled[[i, j]] {
                    continue;
                }
                if !allow_missing {
                    return Err(CovarianceError::MissingPair {
                        factor_i: factors[i].clone(),
                        factor_j: factors[j].clone(),
                    });
                }
                missing += 1;
            }
        }
        if missing > 0 {
            debug!("Filled {} missing covariance pairs with zero", missing);
        }

        Ok(Self {
            date,
            factors,
            index,
            matrix,
        })
    }

    /// Month-end date of the estimate.
    pub const fn date(&self) -> NaiveDate {
        self.date
    }

    /// Factor names in matrix order.
    pub fn factors(&self) -> &[String] {
        &self.factors
    }

    /// The dense matrix.
    pub const fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    /// Number of factors.
    pub fn dim(&self) -> usize {
        self.factors.len()
    }

    /// Position of a factor.
    pub fn index_of(&self, factor: &str) -> Option<usize> {
        self.index.get(factor).copied()
    }

    fn require(&self, factor: &str) -> Result<usize, CovarianceError> {
        self.index_of(factor)
            .ok_or_else(|| CovarianceError::UnknownFactor(factor.to_string()))
    }

    /// Covariance between two factors.
    pub fn get(&self, factor_i: &str, factor_j: &str) -> Result<f64, CovarianceError> {
        Ok(self.matrix[[self.require(factor_i)?, self.require(factor_j)?]])
    }

    /// Variance of a factor.
    pub fn variance(&self, factor: &str) -> Result<f64, CovarianceError> {
        self.get(factor, factor)
    }

    /// Volatility (standard deviation) of a factor.
    pub fn volatility(&self, factor: &str) -> Result<f64, CovarianceError> {
        Ok(self.variance(factor)?.max(0.0).sqrt())
    }

    /// Correlation matrix. Factors with non-positive variance get zero rows and columns.
    pub fn correlation_matrix(&self) -> Array2<f64> {
        let vols: Vec<f64> = self.matrix.diag().iter().map(|v| v.max(0.0).sqrt()).collect();
        Array2::from_shape_fn(self.matrix.raw_dim(), |(i, j)| {
            let denom = vols[i] * vols[j];
            if denom > 0.0 {
                self.matrix[[i, j]] / denom
            } else {
                0.0
            }
        })
    }

    /// Sub-matrix over the given factors, in the given order.
    pub fn subset<S: AsRef<str>>(&self, factors: &[S]) -> Result<Self, CovarianceError> {
        let positions = factors
            .iter()
            .map(|f| self.require(f.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let names: Vec<String> = positions.iter().map(|&p| self.factors[p].clone()).collect();
        let matrix = Array2::from_shape_fn((positions.len(), positions.len()), |(i, j)| {
            self.matrix[[positions[i], positions[j]]]
        });
        Self::new(self.date, names, matrix)
    }

    /// Eigenvalues in descending order.
    pub fn eigenvalues(&self) -> Result<Vec<f64>, CovarianceError> {
        Ok(jacobi_eigendecomp(&self.matrix, 100, 1e-12)?
            .eigenvalues
            .to_vec())
    }

    /// Whether every eigenvalue is at least `-tolerance`.
    pub fn is_positive_semidefinite(&self, tolerance: f64) -> Result<bool, CovarianceError> {
        Ok(self.eigenvalues()?.iter().all(|&v| v >= -tolerance))
    }

    /// Long-format rows covering the upper triangle, diagonal included.
    pub fn to_rows(&self) -> Vec<FactorCovarianceRow> {
        let n = self.dim();
        let mut rows = Vec::with_capacity(expected_pair_count(n));
        for i in 0..n {
            for j in i..n {
                rows.push(FactorCovarianceRow {
                    month_end_date: self.date,
                    factor_i: self.factors[i].clone(),
                    factor_j: self.factors[j].clone(),
                    covariance: self.matrix[[i, j]],
                });
            }
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 31).unwrap()
    }

    fn row(i: &str, j: &str, c: f64) -> FactorCovarianceRow {
        FactorCovarianceRow {
            month_end_date: date(),
            factor_i: i.to_string(),
            factor_j: j.to_string(),
            covariance: c,
        }
    }

    fn upper_triangle() -> Vec<FactorCovarianceRow> {
        vec![
            row("BETA", "BETA", 0.04),
            row("BETA", "SIZE", 0.006),
            row("BETA", "MOMENTUM", -0.002),
            row("SIZE", "SIZE", 0.09),
            row("SIZE", "MOMENTUM", 0.003),
            row("MOMENTUM", "MOMENTUM", 0.01),
        ]
    }

    #[test]
    fn test_assemble_upper_triangle() {
        let cov = CovarianceMatrix::from_rows(&upper_triangle()).unwrap();
        assert_eq!(cov.dim(), 3);
        assert_eq!(cov.factors(), &["BETA", "SIZE", "MOMENTUM"]);
        assert_eq!(cov.date(), date());
        assert_relative_eq!(cov.get("SIZE", "BETA").unwrap(), 0.006);
        assert_relative_eq!(cov.get("MOMENTUM", "BETA").unwrap(), -0.002);
        assert_relative_eq!(cov.volatility("SIZE").unwrap(), 0.3);
        assert_eq!(cov.matrix(), &cov.matrix().t());
    }

    #[test]
    fn test_both_triangles_must_agree() {
        let mut rows = upper_triangle();
        rows.push(row("SIZE", "BETA", 0.006));
        assert!(CovarianceMatrix::from_rows(&rows).is_ok());

        rows.push(row("MOMENTUM", "SIZE", 0.004));
        let err = CovarianceMatrix::from_rows(&rows).unwrap_err();
        assert!(matches!(err, CovarianceError::Asymmetric { .. }));
    }

    #[test]
    fn test_missing_pair() {
        let mut rows = upper_triangle();
        rows.retain(|r| !(r.factor_i == "SIZE" && r.factor_j == "MOMENTUM"));

        let err = CovarianceMatrix::from_rows(&rows).unwrap_err();
        assert!(matches!(err, CovarianceError::MissingPair { .. }));

        let cov = CovarianceMatrix::from_rows_allow_missing(&rows).unwrap();
        assert_eq!(cov.get("MOMENTUM", "SIZE").unwrap(), 0.0);
    }

    #[test]
    fn test_factor_without_variance_row() {
        let rows = vec![
            row("BETA", "BETA", 0.04),
            row("BETA", "SIZE", 0.006),
            row("SIZE", "SIZE", 0.09),
            row("BETA", "MOMENTUM", -0.002),
        ];
        assert!(matches!(
            CovarianceMatrix::from_rows(&rows),
            Err(CovarianceError::MissingPair { .. })
        ));

        let cov = CovarianceMatrix::from_rows_allow_missing(&rows).unwrap();
        assert_eq!(cov.factors(), &["BETA", "SIZE", "MOMENTUM"]);
        assert_eq!(cov.get("MOMENTUM", "MOMENTUM").unwrap(), 0.0);
        assert_eq!(cov.get("SIZE", "MOMENTUM").unwrap(), 0.0);
        assert_eq!(cov.get("MOMENTUM", "BETA").unwrap(), -0.002);
    }

    #[test]
    fn test_mixed_dates_and_empty() {
        let mut rows = upper_triangle();
        rows[2].month_end_date = NaiveDate::from_ymd_opt(2024, 4, 30).unwrap();
        assert!(matches!(
            CovarianceMatrix::from_rows(&rows),
            Err(CovarianceError::MixedDates { .. })
        ));
        assert!(matches!(
            CovarianceMatrix::from_rows(&[]),
            Err(CovarianceError::Empty)
        ));
    }

    #[test]
    fn test_correlation_matrix() {
        let cov = CovarianceMatrix::from_rows(&upper_triangle()).unwrap();
        let corr = cov.correlation_matrix();
        for i in 0..3 {
            assert_relative_eq!(corr[[i, i]], 1.0, epsilon = 1e-12);
        }
        assert_relative_eq!(corr[[0, 1]], 0.006 / (0.2 * 0.3), epsilon = 1e-12);
    }

    #[test]
    fn test_subset_and_round_trip_rows() {
        let cov = CovarianceMatrix::from_rows(&upper_triangle()).unwrap();
        let sub = cov.subset(&["MOMENTUM", "BETA"]).unwrap();
        assert_eq!(sub.factors(), &["MOMENTUM", "BETA"]);
        assert_relative_eq!(sub.get("BETA", "MOMENTUM").unwrap(), -0.002);
        assert!(matches!(
            cov.subset(&["VALUE"]),
            Err(CovarianceError::UnknownFactor(_))
        ));

        let rows = cov.to_rows();
        assert_eq!(rows.len(), expected_pair_count(3));
        assert_eq!(CovarianceMatrix::from_rows(&rows).unwrap(), cov);
    }

    #[test]
    fn test_positive_semidefinite() {
        let cov = CovarianceMatrix::from_rows(&upper_triangle()).unwrap();
        assert!(cov.is_positive_semidefinite(1e-12).unwrap());

        let bad = CovarianceMatrix::from_rows(&[
            row("A", "A", 1.0),
            row("A", "B", 2.0),
            row("B", "B", 1.0),
        ])
        .unwrap();
        assert!(!bad.is_positive_semidefinite(1e-12).unwrap());
    }

    #[rstest]
    #[case(0, 0)]
    #[case(1, 1)]
    #[case(3, 6)]
    #[case(77, 3003)]
    fn test_expected_pair_count(#[case] n: usize, #[case] expected: usize) {
        assert_eq!(expected_pair_count(n), expected);
    }
}
