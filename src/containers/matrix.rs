//! The feature matrix handed from the feature learners to the predictor.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A column-major matrix of feature values, one column per feature and one
/// row per population row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeatureMatrix {
    pub colnames: Vec<String>,
    pub columns: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    pub fn new(colnames: Vec<String>, columns: Vec<Vec<f64>>) -> Result<Self> {
        if colnames.len() != columns.len() {
            return Err(Error::Shape(format!(
                "{} column names for {} columns",
                colnames.len(),
                columns.len()
            )));
        }
        let matrix = FeatureMatrix { colnames, columns };
        matrix.check_lengths()?;
        Ok(matrix)
    }

    pub fn check_lengths(&self) -> Result<()> {
        let n = self.nrows();
        if let Some(bad) = self.columns.iter().position(|c| c.len() != n) {
            return Err(Error::Shape(format!(
                "feature column '{}' has {} rows, expected {}",
                self.colnames[bad],
                self.columns[bad].len(),
                n
            )));
        }
        Ok(())
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    pub fn nrows(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    /// Appends the columns of `other` to the right.
    pub fn hstack(&mut self, other: FeatureMatrix) -> Result<()> {
        if self.ncols() > 0 && other.ncols() > 0 && self.nrows() != other.nrows() {
            return Err(Error::Shape(format!(
                "cannot stack {} rows next to {}",
                other.nrows(),
                self.nrows()
            )));
        }
        self.colnames.extend(other.colnames);
        self.columns.extend(other.columns);
        Ok(())
    }

    /// One row as a dense vector.
    pub fn row(&self, i: usize) -> Vec<f64> {
        self.columns.iter().map(|c| c[i]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_checked() {
        assert!(FeatureMatrix::new(
            vec!["a".to_string()],
            vec![vec![1.0], vec![2.0]]
        )
        .is_err());
        assert!(FeatureMatrix::new(
            vec!["a".to_string(), "b".to_string()],
            vec![vec![1.0], vec![2.0, 3.0]]
        )
        .is_err());
    }

    #[test]
    fn test_hstack() {
        let mut m = FeatureMatrix::new(vec!["a".to_string()], vec![vec![1.0, 2.0]]).unwrap();
        let other = FeatureMatrix::new(vec!["b".to_string()], vec![vec![3.0, 4.0]]).unwrap();
        m.hstack(other).unwrap();
        assert_eq!(m.ncols(), 2);
        assert_eq!(m.row(1), vec![2.0, 4.0]);
    }
}
