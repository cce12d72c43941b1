//! Downstream predictors.
//!
//! The pipeline only depends on the small capability set below: fit on a
//! feature matrix, predict, expose per-feature importances summing to one.
//! Two concrete predictors ship with the engine - ridge-regularised linear
//! regression and logistic regression - dispatched through a tagged sum.

pub mod linear;
pub mod logistic;

pub use linear::LinearRegression;
pub use logistic::LogisticRegression;

use serde::{Deserialize, Serialize};

use crate::containers::matrix::FeatureMatrix;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type_")]
pub enum Predictor {
    LinearRegression(LinearRegression),
    LogisticRegression(LogisticRegression),
}

impl Predictor {
    pub fn fit(&mut self, x: &FeatureMatrix, y: &[f64], sample_weights: Option<&[f64]>) -> Result<()> {
        match self {
            Predictor::LinearRegression(p) => p.fit(x, y, sample_weights),
            Predictor::LogisticRegression(p) => p.fit(x, y, sample_weights),
        }
    }

    pub fn predict(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        match self {
            Predictor::LinearRegression(p) => p.predict(x),
            Predictor::LogisticRegression(p) => p.predict(x),
        }
    }

    /// Per-feature importances, normalised to sum to 1.
    pub fn feature_importances(&self) -> Result<Vec<f64>> {
        match self {
            Predictor::LinearRegression(p) => p.feature_importances(),
            Predictor::LogisticRegression(p) => p.feature_importances(),
        }
    }

    pub fn is_fitted(&self) -> bool {
        match self {
            Predictor::LinearRegression(p) => p.is_fitted(),
            Predictor::LogisticRegression(p) => p.is_fitted(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Predictor::LinearRegression(_) => "LinearRegression",
            Predictor::LogisticRegression(_) => "LogisticRegression",
        }
    }

    /// Whether predictions are probabilities.
    pub fn is_classifier(&self) -> bool {
        matches!(self, Predictor::LogisticRegression(_))
    }
}

impl Default for Predictor {
    fn default() -> Self {
        Predictor::LinearRegression(LinearRegression::default())
    }
}

/// Per-feature standardisation fitted on the training matrix. Constant
/// features keep scale 1 so they cannot blow up.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Scaler {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl Scaler {
    pub fn fit(x: &FeatureMatrix, sample_weights: &[f64]) -> Scaler {
        let sum_w: f64 = sample_weights.iter().sum();
        let means: Vec<f64> = x
            .columns
            .iter()
            .map(|col| {
                col.iter()
                    .zip(sample_weights)
                    .map(|(v, w)| v * w)
                    .sum::<f64>()
                    / sum_w
            })
            .collect();
        let stds: Vec<f64> = x
            .columns
            .iter()
            .zip(&means)
            .map(|(col, mean)| {
                let var = col
                    .iter()
                    .zip(sample_weights)
                    .map(|(v, w)| (v - mean) * (v - mean) * w)
                    .sum::<f64>()
                    / sum_w;
                let std = var.sqrt();
                if std > 0.0 && std.is_finite() {
                    std
                } else {
                    1.0
                }
            })
            .collect();
        Scaler { means, stds }
    }

    /// The standardised value of feature `j` at row `i`.
    #[inline]
    pub fn at(&self, x: &FeatureMatrix, i: usize, j: usize) -> f64 {
        let v = x.columns[j][i];
        let v = if v.is_finite() { v } else { self.means[j] };
        (v - self.means[j]) / self.stds[j]
    }
}

/// Solves `a · x = b` in place by Gauss-Jordan elimination with partial
/// pivoting. `a` is row-major `n x n`.
pub(crate) fn solve_linear_system(a: &mut [Vec<f64>], b: &mut [f64]) -> Result<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| {
                a[i][col]
                    .abs()
                    .partial_cmp(&a[j][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .ok_or_else(|| Error::Internal("empty linear system".to_string()))?;
        if a[pivot][col].abs() < 1e-12 {
            return Err(Error::Internal(
                "singular system in predictor fit".to_string(),
            ));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        let diag = a[col][col];
        for value in &mut a[col] {
            *value /= diag;
        }
        b[col] /= diag;

        let pivot_row = a[col].clone();
        let pivot_b = b[col];
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[row][col];
            if factor == 0.0 {
                continue;
            }
            for (value, pivot_value) in a[row].iter_mut().zip(&pivot_row) {
                *value -= factor * pivot_value;
            }
            b[row] -= factor * pivot_b;
        }
    }
    Ok(b.to_vec())
}

/// Normalises raw importance magnitudes so they sum to 1.
pub(crate) fn normalize_importances(raw: Vec<f64>) -> Vec<f64> {
    let total: f64 = raw.iter().map(|v| v.abs()).sum();
    if total == 0.0 || !total.is_finite() {
        let n = raw.len().max(1);
        return vec![1.0 / n as f64; raw.len()];
    }
    raw.iter().map(|v| v.abs() / total).collect()
}
