//! Ridge-regularised linear regression on standardised features.

use serde::{Deserialize, Serialize};

use crate::containers::matrix::FeatureMatrix;
use crate::error::{Error, Result};

use super::{normalize_importances, solve_linear_system, Scaler};

fn default_reg_lambda() -> f64 {
    1e-10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearRegression {
    #[serde(default = "default_reg_lambda")]
    pub reg_lambda: f64,
    #[serde(default)]
    weights: Vec<f64>,
    #[serde(default)]
    intercept: f64,
    #[serde(default)]
    scaler: Scaler,
    #[serde(default)]
    fitted: bool,
}

impl Default for LinearRegression {
    fn default() -> Self {
        LinearRegression {
            reg_lambda: default_reg_lambda(),
            weights: Vec::new(),
            intercept: 0.0,
            scaler: Scaler::default(),
            fitted: false,
        }
    }
}

impl LinearRegression {
    pub fn fit(
        &mut self,
        x: &FeatureMatrix,
        y: &[f64],
        sample_weights: Option<&[f64]>,
    ) -> Result<()> {
        let nrows = x.nrows();
        if y.len() != nrows {
            return Err(Error::Shape(format!(
                "feature matrix has {nrows} rows, targets have {}",
                y.len()
            )));
        }
        let ones;
        let w = match sample_weights {
            Some(w) => w,
            None => {
                ones = vec![1.0; nrows];
                &ones
            }
        };
        let ncols = x.ncols();
        self.scaler = Scaler::fit(x, w);

        // Normal equations over the standardised features, intercept last.
        let dim = ncols + 1;
        let mut a = vec![vec![0.0; dim]; dim];
        let mut b = vec![0.0; dim];
        for i in 0..nrows {
            let wi = w[i];
            if wi == 0.0 {
                continue;
            }
            let row: Vec<f64> = (0..ncols).map(|j| self.scaler.at(x, i, j)).collect();
            for j in 0..ncols {
                for k in j..ncols {
                    a[j][k] += wi * row[j] * row[k];
                }
                a[j][ncols] += wi * row[j];
                b[j] += wi * row[j] * y[i];
            }
            a[ncols][ncols] += wi;
            b[ncols] += wi * y[i];
        }
        for j in 0..dim {
            for k in 0..j {
                a[j][k] = a[k][j];
            }
        }
        for (j, row) in a.iter_mut().enumerate().take(ncols) {
            row[j] += self.reg_lambda;
        }

        let solution = solve_linear_system(&mut a, &mut b)?;
        self.intercept = solution[ncols];
        self.weights = solution[..ncols].to_vec();
        self.fitted = true;
        Ok(())
    }

    pub fn predict(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        if !self.fitted {
            return Err(Error::NotFitted(
                "this LinearRegression has not been fit".to_string(),
            ));
        }
        if x.ncols() != self.weights.len() {
            return Err(Error::Shape(format!(
                "feature matrix has {} columns, the model expects {}",
                x.ncols(),
                self.weights.len()
            )));
        }
        Ok((0..x.nrows())
            .map(|i| {
                self.intercept
                    + self
                        .weights
                        .iter()
                        .enumerate()
                        .map(|(j, w)| w * self.scaler.at(x, i, j))
                        .sum::<f64>()
            })
            .collect())
    }

    /// Importance of a standardised feature is the magnitude of its weight.
    pub fn feature_importances(&self) -> Result<Vec<f64>> {
        if !self.fitted {
            return Err(Error::NotFitted(
                "this LinearRegression has not been fit".to_string(),
            ));
        }
        Ok(normalize_importances(self.weights.clone()))
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }
}
