//! Logistic regression fit by iteratively reweighted least squares.

use serde::{Deserialize, Serialize};

use crate::containers::matrix::FeatureMatrix;
use crate::criterion::cross_entropy::logistic;
use crate::error::{Error, Result};

use super::{normalize_importances, solve_linear_system, Scaler};

fn default_reg_lambda() -> f64 {
    1e-6
}
fn default_max_iter() -> usize {
    25
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    #[serde(default = "default_reg_lambda")]
    pub reg_lambda: f64,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    #[serde(default)]
    weights: Vec<f64>,
    #[serde(default)]
    intercept: f64,
    #[serde(default)]
    scaler: Scaler,
    #[serde(default)]
    fitted: bool,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        LogisticRegression {
            reg_lambda: default_reg_lambda(),
            max_iter: default_max_iter(),
            weights: Vec::new(),
            intercept: 0.0,
            scaler: Scaler::default(),
            fitted: false,
        }
    }
}

impl LogisticRegression {
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
        let dim = ncols + 1;
        let mut beta = vec![0.0; dim];

        for _ in 0..self.max_iter {
            // Newton step on the penalised log likelihood.
            let mut hessian = vec![vec![0.0; dim]; dim];
            let mut gradient = vec![0.0; dim];
            for i in 0..nrows {
                let wi = w[i];
                if wi == 0.0 {
                    continue;
                }
                let mut row: Vec<f64> = (0..ncols).map(|j| self.scaler.at(x, i, j)).collect();
                row.push(1.0);
                let eta: f64 = row.iter().zip(&beta).map(|(a, b)| a * b).sum();
                let p = logistic(eta);
                let residual = wi * (y[i] - p);
                let curvature = (wi * p * (1.0 - p)).max(1e-10);
                for j in 0..dim {
                    gradient[j] += residual * row[j];
                    for k in j..dim {
                        hessian[j][k] += curvature * row[j] * row[k];
                    }
                }
            }
            for j in 0..dim {
                for k in 0..j {
                    hessian[j][k] = hessian[k][j];
                }
            }
            for (j, row) in hessian.iter_mut().enumerate().take(ncols) {
                row[j] += self.reg_lambda;
                gradient[j] -= self.reg_lambda * beta[j];
            }

            let step = solve_linear_system(&mut hessian, &mut gradient)?;
            let mut moved = 0.0f64;
            for (b, s) in beta.iter_mut().zip(&step) {
                *b += s;
                moved = moved.max(s.abs());
            }
            if moved < 1e-10 {
                break;
            }
        }

        self.intercept = beta[ncols];
        self.weights = beta[..ncols].to_vec();
        self.fitted = true;
        Ok(())
    }

    /// Predicted probabilities.
    pub fn predict(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        if !self.fitted {
            return Err(Error::NotFitted(
                "this LogisticRegression has not been fit".to_string(),
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
                let eta = self.intercept
                    + self
                        .weights
                        .iter()
                        .enumerate()
                        .map(|(j, w)| w * self.scaler.at(x, i, j))
                        .sum::<f64>();
                logistic(eta)
            })
            .collect())
    }

    pub fn feature_importances(&self) -> Result<Vec<f64>> {
        if !self.fitted {
            return Err(Error::NotFitted(
                "this LogisticRegression has not been fit".to_string(),
            ));
        }
        Ok(normalize_importances(self.weights.clone()))
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }
}
