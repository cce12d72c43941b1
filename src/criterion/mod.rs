//! Optimisation criteria and loss functions.
//!
//! Two layers live here. [`RSquaredCriterion`] ranks many stored candidates
//! against multi-target weighted R² and backs the FastProp feature ranking.
//! [`Loss`] is the pluggable loss of the boosted learner: it owns the
//! per-row predictions, first/second derivatives, and the commit/revert
//! boundary that makes trying many candidate splits affordable.
//!
//! Polymorphism is a tagged sum, not a trait-object hierarchy: the hot
//! inner loops match once on the loss kind and run monomorphic code.

pub mod cross_entropy;
pub mod rsquared;
pub mod square;

pub use rsquared::{RSquaredCriterion, SufficientStats};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which concrete loss a boosted learner runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LossKind {
    #[default]
    #[serde(rename = "SquareLoss")]
    Square,
    #[serde(rename = "CrossEntropyLoss")]
    CrossEntropy,
}

impl LossKind {
    pub fn parse(s: &str) -> Result<LossKind> {
        match s {
            "SquareLoss" => Ok(LossKind::Square),
            "CrossEntropyLoss" => Ok(LossKind::CrossEntropy),
            other => Err(Error::InvalidArgument(format!(
                "unknown loss function '{other}'"
            ))),
        }
    }
}

/// Sufficient statistics of one side of a candidate split: weighted
/// gradient and Hessian sums. Adding or removing a single match is O(1),
/// which is what makes threshold sweeps cheap.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GradientStats {
    pub sum_g: f64,
    pub sum_h: f64,
    pub count: usize,
}

impl GradientStats {
    #[inline]
    pub fn add(&mut self, g: f64, h: f64) {
        self.sum_g += g;
        self.sum_h += h;
        self.count += 1;
    }

    #[inline]
    pub fn remove(&mut self, g: f64, h: f64) {
        self.sum_g -= g;
        self.sum_h -= h;
        self.count -= 1;
    }

    pub fn merge(&mut self, other: &GradientStats) {
        self.sum_g += other.sum_g;
        self.sum_h += other.sum_h;
        self.count += other.count;
    }

    /// The Newton step `w = -Σg / (Σh + λ)`.
    #[inline]
    pub fn newton_weight(&self, lambda: f64) -> f64 {
        let w = -self.sum_g / (self.sum_h + lambda);
        if w.is_finite() {
            w
        } else {
            0.0
        }
    }

    /// The loss reduction a Newton step on these statistics buys:
    /// `(Σg)² / (Σh + λ)`.
    #[inline]
    pub fn score(&self, lambda: f64) -> f64 {
        let s = self.sum_g * self.sum_g / (self.sum_h + lambda);
        if s.is_finite() {
            s
        } else {
            0.0
        }
    }
}

/// The boosted learner's loss: targets, sample weights, predictions in
/// link space, derivatives, and the committed-prediction snapshot.
#[derive(Debug, Clone)]
pub struct Loss {
    pub kind: LossKind,
    targets: Vec<f64>,
    sample_weights: Vec<f64>,
    yhat: Vec<f64>,
    yhat_committed: Vec<f64>,
    g: Vec<f64>,
    h: Vec<f64>,
}

impl Loss {
    pub fn new(kind: LossKind, targets: Vec<f64>, sample_weights: Vec<f64>) -> Result<Self> {
        if targets.len() != sample_weights.len() {
            return Err(Error::Shape(format!(
                "targets have {} rows, sample weights have {}",
                targets.len(),
                sample_weights.len()
            )));
        }
        let n = targets.len();
        Ok(Loss {
            kind,
            targets,
            sample_weights,
            yhat: vec![0.0; n],
            yhat_committed: vec![0.0; n],
            g: vec![0.0; n],
            h: vec![0.0; n],
        })
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// The constant starting prediction: the weighted target mean, mapped
    /// into link space for the cross-entropy loss.
    pub fn initial_prediction(&self) -> f64 {
        let sum_w: f64 = self.sample_weights.iter().sum();
        if sum_w == 0.0 {
            return 0.0;
        }
        let mean = self
            .targets
            .iter()
            .zip(&self.sample_weights)
            .map(|(y, w)| y * w)
            .sum::<f64>()
            / sum_w;
        match self.kind {
            LossKind::Square => mean,
            LossKind::CrossEntropy => cross_entropy::inverse_logistic(mean.clamp(1e-15, 1.0 - 1e-15)),
        }
    }

    /// Seeds the predictions (link space) and commits them.
    pub fn init_yhat(&mut self, value: f64) {
        self.yhat.iter_mut().for_each(|v| *v = value);
        self.yhat_committed.copy_from_slice(&self.yhat);
    }

    /// Recomputes per-row first and second derivatives from the current
    /// predictions.
    pub fn calc_gradients(&mut self) {
        for i in 0..self.targets.len() {
            let (g, h) = match self.kind {
                LossKind::Square => square::gradients(self.yhat[i], self.targets[i]),
                LossKind::CrossEntropy => {
                    cross_entropy::gradients(self.yhat[i], self.targets[i])
                }
            };
            self.g[i] = g * self.sample_weights[i];
            self.h[i] = h * self.sample_weights[i];
        }
    }

    pub fn g(&self) -> &[f64] {
        &self.g
    }

    pub fn h(&self) -> &[f64] {
        &self.h
    }

    pub fn yhat(&self) -> &[f64] {
        &self.yhat
    }

    pub fn targets(&self) -> &[f64] {
        &self.targets
    }

    pub fn sample_weights(&self) -> &[f64] {
        &self.sample_weights
    }

    /// Adds `delta[ix]` to the predictions at `indices`.
    pub fn update_samples(&mut self, indices: &[usize], delta: &[f64]) {
        for &ix in indices {
            self.yhat[ix] += delta[ix];
        }
    }

    /// Records the current predictions as committed.
    pub fn commit(&mut self) {
        self.yhat_committed.copy_from_slice(&self.yhat);
    }

    /// Restores the committed predictions at `indices`.
    pub fn revert_to_commit(&mut self, indices: &[usize]) {
        for &ix in indices {
            self.yhat[ix] = self.yhat_committed[ix];
        }
    }

    /// Restores every committed prediction.
    pub fn revert_all(&mut self) {
        self.yhat.copy_from_slice(&self.yhat_committed);
    }

    /// The current total loss (weighted mean).
    pub fn loss(&self) -> f64 {
        let sum_w: f64 = self.sample_weights.iter().sum();
        if sum_w == 0.0 {
            return 0.0;
        }
        let total: f64 = (0..self.targets.len())
            .map(|i| {
                let per_sample = match self.kind {
                    LossKind::Square => square::squared_error(self.yhat[i], self.targets[i]),
                    LossKind::CrossEntropy => cross_entropy::log_loss(
                        cross_entropy::logistic(self.yhat[i]),
                        self.targets[i],
                    ),
                };
                per_sample * self.sample_weights[i]
            })
            .sum();
        total / sum_w
    }

    /// The predictions mapped out of link space.
    pub fn transformed_predictions(&self) -> Vec<f64> {
        match self.kind {
            LossKind::Square => self.yhat.clone(),
            LossKind::CrossEntropy => self.yhat.iter().map(|&v| cross_entropy::logistic(v)).collect(),
        }
    }

    /// Newton line search for the rate at which `predictions` should be
    /// folded into the current yhat: `-Σ(g·p) / (Σ(h·p²) + λ)`, clamped to
    /// [0, 1].
    pub fn calc_update_rate(&self, predictions: &[f64], lambda: f64) -> f64 {
        let mut num = 0.0;
        let mut den = lambda;
        for i in 0..predictions.len() {
            num += self.g[i] * predictions[i];
            den += self.h[i] * predictions[i] * predictions[i];
        }
        let rate = -num / den;
        if rate.is_finite() {
            rate.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newton_weight_and_score() {
        let mut stats = GradientStats::default();
        stats.add(1.0, 2.0);
        stats.add(1.0, 2.0);
        assert!((stats.newton_weight(0.0) + 0.5).abs() < 1e-12);
        assert!((stats.score(0.0) - 1.0).abs() < 1e-12);
        stats.remove(1.0, 2.0);
        assert_eq!(stats.count, 1);
    }

    #[test]
    fn test_square_loss_gradients() {
        let mut loss = Loss::new(LossKind::Square, vec![1.0, 3.0], vec![1.0, 1.0]).unwrap();
        loss.init_yhat(2.0);
        loss.calc_gradients();
        assert_eq!(loss.g(), &[1.0, -1.0]);
        assert_eq!(loss.h(), &[1.0, 1.0]);
    }

    #[test]
    fn test_initial_prediction() {
        let loss = Loss::new(LossKind::Square, vec![1.0, 3.0], vec![1.0, 1.0]).unwrap();
        assert_eq!(loss.initial_prediction(), 2.0);

        let ce = Loss::new(LossKind::CrossEntropy, vec![0.0, 1.0], vec![1.0, 1.0]).unwrap();
        assert!((cross_entropy::logistic(ce.initial_prediction()) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_commit_revert_predictions() {
        let mut loss = Loss::new(LossKind::Square, vec![1.0; 3], vec![1.0; 3]).unwrap();
        loss.init_yhat(0.0);
        loss.update_samples(&[0, 2], &[5.0, 5.0, 5.0]);
        assert_eq!(loss.yhat(), &[5.0, 0.0, 5.0]);
        loss.revert_to_commit(&[0]);
        assert_eq!(loss.yhat(), &[0.0, 0.0, 5.0]);
        loss.revert_all();
        assert_eq!(loss.yhat(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_update_rate_moves_towards_targets() {
        let mut loss = Loss::new(LossKind::Square, vec![2.0, 2.0], vec![1.0, 1.0]).unwrap();
        loss.init_yhat(0.0);
        loss.calc_gradients();
        // Predictions exactly matching the residuals want rate 1.
        let rate = loss.calc_update_rate(&[2.0, 2.0], 0.0);
        assert!((rate - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_loss_kind_parse() {
        assert_eq!(LossKind::parse("SquareLoss").unwrap(), LossKind::Square);
        assert_eq!(
            LossKind::parse("CrossEntropyLoss").unwrap(),
            LossKind::CrossEntropy
        );
        assert!(LossKind::parse("HuberLoss").is_err());
    }
}
