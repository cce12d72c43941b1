//! Incrementally maintained multi-target weighted R².
//!
//! The criterion keeps one row of sufficient statistics for the "current"
//! candidate - `(sum_yhat, sum_yhat², sum_y_centered·yhat per target)` -
//! which is O(1)-updatable when a sample's prediction changes, plus a
//! bounded store of snapshots for ranking many candidates against each
//! other. `commit`/`revert_to_commit` form the transactional boundary for
//! candidate exploration: after `commit()`, `revert_to_commit()` restores
//! the committed statistics bit-for-bit.

use crate::error::{Error, Result};

/// One row of sufficient statistics.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SufficientStats {
    pub sum_yhat: f64,
    pub sum_yhat_yhat: f64,
    /// One entry per target.
    pub sum_y_centered_yhat: Vec<f64>,
}

impl SufficientStats {
    fn zeros(num_targets: usize) -> Self {
        SufficientStats {
            sum_yhat: 0.0,
            sum_yhat_yhat: 0.0,
            sum_y_centered_yhat: vec![0.0; num_targets],
        }
    }
}

/// A stored candidate: statistics snapshot plus the sample counts on both
/// sides of the split it describes.
#[derive(Debug, Clone)]
struct StoredCandidate {
    stats: SufficientStats,
    count_below: f64,
    count_above: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RSquaredCriterion {
    min_num_samples: f64,
    storage_capacity: usize,

    y_centered: Vec<Vec<f64>>,
    sum_y_centered_y_centered: Vec<f64>,
    sample_weights: Vec<f64>,
    sum_sample_weights: f64,
    yhat_mean: f64,

    current: SufficientStats,
    committed: SufficientStats,

    stored: Vec<StoredCandidate>,
    values_stored: Vec<f64>,
    max_ix: usize,
}

impl RSquaredCriterion {
    pub fn new(min_num_samples: f64, storage_capacity: usize) -> Self {
        RSquaredCriterion {
            min_num_samples,
            storage_capacity,
            ..RSquaredCriterion::default()
        }
    }

    /// Prepares the target-side statistics: weighted means, centered
    /// targets and their weighted sum of squares.
    pub fn init(&mut self, y: &[Vec<f64>], sample_weights: &[f64]) -> Result<()> {
        if y.is_empty() {
            return Err(Error::InvalidArgument(
                "the R² criterion needs at least one target".to_string(),
            ));
        }
        for target in y {
            if target.len() != sample_weights.len() {
                return Err(Error::Shape(format!(
                    "target has {} rows, sample weights have {}",
                    target.len(),
                    sample_weights.len()
                )));
            }
        }

        self.sample_weights = sample_weights.to_vec();
        self.sum_sample_weights = sample_weights.iter().sum();

        self.y_centered = y
            .iter()
            .map(|target| {
                let mean: f64 = target
                    .iter()
                    .zip(sample_weights)
                    .map(|(v, w)| v * w)
                    .sum::<f64>()
                    / self.sum_sample_weights;
                target.iter().map(|v| v - mean).collect()
            })
            .collect();

        self.sum_y_centered_y_centered = self
            .y_centered
            .iter()
            .map(|yc| {
                yc.iter()
                    .zip(sample_weights)
                    .map(|(v, w)| v * v * w)
                    .sum()
            })
            .collect();

        self.current = SufficientStats::zeros(y.len());
        self.committed = SufficientStats::zeros(y.len());
        self.stored.clear();
        self.values_stored.clear();
        self.max_ix = 0;
        Ok(())
    }

    /// Seeds the current statistics from a full prediction vector.
    pub fn init_yhat(&mut self, yhat: &[f64]) -> Result<()> {
        if yhat.len() != self.sample_weights.len() {
            return Err(Error::Shape(format!(
                "predictions have {} rows, sample weights have {}",
                yhat.len(),
                self.sample_weights.len()
            )));
        }

        self.yhat_mean = yhat
            .iter()
            .zip(&self.sample_weights)
            .map(|(v, w)| v * w)
            .sum::<f64>()
            / self.sum_sample_weights;

        let mut stats = SufficientStats::zeros(self.y_centered.len());
        for (i, (&v, &w)) in yhat.iter().zip(&self.sample_weights).enumerate() {
            let centered = v - self.yhat_mean;
            stats.sum_yhat_yhat += centered * centered * w;
            for (j, yc) in self.y_centered.iter().enumerate() {
                stats.sum_y_centered_yhat[j] += centered * yc[i] * w;
            }
        }
        // sum_yhat is zero by definition after centering on yhat_mean.
        stats.sum_yhat = 0.0;

        self.current = stats.clone();
        self.committed = stats;
        Ok(())
    }

    /// Moves the samples in `indices` from `old[ix]` to `new[ix]`,
    /// O(|indices|).
    pub fn update_samples(&mut self, indices: &[usize], new: &[f64], old: &[f64]) {
        for &ix in indices {
            let w = self.sample_weights[ix];
            let new_value = new[ix] - self.yhat_mean;
            let old_value = old[ix] - self.yhat_mean;

            self.current.sum_yhat += (new_value - old_value) * w;
            self.current.sum_yhat_yhat +=
                (new_value * new_value - old_value * old_value) * w;
            for (j, yc) in self.y_centered.iter().enumerate() {
                self.current.sum_y_centered_yhat[j] += yc[ix] * (new_value - old_value) * w;
            }
        }
    }

    /// Snapshots the current statistics as a stored candidate and returns
    /// its slot index.
    pub fn store(&mut self, count_below: f64, count_above: f64) -> usize {
        self.stored.push(StoredCandidate {
            stats: self.current.clone(),
            count_below,
            count_above,
        });
        self.stored.len() - 1
    }

    pub fn num_stored(&self) -> usize {
        self.stored.len()
    }

    pub fn at_capacity(&self) -> bool {
        self.stored.len() >= self.storage_capacity
    }

    pub fn commit(&mut self) {
        self.committed = self.current.clone();
    }

    pub fn revert_to_commit(&mut self) {
        self.current = self.committed.clone();
    }

    /// True iff the current statistics equal the committed ones exactly.
    pub fn current_equals_committed(&self) -> bool {
        self.current == self.committed
    }

    fn value_of(&self, candidate: &StoredCandidate) -> f64 {
        let stats = &candidate.stats;
        let var_yhat = self.sum_sample_weights * stats.sum_yhat_yhat
            - stats.sum_yhat * stats.sum_yhat;

        let mut r_squared = 0.0;
        for (j, &sycyc) in self.sum_y_centered_y_centered.iter().enumerate() {
            if var_yhat == 0.0 || sycyc == 0.0 {
                continue;
            }
            let sycyh = stats.sum_y_centered_yhat[j];
            r_squared += self.sum_sample_weights * sycyh * sycyh / (var_yhat * sycyc);
        }

        // The stored value is the weighted R² times the weight sum.
        self.sum_sample_weights * r_squared
    }

    /// Recomputes all stored values and returns the index of the maximum,
    /// skipping candidates that leave fewer than `min_num_samples` on
    /// either side. `None` when nothing is stored or every candidate is
    /// skipped or non-finite.
    pub fn find_maximum(&mut self) -> Option<usize> {
        self.values_stored = vec![0.0; self.stored.len()];
        let mut max_ix: Option<usize> = None;

        for i in 0..self.stored.len() {
            let candidate = &self.stored[i];
            if candidate.count_below < self.min_num_samples
                || candidate.count_above < self.min_num_samples
            {
                continue;
            }
            let value = self.value_of(candidate);
            if !value.is_finite() {
                continue;
            }
            self.values_stored[i] = value;
            match max_ix {
                None => max_ix = Some(i),
                Some(m) if value > self.values_stored[m] => max_ix = Some(i),
                Some(_) => {}
            }
        }

        self.max_ix = max_ix.unwrap_or(0);
        max_ix
    }

    /// Stored-candidate indices in `[begin, end)` sorted by descending
    /// value; ties keep the lower index (stable).
    pub fn argsort(&self, begin: usize, end: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (begin..end.min(self.values_stored.len())).collect();
        indices.sort_by(|&a, &b| {
            self.values_stored[b]
                .partial_cmp(&self.values_stored[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        indices
    }

    /// Drops every stored candidate except the `keep` best-scoring ones,
    /// returning the surviving original indices in their original order so
    /// callers can prune parallel bookkeeping in lockstep.
    pub fn prune(&mut self, keep: usize) -> Vec<usize> {
        if self.stored.len() <= keep {
            return (0..self.stored.len()).collect();
        }
        self.find_maximum();
        let mut survivors = self.argsort(0, self.stored.len());
        survivors.truncate(keep);
        survivors.sort_unstable();

        self.stored = survivors
            .iter()
            .map(|&i| self.stored[i].clone())
            .collect();
        self.values_stored = survivors.iter().map(|&i| self.values_stored[i]).collect();
        survivors
    }

    pub fn values_stored(&self) -> &[f64] {
        &self.values_stored
    }

    pub fn max_ix(&self) -> usize {
        self.max_ix
    }

    pub fn sum_sample_weights(&self) -> f64 {
        self.sum_sample_weights
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perfect_split_setup() -> RSquaredCriterion {
        let mut criterion = RSquaredCriterion::new(1.0, 1000);
        criterion
            .init(&[vec![0.0, 0.0, 1.0, 1.0]], &[1.0, 1.0, 1.0, 1.0])
            .unwrap();
        criterion.init_yhat(&[0.0, 0.0, 0.0, 0.0]).unwrap();
        criterion.commit();
        criterion
    }

    /// Stores the candidate `yhat = [x > threshold]` for x = [0, 1, 2, 3].
    fn store_threshold(criterion: &mut RSquaredCriterion, threshold: f64) {
        let x = [0.0, 1.0, 2.0, 3.0];
        let yhat: Vec<f64> = x.iter().map(|&v| f64::from(v > threshold)).collect();
        let zeros = [0.0; 4];
        let indices: Vec<usize> = (0..4).collect();
        criterion.update_samples(&indices, &yhat, &zeros);
        let below = x.iter().filter(|&&v| v <= threshold).count() as f64;
        criterion.store(below, 4.0 - below);
        criterion.revert_to_commit();
    }

    #[test]
    fn test_find_maximum_prefers_perfect_split() {
        let mut criterion = perfect_split_setup();
        for threshold in [0.5, 1.5, 2.5] {
            store_threshold(&mut criterion, threshold);
        }
        let max_ix = criterion.find_maximum().unwrap();
        assert_eq!(max_ix, 1);
        assert!((criterion.values_stored()[max_ix] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_commit_revert_is_bit_for_bit() {
        let mut criterion = perfect_split_setup();
        let before = criterion.current.clone();
        criterion.update_samples(&[0, 2], &[1.0, 1.0, 1.0, 1.0], &[0.0; 4]);
        assert!(!criterion.current_equals_committed());
        criterion.revert_to_commit();
        assert!(criterion.current_equals_committed());
        assert_eq!(criterion.current, before);
    }

    #[test]
    fn test_min_num_samples_filters_candidates() {
        let mut criterion = RSquaredCriterion::new(2.0, 1000);
        criterion
            .init(&[vec![0.0, 0.0, 1.0, 1.0]], &[1.0; 4])
            .unwrap();
        criterion.init_yhat(&[0.0; 4]).unwrap();
        criterion.commit();

        // One sample below: violates min_num_samples = 2.
        store_threshold(&mut criterion, 0.5);
        assert!(criterion.find_maximum().is_none());

        store_threshold(&mut criterion, 1.5);
        assert_eq!(criterion.find_maximum(), Some(1));
    }

    #[test]
    fn test_prune_keeps_best() {
        let mut criterion = perfect_split_setup();
        for threshold in [0.5, 1.5, 2.5] {
            store_threshold(&mut criterion, threshold);
        }
        let survivors = criterion.prune(1);
        assert_eq!(survivors, vec![1]);
        assert_eq!(criterion.num_stored(), 1);
    }

    #[test]
    fn test_argsort_is_descending() {
        let mut criterion = perfect_split_setup();
        for threshold in [0.5, 1.5, 2.5] {
            store_threshold(&mut criterion, threshold);
        }
        criterion.find_maximum();
        let order = criterion.argsort(0, 3);
        assert_eq!(order[0], 1);
        let values = criterion.values_stored();
        assert!(values[order[0]] >= values[order[1]]);
        assert!(values[order[1]] >= values[order[2]]);
    }
}
