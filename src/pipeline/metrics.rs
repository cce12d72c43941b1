//! Scoring metrics and evaluation curves.

use serde::{Deserialize, Serialize};

/// Scores reported after a fit or a `score` call. Which fields are set
/// depends on whether the predictor is a classifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Scores {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auc: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cross_entropy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mae: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rmse: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsquared: Option<f64>,
}

impl Scores {
    pub fn classification(y: &[f64], p: &[f64]) -> Scores {
        Scores {
            accuracy: Some(accuracy(y, p)),
            auc: Some(auc(y, p)),
            cross_entropy: Some(cross_entropy(y, p)),
            ..Scores::default()
        }
    }

    pub fn regression(y: &[f64], p: &[f64]) -> Scores {
        Scores {
            mae: Some(mae(y, p)),
            rmse: Some(rmse(y, p)),
            rsquared: Some(rsquared(y, p)),
            ..Scores::default()
        }
    }
}

pub fn accuracy(y: &[f64], p: &[f64]) -> f64 {
    if y.is_empty() {
        return f64::NAN;
    }
    let hits = y
        .iter()
        .zip(p)
        .filter(|(y, p)| (**p >= 0.5) == (**y >= 0.5))
        .count();
    hits as f64 / y.len() as f64
}

pub fn mae(y: &[f64], p: &[f64]) -> f64 {
    if y.is_empty() {
        return f64::NAN;
    }
    y.iter().zip(p).map(|(y, p)| (y - p).abs()).sum::<f64>() / y.len() as f64
}

pub fn rmse(y: &[f64], p: &[f64]) -> f64 {
    if y.is_empty() {
        return f64::NAN;
    }
    (y.iter().zip(p).map(|(y, p)| (y - p) * (y - p)).sum::<f64>() / y.len() as f64).sqrt()
}

pub fn rsquared(y: &[f64], p: &[f64]) -> f64 {
    let n = y.len() as f64;
    if y.is_empty() {
        return f64::NAN;
    }
    let mean = y.iter().sum::<f64>() / n;
    let ss_tot: f64 = y.iter().map(|v| (v - mean) * (v - mean)).sum();
    let ss_res: f64 = y.iter().zip(p).map(|(y, p)| (y - p) * (y - p)).sum();
    if ss_tot == 0.0 {
        return f64::NAN;
    }
    1.0 - ss_res / ss_tot
}

pub fn cross_entropy(y: &[f64], p: &[f64]) -> f64 {
    if y.is_empty() {
        return f64::NAN;
    }
    y.iter()
        .zip(p)
        .map(|(y, p)| crate::criterion::cross_entropy::log_loss(p.clamp(1e-15, 1.0 - 1e-15), *y))
        .sum::<f64>()
        / y.len() as f64
}

/// Area under the ROC curve by the trapezoidal rule; NaN when only one
/// class is present.
pub fn auc(y: &[f64], p: &[f64]) -> f64 {
    let curve = roc_curve(y, p);
    if curve.len() < 2 {
        return f64::NAN;
    }
    let mut area = 0.0;
    for pair in curve.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        area += (x1 - x0) * (y0 + y1) / 2.0;
    }
    area
}

/// `(false_positive_rate, true_positive_rate)` pairs, by descending
/// threshold.
pub fn roc_curve(y: &[f64], p: &[f64]) -> Vec<(f64, f64)> {
    let positives = y.iter().filter(|&&v| v >= 0.5).count() as f64;
    let negatives = y.len() as f64 - positives;
    if positives == 0.0 || negatives == 0.0 {
        return Vec::new();
    }
    let mut order: Vec<usize> = (0..y.len()).collect();
    order.sort_by(|&a, &b| p[b].partial_cmp(&p[a]).unwrap_or(std::cmp::Ordering::Equal));

    let mut out = vec![(0.0, 0.0)];
    let mut tp = 0.0;
    let mut fp = 0.0;
    let mut i = 0;
    while i < order.len() {
        let threshold = p[order[i]];
        while i < order.len() && p[order[i]] == threshold {
            if y[order[i]] >= 0.5 {
                tp += 1.0;
            } else {
                fp += 1.0;
            }
            i += 1;
        }
        out.push((fp / negatives, tp / positives));
    }
    out
}

/// `(recall, precision)` pairs, by descending threshold.
pub fn precision_recall_curve(y: &[f64], p: &[f64]) -> Vec<(f64, f64)> {
    let positives = y.iter().filter(|&&v| v >= 0.5).count() as f64;
    if positives == 0.0 {
        return Vec::new();
    }
    let mut order: Vec<usize> = (0..y.len()).collect();
    order.sort_by(|&a, &b| p[b].partial_cmp(&p[a]).unwrap_or(std::cmp::Ordering::Equal));

    let mut out = Vec::new();
    let mut tp = 0.0;
    let mut seen = 0.0;
    let mut i = 0;
    while i < order.len() {
        let threshold = p[order[i]];
        while i < order.len() && p[order[i]] == threshold {
            if y[order[i]] >= 0.5 {
                tp += 1.0;
            }
            seen += 1.0;
            i += 1;
        }
        out.push((tp / positives, tp / seen));
    }
    out
}

/// `(share_of_population, lift)` pairs for deciles of the ranked
/// predictions.
pub fn lift_curve(y: &[f64], p: &[f64]) -> Vec<(f64, f64)> {
    let n = y.len();
    let positives = y.iter().filter(|&&v| v >= 0.5).count() as f64;
    if n == 0 || positives == 0.0 {
        return Vec::new();
    }
    let base_rate = positives / n as f64;
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| p[b].partial_cmp(&p[a]).unwrap_or(std::cmp::Ordering::Equal));

    let mut out = Vec::new();
    let mut tp = 0.0;
    for (seen, &ix) in order.iter().enumerate() {
        if y[ix] >= 0.5 {
            tp += 1.0;
        }
        let share = (seen + 1) as f64 / n as f64;
        if (seen + 1) % n.div_ceil(10) == 0 || seen + 1 == n {
            out.push((share, (tp / (seen + 1) as f64) / base_rate));
        }
    }
    out
}

/// Pearson correlation; NaN when either side is constant.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    if a.is_empty() {
        return f64::NAN;
    }
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a) * (x - mean_a);
        var_b += (y - mean_b) * (y - mean_b);
    }
    if var_a == 0.0 || var_b == 0.0 {
        return f64::NAN;
    }
    cov / (var_a * var_b).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_classifier() {
        let y = [0.0, 0.0, 1.0, 1.0];
        let p = [0.1, 0.2, 0.8, 0.9];
        assert_eq!(accuracy(&y, &p), 1.0);
        assert!((auc(&y, &p) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_random_classifier_auc() {
        let y = [0.0, 1.0, 0.0, 1.0];
        let p = [0.5, 0.5, 0.5, 0.5];
        assert!((auc(&y, &p) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_regression_metrics() {
        let y = [1.0, 2.0, 3.0];
        let p = [1.0, 2.0, 3.0];
        assert_eq!(mae(&y, &p), 0.0);
        assert_eq!(rmse(&y, &p), 0.0);
        assert_eq!(rsquared(&y, &p), 1.0);
    }

    #[test]
    fn test_pearson() {
        let a = [1.0, 2.0, 3.0];
        let b = [2.0, 4.0, 6.0];
        assert!((pearson(&a, &b) - 1.0).abs() < 1e-12);
        let c = [3.0, 2.0, 1.0];
        assert!((pearson(&a, &c) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_roc_curve_endpoints() {
        let y = [0.0, 1.0];
        let p = [0.3, 0.7];
        let curve = roc_curve(&y, &p);
        assert_eq!(curve.first(), Some(&(0.0, 0.0)));
        assert_eq!(curve.last(), Some(&(1.0, 1.0)));
    }
}
