//! The aggregation catalogue.
//!
//! Pure reduction primitives over ranges of match values. Null handling is
//! uniform: NaN entries (and negative category codes) are filtered inside
//! the primitive, inner loops never error, and domain errors come back as
//! NaN. Empty input is well-defined everywhere: counts return 0,
//! statistics return NaN.
//!
//! Aggregations that need a time axis (`FIRST`, `LAST`,
//! `AVG TIME BETWEEN`, the `TIME SINCE ...` family) reduce `(ts, value)`
//! pairs instead of plain values; for the `TIME SINCE` family the first pair
//! element is the difference `population.ts - peripheral.ts`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{Error, Result};

/// All aggregations understood by the engine, with their wire strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Aggregation {
    #[serde(rename = "AVG")]
    Avg,
    #[serde(rename = "AVG TIME BETWEEN")]
    AvgTimeBetween,
    #[serde(rename = "COUNT")]
    Count,
    #[serde(rename = "COUNT ABOVE MEAN")]
    CountAboveMean,
    #[serde(rename = "COUNT BELOW MEAN")]
    CountBelowMean,
    #[serde(rename = "COUNT DISTINCT")]
    CountDistinct,
    #[serde(rename = "COUNT DISTINCT OVER COUNT")]
    CountDistinctOverCount,
    #[serde(rename = "COUNT MINUS COUNT DISTINCT")]
    CountMinusCountDistinct,
    #[serde(rename = "FIRST")]
    First,
    #[serde(rename = "LAST")]
    Last,
    #[serde(rename = "KURTOSIS")]
    Kurtosis,
    #[serde(rename = "MAX")]
    Max,
    #[serde(rename = "MEDIAN")]
    Median,
    #[serde(rename = "MIN")]
    Min,
    #[serde(rename = "MODE")]
    Mode,
    #[serde(rename = "NUM MAX")]
    NumMax,
    #[serde(rename = "NUM MIN")]
    NumMin,
    #[serde(rename = "Q1")]
    Q1,
    #[serde(rename = "Q5")]
    Q5,
    #[serde(rename = "Q10")]
    Q10,
    #[serde(rename = "Q25")]
    Q25,
    #[serde(rename = "Q75")]
    Q75,
    #[serde(rename = "Q90")]
    Q90,
    #[serde(rename = "Q95")]
    Q95,
    #[serde(rename = "Q99")]
    Q99,
    #[serde(rename = "SKEW")]
    Skew,
    #[serde(rename = "STDDEV")]
    Stddev,
    #[serde(rename = "SUM")]
    Sum,
    #[serde(rename = "TIME SINCE FIRST MAXIMUM")]
    TimeSinceFirstMaximum,
    #[serde(rename = "TIME SINCE FIRST MINIMUM")]
    TimeSinceFirstMinimum,
    #[serde(rename = "TIME SINCE LAST MAXIMUM")]
    TimeSinceLastMaximum,
    #[serde(rename = "TIME SINCE LAST MINIMUM")]
    TimeSinceLastMinimum,
    #[serde(rename = "VAR")]
    Var,
    #[serde(rename = "VARIATION COEFFICIENT")]
    VariationCoefficient,
}

impl Aggregation {
    pub const ALL: [Aggregation; 34] = [
        Aggregation::Avg,
        Aggregation::AvgTimeBetween,
        Aggregation::Count,
        Aggregation::CountAboveMean,
        Aggregation::CountBelowMean,
        Aggregation::CountDistinct,
        Aggregation::CountDistinctOverCount,
        Aggregation::CountMinusCountDistinct,
        Aggregation::First,
        Aggregation::Last,
        Aggregation::Kurtosis,
        Aggregation::Max,
        Aggregation::Median,
        Aggregation::Min,
        Aggregation::Mode,
        Aggregation::NumMax,
        Aggregation::NumMin,
        Aggregation::Q1,
        Aggregation::Q5,
        Aggregation::Q10,
        Aggregation::Q25,
        Aggregation::Q75,
        Aggregation::Q90,
        Aggregation::Q95,
        Aggregation::Q99,
        Aggregation::Skew,
        Aggregation::Stddev,
        Aggregation::Sum,
        Aggregation::TimeSinceFirstMaximum,
        Aggregation::TimeSinceFirstMinimum,
        Aggregation::TimeSinceLastMaximum,
        Aggregation::TimeSinceLastMinimum,
        Aggregation::Var,
        Aggregation::VariationCoefficient,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Avg => "AVG",
            Aggregation::AvgTimeBetween => "AVG TIME BETWEEN",
            Aggregation::Count => "COUNT",
            Aggregation::CountAboveMean => "COUNT ABOVE MEAN",
            Aggregation::CountBelowMean => "COUNT BELOW MEAN",
            Aggregation::CountDistinct => "COUNT DISTINCT",
            Aggregation::CountDistinctOverCount => "COUNT DISTINCT OVER COUNT",
            Aggregation::CountMinusCountDistinct => "COUNT MINUS COUNT DISTINCT",
            Aggregation::First => "FIRST",
            Aggregation::Last => "LAST",
            Aggregation::Kurtosis => "KURTOSIS",
            Aggregation::Max => "MAX",
            Aggregation::Median => "MEDIAN",
            Aggregation::Min => "MIN",
            Aggregation::Mode => "MODE",
            Aggregation::NumMax => "NUM MAX",
            Aggregation::NumMin => "NUM MIN",
            Aggregation::Q1 => "Q1",
            Aggregation::Q5 => "Q5",
            Aggregation::Q10 => "Q10",
            Aggregation::Q25 => "Q25",
            Aggregation::Q75 => "Q75",
            Aggregation::Q90 => "Q90",
            Aggregation::Q95 => "Q95",
            Aggregation::Q99 => "Q99",
            Aggregation::Skew => "SKEW",
            Aggregation::Stddev => "STDDEV",
            Aggregation::Sum => "SUM",
            Aggregation::TimeSinceFirstMaximum => "TIME SINCE FIRST MAXIMUM",
            Aggregation::TimeSinceFirstMinimum => "TIME SINCE FIRST MINIMUM",
            Aggregation::TimeSinceLastMaximum => "TIME SINCE LAST MAXIMUM",
            Aggregation::TimeSinceLastMinimum => "TIME SINCE LAST MINIMUM",
            Aggregation::Var => "VAR",
            Aggregation::VariationCoefficient => "VARIATION COEFFICIENT",
        }
    }

    pub fn parse(s: &str) -> Result<Aggregation> {
        Aggregation::ALL
            .iter()
            .find(|agg| agg.as_str() == s)
            .copied()
            .ok_or_else(|| Error::InvalidArgument(format!("unknown aggregation '{s}'")))
    }

    /// Whether the reduction consumes `(ts, value)` pairs rather than plain
    /// values.
    pub fn needs_timestamps(&self) -> bool {
        matches!(
            self,
            Aggregation::AvgTimeBetween
                | Aggregation::First
                | Aggregation::Last
                | Aggregation::TimeSinceFirstMaximum
                | Aggregation::TimeSinceFirstMinimum
                | Aggregation::TimeSinceLastMaximum
                | Aggregation::TimeSinceLastMinimum
        )
    }

    /// Whether the reduction applies to raw category codes (as opposed to
    /// extracted numeric values).
    pub fn applies_to_codes(&self) -> bool {
        matches!(
            self,
            Aggregation::CountDistinct
                | Aggregation::CountDistinctOverCount
                | Aggregation::CountMinusCountDistinct
                | Aggregation::Mode
        )
    }

    /// Whether the reduction needs no column at all.
    pub fn is_not_applicable(&self) -> bool {
        matches!(self, Aggregation::Count | Aggregation::AvgTimeBetween)
    }
}

impl std::fmt::Display for Aggregation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[inline]
fn non_null(values: &[f64]) -> impl Iterator<Item = f64> + '_ {
    values.iter().copied().filter(|v| !v.is_nan())
}

/// Counts all non-null entries.
pub fn count(values: &[f64]) -> f64 {
    non_null(values).count() as f64
}

/// Takes the sum of all non-null entries.
pub fn sum(values: &[f64]) -> f64 {
    non_null(values).sum()
}

/// Takes the average of all non-null entries; NaN on empty input.
pub fn avg(values: &[f64]) -> f64 {
    let divisor = count(values);
    if divisor == 0.0 {
        return f64::NAN;
    }
    sum(values) / divisor
}

/// Counts all values strictly greater than the mean.
pub fn count_above_mean(values: &[f64]) -> f64 {
    let mean = avg(values);
    non_null(values).filter(|&v| v > mean).count() as f64
}

/// Counts all values strictly smaller than the mean.
pub fn count_below_mean(values: &[f64]) -> f64 {
    let mean = avg(values);
    non_null(values).filter(|&v| v < mean).count() as f64
}

/// Counts the distinct non-null values.
pub fn count_distinct(values: &[f64]) -> f64 {
    let set: HashSet<u64> = non_null(values).map(f64::to_bits).collect();
    set.len() as f64
}

/// Distinct values divided by the total count; NaN on empty input.
pub fn count_distinct_over_count(values: &[f64]) -> f64 {
    let n = count(values);
    if n == 0.0 {
        return f64::NAN;
    }
    count_distinct(values) / n
}

/// `count - count_distinct`.
pub fn count_minus_count_distinct(values: &[f64]) -> f64 {
    count(values) - count_distinct(values)
}

/// Finds the maximum of all non-null entries; NaN on empty input.
pub fn maximum(values: &[f64]) -> f64 {
    non_null(values).fold(f64::NAN, |init, v| {
        if v > init || init.is_nan() {
            v
        } else {
            init
        }
    })
}

/// Finds the minimum of all non-null entries; NaN on empty input.
pub fn minimum(values: &[f64]) -> f64 {
    non_null(values).fold(f64::NAN, |init, v| {
        if v < init || init.is_nan() {
            v
        } else {
            init
        }
    })
}

/// Number of times the maximum is seen; 0 on empty input.
pub fn num_max(values: &[f64]) -> f64 {
    let max = maximum(values);
    if max.is_nan() {
        return 0.0;
    }
    non_null(values).filter(|&v| v == max).count() as f64
}

/// Number of times the minimum is seen; 0 on empty input.
pub fn num_min(values: &[f64]) -> f64 {
    let min = minimum(values);
    if min.is_nan() {
        return 0.0;
    }
    non_null(values).filter(|&v| v == min).count() as f64
}

/// Takes the population variance of all non-null entries; NaN on empty
/// input.
pub fn var(values: &[f64]) -> f64 {
    let n = count(values);
    if n == 0.0 {
        return f64::NAN;
    }
    let mean = avg(values);
    non_null(values).map(|v| (v - mean) * (v - mean) / n).sum()
}

/// Takes the standard deviation of all non-null entries.
pub fn stddev(values: &[f64]) -> f64 {
    var(values).sqrt()
}

/// Takes the skewness of all non-null entries.
pub fn skew(values: &[f64]) -> f64 {
    let n = count(values);
    if n == 0.0 {
        return f64::NAN;
    }
    let mean = avg(values);
    let std = stddev(values);
    non_null(values)
        .map(|v| {
            let diff = (v - mean) / std;
            diff * diff * diff / n
        })
        .sum()
}

/// Takes the kurtosis of all non-null entries.
pub fn kurtosis(values: &[f64]) -> f64 {
    let n = count(values);
    if n == 0.0 {
        return f64::NAN;
    }
    let mean = avg(values);
    let std = stddev(values);
    non_null(values)
        .map(|v| {
            let diff = (v - mean) / std;
            diff * diff * diff * diff / n
        })
        .sum()
}

/// Variance over mean; NaN when the mean is null or zero.
pub fn variation_coefficient(values: &[f64]) -> f64 {
    let mean = avg(values);
    if mean.is_nan() || mean == 0.0 {
        return f64::NAN;
    }
    var(values) / mean
}

/// The `q`-quantile (0 <= q <= 1) with linear interpolation on a sorted
/// copy; NaN on empty input.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted: Vec<f64> = non_null(values).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = pos - lo as f64;
    sorted[lo] * (1.0 - frac) + sorted[hi] * frac
}

/// The median: midpoint of the two middle values for even counts.
pub fn median(values: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = non_null(values).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

#[inline]
fn non_null_pairs(pairs: &[(f64, f64)]) -> impl Iterator<Item = (f64, f64)> + '_ {
    pairs
        .iter()
        .copied()
        .filter(|(ts, v)| !ts.is_nan() && !v.is_nan())
}

/// The value at the smallest time stamp. Pairs sharing the minimal time
/// stamp resolve to the one seen first, i.e. the lower input row id given
/// the matchmaker's stable ordering. NaN on empty input.
pub fn first(pairs: &[(f64, f64)]) -> f64 {
    non_null_pairs(pairs)
        .fold((f64::NAN, f64::NAN), |best, (ts, v)| {
            if best.0.is_nan() || ts < best.0 {
                (ts, v)
            } else {
                best
            }
        })
        .1
}

/// The value at the largest time stamp, ties resolved to the lower input
/// row id. NaN on empty input.
pub fn last(pairs: &[(f64, f64)]) -> f64 {
    non_null_pairs(pairs)
        .fold((f64::NAN, f64::NAN), |best, (ts, v)| {
            if best.0.is_nan() || ts > best.0 {
                (ts, v)
            } else {
                best
            }
        })
        .1
}

/// `(max_ts - min_ts) / (count - 1)` for more than one entry, else 0.
pub fn avg_time_between(pairs: &[(f64, f64)]) -> f64 {
    let ts: Vec<f64> = non_null_pairs(pairs).map(|(t, _)| t).collect();
    if ts.len() < 2 {
        return 0.0;
    }
    (maximum(&ts) - minimum(&ts)) / (ts.len() - 1) as f64
}

/// Which occurrence of the extremum the `TIME SINCE` family refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Occurrence {
    First,
    Last,
}

/// Reduces `(dt, value)` pairs, `dt = population.ts - peripheral.ts`, to
/// the time since the chosen occurrence of the extremum. The first
/// occurrence is the one furthest in the past, i.e. the largest `dt`.
fn time_since_extremum(pairs: &[(f64, f64)], occurrence: Occurrence, want_max: bool) -> f64 {
    let values: Vec<f64> = non_null_pairs(pairs).map(|(_, v)| v).collect();
    let target = if want_max {
        maximum(&values)
    } else {
        minimum(&values)
    };
    if target.is_nan() {
        return f64::NAN;
    }
    let dts = non_null_pairs(pairs)
        .filter(|&(_, v)| v == target)
        .map(|(dt, _)| dt);
    match occurrence {
        Occurrence::First => dts.fold(f64::NAN, |init, dt| {
            if dt > init || init.is_nan() {
                dt
            } else {
                init
            }
        }),
        Occurrence::Last => dts.fold(f64::NAN, |init, dt| {
            if dt < init || init.is_nan() {
                dt
            } else {
                init
            }
        }),
    }
}

pub fn time_since_first_maximum(pairs: &[(f64, f64)]) -> f64 {
    time_since_extremum(pairs, Occurrence::First, true)
}

pub fn time_since_first_minimum(pairs: &[(f64, f64)]) -> f64 {
    time_since_extremum(pairs, Occurrence::First, false)
}

pub fn time_since_last_maximum(pairs: &[(f64, f64)]) -> f64 {
    time_since_extremum(pairs, Occurrence::Last, true)
}

pub fn time_since_last_minimum(pairs: &[(f64, f64)]) -> f64 {
    time_since_extremum(pairs, Occurrence::Last, false)
}

/// Counts the non-null codes.
pub fn count_codes(codes: &[i32]) -> f64 {
    codes.iter().filter(|&&c| c >= 0).count() as f64
}

/// Counts the distinct non-null codes.
pub fn count_distinct_codes(codes: &[i32]) -> f64 {
    let set: HashSet<i32> = codes.iter().copied().filter(|&c| c >= 0).collect();
    set.len() as f64
}

/// The most frequent non-null code; ties break to the lowest code, empty
/// input returns the null code.
pub fn mode_code(codes: &[i32]) -> i32 {
    let mut freq: std::collections::BTreeMap<i32, usize> = std::collections::BTreeMap::new();
    for &c in codes {
        if c < 0 {
            continue;
        }
        *freq.entry(c).or_insert(0) += 1;
    }
    let mut best_code = crate::containers::encoding::NULL_CODE;
    let mut best_count = 0usize;
    for (code, n) in freq {
        if n > best_count {
            best_count = n;
            best_code = code;
        }
    }
    best_code
}

/// Applies a plain-value aggregation. Panics (debug) on aggregations that
/// need timestamps or codes - callers route those separately.
pub fn apply(agg: Aggregation, values: &[f64]) -> f64 {
    match agg {
        Aggregation::Avg => avg(values),
        Aggregation::Count => count(values),
        Aggregation::CountAboveMean => count_above_mean(values),
        Aggregation::CountBelowMean => count_below_mean(values),
        Aggregation::CountDistinct => count_distinct(values),
        Aggregation::CountDistinctOverCount => count_distinct_over_count(values),
        Aggregation::CountMinusCountDistinct => count_minus_count_distinct(values),
        Aggregation::Kurtosis => kurtosis(values),
        Aggregation::Max => maximum(values),
        Aggregation::Median => median(values),
        Aggregation::Min => minimum(values),
        Aggregation::NumMax => num_max(values),
        Aggregation::NumMin => num_min(values),
        Aggregation::Q1 => quantile(values, 0.01),
        Aggregation::Q5 => quantile(values, 0.05),
        Aggregation::Q10 => quantile(values, 0.10),
        Aggregation::Q25 => quantile(values, 0.25),
        Aggregation::Q75 => quantile(values, 0.75),
        Aggregation::Q90 => quantile(values, 0.90),
        Aggregation::Q95 => quantile(values, 0.95),
        Aggregation::Q99 => quantile(values, 0.99),
        Aggregation::Skew => skew(values),
        Aggregation::Stddev => stddev(values),
        Aggregation::Sum => sum(values),
        Aggregation::Var => var(values),
        Aggregation::VariationCoefficient => variation_coefficient(values),
        other => {
            debug_assert!(false, "aggregation {other} does not reduce plain values");
            f64::NAN
        }
    }
}

/// Applies a `(ts, value)`-pair aggregation.
pub fn apply_pairs(agg: Aggregation, pairs: &[(f64, f64)]) -> f64 {
    match agg {
        Aggregation::AvgTimeBetween => avg_time_between(pairs),
        Aggregation::First => first(pairs),
        Aggregation::Last => last(pairs),
        Aggregation::TimeSinceFirstMaximum => time_since_first_maximum(pairs),
        Aggregation::TimeSinceFirstMinimum => time_since_first_minimum(pairs),
        Aggregation::TimeSinceLastMaximum => time_since_last_maximum(pairs),
        Aggregation::TimeSinceLastMinimum => time_since_last_minimum(pairs),
        other => {
            debug_assert!(false, "aggregation {other} does not reduce pairs");
            f64::NAN
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_strings_round_trip() {
        for agg in Aggregation::ALL {
            assert_eq!(Aggregation::parse(agg.as_str()).unwrap(), agg);
        }
        assert!(Aggregation::parse("FROBNICATE").is_err());
    }

    #[test]
    fn test_avg_count_sum() {
        let values = [1.0, f64::NAN, 3.0];
        assert_eq!(count(&values), 2.0);
        assert_eq!(sum(&values), 4.0);
        assert_eq!(avg(&values), 2.0);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(count(&[]), 0.0);
        assert_eq!(sum(&[]), 0.0);
        assert!(avg(&[]).is_nan());
        assert!(var(&[]).is_nan());
        assert!(median(&[]).is_nan());
        assert_eq!(num_max(&[]), 0.0);
        assert_eq!(avg_time_between(&[]), 0.0);
        assert_eq!(mode_code(&[]), -1);
    }

    #[test]
    fn test_all_null_input() {
        let values = [f64::NAN, f64::NAN];
        assert_eq!(count(&values), 0.0);
        assert!(avg(&values).is_nan());
        assert_eq!(count_distinct(&values), 0.0);
    }

    #[test]
    fn test_count_distinct_roundtrip() {
        let values = [1.0, 1.0, 2.0];
        assert_eq!(
            count(&values),
            count_distinct(&values) + count_minus_count_distinct(&values)
        );
    }

    #[test]
    fn test_first_last_by_ts() {
        let pairs = [(5.0, 2.0), (6.0, 4.0)];
        assert_eq!(first(&pairs), 2.0);
        assert_eq!(last(&pairs), 4.0);
    }

    #[test]
    fn test_first_tie_takes_lower_row_id() {
        // Matchmaker ordering puts the lower row id first.
        let pairs = [(5.0, 2.0), (5.0, 9.0)];
        assert_eq!(first(&pairs), 2.0);
        assert_eq!(last(&pairs), 2.0);
    }

    #[test]
    fn test_avg_time_between() {
        let pairs = [(2.0, 0.0), (6.0, 0.0), (10.0, 0.0)];
        assert_eq!(avg_time_between(&pairs), 4.0);
        assert_eq!(avg_time_between(&pairs[..1]), 0.0);
    }

    #[test]
    fn test_mode_ties_take_lowest_code() {
        assert_eq!(mode_code(&[3, 1, 3, 1, 2]), 1);
        assert_eq!(mode_code(&[2, 2, 0]), 2);
        assert_eq!(mode_code(&[-1, -1]), -1);
    }

    #[test]
    fn test_var_stddev() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((var(&values) - 4.0).abs() < 1e-12);
        assert!((stddev(&values) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_quantiles() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&values, 0.0), 1.0);
        assert_eq!(quantile(&values, 1.0), 4.0);
        assert_eq!(median(&values), 2.5);
        assert_eq!(median(&[1.0, 2.0, 3.0]), 2.0);
    }

    #[test]
    fn test_count_above_below_mean() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(count_above_mean(&values), 2.0);
        assert_eq!(count_below_mean(&values), 2.0);
    }

    #[test]
    fn test_time_since_family() {
        // dt = population.ts - peripheral.ts; the first occurrence of the
        // maximum is the furthest in the past, i.e. the largest dt.
        let pairs = [(8.0, 3.0), (5.0, 7.0), (2.0, 7.0)];
        assert_eq!(time_since_first_maximum(&pairs), 5.0);
        assert_eq!(time_since_last_maximum(&pairs), 2.0);
        assert_eq!(time_since_first_minimum(&pairs), 8.0);
        assert_eq!(time_since_last_minimum(&pairs), 8.0);
    }

    #[test]
    fn test_variation_coefficient() {
        let values = [2.0, 2.0];
        assert_eq!(variation_coefficient(&values), 0.0);
        assert!(variation_coefficient(&[0.0]).is_nan());
    }
}
