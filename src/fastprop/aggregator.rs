//! Applies one abstract feature to the matches of a single population row.
//!
//! The inner loops never error: out-of-domain reductions come back as NaN
//! and an empty (or fully null-filtered) match set yields 0.0, matching the
//! behaviour of the aggregation kernel this engine descends from. The
//! condition predicate is threaded through as a generic parameter so the
//! no-condition path monomorphises to an unconditional loop.

use crate::aggregations::{self, Aggregation};
use crate::containers::column::FloatColumn;
use crate::containers::feature::{AbstractFeature, Condition, DataUsed, NO_CATEGORICAL_VALUE};
use crate::containers::frame::DataFrame;
use crate::containers::matches::Match;

/// Everything an aggregation may touch for one (population, peripheral)
/// pair.
pub struct AggregationContext<'a> {
    pub population: &'a DataFrame,
    pub peripheral: &'a DataFrame,
    /// The time-stamp pair declared on the join, when any.
    pub pop_ts: Option<&'a FloatColumn>,
    pub per_ts: Option<&'a FloatColumn>,
    /// Subfeature columns (per peripheral row), for nested learners.
    pub subfeatures: &'a [Vec<f64>],
}

impl<'a> AggregationContext<'a> {
    /// `population.ts - peripheral.ts` for a match; NaN when either side
    /// has no declared time stamp.
    #[inline]
    fn time_diff(&self, m: &Match) -> f64 {
        match (self.pop_ts, self.per_ts) {
            (Some(pop), Some(per)) => pop.get(m.ix_output) - per.get(m.ix_input),
            _ => f64::NAN,
        }
    }

    #[inline]
    fn per_ts_value(&self, m: &Match) -> f64 {
        self.per_ts.map_or(f64::NAN, |ts| ts.get(m.ix_input))
    }

    /// Whether a condition holds for a match.
    pub fn condition_holds(&self, condition: &Condition, m: &Match) -> bool {
        match condition.data_used {
            DataUsed::Categorical => {
                self.peripheral.categoricals[condition.input_col].get(m.ix_input)
                    == condition.category_used
            }
            DataUsed::SameUnitsCategorical => {
                let out = self.population.categoricals[condition.output_col].get(m.ix_output);
                out >= 0
                    && out == self.peripheral.categoricals[condition.input_col].get(m.ix_input)
            }
            DataUsed::Lag => {
                let dt = self.time_diff(m);
                dt >= condition.bound_lower && dt < condition.bound_upper
            }
            _ => {
                debug_assert!(false, "not a condition: {:?}", condition.data_used);
                true
            }
        }
    }

    fn all_conditions_hold(&self, conditions: &[Condition], m: &Match) -> bool {
        conditions.iter().all(|c| self.condition_holds(c, m))
    }
}

/// Applies `feature` to `matches`, producing one feature value.
pub fn apply_feature(
    ctx: &AggregationContext<'_>,
    feature: &AbstractFeature,
    matches: &[Match],
) -> f64 {
    if feature.conditions.is_empty() {
        apply_filtered(ctx, feature, matches, |_| true)
    } else {
        apply_filtered(ctx, feature, matches, |m| {
            ctx.all_conditions_hold(&feature.conditions, m)
        })
    }
}

fn apply_filtered<F: Fn(&Match) -> bool>(
    ctx: &AggregationContext<'_>,
    feature: &AbstractFeature,
    matches: &[Match],
    condition: F,
) -> f64 {
    let agg = feature.aggregation;

    // MODE and the count-distinct family work on raw category codes when
    // the feature aggregates a plain categorical column.
    if feature.data_used == DataUsed::Categorical
        && feature.categorical_value == NO_CATEGORICAL_VALUE
        && agg.applies_to_codes()
    {
        let col = &ctx.peripheral.categoricals[feature.input_col];
        let codes: Vec<i32> = matches
            .iter()
            .filter(|m| condition(m))
            .map(|m| col.get(m.ix_input))
            .filter(|&c| c >= 0)
            .collect();
        if codes.is_empty() {
            return 0.0;
        }
        return match agg {
            Aggregation::CountDistinct => aggregations::count_distinct_codes(&codes),
            Aggregation::CountMinusCountDistinct => {
                aggregations::count_codes(&codes) - aggregations::count_distinct_codes(&codes)
            }
            Aggregation::CountDistinctOverCount => {
                aggregations::count_distinct_codes(&codes) / aggregations::count_codes(&codes)
            }
            Aggregation::Mode => f64::from(aggregations::mode_code(&codes)),
            _ => unreachable!(),
        };
    }

    if agg.needs_timestamps() {
        let pairs: Vec<(f64, f64)> = matches
            .iter()
            .filter(|m| condition(m))
            .map(|m| {
                let ts = match agg {
                    // FIRST and LAST sort on the raw peripheral time stamp;
                    // AVG TIME BETWEEN only looks at the time axis.
                    Aggregation::First | Aggregation::Last | Aggregation::AvgTimeBetween => {
                        ctx.per_ts_value(m)
                    }
                    // The TIME SINCE family reduces time differences.
                    _ => ctx.time_diff(m),
                };
                (ts, extract_value(ctx, feature, m))
            })
            .filter(|(ts, v)| !ts.is_nan() && !v.is_nan())
            .collect();
        if pairs.is_empty() {
            return 0.0;
        }
        return aggregations::apply_pairs(agg, &pairs);
    }

    let values: Vec<f64> = matches
        .iter()
        .filter(|m| condition(m))
        .map(|m| extract_value(ctx, feature, m))
        .filter(|v| !v.is_nan())
        .collect();
    if values.is_empty() {
        return 0.0;
    }
    aggregations::apply(agg, &values)
}

/// The value a single match contributes, by `data_used`.
#[inline]
fn extract_value(ctx: &AggregationContext<'_>, feature: &AbstractFeature, m: &Match) -> f64 {
    match feature.data_used {
        DataUsed::Categorical => {
            let code = ctx.peripheral.categoricals[feature.input_col].get(m.ix_input);
            if feature.categorical_value == NO_CATEGORICAL_VALUE {
                // Plain categorical under a numeric aggregation: count-style
                // semantics, nulls filtered.
                if code < 0 {
                    f64::NAN
                } else {
                    f64::from(code)
                }
            } else if code == feature.categorical_value {
                1.0
            } else {
                0.0
            }
        }
        DataUsed::Discrete => ctx.peripheral.discretes[feature.input_col].get(m.ix_input),
        DataUsed::Numerical => ctx.peripheral.numericals[feature.input_col].get(m.ix_input),
        DataUsed::NotApplicable => match feature.aggregation {
            Aggregation::Count => 0.0,
            _ => ctx.per_ts_value(m),
        },
        DataUsed::SameUnitsCategorical => {
            let out = ctx.population.categoricals[feature.output_col].get(m.ix_output);
            let inp = ctx.peripheral.categoricals[feature.input_col].get(m.ix_input);
            if out >= 0 && out == inp {
                1.0
            } else {
                0.0
            }
        }
        DataUsed::SameUnitsDiscrete => {
            ctx.population.discretes[feature.output_col].get(m.ix_output)
                - ctx.peripheral.discretes[feature.input_col].get(m.ix_input)
        }
        DataUsed::SameUnitsNumerical => {
            ctx.population.numericals[feature.output_col].get(m.ix_output)
                - ctx.peripheral.numericals[feature.input_col].get(m.ix_input)
        }
        DataUsed::Subfeatures => ctx.subfeatures[feature.input_col][m.ix_input],
        DataUsed::Lag | DataUsed::TimeDiff => ctx.time_diff(m),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::column::{Column, Role};
    use crate::containers::feature::AbstractFeature;

    fn peripheral() -> DataFrame {
        let mut df = DataFrame::new("per");
        df.add_int_column(Role::JoinKey, Column::new("jk", vec![1, 1, 1]))
            .unwrap();
        df.add_float_column(Role::Numerical, Column::new("v", vec![2.0, 4.0, 10.0]))
            .unwrap();
        df.add_int_column(Role::Categorical, Column::new("c", vec![0, 0, 1]))
            .unwrap();
        df.add_float_column(Role::TimeStamp, Column::new("ts", vec![5.0, 6.0, 9.0]))
            .unwrap();
        df
    }

    fn population() -> DataFrame {
        let mut df = DataFrame::new("pop");
        df.add_int_column(Role::JoinKey, Column::new("jk", vec![1]))
            .unwrap();
        df.add_float_column(Role::TimeStamp, Column::new("ts", vec![10.0]))
            .unwrap();
        df
    }

    fn matches(rows: &[usize]) -> Vec<Match> {
        rows.iter().map(|&r| Match::new(0, r)).collect()
    }

    #[test]
    fn test_avg_over_matches() {
        let pop = population();
        let per = peripheral();
        let ctx = AggregationContext {
            population: &pop,
            peripheral: &per,
            pop_ts: pop.primary_time_stamp(),
            per_ts: per.primary_time_stamp(),
            subfeatures: &[],
        };
        let feature =
            AbstractFeature::new(0, Aggregation::Avg, DataUsed::Numerical).with_input_col(0);
        assert_eq!(apply_feature(&ctx, &feature, &matches(&[0, 1])), 3.0);
    }

    #[test]
    fn test_first_last() {
        let pop = population();
        let per = peripheral();
        let ctx = AggregationContext {
            population: &pop,
            peripheral: &per,
            pop_ts: pop.primary_time_stamp(),
            per_ts: per.primary_time_stamp(),
            subfeatures: &[],
        };
        let first =
            AbstractFeature::new(0, Aggregation::First, DataUsed::Numerical).with_input_col(0);
        let last =
            AbstractFeature::new(0, Aggregation::Last, DataUsed::Numerical).with_input_col(0);
        assert_eq!(apply_feature(&ctx, &first, &matches(&[0, 1])), 2.0);
        assert_eq!(apply_feature(&ctx, &last, &matches(&[0, 1])), 4.0);
    }

    #[test]
    fn test_count_distinct_on_codes() {
        let pop = population();
        let per = peripheral();
        let ctx = AggregationContext {
            population: &pop,
            peripheral: &per,
            pop_ts: None,
            per_ts: None,
            subfeatures: &[],
        };
        let distinct = AbstractFeature::new(0, Aggregation::CountDistinct, DataUsed::Categorical)
            .with_input_col(0);
        let minus =
            AbstractFeature::new(0, Aggregation::CountMinusCountDistinct, DataUsed::Categorical)
                .with_input_col(0);
        assert_eq!(apply_feature(&ctx, &distinct, &matches(&[0, 1, 2])), 2.0);
        assert_eq!(apply_feature(&ctx, &minus, &matches(&[0, 1, 2])), 1.0);
    }

    #[test]
    fn test_empty_matches_yield_zero() {
        let pop = population();
        let per = peripheral();
        let ctx = AggregationContext {
            population: &pop,
            peripheral: &per,
            pop_ts: None,
            per_ts: None,
            subfeatures: &[],
        };
        let feature =
            AbstractFeature::new(0, Aggregation::Avg, DataUsed::Numerical).with_input_col(0);
        assert_eq!(apply_feature(&ctx, &feature, &[]), 0.0);
    }

    #[test]
    fn test_categorical_condition_filters() {
        let pop = population();
        let per = peripheral();
        let ctx = AggregationContext {
            population: &pop,
            peripheral: &per,
            pop_ts: None,
            per_ts: None,
            subfeatures: &[],
        };
        let feature = AbstractFeature::new(0, Aggregation::Sum, DataUsed::Numerical)
            .with_input_col(0)
            .with_conditions(vec![Condition {
                data_used: DataUsed::Categorical,
                input_col: 0,
                output_col: 0,
                category_used: 0,
                bound_lower: 0.0,
                bound_upper: 0.0,
            }]);
        assert_eq!(apply_feature(&ctx, &feature, &matches(&[0, 1, 2])), 6.0);
    }
}
