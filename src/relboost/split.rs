//! Candidate splits for the boosted relational trees.
//!
//! A split routes matches left or right. The candidate space at a node
//! covers numerical and discrete thresholds on the input and the output
//! side, greedy categorical subsets, is-null branches, same-unit
//! differences, the time difference across the join, and subfeature
//! columns. Threshold sweeps move one match at a time across the boundary,
//! so the sufficient statistics update in O(1) per step.

use serde::{Deserialize, Serialize};

use crate::containers::column::FloatColumn;
use crate::containers::frame::DataFrame;
use crate::containers::matches::Match;
use crate::criterion::GradientStats;

/// The column (or column pair) a split tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "cols")]
pub enum SplitColumn {
    InputNumerical(usize),
    InputDiscrete(usize),
    InputCategorical(usize),
    OutputNumerical(usize),
    OutputDiscrete(usize),
    OutputCategorical(usize),
    /// `output - input` over a same-unit numerical pair.
    SameUnitsNumerical { input: usize, output: usize },
    /// `output - input` over a same-unit discrete pair.
    SameUnitsDiscrete { input: usize, output: usize },
    /// `population.ts - peripheral.ts`.
    TimeDiff,
    /// A subfeature column produced by a nested learner.
    Subfeature(usize),
}

/// A fitted split descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub column: SplitColumn,
    /// Threshold for numeric splits; matches with `value <= critical_value`
    /// go left, nulls go right.
    #[serde(default)]
    pub critical_value: f64,
    /// Left-partition category codes for categorical splits.
    #[serde(default)]
    pub categories_used: Vec<i32>,
    /// When set, the split tests nullness instead of a threshold: null
    /// matches go left.
    #[serde(default)]
    pub is_nan_branch: bool,
}

/// Everything split evaluation may touch for one (population, peripheral)
/// pair.
pub struct SplitContext<'a> {
    pub population: &'a DataFrame,
    pub peripheral: &'a DataFrame,
    pub pop_ts: Option<&'a FloatColumn>,
    pub per_ts: Option<&'a FloatColumn>,
    /// Subfeature columns over peripheral rows.
    pub subfeatures: &'a [Vec<f64>],
}

impl<'a> SplitContext<'a> {
    /// The numeric value a match exposes for a column choice; NaN = null.
    #[inline]
    pub fn numeric_value(&self, column: &SplitColumn, m: &Match) -> f64 {
        match column {
            SplitColumn::InputNumerical(j) => self.peripheral.numericals[*j].get(m.ix_input),
            SplitColumn::InputDiscrete(j) => self.peripheral.discretes[*j].get(m.ix_input),
            SplitColumn::OutputNumerical(j) => self.population.numericals[*j].get(m.ix_output),
            SplitColumn::OutputDiscrete(j) => self.population.discretes[*j].get(m.ix_output),
            SplitColumn::SameUnitsNumerical { input, output } => {
                self.population.numericals[*output].get(m.ix_output)
                    - self.peripheral.numericals[*input].get(m.ix_input)
            }
            SplitColumn::SameUnitsDiscrete { input, output } => {
                self.population.discretes[*output].get(m.ix_output)
                    - self.peripheral.discretes[*input].get(m.ix_input)
            }
            SplitColumn::TimeDiff => match (self.pop_ts, self.per_ts) {
                (Some(pop), Some(per)) => pop.get(m.ix_output) - per.get(m.ix_input),
                _ => f64::NAN,
            },
            SplitColumn::Subfeature(j) => self.subfeatures[*j][m.ix_input],
            SplitColumn::InputCategorical(_) | SplitColumn::OutputCategorical(_) => {
                debug_assert!(false, "categorical columns have no numeric value");
                f64::NAN
            }
        }
    }

    /// The category code a match exposes for a categorical column choice.
    #[inline]
    pub fn code_value(&self, column: &SplitColumn, m: &Match) -> i32 {
        match column {
            SplitColumn::InputCategorical(j) => self.peripheral.categoricals[*j].get(m.ix_input),
            SplitColumn::OutputCategorical(j) => self.population.categoricals[*j].get(m.ix_output),
            _ => {
                debug_assert!(false, "not a categorical column");
                -1
            }
        }
    }

    /// Whether a match goes left under a split.
    pub fn goes_left(&self, split: &Split, m: &Match) -> bool {
        match &split.column {
            SplitColumn::InputCategorical(_) | SplitColumn::OutputCategorical(_) => {
                let code = self.code_value(&split.column, m);
                if split.is_nan_branch {
                    code < 0
                } else {
                    split.categories_used.contains(&code)
                }
            }
            column => {
                let value = self.numeric_value(column, m);
                if split.is_nan_branch {
                    value.is_nan()
                } else {
                    value <= split.critical_value
                }
            }
        }
    }
}

/// The best split found at a node.
#[derive(Debug, Clone)]
pub struct BestSplit {
    pub split: Split,
    pub gain: f64,
    pub left: GradientStats,
    pub right: GradientStats,
}

/// Per-match gradient contributions: `g·s` and `h·s²`.
#[inline]
pub fn match_gradients(m: &Match, g: &[f64], h: &[f64]) -> (f64, f64) {
    (
        g[m.ix_output] * m.score,
        h[m.ix_output] * m.score * m.score,
    )
}

/// Maximum number of distinct thresholds tried per column.
const MAX_THRESHOLDS: usize = 200;

/// The candidate columns at a node, in deterministic enumeration order.
pub fn candidate_columns(ctx: &SplitContext<'_>) -> Vec<SplitColumn> {
    let mut out = Vec::new();
    for j in 0..ctx.peripheral.numericals.len() {
        out.push(SplitColumn::InputNumerical(j));
    }
    for j in 0..ctx.peripheral.discretes.len() {
        out.push(SplitColumn::InputDiscrete(j));
    }
    for j in 0..ctx.peripheral.categoricals.len() {
        out.push(SplitColumn::InputCategorical(j));
    }
    for j in 0..ctx.population.numericals.len() {
        out.push(SplitColumn::OutputNumerical(j));
    }
    for j in 0..ctx.population.discretes.len() {
        out.push(SplitColumn::OutputDiscrete(j));
    }
    for j in 0..ctx.population.categoricals.len() {
        out.push(SplitColumn::OutputCategorical(j));
    }
    for (output, out_col) in ctx.population.numericals.iter().enumerate() {
        if out_col.unit.is_empty() {
            continue;
        }
        for (input, in_col) in ctx.peripheral.numericals.iter().enumerate() {
            if in_col.unit == out_col.unit {
                out.push(SplitColumn::SameUnitsNumerical { input, output });
            }
        }
    }
    for (output, out_col) in ctx.population.discretes.iter().enumerate() {
        if out_col.unit.is_empty() {
            continue;
        }
        for (input, in_col) in ctx.peripheral.discretes.iter().enumerate() {
            if in_col.unit == out_col.unit {
                out.push(SplitColumn::SameUnitsDiscrete { input, output });
            }
        }
    }
    if ctx.pop_ts.is_some() && ctx.per_ts.is_some() {
        out.push(SplitColumn::TimeDiff);
    }
    for j in 0..ctx.subfeatures.len() {
        out.push(SplitColumn::Subfeature(j));
    }
    out
}

/// Searches every candidate split over `matches` and returns the best one,
/// or `None` when no candidate clears `gamma` while leaving
/// `min_num_samples` matches on both sides. Ties keep the earlier
/// candidate, so the search is deterministic.
pub fn find_best_split(
    ctx: &SplitContext<'_>,
    matches: &[Match],
    g: &[f64],
    h: &[f64],
    lambda: f64,
    gamma: f64,
    min_num_samples: usize,
) -> Option<BestSplit> {
    let mut total = GradientStats::default();
    for m in matches {
        let (gm, hm) = match_gradients(m, g, h);
        total.add(gm, hm);
    }
    let parent_score = total.score(lambda);

    let mut best: Option<BestSplit> = None;
    let mut consider = |split: Split, left: GradientStats, right: GradientStats| {
        if left.count < min_num_samples || right.count < min_num_samples {
            return;
        }
        let gain = left.score(lambda) + right.score(lambda) - parent_score;
        if !gain.is_finite() || gain <= gamma {
            return;
        }
        if best.as_ref().is_none_or(|b| gain > b.gain) {
            best = Some(BestSplit {
                split,
                gain,
                left,
                right,
            });
        }
    };

    for column in candidate_columns(ctx) {
        match column {
            SplitColumn::InputCategorical(_) | SplitColumn::OutputCategorical(_) => {
                search_categorical(ctx, &column, matches, g, h, lambda, &mut consider);
            }
            _ => {
                search_threshold(ctx, &column, matches, g, h, &total, &mut consider);
            }
        }
    }

    best
}

/// Threshold sweep over a numeric column, plus the is-null branch.
fn search_threshold<F: FnMut(Split, GradientStats, GradientStats)>(
    ctx: &SplitContext<'_>,
    column: &SplitColumn,
    matches: &[Match],
    g: &[f64],
    h: &[f64],
    total: &GradientStats,
    consider: &mut F,
) {
    let mut valued: Vec<(f64, f64, f64)> = Vec::with_capacity(matches.len());
    let mut nulls = GradientStats::default();
    for m in matches {
        let value = ctx.numeric_value(column, m);
        let (gm, hm) = match_gradients(m, g, h);
        if value.is_nan() {
            nulls.add(gm, hm);
        } else {
            valued.push((value, gm, hm));
        }
    }

    // Is-null branch: nulls left, everything valued right.
    if nulls.count > 0 && nulls.count < matches.len() {
        let mut right = *total;
        right.sum_g -= nulls.sum_g;
        right.sum_h -= nulls.sum_h;
        right.count -= nulls.count;
        consider(
            Split {
                column: column.clone(),
                critical_value: f64::NAN,
                categories_used: Vec::new(),
                is_nan_branch: true,
            },
            nulls,
            right,
        );
    }

    if valued.len() < 2 {
        return;
    }
    valued.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    // Nulls always fall to the right branch of a threshold split.
    let mut left = GradientStats::default();
    let mut right = GradientStats::default();
    for &(_, gm, hm) in &valued {
        right.add(gm, hm);
    }
    right.merge(&nulls);

    let stride = (valued.len() / MAX_THRESHOLDS).max(1);
    let mut since_last = 0usize;
    for i in 0..valued.len() - 1 {
        let (value, gm, hm) = valued[i];
        left.add(gm, hm);
        right.remove(gm, hm);
        since_last += 1;
        // A threshold only exists between distinct values.
        if value == valued[i + 1].0 || since_last < stride {
            continue;
        }
        since_last = 0;
        consider(
            Split {
                column: column.clone(),
                critical_value: value,
                categories_used: Vec::new(),
                is_nan_branch: false,
            },
            left,
            right,
        );
    }
}

/// Greedy categorical partition: categories ranked by their Newton weight,
/// every prefix of the ranking tried as the left partition.
fn search_categorical<F: FnMut(Split, GradientStats, GradientStats)>(
    ctx: &SplitContext<'_>,
    column: &SplitColumn,
    matches: &[Match],
    g: &[f64],
    h: &[f64],
    lambda: f64,
    consider: &mut F,
) {
    let mut per_code: std::collections::BTreeMap<i32, GradientStats> =
        std::collections::BTreeMap::new();
    let mut nulls = GradientStats::default();
    let mut total = GradientStats::default();
    for m in matches {
        let code = ctx.code_value(column, m);
        let (gm, hm) = match_gradients(m, g, h);
        total.add(gm, hm);
        if code < 0 {
            nulls.add(gm, hm);
        } else {
            per_code.entry(code).or_default().add(gm, hm);
        }
    }

    if nulls.count > 0 && nulls.count < matches.len() {
        let mut right = total;
        right.sum_g -= nulls.sum_g;
        right.sum_h -= nulls.sum_h;
        right.count -= nulls.count;
        consider(
            Split {
                column: column.clone(),
                critical_value: f64::NAN,
                categories_used: Vec::new(),
                is_nan_branch: true,
            },
            nulls,
            right,
        );
    }

    if per_code.len() < 2 {
        return;
    }

    let mut ranked: Vec<(i32, GradientStats)> = per_code.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.newton_weight(lambda)
            .partial_cmp(&a.1.newton_weight(lambda))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut left = GradientStats::default();
    let mut right = total;
    let mut categories: Vec<i32> = Vec::new();
    for (code, stats) in ranked.iter().take(ranked.len() - 1) {
        left.merge(stats);
        right.sum_g -= stats.sum_g;
        right.sum_h -= stats.sum_h;
        right.count -= stats.count;
        categories.push(*code);
        consider(
            Split {
                column: column.clone(),
                critical_value: f64::NAN,
                categories_used: categories.clone(),
                is_nan_branch: false,
            },
            left,
            right,
        );
    }
}
