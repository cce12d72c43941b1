//! The FastProp feature learner.
//!
//! FastProp propositionalises the relational structure: it enumerates
//! (aggregation x column x optional condition) feature templates against
//! every declared join, scores each template's feature column with the R²
//! criterion against the targets, and keeps the best `num_features`
//! templates. Transform replays the surviving templates against any
//! compatible frame pair.
//!
//! Templates are scored in enumeration order and ties break towards the
//! lower enumeration index, so fits are deterministic. Templates whose
//! feature column contains non-finite values are classified at enumeration
//! time and dropped from the ranking.

pub mod aggregator;
pub mod sql;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregations::Aggregation;
use crate::containers::column::Role;
use crate::containers::feature::{AbstractFeature, Condition, DataUsed, NO_CATEGORICAL_VALUE};
use crate::containers::frame::DataFrame;
use crate::containers::join_graph::JoinGraph;
use crate::containers::matches::Match;
use crate::containers::matrix::FeatureMatrix;
use crate::containers::schema::FrameSchema;
use crate::criterion::RSquaredCriterion;
use crate::error::{Error, Result};
use crate::matchmaker::{Matchmaker, ResolvedJoin};

use aggregator::{apply_feature, AggregationContext};

/// How many candidate columns are materialised per scoring pass.
const SCORING_BATCH: usize = 512;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FastPropHyperparams {
    /// The aggregations to enumerate.
    #[serde(default = "default_aggregations")]
    pub aggregation: Vec<Aggregation>,

    /// How many features survive the ranking.
    #[serde(default = "default_num_features")]
    pub num_features: usize,

    /// Maximum number of conditions attached to a single feature.
    #[serde(default)]
    pub max_conditions: usize,

    /// How many of the most frequent categories get pinned equality
    /// features and conditions.
    #[serde(default)]
    pub n_most_frequent: usize,

    /// Width of the lag windows enumerated as conditions; 0 disables them.
    #[serde(default)]
    pub delta_t: f64,

    /// Number of lag windows (`[k·delta_t, (k+1)·delta_t)`).
    #[serde(default = "default_max_lag")]
    pub max_lag: usize,

    /// Minimum number of samples a stored candidate must cover.
    #[serde(default = "default_min_num_samples")]
    pub min_num_samples: f64,

    /// Whether the matchmaker applies the time filter.
    #[serde(default = "default_true")]
    pub use_timestamps: bool,

    /// Share of population rows used for scoring; 1.0 scores on all rows.
    #[serde(default = "default_sampling_factor")]
    pub sampling_factor: f64,

    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Candidate-store capacity before the criterion argsort-prunes.
    #[serde(default = "default_storage_capacity")]
    pub storage_capacity: usize,
}

fn default_aggregations() -> Vec<Aggregation> {
    vec![
        Aggregation::Avg,
        Aggregation::Count,
        Aggregation::Max,
        Aggregation::Min,
        Aggregation::Sum,
    ]
}
fn default_num_features() -> usize {
    200
}
fn default_max_lag() -> usize {
    1
}
fn default_min_num_samples() -> f64 {
    1.0
}
fn default_true() -> bool {
    true
}
fn default_sampling_factor() -> f64 {
    1.0
}
fn default_seed() -> u64 {
    5873
}
fn default_storage_capacity() -> usize {
    500_000
}

impl Default for FastPropHyperparams {
    fn default() -> Self {
        FastPropHyperparams {
            aggregation: default_aggregations(),
            num_features: default_num_features(),
            max_conditions: 0,
            n_most_frequent: 0,
            delta_t: 0.0,
            max_lag: default_max_lag(),
            min_num_samples: default_min_num_samples(),
            use_timestamps: true,
            sampling_factor: default_sampling_factor(),
            seed: default_seed(),
            storage_capacity: default_storage_capacity(),
        }
    }
}

/// The fitted FastProp model: the surviving feature templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FastPropModel {
    pub hyper: FastPropHyperparams,
    #[serde(default)]
    features: Vec<AbstractFeature>,
    #[serde(default)]
    fitted: bool,
}

impl FastPropModel {
    pub fn new(hyper: FastPropHyperparams) -> Self {
        FastPropModel {
            hyper,
            features: Vec::new(),
            fitted: false,
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    /// Rewrites category codes after a shadow-encoding merge.
    pub fn rewrite_categories(&mut self, remap: &[i32]) {
        for feature in &mut self.features {
            feature.rewrite_categories(remap);
        }
    }

    pub fn features(&self) -> &[AbstractFeature] {
        &self.features
    }

    pub fn num_features(&self) -> usize {
        self.features.len()
    }

    /// Fits the learner and returns the feature matrix of the training
    /// frames.
    pub fn fit(
        &mut self,
        population: &DataFrame,
        peripherals: &[DataFrame],
        graph: &JoinGraph,
    ) -> Result<FeatureMatrix> {
        let joins = resolve_population_joins(population, peripherals, graph)?;

        let targets: Vec<Vec<f64>> = population
            .targets
            .iter()
            .map(|t| t.iter().collect())
            .collect();
        if targets.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "population frame '{}' declares no target",
                population.name
            )));
        }

        let nrows = population.nrows();
        let sample_weights = self.make_sample_weights(nrows);

        let mut criterion =
            RSquaredCriterion::new(self.hyper.min_num_samples, self.hyper.storage_capacity);
        criterion.init(&targets, &sample_weights)?;
        criterion.init_yhat(&vec![0.0; nrows])?;
        criterion.commit();

        let candidates = self.enumerate(population, peripherals, &joins);
        debug!(
            num_candidates = candidates.len(),
            frame = %population.name,
            "fastprop enumeration done"
        );

        // Score every candidate through the criterion: update with the
        // candidate column, snapshot, revert. Candidates are materialised
        // in bounded batches so memory stays proportional to the batch.
        let zeros = vec![0.0; nrows];
        let all_indices: Vec<usize> = (0..nrows).collect();
        let mut scored: Vec<AbstractFeature> = Vec::new();

        for batch in candidates.chunks(SCORING_BATCH) {
            let columns = compute_columns(population, peripherals, &joins, batch, self)?;
            for (feature, column) in batch.iter().zip(columns) {
                // NaN features are classified here and dropped from the
                // candidate ranking.
                if column.iter().any(|v| !v.is_finite()) {
                    continue;
                }
                let covered = column.iter().filter(|&&v| v != 0.0).count() as f64;
                criterion.update_samples(&all_indices, &column, &zeros);
                criterion.store(covered.max(self.hyper.min_num_samples), covered.max(self.hyper.min_num_samples));
                criterion.revert_to_commit();
                scored.push(feature.clone());

                if criterion.at_capacity() {
                    let survivors = criterion.prune(self.hyper.storage_capacity / 2);
                    scored = survivors.iter().map(|&i| scored[i].clone()).collect();
                }
            }
        }

        criterion.find_maximum();
        let ranked = criterion.argsort(0, criterion.num_stored());
        self.features = ranked
            .into_iter()
            .filter(|&i| criterion.values_stored()[i] > 0.0)
            .take(self.hyper.num_features)
            .map(|i| scored[i].clone())
            .collect();

        // A degenerate fit (constant targets) still has to produce
        // something for the predictor to consume.
        if self.features.is_empty() {
            self.features = scored.into_iter().take(self.hyper.num_features).collect();
        }

        self.fitted = true;
        debug!(num_features = self.features.len(), "fastprop fit done");
        self.transform(population, peripherals, graph)
    }

    /// Applies the fitted templates to a compatible frame pair.
    pub fn transform(
        &self,
        population: &DataFrame,
        peripherals: &[DataFrame],
        graph: &JoinGraph,
    ) -> Result<FeatureMatrix> {
        if !self.fitted {
            return Err(Error::NotFitted(
                "this FastProp learner has not been fit".to_string(),
            ));
        }
        let joins = resolve_population_joins(population, peripherals, graph)?;
        let columns = compute_columns(population, peripherals, &joins, &self.features, self)?;
        let colnames = (1..=self.features.len())
            .map(|i| format!("feature_{i}"))
            .collect();
        FeatureMatrix::new(colnames, columns)
    }

    fn make_sample_weights(&self, nrows: usize) -> Vec<f64> {
        if self.hyper.sampling_factor >= 1.0 {
            return vec![1.0; nrows];
        }
        let mut rng = StdRng::seed_from_u64(self.hyper.seed);
        (0..nrows)
            .map(|_| {
                if rng.gen::<f64>() < self.hyper.sampling_factor {
                    1.0
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// Enumerates every candidate template, in deterministic order.
    fn enumerate(
        &self,
        population: &DataFrame,
        peripherals: &[DataFrame],
        joins: &[ResolvedJoinCtx],
    ) -> Vec<AbstractFeature> {
        let mut out = Vec::new();
        for (per_ix, peripheral) in peripherals.iter().enumerate() {
            let has_ts = joins[per_ix].has_time_stamps;
            let conditions = self.enumerate_conditions(population, peripheral, has_ts);

            for &agg in &self.hyper.aggregation {
                if agg.needs_timestamps() && !has_ts {
                    continue;
                }
                let mut bases: Vec<AbstractFeature> = Vec::new();

                if agg.is_not_applicable() {
                    bases.push(AbstractFeature::new(per_ix, agg, DataUsed::NotApplicable));
                } else if agg.applies_to_codes() {
                    for input_col in 0..peripheral.categoricals.len() {
                        bases.push(
                            AbstractFeature::new(per_ix, agg, DataUsed::Categorical)
                                .with_input_col(input_col),
                        );
                    }
                } else {
                    for input_col in 0..peripheral.numericals.len() {
                        bases.push(
                            AbstractFeature::new(per_ix, agg, DataUsed::Numerical)
                                .with_input_col(input_col),
                        );
                    }
                    for input_col in 0..peripheral.discretes.len() {
                        bases.push(
                            AbstractFeature::new(per_ix, agg, DataUsed::Discrete)
                                .with_input_col(input_col),
                        );
                    }
                    for (input_col, col) in peripheral.categoricals.iter().enumerate() {
                        for category in most_frequent_codes(col, self.hyper.n_most_frequent) {
                            bases.push(
                                AbstractFeature::new(per_ix, agg, DataUsed::Categorical)
                                    .with_input_col(input_col)
                                    .with_category(category),
                            );
                        }
                    }
                    for (data_used, out_cols, in_cols) in [
                        (
                            DataUsed::SameUnitsNumerical,
                            &population.numericals,
                            &peripheral.numericals,
                        ),
                        (
                            DataUsed::SameUnitsDiscrete,
                            &population.discretes,
                            &peripheral.discretes,
                        ),
                    ] {
                        for (output_col, out) in out_cols.iter().enumerate() {
                            if out.unit.is_empty() {
                                continue;
                            }
                            for (input_col, inp) in in_cols.iter().enumerate() {
                                if inp.unit == out.unit {
                                    bases.push(
                                        AbstractFeature::new(per_ix, agg, data_used)
                                            .with_input_col(input_col)
                                            .with_output_col(output_col),
                                    );
                                }
                            }
                        }
                    }
                    for (output_col, out) in population.categoricals.iter().enumerate() {
                        if out.unit.is_empty() {
                            continue;
                        }
                        for (input_col, inp) in peripheral.categoricals.iter().enumerate() {
                            if inp.unit == out.unit {
                                bases.push(
                                    AbstractFeature::new(
                                        per_ix,
                                        agg,
                                        DataUsed::SameUnitsCategorical,
                                    )
                                    .with_input_col(input_col)
                                    .with_output_col(output_col),
                                );
                            }
                        }
                    }
                }

                for base in bases {
                    out.push(base.clone());
                    if self.hyper.max_conditions > 0 {
                        for condition in &conditions {
                            out.push(base.clone().with_conditions(vec![condition.clone()]));
                        }
                    }
                }
            }
        }
        out
    }

    /// The candidate conditions for one peripheral: categorical equality
    /// over the most frequent categories, same-units equality, lag windows.
    fn enumerate_conditions(
        &self,
        population: &DataFrame,
        peripheral: &DataFrame,
        has_ts: bool,
    ) -> Vec<Condition> {
        let mut out = Vec::new();
        if self.hyper.max_conditions == 0 {
            return out;
        }
        for (input_col, col) in peripheral.categoricals.iter().enumerate() {
            for category in most_frequent_codes(col, self.hyper.n_most_frequent) {
                out.push(Condition {
                    data_used: DataUsed::Categorical,
                    input_col,
                    output_col: 0,
                    category_used: category,
                    bound_lower: 0.0,
                    bound_upper: 0.0,
                });
            }
        }
        for (output_col, out_col) in population.categoricals.iter().enumerate() {
            if out_col.unit.is_empty() {
                continue;
            }
            for (input_col, in_col) in peripheral.categoricals.iter().enumerate() {
                if in_col.unit == out_col.unit {
                    out.push(Condition {
                        data_used: DataUsed::SameUnitsCategorical,
                        input_col,
                        output_col,
                        category_used: NO_CATEGORICAL_VALUE,
                        bound_lower: 0.0,
                        bound_upper: 0.0,
                    });
                }
            }
        }
        if has_ts && self.hyper.delta_t > 0.0 {
            for k in 0..self.hyper.max_lag {
                out.push(Condition {
                    data_used: DataUsed::Lag,
                    input_col: 0,
                    output_col: 0,
                    category_used: NO_CATEGORICAL_VALUE,
                    bound_lower: k as f64 * self.hyper.delta_t,
                    bound_upper: (k + 1) as f64 * self.hyper.delta_t,
                });
            }
        }
        out
    }

    /// The user columns a fitted feature draws on, as `(table, column)`
    /// pairs where table 0 is the population and table `i + 1` the i-th
    /// peripheral. Used for column-importance accounting.
    pub fn feature_columns(
        &self,
        feature_ix: usize,
        population: &FrameSchema,
        peripherals: &[FrameSchema],
    ) -> Vec<(usize, String)> {
        let feature = &self.features[feature_ix];
        let mut out = Vec::new();
        let per = &peripherals[feature.peripheral];
        let per_table = feature.peripheral + 1;

        let mut push_input = |data_used: DataUsed, input_col: usize, output_col: usize| {
            let role = match data_used {
                DataUsed::Categorical | DataUsed::SameUnitsCategorical => Role::Categorical,
                DataUsed::Discrete | DataUsed::SameUnitsDiscrete => Role::Discrete,
                DataUsed::Numerical | DataUsed::SameUnitsNumerical => Role::Numerical,
                _ => return,
            };
            if let Some(name) = per.names_with_role(role).get(input_col) {
                out.push((per_table, (*name).to_string()));
            }
            if matches!(
                data_used,
                DataUsed::SameUnitsCategorical
                    | DataUsed::SameUnitsDiscrete
                    | DataUsed::SameUnitsNumerical
            ) {
                if let Some(name) = population.names_with_role(role).get(output_col) {
                    out.push((0, (*name).to_string()));
                }
            }
        };

        push_input(feature.data_used, feature.input_col, feature.output_col);
        for condition in &feature.conditions {
            push_input(condition.data_used, condition.input_col, condition.output_col);
        }
        if out.is_empty() {
            // COUNT-style features draw on the join itself; attribute them
            // to the peripheral's first join key.
            if let Some(name) = per.names_with_role(Role::JoinKey).first() {
                out.push((per_table, (*name).to_string()));
            }
        }
        out
    }
}

/// A resolved join plus the context columns the aggregator needs.
pub(crate) struct ResolvedJoinCtx {
    pub join: ResolvedJoin,
    pub has_time_stamps: bool,
    pub pop_ts_name: Option<String>,
    pub per_ts_name: Option<String>,
}

pub(crate) fn resolve_population_joins(
    population: &DataFrame,
    peripherals: &[DataFrame],
    graph: &JoinGraph,
) -> Result<Vec<ResolvedJoinCtx>> {
    let edges: Vec<_> = graph.joins_of(0).collect();
    if edges.len() != peripherals.len() {
        return Err(Error::InvalidArgument(format!(
            "the data model declares {} joins but {} peripheral frames were passed",
            edges.len(),
            peripherals.len()
        )));
    }
    edges
        .iter()
        .zip(peripherals)
        .map(|(edge, peripheral)| {
            let join = ResolvedJoin::resolve(edge, population, peripheral)?;
            Ok(ResolvedJoinCtx {
                has_time_stamps: join.has_time_stamps(),
                pop_ts_name: edge.time_stamps.as_ref().map(|(p, _)| p.clone()),
                per_ts_name: edge.time_stamps.as_ref().map(|(_, p)| p.clone()),
                join,
            })
        })
        .collect()
}

/// Computes the feature columns for a batch of templates, parallelised over
/// population-row chunks. Matches are produced per row and freed right
/// after aggregation.
fn compute_columns(
    population: &DataFrame,
    peripherals: &[DataFrame],
    joins: &[ResolvedJoinCtx],
    features: &[AbstractFeature],
    model: &FastPropModel,
) -> Result<Vec<Vec<f64>>> {
    let nrows = population.nrows();
    let matchmaker = Matchmaker {
        use_timestamps: model.hyper.use_timestamps,
        null_ts_matches_all: false,
    };

    let contexts: Vec<AggregationContext<'_>> = joins
        .iter()
        .zip(peripherals)
        .map(|(ctx, peripheral)| AggregationContext {
            population,
            peripheral,
            pop_ts: ctx
                .pop_ts_name
                .as_deref()
                .and_then(|n| population.float_column(n)),
            per_ts: ctx
                .per_ts_name
                .as_deref()
                .and_then(|n| peripheral.float_column(n)),
            subfeatures: &[],
        })
        .collect();

    // Row-major evaluation so each row's matches are computed once per
    // peripheral, then transposed into feature columns.
    let rows: Vec<Vec<f64>> = (0..nrows)
        .into_par_iter()
        .map(|row| {
            let mut scratch: Vec<Match> = Vec::new();
            let mut per_matches: Vec<(usize, usize)> = Vec::with_capacity(joins.len());
            for ctx in joins {
                let begin = scratch.len();
                matchmaker.matches_for_row(&ctx.join, row, &mut scratch);
                per_matches.push((begin, scratch.len()));
            }
            features
                .iter()
                .map(|feature| {
                    let (begin, end) = per_matches[feature.peripheral];
                    apply_feature(
                        &contexts[feature.peripheral],
                        feature,
                        &scratch[begin..end],
                    )
                })
                .collect()
        })
        .collect();

    let mut columns = vec![vec![0.0; nrows]; features.len()];
    for (row_ix, row) in rows.into_iter().enumerate() {
        for (col_ix, value) in row.into_iter().enumerate() {
            columns[col_ix][row_ix] = value;
        }
    }
    Ok(columns)
}

/// The `n` most frequent non-null codes of a column, most frequent first,
/// ties towards the lower code.
fn most_frequent_codes(col: &crate::containers::column::IntColumn, n: usize) -> Vec<i32> {
    if n == 0 {
        return Vec::new();
    }
    let mut freq: std::collections::BTreeMap<i32, usize> = std::collections::BTreeMap::new();
    for code in col.iter() {
        if code >= 0 {
            *freq.entry(code).or_insert(0) += 1;
        }
    }
    let mut entries: Vec<(i32, usize)> = freq.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    entries.into_iter().take(n).map(|(code, _)| code).collect()
}
