//! The Relboost feature learner.
//!
//! A gradient-boosted ensemble of relational trees. Per boosting round and
//! per joined table the learner grows one candidate tree under each of the
//! two first-level aggregations (AVG, SUM), folds the best candidate into
//! the predictions at a Newton-line-searched rate scaled by the shrinkage,
//! and moves on. Each committed tree becomes one feature column at
//! transform time.
//!
//! Tables that are themselves joined to deeper tables get sub-ensembles:
//! the outer gradients are projected through an intermediate AVG or SUM
//! aggregation onto the child scope, trees are fit there against the
//! projected quadratic model, and their predictions surface as subfeature
//! columns of the parent scope. Recursion terminates at tables without
//! further joins, so the depth is bounded by the declared schema.

pub mod split;
pub mod sql;
pub mod tree;

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::containers::frame::DataFrame;
use crate::containers::join_graph::{GraphEdge, JoinGraph};
use crate::containers::matches::Match;
use crate::containers::matrix::FeatureMatrix;
use crate::criterion::{Loss, LossKind};
use crate::error::{Error, Result};
use crate::matchmaker::{Matchmaker, ResolvedJoin};

use split::SplitContext;
use tree::{Tree, TreeAgg, TreeParams};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelboostHyperparams {
    #[serde(default)]
    pub loss_function: LossKind,

    /// Boosting rounds; each round commits one tree = one feature.
    #[serde(default = "default_num_features")]
    pub num_features: usize,

    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Minimum number of matches on each side of a split.
    #[serde(default = "default_min_num_samples")]
    pub min_num_samples: usize,

    /// Shrinkage applied on top of the Newton line search.
    #[serde(default = "default_shrinkage")]
    pub shrinkage: f64,

    /// L2 regulariser on the leaf weights.
    #[serde(default)]
    pub reg_lambda: f64,

    /// Minimum gain a split must clear.
    #[serde(default)]
    pub gamma: f64,

    #[serde(default = "default_true")]
    pub use_timestamps: bool,

    /// Trees per sub-ensemble; each becomes one subfeature column.
    #[serde(default = "default_num_subfeatures")]
    pub num_subfeatures: usize,

    /// Share of population rows carrying non-zero sample weight.
    #[serde(default = "default_sampling_factor")]
    pub sampling_factor: f64,

    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_num_features() -> usize {
    30
}
fn default_max_depth() -> usize {
    3
}
fn default_min_num_samples() -> usize {
    30
}
fn default_shrinkage() -> f64 {
    0.1
}
fn default_true() -> bool {
    true
}
fn default_num_subfeatures() -> usize {
    5
}
fn default_sampling_factor() -> f64 {
    1.0
}
fn default_seed() -> u64 {
    5873
}

impl Default for RelboostHyperparams {
    fn default() -> Self {
        RelboostHyperparams {
            loss_function: LossKind::default(),
            num_features: default_num_features(),
            max_depth: default_max_depth(),
            min_num_samples: default_min_num_samples(),
            shrinkage: default_shrinkage(),
            reg_lambda: 0.0,
            gamma: 0.0,
            use_timestamps: true,
            num_subfeatures: default_num_subfeatures(),
            sampling_factor: default_sampling_factor(),
            seed: default_seed(),
        }
    }
}

/// A sub-ensemble projecting the outer loss onto a nested scope. Its trees
/// produce the subfeature columns of the scope's rows; `children` hold the
/// sub-ensembles one join deeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubEnsemble {
    /// The join-graph node whose rows the subfeature columns live on.
    pub node: usize,
    /// The intermediate aggregation that projected the gradients here.
    pub agg: TreeAgg,
    trees: Vec<Tree>,
    children: Vec<SubEnsemble>,
}

/// The fitted Relboost model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelboostModel {
    pub hyper: RelboostHyperparams,
    #[serde(default)]
    initial_prediction: f64,
    #[serde(default)]
    trees: Vec<Tree>,
    #[serde(default)]
    subensembles: Vec<SubEnsemble>,
    #[serde(default)]
    fitted: bool,
}

impl RelboostModel {
    pub fn new(hyper: RelboostHyperparams) -> Self {
        RelboostModel {
            hyper,
            initial_prediction: 0.0,
            trees: Vec::new(),
            subensembles: Vec::new(),
            fitted: false,
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    pub fn num_features(&self) -> usize {
        self.trees.len()
    }

    pub fn initial_prediction(&self) -> f64 {
        self.initial_prediction
    }

    /// Rewrites category codes after a shadow-encoding merge.
    pub fn rewrite_categories(&mut self, remap: &[i32]) {
        fn walk(sub: &mut SubEnsemble, remap: &[i32]) {
            for tree in &mut sub.trees {
                tree.rewrite_categories(remap);
            }
            for child in &mut sub.children {
                walk(child, remap);
            }
        }
        for tree in &mut self.trees {
            tree.rewrite_categories(remap);
        }
        for sub in &mut self.subensembles {
            walk(sub, remap);
        }
    }

    fn matchmaker(&self) -> Matchmaker {
        Matchmaker {
            use_timestamps: self.hyper.use_timestamps,
            null_ts_matches_all: false,
        }
    }

    fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: self.hyper.max_depth,
            min_num_samples: self.hyper.min_num_samples,
            reg_lambda: self.hyper.reg_lambda,
            gamma: self.hyper.gamma,
        }
    }

    /// Fits the ensemble. `frames` is indexed by join-graph node id; frame
    /// 0 is the population.
    pub fn fit(&mut self, frames: &[DataFrame], graph: &JoinGraph) -> Result<FeatureMatrix> {
        check_frames(frames, graph)?;
        let population = &frames[0];

        if population.targets.len() != 1 {
            return Err(Error::InvalidArgument(format!(
                "the population frame '{}' needs to define exactly one target, found {}",
                population.name,
                population.targets.len()
            )));
        }
        let targets: Vec<f64> = population.targets[0].iter().collect();
        let sample_weights = self.make_sample_weights(targets.len());

        let mut loss = Loss::new(self.hyper.loss_function, targets, sample_weights)?;
        self.initial_prediction = loss.initial_prediction();
        loss.init_yhat(self.initial_prediction);
        loss.commit();
        loss.calc_gradients();

        // Sub-ensembles first: their subfeature columns must exist before
        // the main trees can split on them.
        self.subensembles.clear();
        let mut subfeatures: HashMap<usize, Vec<Vec<f64>>> = HashMap::new();
        for edge in graph.joins_of(0) {
            if graph.nodes[edge.child].joins.is_empty() {
                continue;
            }
            for agg in [TreeAgg::Avg, TreeAgg::Sum] {
                let (matches, _) = self.node_matches(frames, edge, agg)?;
                let (g_child, h_child) = project_gradients(
                    loss.g(),
                    loss.h(),
                    &matches,
                    frames[edge.child].nrows(),
                );
                let (sub, columns) =
                    self.fit_sub_ensemble(edge.child, agg, g_child, h_child, frames, graph)?;
                subfeatures.entry(edge.child).or_default().extend(columns);
                self.subensembles.push(sub);
            }
        }

        // The actual boosting loop.
        let all_indices: Vec<usize> = (0..population.nrows()).collect();
        self.trees.clear();
        for round in 0..self.hyper.num_features {
            loss.calc_gradients();

            let mut best: Option<(Tree, Vec<f64>, f64)> = None;
            for edge in graph.joins_of(0) {
                for agg in [TreeAgg::Avg, TreeAgg::Sum] {
                    let (matches, ranges) = self.node_matches(frames, edge, agg)?;
                    let ctx = split_context(frames, edge, &subfeatures)?;
                    let mut tree = Tree::fit(
                        edge.child,
                        agg,
                        &ctx,
                        &matches,
                        loss.g(),
                        loss.h(),
                        &self.tree_params(),
                    );
                    let predictions = tree.predict(&ctx, &matches, &ranges);
                    let rate = loss.calc_update_rate(&predictions, self.hyper.reg_lambda)
                        * self.hyper.shrinkage;
                    tree.update_rate = rate;

                    let delta: Vec<f64> = predictions.iter().map(|p| p * rate).collect();
                    loss.update_samples(&all_indices, &delta);
                    let candidate_loss = loss.loss();
                    loss.revert_all();

                    let better = best
                        .as_ref()
                        .is_none_or(|(_, _, l)| candidate_loss < *l);
                    if better {
                        best = Some((tree, delta, candidate_loss));
                    }
                }
            }

            let Some((tree, delta, candidate_loss)) = best else {
                break;
            };
            loss.update_samples(&all_indices, &delta);
            loss.commit();
            debug!(round, loss = candidate_loss, "relboost round committed");
            self.trees.push(tree);
        }

        self.fitted = true;
        self.transform(frames, graph)
    }

    /// Projects the outer loss one join deeper and fits a sub-ensemble on
    /// the child scope against the quadratic model `g0 + h·yhat_local`.
    fn fit_sub_ensemble(
        &self,
        node: usize,
        agg: TreeAgg,
        g0: Vec<f64>,
        h: Vec<f64>,
        frames: &[DataFrame],
        graph: &JoinGraph,
    ) -> Result<(SubEnsemble, Vec<Vec<f64>>)> {
        // Deeper scopes first.
        let mut children = Vec::new();
        let mut child_subfeatures: HashMap<usize, Vec<Vec<f64>>> = HashMap::new();
        for edge in graph.joins_of(node) {
            if graph.nodes[edge.child].joins.is_empty() {
                continue;
            }
            for agg2 in [TreeAgg::Avg, TreeAgg::Sum] {
                let (matches, _) = self.node_matches(frames, edge, agg2)?;
                let (g_child, h_child) =
                    project_gradients(&g0, &h, &matches, frames[edge.child].nrows());
                let (sub, columns) =
                    self.fit_sub_ensemble(edge.child, agg2, g_child, h_child, frames, graph)?;
                child_subfeatures
                    .entry(edge.child)
                    .or_default()
                    .extend(columns);
                children.push(sub);
            }
        }

        let nrows = frames[node].nrows();
        let mut yhat_local = vec![0.0; nrows];
        let mut trees = Vec::new();
        let mut columns = Vec::new();

        for _ in 0..self.hyper.num_subfeatures {
            // The projected quadratic model of the outer loss.
            let g_current: Vec<f64> = g0
                .iter()
                .zip(&h)
                .zip(&yhat_local)
                .map(|((g, h), y)| g + h * y)
                .collect();

            let mut best: Option<(Tree, Vec<f64>, f64)> = None;
            for edge in graph.joins_of(node) {
                for agg2 in [TreeAgg::Avg, TreeAgg::Sum] {
                    let (matches, ranges) = self.node_matches(frames, edge, agg2)?;
                    let ctx = split_context(frames, edge, &child_subfeatures)?;
                    let mut tree = Tree::fit(
                        edge.child,
                        agg2,
                        &ctx,
                        &matches,
                        &g_current,
                        &h,
                        &self.tree_params(),
                    );
                    let predictions = tree.predict(&ctx, &matches, &ranges);
                    let rate = newton_rate(&g_current, &h, &predictions, self.hyper.reg_lambda)
                        * self.hyper.shrinkage;
                    tree.update_rate = rate;

                    // Quadratic reduction bought by this candidate.
                    let reduction: f64 = predictions
                        .iter()
                        .zip(&g_current)
                        .zip(&h)
                        .map(|((p, g), h)| {
                            let step = p * rate;
                            g * step + 0.5 * h * step * step
                        })
                        .sum();
                    let better = best.as_ref().is_none_or(|(_, _, r)| reduction < *r);
                    if better {
                        best = Some((tree, predictions, reduction));
                    }
                }
            }

            let Some((tree, predictions, _)) = best else {
                break;
            };
            let column: Vec<f64> = predictions.iter().map(|p| p * tree.update_rate).collect();
            for (y, c) in yhat_local.iter_mut().zip(&column) {
                *y += c;
            }
            trees.push(tree);
            columns.push(column);
        }

        Ok((
            SubEnsemble {
                node,
                agg,
                trees,
                children,
            },
            columns,
        ))
    }

    /// Applies the fitted ensemble, producing one feature column per tree.
    pub fn transform(&self, frames: &[DataFrame], graph: &JoinGraph) -> Result<FeatureMatrix> {
        if !self.fitted {
            return Err(Error::NotFitted(
                "this Relboost learner has not been fit".to_string(),
            ));
        }
        check_frames(frames, graph)?;

        let mut subfeatures: HashMap<usize, Vec<Vec<f64>>> = HashMap::new();
        for sub in &self.subensembles {
            let columns = self.transform_sub(sub, frames, graph)?;
            subfeatures.entry(sub.node).or_default().extend(columns);
        }

        // Trees are independent at transform time.
        let out: Result<Vec<Vec<f64>>> = self
            .trees
            .par_iter()
            .map(|tree| {
                let edge = edge_to(graph, 0, tree.peripheral_node)?;
                let (matches, ranges) = self.node_matches(frames, edge, tree.agg)?;
                let ctx = split_context(frames, edge, &subfeatures)?;
                let predictions = tree.predict(&ctx, &matches, &ranges);
                Ok(predictions.iter().map(|p| p * tree.update_rate).collect())
            })
            .collect();
        let out = out?;

        let colnames = (1..=out.len()).map(|i| format!("feature_{i}")).collect();
        FeatureMatrix::new(colnames, out)
    }

    /// Recomputes a sub-ensemble's subfeature columns at transform time.
    fn transform_sub(
        &self,
        sub: &SubEnsemble,
        frames: &[DataFrame],
        graph: &JoinGraph,
    ) -> Result<Vec<Vec<f64>>> {
        let mut child_subfeatures: HashMap<usize, Vec<Vec<f64>>> = HashMap::new();
        for child in &sub.children {
            let columns = self.transform_sub(child, frames, graph)?;
            child_subfeatures
                .entry(child.node)
                .or_default()
                .extend(columns);
        }

        let mut out = Vec::with_capacity(sub.trees.len());
        for tree in &sub.trees {
            let edge = edge_to(graph, sub.node, tree.peripheral_node)?;
            let (matches, ranges) = self.node_matches(frames, edge, tree.agg)?;
            let ctx = split_context(frames, edge, &child_subfeatures)?;
            let predictions = tree.predict(&ctx, &matches, &ranges);
            out.push(
                predictions
                    .iter()
                    .map(|p| p * tree.update_rate)
                    .collect::<Vec<f64>>(),
            );
        }
        Ok(out)
    }

    /// Predictions for the given frames: the initial prediction plus every
    /// feature column, mapped out of link space.
    pub fn predict(&self, frames: &[DataFrame], graph: &JoinGraph) -> Result<Vec<f64>> {
        let features = self.transform(frames, graph)?;
        let nrows = frames[0].nrows();
        let mut yhat = vec![self.initial_prediction; nrows];
        for column in &features.columns {
            for (y, v) in yhat.iter_mut().zip(column) {
                *y += v;
            }
        }
        if self.hyper.loss_function == LossKind::CrossEntropy {
            for y in &mut yhat {
                *y = crate::criterion::cross_entropy::logistic(*y);
            }
        }
        Ok(yhat)
    }

    /// The split columns feature `feature_ix` draws on, with their gains,
    /// as `(graph_node, column_name, gain)`.
    pub fn feature_columns(
        &self,
        feature_ix: usize,
        frames: &[crate::containers::schema::FrameSchema],
    ) -> Vec<(usize, String, f64)> {
        use crate::containers::column::Role;
        use split::SplitColumn;

        let tree = &self.trees[feature_ix];
        let node = tree.peripheral_node;
        let mut out = Vec::new();
        for (column, gain) in tree.column_gains() {
            let located = match column {
                SplitColumn::InputNumerical(j) => name_at(frames, node, Role::Numerical, j),
                SplitColumn::InputDiscrete(j) => name_at(frames, node, Role::Discrete, j),
                SplitColumn::InputCategorical(j) => name_at(frames, node, Role::Categorical, j),
                SplitColumn::OutputNumerical(j) => name_at(frames, 0, Role::Numerical, j),
                SplitColumn::OutputDiscrete(j) => name_at(frames, 0, Role::Discrete, j),
                SplitColumn::OutputCategorical(j) => name_at(frames, 0, Role::Categorical, j),
                SplitColumn::SameUnitsNumerical { input, output } => {
                    if let Some(pair) = name_at(frames, node, Role::Numerical, input) {
                        out.push((pair.0, pair.1, gain / 2.0));
                    }
                    name_at(frames, 0, Role::Numerical, output)
                }
                SplitColumn::SameUnitsDiscrete { input, output } => {
                    if let Some(pair) = name_at(frames, node, Role::Discrete, input) {
                        out.push((pair.0, pair.1, gain / 2.0));
                    }
                    name_at(frames, 0, Role::Discrete, output)
                }
                SplitColumn::TimeDiff => name_at(frames, node, Role::TimeStamp, 0),
                // Subfeature splits draw on the nested table; the gain is
                // attributed to its join lineage.
                SplitColumn::Subfeature(_) => name_at(frames, node, Role::JoinKey, 0),
            };
            if let Some((table, name)) = located {
                out.push((table, name, gain));
            }
        }
        if out.is_empty() {
            // A single-leaf tree still draws on the join itself.
            if let Some((table, name)) = name_at(frames, node, Role::JoinKey, 0) {
                out.push((table, name, 1.0));
            }
        }
        out
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

    /// Matches for an edge, with the aggregation's scores assigned.
    fn node_matches(
        &self,
        frames: &[DataFrame],
        edge: &GraphEdge,
        agg: TreeAgg,
    ) -> Result<(Vec<Match>, Vec<(usize, usize)>)> {
        let join = ResolvedJoin::resolve(edge, &frames[edge.parent], &frames[edge.child])?;
        let (mut matches, ranges) = self.matchmaker().make_matches(&frames[edge.parent], &join);
        agg.assign_scores(&mut matches, &ranges);
        Ok((matches, ranges))
    }
}

fn check_frames(frames: &[DataFrame], graph: &JoinGraph) -> Result<()> {
    if frames.len() != graph.nodes.len() {
        return Err(Error::InvalidArgument(format!(
            "the data model declares {} tables but {} frames were passed",
            graph.nodes.len(),
            frames.len()
        )));
    }
    Ok(())
}

fn edge_to<'a>(graph: &'a JoinGraph, parent: usize, child: usize) -> Result<&'a GraphEdge> {
    graph
        .joins_of(parent)
        .find(|e| e.child == child)
        .ok_or_else(|| {
            Error::Internal(format!(
                "no declared join between graph nodes {parent} and {child}"
            ))
        })
}

fn split_context<'a>(
    frames: &'a [DataFrame],
    edge: &GraphEdge,
    subfeatures: &'a HashMap<usize, Vec<Vec<f64>>>,
) -> Result<SplitContext<'a>> {
    let population = &frames[edge.parent];
    let peripheral = &frames[edge.child];
    let (pop_ts, per_ts) = match &edge.time_stamps {
        Some((pop_name, per_name)) => (
            Some(population.time_stamp(pop_name)?),
            Some(peripheral.time_stamp(per_name)?),
        ),
        None => (None, None),
    };
    Ok(SplitContext {
        population,
        peripheral,
        pop_ts,
        per_ts,
        subfeatures: subfeatures.get(&edge.child).map_or(&[], Vec::as_slice),
    })
}

/// Projects per-row gradients through the matches onto the child scope:
/// `g_child[r] = Σ g[i]·s`, `h_child[r] = Σ h[i]·s²`.
fn project_gradients(
    g: &[f64],
    h: &[f64],
    matches: &[Match],
    child_rows: usize,
) -> (Vec<f64>, Vec<f64>) {
    let mut g_child = vec![0.0; child_rows];
    let mut h_child = vec![0.0; child_rows];
    for m in matches {
        g_child[m.ix_input] += g[m.ix_output] * m.score;
        h_child[m.ix_input] += h[m.ix_output] * m.score * m.score;
    }
    (g_child, h_child)
}

/// Newton line search against explicit gradient vectors.
fn newton_rate(g: &[f64], h: &[f64], predictions: &[f64], lambda: f64) -> f64 {
    let mut num = 0.0;
    let mut den = lambda;
    for i in 0..predictions.len() {
        num += g[i] * predictions[i];
        den += h[i] * predictions[i] * predictions[i];
    }
    let rate = -num / den;
    if rate.is_finite() {
        rate.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn name_at(
    frames: &[crate::containers::schema::FrameSchema],
    node: usize,
    role: crate::containers::column::Role,
    ix: usize,
) -> Option<(usize, String)> {
    frames
        .get(node)
        .and_then(|schema| schema.names_with_role(role).get(ix).map(|n| (*n).to_string()))
        .map(|name| (node, name))
}
