//! A single boosted relational tree.
//!
//! The tree is grown greedily: at each node the best candidate split is
//! committed when it clears the gain threshold and leaves enough matches on
//! both sides, otherwise the node becomes a leaf carrying the Newton weight
//! of its matches. Nodes live in an arena indexed by `usize` - no owning
//! recursion.

use serde::{Deserialize, Serialize};

use crate::containers::matches::Match;
use crate::criterion::GradientStats;
use crate::error::{Error, Result};
use crate::relboost::split::{find_best_split, match_gradients, Split, SplitColumn, SplitContext};

/// The aggregation folding leaf weights into the population scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeAgg {
    #[serde(rename = "AVG")]
    Avg,
    #[serde(rename = "SUM")]
    Sum,
}

impl TreeAgg {
    pub fn as_str(&self) -> &'static str {
        match self {
            TreeAgg::Avg => "AVG",
            TreeAgg::Sum => "SUM",
        }
    }

    /// Assigns the per-match scores this aggregation implies: 1 for SUM,
    /// `1/|matches(row)|` for AVG.
    pub fn assign_scores(&self, matches: &mut [Match], ranges: &[(usize, usize)]) {
        match self {
            TreeAgg::Sum => {
                for m in matches.iter_mut() {
                    m.score = 1.0;
                }
            }
            TreeAgg::Avg => {
                for &(begin, end) in ranges {
                    if end > begin {
                        let score = 1.0 / (end - begin) as f64;
                        for m in &mut matches[begin..end] {
                            m.score = score;
                        }
                    }
                }
            }
        }
    }
}

/// Limits and regularisation for growing one tree.
#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_num_samples: usize,
    pub reg_lambda: f64,
    pub gamma: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TreeNode {
    /// `None` marks a leaf.
    pub split: Option<Split>,
    #[serde(default)]
    pub left: usize,
    #[serde(default)]
    pub right: usize,
    /// The Newton weight at a leaf; 0 on internal nodes.
    #[serde(default)]
    pub weight: f64,
    /// The gain the split bought; used for column importances.
    #[serde(default)]
    pub gain: f64,
}

/// One fitted tree: the ordered list of split conditions plus leaf weights
/// and the shrinkage-scaled update rate the ensemble assigned to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tree {
    /// The join-graph node this tree's peripheral table lives at.
    pub peripheral_node: usize,
    pub agg: TreeAgg,
    nodes: Vec<TreeNode>,
    #[serde(default)]
    pub update_rate: f64,
}

impl Tree {
    /// Grows a tree over `matches` against the gradients `g`, `h` (indexed
    /// by population row).
    pub fn fit(
        peripheral_node: usize,
        agg: TreeAgg,
        ctx: &SplitContext<'_>,
        matches: &[Match],
        g: &[f64],
        h: &[f64],
        params: &TreeParams,
    ) -> Tree {
        let mut tree = Tree {
            peripheral_node,
            agg,
            nodes: Vec::new(),
            update_rate: 1.0,
        };
        let mut scratch: Vec<Match> = matches.to_vec();
        tree.fit_node(ctx, &mut scratch, g, h, 0, params);
        tree
    }

    fn fit_node(
        &mut self,
        ctx: &SplitContext<'_>,
        matches: &mut [Match],
        g: &[f64],
        h: &[f64],
        depth: usize,
        params: &TreeParams,
    ) -> usize {
        let mut stats = GradientStats::default();
        for m in matches.iter() {
            let (gm, hm) = match_gradients(m, g, h);
            stats.add(gm, hm);
        }

        let id = self.nodes.len();
        self.nodes.push(TreeNode {
            split: None,
            left: 0,
            right: 0,
            weight: stats.newton_weight(params.reg_lambda),
            gain: 0.0,
        });

        if depth >= params.max_depth || matches.len() < 2 * params.min_num_samples {
            return id;
        }

        let Some(best) = find_best_split(
            ctx,
            matches,
            g,
            h,
            params.reg_lambda,
            params.gamma,
            params.min_num_samples,
        ) else {
            return id;
        };

        // Stable partition keeps the row ordering inside both halves.
        let mut left: Vec<Match> = Vec::with_capacity(best.left.count);
        let mut right: Vec<Match> = Vec::with_capacity(best.right.count);
        for m in matches.iter() {
            if ctx.goes_left(&best.split, m) {
                left.push(*m);
            } else {
                right.push(*m);
            }
        }

        let left_id = self.fit_node(ctx, &mut left, g, h, depth + 1, params);
        let right_id = self.fit_node(ctx, &mut right, g, h, depth + 1, params);

        self.nodes[id].split = Some(best.split);
        self.nodes[id].gain = best.gain;
        self.nodes[id].left = left_id;
        self.nodes[id].right = right_id;
        id
    }

    /// Routes a match to its leaf and returns the leaf weight.
    pub fn leaf_weight(&self, ctx: &SplitContext<'_>, m: &Match) -> f64 {
        let mut node = &self.nodes[0];
        while let Some(split) = &node.split {
            node = if ctx.goes_left(split, m) {
                &self.nodes[node.left]
            } else {
                &self.nodes[node.right]
            };
        }
        node.weight
    }

    /// The raw per-population-row predictions: the aggregation (via the
    /// match scores) of the leaf weights across each row's matches. Rows
    /// without matches predict 0.
    pub fn predict(
        &self,
        ctx: &SplitContext<'_>,
        matches: &[Match],
        ranges: &[(usize, usize)],
    ) -> Vec<f64> {
        let mut out = vec![0.0; ranges.len()];
        for &(begin, end) in ranges {
            for m in &matches[begin..end] {
                out[m.ix_output] += self.leaf_weight(ctx, m) * m.score;
            }
        }
        out
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.split.is_none()).count()
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn root(&self) -> Result<&TreeNode> {
        self.nodes
            .first()
            .ok_or_else(|| Error::Internal("tree without a root node".to_string()))
    }

    /// Rewrites category codes after a shadow-encoding merge.
    pub fn rewrite_categories(&mut self, remap: &[i32]) {
        for node in &mut self.nodes {
            if let Some(split) = &mut node.split {
                for code in &mut split.categories_used {
                    if *code >= 0 {
                        *code = remap[*code as usize];
                    }
                }
            }
        }
    }

    /// The split columns used by this tree with their accumulated gains.
    pub fn column_gains(&self) -> Vec<(SplitColumn, f64)> {
        self.nodes
            .iter()
            .filter_map(|n| n.split.as_ref().map(|s| (s.column.clone(), n.gain)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::column::{Column, Role};
    use crate::containers::frame::DataFrame;

    fn frames() -> (DataFrame, DataFrame) {
        let mut pop = DataFrame::new("pop");
        pop.add_int_column(Role::JoinKey, Column::new("jk", vec![1, 1, 1, 1]))
            .unwrap();
        let mut per = DataFrame::new("per");
        per.add_int_column(Role::JoinKey, Column::new("jk", vec![1, 1, 1, 1]))
            .unwrap();
        per.add_float_column(Role::Numerical, Column::new("x", vec![0.0, 1.0, 2.0, 3.0]))
            .unwrap();
        (pop, per)
    }

    fn params() -> TreeParams {
        TreeParams {
            max_depth: 3,
            min_num_samples: 1,
            reg_lambda: 0.0,
            gamma: 0.0,
        }
    }

    #[test]
    fn test_fit_perfect_split() {
        let (pop, per) = frames();
        let ctx = SplitContext {
            population: &pop,
            peripheral: &per,
            pop_ts: None,
            per_ts: None,
            subfeatures: &[],
        };
        let matches: Vec<Match> = (0..4).map(|i| Match::new(i, i)).collect();
        // Residuals: first two rows want -1, last two +1.
        let g = vec![1.0, 1.0, -1.0, -1.0];
        let h = vec![1.0; 4];
        let tree = Tree::fit(1, TreeAgg::Sum, &ctx, &matches, &g, &h, &params());
        assert!(tree.num_nodes() >= 3);

        let ranges: Vec<(usize, usize)> = (0..4).map(|i| (i, i + 1)).collect();
        let predictions = tree.predict(&ctx, &matches, &ranges);
        assert_eq!(predictions, vec![-1.0, -1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_no_signal_gives_single_leaf() {
        let (pop, per) = frames();
        let ctx = SplitContext {
            population: &pop,
            peripheral: &per,
            pop_ts: None,
            per_ts: None,
            subfeatures: &[],
        };
        let matches: Vec<Match> = (0..4).map(|i| Match::new(i, i)).collect();
        let g = vec![0.0; 4];
        let h = vec![1.0; 4];
        let tree = Tree::fit(1, TreeAgg::Sum, &ctx, &matches, &g, &h, &params());
        assert_eq!(tree.num_nodes(), 1);
        assert_eq!(tree.num_leaves(), 1);
    }

    #[test]
    fn test_avg_scores() {
        let mut matches = vec![Match::new(0, 0), Match::new(0, 1), Match::new(1, 2)];
        let ranges = vec![(0, 2), (2, 3)];
        TreeAgg::Avg.assign_scores(&mut matches, &ranges);
        assert_eq!(matches[0].score, 0.5);
        assert_eq!(matches[2].score, 1.0);
    }

    #[test]
    fn test_max_depth_zero_is_a_stump() {
        let (pop, per) = frames();
        let ctx = SplitContext {
            population: &pop,
            peripheral: &per,
            pop_ts: None,
            per_ts: None,
            subfeatures: &[],
        };
        let matches: Vec<Match> = (0..4).map(|i| Match::new(i, i)).collect();
        let g = vec![1.0, 1.0, -1.0, -1.0];
        let h = vec![1.0; 4];
        let tree = Tree::fit(
            1,
            TreeAgg::Sum,
            &ctx,
            &matches,
            &g,
            &h,
            &TreeParams {
                max_depth: 0,
                ..params()
            },
        );
        assert_eq!(tree.num_nodes(), 1);
    }
}
