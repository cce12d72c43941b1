//! Produces the matches between a population row and peripheral rows.
//!
//! Contract: given a resolved join, for a population row `i` yield every
//! peripheral row `j` such that (a) every declared join-key pair is equal
//! and non-null, and (b) if time stamps are in use,
//! `peripheral.ts[j] <= population.ts[i]` and, when an upper time stamp is
//! declared, `peripheral.upper_ts[j] > population.ts[i]` or the upper time
//! stamp is null. Ordering is stable by input row id.
//!
//! Matches are produced per population row and never materialised for the
//! whole cartesian product; memory stays bounded by the largest single
//! match set.

use std::sync::Arc;

use crate::containers::column::{FloatColumn, IntColumn};
use crate::containers::frame::DataFrame;
use crate::containers::index::JoinIndex;
use crate::containers::join_graph::GraphEdge;
use crate::containers::matches::Match;
use crate::error::{Error, Result};

/// A join edge resolved against concrete frames. Columns are cheap handles,
/// so the resolution clones them out of the frames once and the per-row hot
/// loop touches no maps.
#[derive(Debug, Clone)]
pub struct ResolvedJoin {
    pop_keys: Vec<IntColumn>,
    per_keys: Vec<IntColumn>,
    pop_ts: Option<FloatColumn>,
    per_ts: Option<FloatColumn>,
    upper_ts: Option<FloatColumn>,
    index: Arc<JoinIndex>,
    /// Whether the index runs are sorted by the same time stamp we filter
    /// on, enabling the binary-search cut.
    index_sorted_by_filter_ts: bool,
}

impl ResolvedJoin {
    /// Resolves a declared join against the population and peripheral
    /// frames. Missing join-key or time-stamp names are configuration
    /// errors raised here, at fit time.
    pub fn resolve(
        edge: &GraphEdge,
        population: &DataFrame,
        peripheral: &DataFrame,
    ) -> Result<Self> {
        if edge.keys.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "join between '{}' and '{}' declares no join keys",
                population.name, peripheral.name
            )));
        }

        let mut pop_keys = Vec::new();
        let mut per_keys = Vec::new();
        for (pop_name, per_name) in &edge.keys {
            pop_keys.push(population.join_key(pop_name)?.clone());
            per_keys.push(peripheral.join_key(per_name)?.clone());
        }

        let (pop_ts, per_ts) = match &edge.time_stamps {
            Some((pop_name, per_name)) => (
                Some(population.time_stamp(pop_name)?.clone()),
                Some(peripheral.time_stamp(per_name)?.clone()),
            ),
            None => (None, None),
        };

        let upper_ts = match &edge.upper_time_stamp {
            Some(name) => Some(peripheral.time_stamp(name)?.clone()),
            None => None,
        };

        let index = peripheral.join_index(&edge.keys[0].1)?;
        let index_sorted_by_filter_ts = index.is_sorted_by_ts()
            && per_ts
                .as_ref()
                .zip(peripheral.primary_time_stamp())
                .is_some_and(|(filter, primary)| filter.name == primary.name);

        Ok(ResolvedJoin {
            pop_keys,
            per_keys,
            pop_ts,
            per_ts,
            upper_ts,
            index,
            index_sorted_by_filter_ts,
        })
    }

    pub fn has_time_stamps(&self) -> bool {
        self.pop_ts.is_some()
    }
}

/// The matchmaker proper.
#[derive(Debug, Clone, Copy)]
pub struct Matchmaker {
    /// Whether the time filter is applied at all.
    pub use_timestamps: bool,
    /// What a null population time stamp means: `true` suppresses the time
    /// filter for that row, `false` yields no matches for it.
    pub null_ts_matches_all: bool,
}

impl Default for Matchmaker {
    fn default() -> Self {
        Matchmaker {
            use_timestamps: true,
            null_ts_matches_all: false,
        }
    }
}

impl Matchmaker {
    /// Appends the matches for population row `ix_output` to `out`.
    /// The output is ordered by input row id.
    pub fn matches_for_row(&self, join: &ResolvedJoin, ix_output: usize, out: &mut Vec<Match>) {
        let start = out.len();

        let code = join.pop_keys[0].get(ix_output);
        if code < 0 {
            return;
        }

        let time_filter = self.use_timestamps && join.pop_ts.is_some();
        let pop_t = join
            .pop_ts
            .as_ref()
            .map_or(f64::NAN, |ts| ts.get(ix_output));

        if time_filter && pop_t.is_nan() && !self.null_ts_matches_all {
            return;
        }
        let apply_ts = time_filter && !pop_t.is_nan();

        let candidates: &[u32] = match &join.per_ts {
            Some(per_ts) if apply_ts && join.index_sorted_by_filter_ts => {
                join.index.candidates_until(code, pop_t, per_ts)
            }
            _ => join.index.candidates(code),
        };

        'rows: for &r in candidates {
            let r = r as usize;
            for (pop_key, per_key) in join.pop_keys.iter().zip(&join.per_keys).skip(1) {
                let a = pop_key.get(ix_output);
                let b = per_key.get(r);
                if a < 0 || a != b {
                    continue 'rows;
                }
            }
            if apply_ts {
                let per_t = join.per_ts.as_ref().map_or(f64::NAN, |ts| ts.get(r));
                if !(per_t <= pop_t) {
                    continue;
                }
                if let Some(upper) = &join.upper_ts {
                    let u = upper.get(r);
                    if !u.is_nan() && !(u > pop_t) {
                        continue;
                    }
                }
            }
            out.push(Match::new(ix_output, r));
        }

        out[start..].sort_by_key(|m| m.ix_input);
    }

    /// Collects matches for every population row, returning a flat match
    /// vector plus per-row `(begin, end)` ranges into it.
    pub fn make_matches(
        &self,
        population: &DataFrame,
        join: &ResolvedJoin,
    ) -> (Vec<Match>, Vec<(usize, usize)>) {
        let nrows = population.nrows();
        let mut matches = Vec::new();
        let mut ranges = Vec::with_capacity(nrows);
        for i in 0..nrows {
            let begin = matches.len();
            self.matches_for_row(join, i, &mut matches);
            ranges.push((begin, matches.len()));
        }
        (matches, ranges)
    }
}
