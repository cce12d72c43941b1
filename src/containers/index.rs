//! Join-key indices.
//!
//! For each join-key column of a frame, a hash table from category code to
//! the row ids carrying that code. When the frame has a primary time-stamp
//! column the runs are sorted by time stamp (row id as tie-breaker), which
//! lets the matchmaker cut off the future with a binary search. Indices are
//! built lazily on first use and invalidated by `append` and `sort_by_key`.

use std::collections::HashMap;

use crate::containers::column::{FloatColumn, IntColumn};

/// Hash from join-key code to a run of row ids.
#[derive(Debug, Clone, Default)]
pub struct JoinIndex {
    map: HashMap<i32, Vec<u32>>,
    sorted_by_ts: bool,
}

impl JoinIndex {
    /// Builds the index over `join_key`. Null codes are skipped entirely -
    /// a row with a null join key can never match.
    pub fn build(join_key: &IntColumn, time_stamp: Option<&FloatColumn>) -> Self {
        let mut map: HashMap<i32, Vec<u32>> = HashMap::new();
        for i in 0..join_key.len() {
            let code = join_key.get(i);
            if code < 0 {
                continue;
            }
            map.entry(code).or_default().push(i as u32);
        }

        let sorted_by_ts = if let Some(ts) = time_stamp {
            for rows in map.values_mut() {
                // total_cmp sorts null (NaN) rows to the end, which the
                // binary-search cut relies on.
                rows.sort_by(|&a, &b| {
                    ts.get(a as usize)
                        .total_cmp(&ts.get(b as usize))
                        .then(a.cmp(&b))
                });
            }
            true
        } else {
            false
        };

        JoinIndex { map, sorted_by_ts }
    }

    /// The candidate rows for a code. Empty for null codes.
    pub fn candidates(&self, code: i32) -> &[u32] {
        if code < 0 {
            return &[];
        }
        self.map.get(&code).map_or(&[], Vec::as_slice)
    }

    /// Candidate rows with time stamp <= `upper`, assuming the runs are
    /// sorted by time stamp. NaN time stamps sort to the end and are never
    /// included by the cut.
    pub fn candidates_until<'a>(
        &'a self,
        code: i32,
        upper: f64,
        time_stamp: &FloatColumn,
    ) -> &'a [u32] {
        debug_assert!(self.sorted_by_ts);
        let rows = self.candidates(code);
        let cut = rows.partition_point(|&r| {
            let t = time_stamp.get(r as usize);
            t <= upper && !t.is_nan()
        });
        &rows[..cut]
    }

    pub fn is_sorted_by_ts(&self) -> bool {
        self.sorted_by_ts
    }

    pub fn num_keys(&self) -> usize {
        self.map.len()
    }
}
