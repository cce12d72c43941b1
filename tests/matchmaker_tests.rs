//! Quantified matchmaker invariants on generated data.
//!
//! For every match produced with time stamps enabled:
//! `peripheral.ts[j] <= population.ts[i]` and, when an upper time stamp is
//! declared, `upper_ts[j] > population.ts[i]` or the upper time stamp is
//! null. Ordering is stable by input row id.

use featmill::containers::join_graph::GraphEdge;
use featmill::containers::{Column, DataFrame, Role};
use featmill::matchmaker::{Matchmaker, ResolvedJoin};

// ============================================================================
// Test Helpers
// ============================================================================

/// Deterministic pseudo-random sequence without pulling in a generator.
fn mix(seed: u64) -> u64 {
    let mut x = seed.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

fn generated_frames(n_pop: usize, n_per: usize, with_upper: bool) -> (DataFrame, DataFrame) {
    let mut pop = DataFrame::new("population");
    pop.add_int_column(
        Role::JoinKey,
        Column::new(
            "jk",
            (0..n_pop).map(|i| (mix(i as u64) % 7) as i32 - 1).collect(),
        ),
    )
    .unwrap();
    pop.add_float_column(
        Role::TimeStamp,
        Column::new(
            "ts",
            (0..n_pop)
                .map(|i| (mix(i as u64 + 1000) % 100) as f64)
                .collect(),
        ),
    )
    .unwrap();

    let mut per = DataFrame::new("peripheral");
    per.add_int_column(
        Role::JoinKey,
        Column::new(
            "jk",
            (0..n_per).map(|i| (mix(i as u64 + 2000) % 7) as i32 - 1).collect(),
        ),
    )
    .unwrap();
    per.add_float_column(
        Role::TimeStamp,
        Column::new(
            "ts",
            (0..n_per)
                .map(|i| {
                    let v = mix(i as u64 + 3000) % 110;
                    if v >= 100 {
                        f64::NAN
                    } else {
                        v as f64
                    }
                })
                .collect(),
        ),
    )
    .unwrap();
    if with_upper {
        per.add_float_column(
            Role::TimeStamp,
            Column::new(
                "upper_ts",
                (0..n_per)
                    .map(|i| {
                        let v = mix(i as u64 + 4000) % 130;
                        if v >= 110 {
                            f64::NAN
                        } else {
                            v as f64
                        }
                    })
                    .collect(),
            ),
        )
        .unwrap();
    }
    (pop, per)
}

fn edge(with_upper: bool) -> GraphEdge {
    GraphEdge {
        parent: 0,
        child: 1,
        keys: vec![("jk".to_string(), "jk".to_string())],
        time_stamps: Some(("ts".to_string(), "ts".to_string())),
        upper_time_stamp: with_upper.then(|| "upper_ts".to_string()),
    }
}

// ============================================================================
// Invariants
// ============================================================================

#[test]
fn test_time_filter_invariant_holds_everywhere() {
    let (pop, per) = generated_frames(200, 400, false);
    let join = ResolvedJoin::resolve(&edge(false), &pop, &per).unwrap();
    let mm = Matchmaker::default();

    let (matches, ranges) = mm.make_matches(&pop, &join);
    let pop_ts = pop.time_stamp("ts").unwrap();
    let per_ts = per.time_stamp("ts").unwrap();
    let pop_jk = pop.join_key("jk").unwrap();
    let per_jk = per.join_key("jk").unwrap();

    assert_eq!(ranges.len(), pop.nrows());
    for m in &matches {
        assert_eq!(pop_jk.get(m.ix_output), per_jk.get(m.ix_input));
        assert!(pop_jk.get(m.ix_output) >= 0);
        assert!(per_ts.get(m.ix_input) <= pop_ts.get(m.ix_output));
    }
}

#[test]
fn test_upper_time_stamp_invariant_holds_everywhere() {
    let (pop, per) = generated_frames(200, 400, true);
    let join = ResolvedJoin::resolve(&edge(true), &pop, &per).unwrap();
    let (matches, _) = Matchmaker::default().make_matches(&pop, &join);

    let pop_ts = pop.time_stamp("ts").unwrap();
    let upper = per.time_stamp("upper_ts").unwrap();
    assert!(!matches.is_empty());
    for m in &matches {
        let u = upper.get(m.ix_input);
        assert!(u.is_nan() || u > pop_ts.get(m.ix_output));
    }
}

#[test]
fn test_ordering_is_stable_by_input_row() {
    let (pop, per) = generated_frames(100, 300, false);
    let join = ResolvedJoin::resolve(&edge(false), &pop, &per).unwrap();
    let (matches, ranges) = Matchmaker::default().make_matches(&pop, &join);
    for &(begin, end) in &ranges {
        for pair in matches[begin..end].windows(2) {
            assert!(pair[0].ix_input < pair[1].ix_input);
        }
    }
}

#[test]
fn test_exhaustive_against_naive_join() {
    let (pop, per) = generated_frames(80, 150, false);
    let join = ResolvedJoin::resolve(&edge(false), &pop, &per).unwrap();
    let (matches, ranges) = Matchmaker::default().make_matches(&pop, &join);

    let pop_ts = pop.time_stamp("ts").unwrap();
    let per_ts = per.time_stamp("ts").unwrap();
    let pop_jk = pop.join_key("jk").unwrap();
    let per_jk = per.join_key("jk").unwrap();

    for i in 0..pop.nrows() {
        let expected: Vec<usize> = (0..per.nrows())
            .filter(|&j| {
                pop_jk.get(i) >= 0
                    && pop_jk.get(i) == per_jk.get(j)
                    && per_ts.get(j) <= pop_ts.get(i)
            })
            .collect();
        let (begin, end) = ranges[i];
        let produced: Vec<usize> = matches[begin..end].iter().map(|m| m.ix_input).collect();
        assert_eq!(produced, expected, "row {i}");
    }
}

#[test]
fn test_disabled_timestamps_join_on_keys_only() {
    let (pop, per) = generated_frames(50, 100, false);
    let join = ResolvedJoin::resolve(&edge(false), &pop, &per).unwrap();
    let mm = Matchmaker {
        use_timestamps: false,
        null_ts_matches_all: false,
    };
    let (matches, _) = mm.make_matches(&pop, &join);

    let pop_jk = pop.join_key("jk").unwrap();
    let per_jk = per.join_key("jk").unwrap();
    let expected: usize = (0..pop.nrows())
        .map(|i| {
            if pop_jk.get(i) < 0 {
                0
            } else {
                (0..per.nrows())
                    .filter(|&j| per_jk.get(j) == pop_jk.get(i))
                    .count()
            }
        })
        .sum();
    assert_eq!(matches.len(), expected);
}
