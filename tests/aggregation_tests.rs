//! End-to-end aggregation scenarios through the FastProp learner.
//!
//! These pin the exact feature values for small, hand-checked frames:
//! two-table AVG, the upper-time-stamp filter, FIRST/LAST by time stamp,
//! the count-distinct family and same-unit comparisons.

use featmill::aggregations::Aggregation;
use featmill::containers::{Column, DataFrame, DataUsed, JoinGraph, PlaceholderSpec, Role};
use featmill::fastprop::{FastPropHyperparams, FastPropModel};

// ============================================================================
// Test Helpers
// ============================================================================

fn graph(upper: Option<&str>) -> JoinGraph {
    let mut join = serde_json::json!({
        "table": "peripheral",
        "keys": [["jk", "jk"]],
        "time_stamps": ["ts", "ts"]
    });
    if let Some(upper) = upper {
        join["upper_time_stamp"] = serde_json::json!(upper);
    }
    let spec: PlaceholderSpec =
        serde_json::from_value(serde_json::json!({"name": "population", "joins": [join]}))
            .unwrap();
    JoinGraph::from_spec(&spec).unwrap()
}

fn population() -> DataFrame {
    let mut df = DataFrame::new("population");
    df.add_int_column(Role::JoinKey, Column::new("jk", vec![1, 2]))
        .unwrap();
    df.add_float_column(Role::TimeStamp, Column::new("ts", vec![10.0, 10.0]))
        .unwrap();
    df.add_float_column(Role::Target, Column::new("y", vec![0.0, 1.0]))
        .unwrap();
    df
}

fn peripheral() -> DataFrame {
    let mut df = DataFrame::new("peripheral");
    df.add_int_column(Role::JoinKey, Column::new("jk", vec![1, 1, 2]))
        .unwrap();
    df.add_float_column(Role::TimeStamp, Column::new("ts", vec![5.0, 6.0, 9.0]))
        .unwrap();
    df.add_float_column(Role::Numerical, Column::new("v", vec![2.0, 4.0, 10.0]))
        .unwrap();
    df
}

fn fit_single(
    aggregation: Aggregation,
    population: &DataFrame,
    peripheral: &DataFrame,
    graph: &JoinGraph,
) -> Vec<f64> {
    let mut model = FastPropModel::new(FastPropHyperparams {
        aggregation: vec![aggregation],
        num_features: 10,
        ..FastPropHyperparams::default()
    });
    let matrix = model
        .fit(population, std::slice::from_ref(peripheral), graph)
        .unwrap();
    assert_eq!(matrix.ncols(), 1, "expected exactly one {aggregation} template");
    matrix.columns[0].clone()
}

// ============================================================================
// Literal Scenarios
// ============================================================================

#[test]
fn test_two_table_avg() {
    let values = fit_single(Aggregation::Avg, &population(), &peripheral(), &graph(None));
    assert_eq!(values, vec![3.0, 10.0]);
}

#[test]
fn test_upper_time_stamp_filter() {
    let mut per = peripheral();
    per.add_float_column(
        Role::TimeStamp,
        Column::new("upper_ts", vec![8.0, 12.0, 20.0]),
    )
    .unwrap();
    // The first peripheral row expired at 8.0 <= 10.0 and contributes no
    // match.
    let values = fit_single(
        Aggregation::Avg,
        &population(),
        &per,
        &graph(Some("upper_ts")),
    );
    assert_eq!(values, vec![4.0, 10.0]);
}

#[test]
fn test_first_by_ts() {
    let values = fit_single(Aggregation::First, &population(), &peripheral(), &graph(None));
    assert_eq!(values, vec![2.0, 10.0]);
}

#[test]
fn test_last_by_ts() {
    let values = fit_single(Aggregation::Last, &population(), &peripheral(), &graph(None));
    assert_eq!(values, vec![4.0, 10.0]);
}

#[test]
fn test_count_distinct_family() {
    let mut pop = DataFrame::new("population");
    pop.add_int_column(Role::JoinKey, Column::new("jk", vec![1]))
        .unwrap();
    pop.add_float_column(Role::Target, Column::new("y", vec![1.0]))
        .unwrap();

    let mut per = DataFrame::new("peripheral");
    per.add_int_column(Role::JoinKey, Column::new("jk", vec![1, 1, 1]))
        .unwrap();
    // Categories 'a', 'a', 'b' as codes.
    per.add_int_column(Role::Categorical, Column::new("c", vec![0, 0, 1]))
        .unwrap();

    let spec: PlaceholderSpec = serde_json::from_value(serde_json::json!({
        "name": "population",
        "joins": [{"table": "peripheral", "keys": [["jk", "jk"]]}]
    }))
    .unwrap();
    let graph = JoinGraph::from_spec(&spec).unwrap();

    let distinct = fit_single(Aggregation::CountDistinct, &pop, &per, &graph);
    assert_eq!(distinct, vec![2.0]);

    let count = fit_single(Aggregation::Count, &pop, &per, &graph);
    assert_eq!(count, vec![3.0]);

    let minus = fit_single(Aggregation::CountMinusCountDistinct, &pop, &per, &graph);
    assert_eq!(minus, vec![1.0]);
}

#[test]
fn test_same_unit_numerical() {
    let mut pop = DataFrame::new("population");
    pop.add_int_column(Role::JoinKey, Column::new("jk", vec![1]))
        .unwrap();
    pop.add_float_column(
        Role::Numerical,
        Column::new("price", vec![100.0]).with_unit("EUR"),
    )
    .unwrap();
    pop.add_float_column(Role::Target, Column::new("y", vec![1.0]))
        .unwrap();

    let mut per = DataFrame::new("peripheral");
    per.add_int_column(Role::JoinKey, Column::new("jk", vec![1, 1]))
        .unwrap();
    per.add_float_column(
        Role::Numerical,
        Column::new("price", vec![90.0, 110.0]).with_unit("EUR"),
    )
    .unwrap();

    let spec: PlaceholderSpec = serde_json::from_value(serde_json::json!({
        "name": "population",
        "joins": [{"table": "peripheral", "keys": [["jk", "jk"]]}]
    }))
    .unwrap();
    let graph = JoinGraph::from_spec(&spec).unwrap();

    for aggregation in [Aggregation::Sum, Aggregation::Avg] {
        let mut model = FastPropModel::new(FastPropHyperparams {
            aggregation: vec![aggregation],
            num_features: 10,
            ..FastPropHyperparams::default()
        });
        let matrix = model.fit(&pop, std::slice::from_ref(&per), &graph).unwrap();

        let same_units_ix = model
            .features()
            .iter()
            .position(|f| f.data_used == DataUsed::SameUnitsNumerical)
            .expect("a same-units template must be enumerated");
        // (100 - 90) + (100 - 110) = 0 under SUM, and 0 under AVG.
        assert_eq!(matrix.columns[same_units_ix], vec![0.0]);
    }
}

#[test]
fn test_mismatched_units_are_never_compared() {
    let mut pop = DataFrame::new("population");
    pop.add_int_column(Role::JoinKey, Column::new("jk", vec![1]))
        .unwrap();
    pop.add_float_column(
        Role::Numerical,
        Column::new("price", vec![100.0]).with_unit("EUR"),
    )
    .unwrap();
    pop.add_float_column(Role::Target, Column::new("y", vec![1.0]))
        .unwrap();

    let mut per = DataFrame::new("peripheral");
    per.add_int_column(Role::JoinKey, Column::new("jk", vec![1]))
        .unwrap();
    per.add_float_column(
        Role::Numerical,
        Column::new("price", vec![90.0]).with_unit("USD"),
    )
    .unwrap();

    let spec: PlaceholderSpec = serde_json::from_value(serde_json::json!({
        "name": "population",
        "joins": [{"table": "peripheral", "keys": [["jk", "jk"]]}]
    }))
    .unwrap();
    let graph = JoinGraph::from_spec(&spec).unwrap();

    let mut model = FastPropModel::new(FastPropHyperparams {
        aggregation: vec![Aggregation::Sum],
        num_features: 10,
        ..FastPropHyperparams::default()
    });
    model.fit(&pop, std::slice::from_ref(&per), &graph).unwrap();
    assert!(model
        .features()
        .iter()
        .all(|f| f.data_used != DataUsed::SameUnitsNumerical));
}

#[test]
fn test_transform_matches_fit_output() {
    let pop = population();
    let per = peripheral();
    let graph = graph(None);
    let mut model = FastPropModel::new(FastPropHyperparams {
        aggregation: vec![Aggregation::Avg, Aggregation::Count, Aggregation::Sum],
        num_features: 10,
        ..FastPropHyperparams::default()
    });
    let fitted = model.fit(&pop, std::slice::from_ref(&per), &graph).unwrap();
    let transformed = model
        .transform(&pop, std::slice::from_ref(&per), &graph)
        .unwrap();
    assert_eq!(fitted, transformed);
}
