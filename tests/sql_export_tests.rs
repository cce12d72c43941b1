//! Shape checks on the emitted SQL: one statement per feature, the join
//! and time predicates present, identifiers quoted, values aggregated the
//! way the in-memory engine aggregates them.

use std::collections::HashMap;

use featmill::aggregations::Aggregation;
use featmill::cancel::CancelToken;
use featmill::containers::{
    Column, DataFrame, Encoding, EncodingShadow, PlaceholderSpec, Role,
};
use featmill::fastprop::{FastPropHyperparams, FastPropModel};
use featmill::pipeline::{FeatureLearner, Pipeline};
use featmill::predictors::Predictor;
use featmill::relboost::{RelboostHyperparams, RelboostModel};

fn frames() -> HashMap<String, DataFrame> {
    let mut pop = DataFrame::new("POPULATION");
    pop.add_int_column(Role::JoinKey, Column::new("customer id", (0..12).collect()))
        .unwrap();
    pop.add_float_column(Role::TimeStamp, Column::new("ts", vec![100.0; 12]))
        .unwrap();
    pop.add_float_column(
        Role::Target,
        Column::new("y", (0..12).map(f64::from).collect()),
    )
    .unwrap();

    let mut per = DataFrame::new("ORDERS");
    per.add_int_column(
        Role::JoinKey,
        Column::new("customer id", (0..24).map(|i| i / 2).collect()),
    )
    .unwrap();
    per.add_float_column(
        Role::TimeStamp,
        Column::new("ts", (0..24).map(|i| f64::from(i % 2)).collect()),
    )
    .unwrap();
    per.add_float_column(
        Role::Numerical,
        Column::new("amount", (0..24).map(|i| f64::from(i / 2) * 0.5).collect()),
    )
    .unwrap();

    HashMap::from([
        ("POPULATION".to_string(), pop),
        ("ORDERS".to_string(), per),
    ])
}

fn spec() -> PlaceholderSpec {
    serde_json::from_value(serde_json::json!({
        "name": "POPULATION",
        "joins": [{
            "table": "ORDERS",
            "keys": [["customer id", "customer id"]],
            "time_stamps": ["ts", "ts"]
        }]
    }))
    .unwrap()
}

fn fit(mut pipeline: Pipeline) -> Pipeline {
    let mut shared = Encoding::new();
    let mut shadow = EncodingShadow::new(&shared);
    pipeline
        .fit(&frames(), &mut shadow, &CancelToken::new())
        .unwrap();
    let remap = shadow.merge_into(&mut shared);
    pipeline.rewrite_categories(&remap);
    pipeline
}

#[test]
fn test_fastprop_sql_shape() {
    let pipeline = fit(Pipeline::new(
        spec(),
        Vec::new(),
        vec![FeatureLearner::FastProp(FastPropModel::new(
            FastPropHyperparams {
                aggregation: vec![Aggregation::Avg, Aggregation::Count],
                num_features: 4,
                ..FastPropHyperparams::default()
            },
        ))],
        Predictor::default(),
    ));

    let statements = pipeline.to_sql(&Encoding::new()).unwrap();
    assert!(!statements.is_empty());
    for (ix, sql) in statements.iter().enumerate() {
        assert!(sql.starts_with(&format!("CREATE TABLE \"FEATURE_{}\" AS", ix + 1)));
        assert!(sql.contains("FROM \"POPULATION\" t1"));
        assert!(sql.contains("LEFT JOIN \"ORDERS\" t2"));
        // Identifiers with spaces stay quoted.
        assert!(sql.contains("t1.\"customer id\" = t2.\"customer id\""));
        assert!(sql.contains("t2.\"ts\" <= t1.\"ts\""));
        assert!(sql.trim_end().ends_with("GROUP BY t1.rowid;"));
    }
}

#[test]
fn test_relboost_sql_shape() {
    let pipeline = fit(Pipeline::new(
        spec(),
        Vec::new(),
        vec![FeatureLearner::Relboost(RelboostModel::new(
            RelboostHyperparams {
                num_features: 3,
                max_depth: 2,
                min_num_samples: 2,
                ..RelboostHyperparams::default()
            },
        ))],
        Predictor::default(),
    ));

    let statements = pipeline.to_sql(&Encoding::new()).unwrap();
    assert_eq!(statements.len(), 3);
    for sql in &statements {
        // Leaf weights fold through an aggregated CASE expression scaled
        // by the committed update rate.
        assert!(sql.contains("COALESCE("));
        assert!(sql.contains("AVG(") || sql.contains("SUM("));
        assert!(sql.contains("GROUP BY t1.rowid;"));
    }
}

#[test]
fn test_count_statement_aggregates_star() {
    let pipeline = fit(Pipeline::new(
        spec(),
        Vec::new(),
        vec![FeatureLearner::FastProp(FastPropModel::new(
            FastPropHyperparams {
                aggregation: vec![Aggregation::Count],
                num_features: 1,
                ..FastPropHyperparams::default()
            },
        ))],
        Predictor::default(),
    ));
    let statements = pipeline.to_sql(&Encoding::new()).unwrap();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].contains("COUNT( * )"));
}
