//! Preprocessors inside a full pipeline: generated columns feed the
//! learner and the importance rewrite maps them back to user columns.

use std::collections::HashMap;

use featmill::aggregations::Aggregation;
use featmill::cancel::CancelToken;
use featmill::containers::{
    Column, DataFrame, Encoding, EncodingShadow, PlaceholderSpec, Role,
};
use featmill::fastprop::{FastPropHyperparams, FastPropModel};
use featmill::pipeline::{FeatureLearner, Pipeline};
use featmill::predictors::Predictor;
use featmill::preprocessors::{Imputation, Preprocessor, Seasonal};

// ============================================================================
// Test Helpers
// ============================================================================

fn frames() -> HashMap<String, DataFrame> {
    let n = 24i32;
    let mut pop = DataFrame::new("population");
    pop.add_int_column(Role::JoinKey, Column::new("jk", (0..n).collect()))
        .unwrap();
    // One time stamp per month of 2021, two years apart for variation.
    let ts: Vec<f64> = (0..n)
        .map(|i| 1_609_459_200.0 + f64::from(i) * 30.0 * 86_400.0)
        .collect();
    pop.add_float_column(Role::TimeStamp, Column::new("ts", ts))
        .unwrap();
    pop.add_float_column(
        Role::Target,
        Column::new("y", (0..n).map(|i| f64::from(i % 12)).collect()),
    )
    .unwrap();

    let mut per = DataFrame::new("peripheral");
    per.add_int_column(Role::JoinKey, Column::new("jk", (0..n).collect()))
        .unwrap();
    per.add_float_column(
        Role::Numerical,
        Column::new(
            "v",
            (0..n)
                .map(|i| if i % 5 == 0 { f64::NAN } else { f64::from(i) })
                .collect(),
        ),
    )
    .unwrap();

    HashMap::from([
        ("population".to_string(), pop),
        ("peripheral".to_string(), per),
    ])
}

fn spec() -> PlaceholderSpec {
    serde_json::from_value(serde_json::json!({
        "name": "population",
        "joins": [{"table": "peripheral", "keys": [["jk", "jk"]]}]
    }))
    .unwrap()
}

fn pipeline() -> Pipeline {
    Pipeline::new(
        spec(),
        vec![
            Preprocessor::Seasonal(Seasonal::new()),
            Preprocessor::Imputation(Imputation::new()),
        ],
        vec![FeatureLearner::FastProp(FastPropModel::new(
            FastPropHyperparams {
                aggregation: vec![Aggregation::Avg, Aggregation::Count, Aggregation::Sum],
                num_features: 10,
                use_timestamps: false,
                ..FastPropHyperparams::default()
            },
        ))],
        Predictor::default(),
    )
}

// ============================================================================
// Behaviour
// ============================================================================

#[test]
fn test_fit_then_transform_with_merged_encoding() {
    let frames = frames();
    let mut pipeline = pipeline();

    let mut shared = Encoding::new();
    let mut shadow = EncodingShadow::new(&shared);
    pipeline
        .fit(&frames, &mut shadow, &CancelToken::new())
        .unwrap();
    // Seasonal interned month/weekday strings into the shadow.
    assert!(shadow.has_new_strings());

    let remap = shadow.merge_into(&mut shared);
    pipeline.rewrite_categories(&remap);

    let a = pipeline.transform(&frames, &shared).unwrap();
    let b = pipeline.transform(&frames, &shared).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.nrows(), 24);
}

#[test]
fn test_aborted_fit_leaves_shared_encoding_untouched() {
    let mut frames = frames();
    frames
        .get_mut("population")
        .unwrap()
        .remove_column("y")
        .unwrap();

    let shared = Encoding::new();
    let mut shadow = EncodingShadow::new(&shared);
    let mut pipeline = pipeline();
    assert!(pipeline
        .fit(&frames, &mut shadow, &CancelToken::new())
        .is_err());
    // The shadow is dropped; nothing ever touched the shared encoding.
    assert_eq!(shared.len(), 0);
}

#[test]
fn test_column_importances_point_at_user_columns() {
    let frames = frames();
    let mut pipeline = pipeline();
    let mut shared = Encoding::new();
    let mut shadow = EncodingShadow::new(&shared);
    pipeline
        .fit(&frames, &mut shadow, &CancelToken::new())
        .unwrap();
    let remap = shadow.merge_into(&mut shared);
    pipeline.rewrite_categories(&remap);

    for entry in pipeline.column_importances().unwrap() {
        let frame = &frames[&entry.table];
        assert!(
            frame.role_of(&entry.column).is_some(),
            "'{}' is not a user column of '{}'",
            entry.column,
            entry.table
        );
        assert!(!entry.column.contains("__"));
    }
}

#[test]
fn test_imputation_feeds_filled_columns_to_the_learner() {
    let frames = frames();
    let mut pipeline = pipeline();
    let mut shared = Encoding::new();
    let mut shadow = EncodingShadow::new(&shared);
    pipeline
        .fit(&frames, &mut shadow, &CancelToken::new())
        .unwrap();
    let remap = shadow.merge_into(&mut shared);
    pipeline.rewrite_categories(&remap);

    // With imputation in the chain, the AVG over the peripheral's values
    // is defined for every population row, nulls included.
    let matrix = pipeline.transform(&frames, &shared).unwrap();
    for column in &matrix.columns {
        assert!(column.iter().all(|v| v.is_finite()));
    }
}
