//! Pipeline integration: fit, transform idempotence, importances, scores,
//! failure semantics.

use std::collections::HashMap;

use featmill::aggregations::Aggregation;
use featmill::cancel::CancelToken;
use featmill::containers::{
    Column, DataFrame, Encoding, EncodingShadow, PlaceholderSpec, Role,
};
use featmill::fastprop::{FastPropHyperparams, FastPropModel};
use featmill::pipeline::{FeatureLearner, Pipeline};
use featmill::predictors::{LogisticRegression, Predictor};
use featmill::relboost::{RelboostHyperparams, RelboostModel};

// ============================================================================
// Test Helpers
// ============================================================================

fn frames() -> HashMap<String, DataFrame> {
    let n = 30;
    let mut pop = DataFrame::new("population");
    pop.add_int_column(Role::JoinKey, Column::new("jk", (0..n).collect()))
        .unwrap();
    pop.add_float_column(Role::TimeStamp, Column::new("ts", vec![100.0; n as usize]))
        .unwrap();

    let mut jk = Vec::new();
    let mut ts = Vec::new();
    let mut v = Vec::new();
    for a in 0..n {
        for t in 0..4 {
            jk.push(a);
            ts.push(t as f64);
            v.push(((a * 5 + t) % 13) as f64);
        }
    }
    let mut targets = vec![0.0; n as usize];
    for (i, &a) in jk.iter().enumerate() {
        targets[a as usize] += v[i] / 4.0;
    }
    pop.add_float_column(Role::Target, Column::new("y", targets))
        .unwrap();

    let mut per = DataFrame::new("peripheral");
    per.add_int_column(Role::JoinKey, Column::new("jk", jk)).unwrap();
    per.add_float_column(Role::TimeStamp, Column::new("ts", ts))
        .unwrap();
    per.add_float_column(Role::Numerical, Column::new("v", v))
        .unwrap();

    HashMap::from([
        ("population".to_string(), pop),
        ("peripheral".to_string(), per),
    ])
}

fn spec() -> PlaceholderSpec {
    serde_json::from_value(serde_json::json!({
        "name": "population",
        "joins": [{
            "table": "peripheral",
            "keys": [["jk", "jk"]],
            "time_stamps": ["ts", "ts"]
        }]
    }))
    .unwrap()
}

fn fastprop_learner() -> FeatureLearner {
    FeatureLearner::FastProp(FastPropModel::new(FastPropHyperparams {
        aggregation: vec![
            Aggregation::Avg,
            Aggregation::Count,
            Aggregation::Max,
            Aggregation::Min,
            Aggregation::Sum,
        ],
        num_features: 8,
        ..FastPropHyperparams::default()
    }))
}

fn relboost_learner() -> FeatureLearner {
    FeatureLearner::Relboost(RelboostModel::new(RelboostHyperparams {
        num_features: 5,
        max_depth: 2,
        min_num_samples: 2,
        ..RelboostHyperparams::default()
    }))
}

fn fit(pipeline: &mut Pipeline, frames: &HashMap<String, DataFrame>) -> Encoding {
    let mut shared = Encoding::new();
    let mut shadow = EncodingShadow::new(&shared);
    pipeline
        .fit(frames, &mut shadow, &CancelToken::new())
        .unwrap();
    let remap = shadow.merge_into(&mut shared);
    pipeline.rewrite_categories(&remap);
    shared
}

// ============================================================================
// Behaviour
// ============================================================================

#[test]
fn test_two_learners_stack_features() {
    let frames = frames();
    let mut pipeline = Pipeline::new(
        spec(),
        Vec::new(),
        vec![fastprop_learner(), relboost_learner()],
        Predictor::default(),
    );
    let mut shadow = EncodingShadow::new(&Encoding::new());
    let report = pipeline
        .fit(&frames, &mut shadow, &CancelToken::new())
        .unwrap();
    // 5 Relboost trees plus whatever FastProp templates survived ranking.
    assert!(report.num_features > 5);
    assert!(report.feature_names.iter().any(|n| n.starts_with("feature_1_")));
    assert!(report.feature_names.iter().any(|n| n.starts_with("feature_2_")));
}

#[test]
fn test_transform_is_idempotent() {
    let frames = frames();
    let mut pipeline = Pipeline::new(
        spec(),
        Vec::new(),
        vec![fastprop_learner(), relboost_learner()],
        Predictor::default(),
    );
    let categories = fit(&mut pipeline, &frames);

    let a = pipeline.transform(&frames, &categories).unwrap();
    let b = pipeline.transform(&frames, &categories).unwrap();
    assert_eq!(a, b, "two sequential transforms must agree bitwise");
}

#[test]
fn test_feature_importance_closure() {
    let frames = frames();
    let mut pipeline = Pipeline::new(
        spec(),
        Vec::new(),
        vec![fastprop_learner(), relboost_learner()],
        Predictor::default(),
    );
    fit(&mut pipeline, &frames);

    let sum: f64 = pipeline
        .feature_importances()
        .unwrap()
        .iter()
        .map(|(_, v)| v)
        .sum();
    assert!((sum - 1.0).abs() < 1e-9);

    let column_importances = pipeline.column_importances().unwrap();
    let sum: f64 = column_importances.iter().map(|c| c.importance).sum();
    assert!((sum - 1.0).abs() < 1e-9);
    // Every reported column is a real user column of its table.
    for entry in &column_importances {
        let frame = &frames[&entry.table];
        assert!(frame.role_of(&entry.column).is_some(), "{:?}", entry);
    }
}

#[test]
fn test_regression_scores_reported() {
    let frames = frames();
    let mut pipeline = Pipeline::new(
        spec(),
        Vec::new(),
        vec![fastprop_learner()],
        Predictor::default(),
    );
    let categories = fit(&mut pipeline, &frames);

    let scores = pipeline.score(&frames, &categories).unwrap();
    assert_eq!(scores.len(), 1);
    let rsquared = scores[0].rsquared.unwrap();
    assert!(rsquared > 0.9, "rsquared = {rsquared}");
    assert!(scores[0].accuracy.is_none());
}

#[test]
fn test_classification_scores_reported() {
    let mut frames = frames();
    {
        let pop = frames.get_mut("population").unwrap();
        let y: Vec<f64> = pop.targets[0].iter().map(|v| f64::from(v > 6.0)).collect();
        pop.add_float_column(Role::Target, Column::new("y", y))
            .unwrap();
    }
    let mut pipeline = Pipeline::new(
        spec(),
        Vec::new(),
        vec![fastprop_learner()],
        Predictor::LogisticRegression(LogisticRegression::default()),
    );
    let categories = fit(&mut pipeline, &frames);
    let scores = pipeline.score(&frames, &categories).unwrap();
    assert!(scores[0].auc.unwrap() > 0.9);
    assert!(scores[0].rsquared.is_none());
}

#[test]
fn test_not_fitted_rejections() {
    let pipeline = Pipeline::new(
        spec(),
        Vec::new(),
        vec![fastprop_learner()],
        Predictor::default(),
    );
    let categories = Encoding::new();
    assert_eq!(
        pipeline.transform(&frames(), &categories).unwrap_err().tag(),
        "NotFitted"
    );
    assert_eq!(
        pipeline.score(&frames(), &categories).unwrap_err().tag(),
        "NotFitted"
    );
    assert_eq!(pipeline.feature_importances().unwrap_err().tag(), "NotFitted");
    assert_eq!(pipeline.to_sql(&categories).unwrap_err().tag(), "NotFitted");
}

#[test]
fn test_transform_rejects_schema_subset() {
    let frames = frames();
    let mut pipeline = Pipeline::new(
        spec(),
        Vec::new(),
        vec![fastprop_learner()],
        Predictor::default(),
    );
    let categories = fit(&mut pipeline, &frames);

    let mut smaller = frames.clone();
    smaller
        .get_mut("peripheral")
        .unwrap()
        .remove_column("v")
        .unwrap();
    assert_eq!(
        pipeline.transform(&smaller, &categories).unwrap_err().tag(),
        "NotFound"
    );
}

#[test]
fn test_transform_accepts_schema_superset() {
    let frames = frames();
    let mut pipeline = Pipeline::new(
        spec(),
        Vec::new(),
        vec![fastprop_learner()],
        Predictor::default(),
    );
    let categories = fit(&mut pipeline, &frames);

    let mut bigger = frames.clone();
    let n = bigger["peripheral"].nrows();
    bigger
        .get_mut("peripheral")
        .unwrap()
        .add_float_column(Role::Numerical, Column::new("extra", vec![0.0; n]))
        .unwrap();
    assert!(pipeline.transform(&bigger, &categories).is_ok());
}

#[test]
fn test_failed_fit_leaves_pipeline_unfitted() {
    let mut frames = frames();
    frames
        .get_mut("population")
        .unwrap()
        .remove_column("y")
        .unwrap();
    let mut pipeline = Pipeline::new(
        spec(),
        Vec::new(),
        vec![fastprop_learner()],
        Predictor::default(),
    );
    let mut shadow = EncodingShadow::new(&Encoding::new());
    assert!(pipeline
        .fit(&frames, &mut shadow, &CancelToken::new())
        .is_err());
    assert!(!pipeline.is_fitted());
}

#[test]
fn test_pipeline_survives_serialization() {
    let frames = frames();
    let mut pipeline = Pipeline::new(
        spec(),
        Vec::new(),
        vec![fastprop_learner(), relboost_learner()],
        Predictor::default(),
    );
    let categories = fit(&mut pipeline, &frames);
    let before = pipeline.transform(&frames, &categories).unwrap();

    let json = serde_json::to_string(&pipeline).unwrap();
    let back: Pipeline = serde_json::from_str(&json).unwrap();
    assert!(back.is_fitted());
    let after = back.transform(&frames, &categories).unwrap();
    assert_eq!(before, after);
}
