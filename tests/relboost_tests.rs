//! Relboost integration: boosting behaviour on generated relational data.

use featmill::containers::{Column, DataFrame, JoinGraph, PlaceholderSpec, Role};
use featmill::criterion::LossKind;
use featmill::relboost::{RelboostHyperparams, RelboostModel};

// ============================================================================
// Test Helpers
// ============================================================================

fn graph() -> JoinGraph {
    let spec: PlaceholderSpec = serde_json::from_value(serde_json::json!({
        "name": "population",
        "joins": [{
            "table": "transactions",
            "keys": [["account", "account"]],
            "time_stamps": ["ts", "ts"]
        }]
    }))
    .unwrap();
    JoinGraph::from_spec(&spec).unwrap()
}

/// Accounts whose matched transaction amounts sum high get high targets.
fn frames(n_accounts: usize) -> Vec<DataFrame> {
    let mut account = Vec::new();
    let mut amount = Vec::new();
    let mut ts = Vec::new();
    for a in 0..n_accounts {
        for t in 0..3 {
            account.push(a as i32);
            amount.push(((a * 7 + t * 3) % 11) as f64);
            ts.push(t as f64);
        }
    }

    let mut targets = vec![0.0; n_accounts];
    for (i, &a) in account.iter().enumerate() {
        targets[a as usize] += amount[i];
    }

    let mut pop = DataFrame::new("population");
    pop.add_int_column(
        Role::JoinKey,
        Column::new("account", (0..n_accounts as i32).collect()),
    )
    .unwrap();
    pop.add_float_column(Role::TimeStamp, Column::new("ts", vec![10.0; n_accounts]))
        .unwrap();
    pop.add_float_column(Role::Target, Column::new("y", targets))
        .unwrap();

    let mut per = DataFrame::new("transactions");
    per.add_int_column(Role::JoinKey, Column::new("account", account))
        .unwrap();
    per.add_float_column(Role::TimeStamp, Column::new("ts", ts))
        .unwrap();
    per.add_float_column(Role::Numerical, Column::new("amount", amount))
        .unwrap();

    vec![pop, per]
}

fn hyper() -> RelboostHyperparams {
    RelboostHyperparams {
        num_features: 20,
        max_depth: 3,
        min_num_samples: 2,
        shrinkage: 0.3,
        reg_lambda: 1.0,
        ..RelboostHyperparams::default()
    }
}

fn mse(predictions: &[f64], targets: &[f64]) -> f64 {
    predictions
        .iter()
        .zip(targets)
        .map(|(p, y)| (p - y) * (p - y))
        .sum::<f64>()
        / targets.len() as f64
}

// ============================================================================
// Behaviour
// ============================================================================

#[test]
fn test_boosting_beats_the_constant_predictor() {
    let frames = frames(40);
    let graph = graph();
    let mut model = RelboostModel::new(hyper());
    model.fit(&frames, &graph).unwrap();

    let targets: Vec<f64> = frames[0].targets[0].iter().collect();
    let mean = targets.iter().sum::<f64>() / targets.len() as f64;
    let constant_mse = mse(&vec![mean; targets.len()], &targets);

    let predictions = model.predict(&frames, &graph).unwrap();
    assert!(
        mse(&predictions, &targets) < constant_mse / 2.0,
        "boosting must clearly beat the target mean"
    );
}

#[test]
fn test_one_feature_column_per_tree() {
    let frames = frames(30);
    let graph = graph();
    let mut model = RelboostModel::new(hyper());
    let matrix = model.fit(&frames, &graph).unwrap();
    assert_eq!(matrix.ncols(), model.trees().len());
    assert_eq!(matrix.nrows(), 30);
}

#[test]
fn test_predictions_decompose_into_features() {
    let frames = frames(30);
    let graph = graph();
    let mut model = RelboostModel::new(hyper());
    let matrix = model.fit(&frames, &graph).unwrap();
    let predictions = model.predict(&frames, &graph).unwrap();

    for i in 0..matrix.nrows() {
        let sum: f64 =
            model.initial_prediction() + matrix.columns.iter().map(|c| c[i]).sum::<f64>();
        assert!((sum - predictions[i]).abs() < 1e-9);
    }
}

#[test]
fn test_shrinkage_caps_single_round_updates() {
    let frames = frames(30);
    let graph = graph();
    let mut model = RelboostModel::new(RelboostHyperparams {
        num_features: 1,
        shrinkage: 0.1,
        ..hyper()
    });
    model.fit(&frames, &graph).unwrap();
    for tree in model.trees() {
        assert!(tree.update_rate <= 0.1 + 1e-12);
        assert!(tree.update_rate >= 0.0);
    }
}

#[test]
fn test_cross_entropy_on_binary_targets() {
    let mut frames = frames(40);
    let targets: Vec<f64> = frames[0].targets[0]
        .iter()
        .map(|v| f64::from(v > 15.0))
        .collect();
    frames[0]
        .add_float_column(Role::Target, Column::new("y", targets.clone()))
        .unwrap();

    let mut model = RelboostModel::new(RelboostHyperparams {
        loss_function: LossKind::CrossEntropy,
        ..hyper()
    });
    let graph = graph();
    model.fit(&frames, &graph).unwrap();
    let predictions = model.predict(&frames, &graph).unwrap();

    for p in &predictions {
        assert!((0.0..=1.0).contains(p));
    }
    let accuracy = predictions
        .iter()
        .zip(&targets)
        .filter(|(p, y)| (**p >= 0.5) == (**y >= 0.5))
        .count() as f64
        / targets.len() as f64;
    assert!(accuracy > 0.8, "accuracy = {accuracy}");
}

#[test]
fn test_min_num_samples_bounds_leaves() {
    let frames = frames(30);
    let graph = graph();
    let mut model = RelboostModel::new(RelboostHyperparams {
        min_num_samples: 20,
        ..hyper()
    });
    model.fit(&frames, &graph).unwrap();
    // 90 matches total; every split must leave 20 on each side, so no tree
    // can have more than 4 leaves.
    for tree in model.trees() {
        assert!(tree.num_leaves() <= 4);
    }
}

#[test]
fn test_serialization_preserves_transform() {
    let frames = frames(25);
    let graph = graph();
    let mut model = RelboostModel::new(hyper());
    let fitted = model.fit(&frames, &graph).unwrap();

    let json = serde_json::to_string(&model).unwrap();
    let back: RelboostModel = serde_json::from_str(&json).unwrap();
    let transformed = back.transform(&frames, &graph).unwrap();
    assert_eq!(fitted, transformed);
}
