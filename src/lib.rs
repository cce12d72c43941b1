//! # Featmill
//!
//! An automated relational feature-engineering and prediction engine.
//! Given a population table and a set of peripheral tables connected by
//! declared join keys and time stamps, featmill generates candidate
//! aggregate features over joined windows, selects and refines them
//! through tree-structured search or propositionalisation, and trains a
//! downstream predictor on the resulting feature matrix. A daemon exposes
//! the whole pipeline over a loopback socket as a stateful session
//! (projects, data frames, pipelines).
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Command (JSON over loopback TCP)
//!     ↓
//! [ProjectManager]   → project state behind a read-write lock
//!     ↓
//! [Pipeline.fit]
//!     ├── Preprocessors        → seasonal, substring, e-mail domain,
//!     │                          imputation, mapping, text splitting
//!     ├── Matchmaker           → (population row, peripheral row) matches
//!     ├── FeatureLearner       → FastProp (propositionalisation) and/or
//!     │                          Relboost (gradient-boosted trees)
//!     └── Predictor            → linear / logistic regression
//!     ↓
//! Feature matrix, predictions, importances, SQL export
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `containers` | Columns, frames, encodings, join indices, the join graph |
//! | `matchmaker` | Join + time-window match production |
//! | `aggregations` | The aggregation catalogue |
//! | `criterion` | R² criterion, square / cross-entropy losses |
//! | `fastprop` | The propositionalisation learner |
//! | `relboost` | The gradient-boosted relational tree learner |
//! | `preprocessors` | Column-wise transforms |
//! | `predictors` | Downstream predictors |
//! | `pipeline` | Orchestration, metrics, importances |
//! | `expressions` | The column expression sub-language |
//! | `sql` | Typed join paths and SQL rendering |
//! | `storage` | CSV and on-disk project persistence |
//! | `project`, `engine` | Project state and the project manager |
//! | `protocol` | Wire framing, commands, the connection handler |

pub mod aggregations;
pub mod cancel;
pub mod config;
pub mod containers;
pub mod criterion;
pub mod engine;
pub mod error;
pub mod expressions;
pub mod fastprop;
pub mod matchmaker;
pub mod pipeline;
pub mod predictors;
pub mod preprocessors;
pub mod project;
pub mod protocol;
pub mod relboost;
pub mod sql;
pub mod storage;

pub use crate::aggregations::Aggregation;
pub use crate::cancel::CancelToken;
pub use crate::config::Config;
pub use crate::containers::{
    AbstractFeature, Column, Condition, DataFrame, DataUsed, Encoding, EncodingShadow,
    FloatColumn, FrameSchema, IntColumn, JoinGraph, JoinIndex, Match, PlaceholderSpec, Role,
};
pub use crate::containers::matrix::FeatureMatrix;
pub use crate::criterion::{Loss, LossKind, RSquaredCriterion};
pub use crate::engine::ProjectManager;
pub use crate::error::{Error, Result};
pub use crate::fastprop::{FastPropHyperparams, FastPropModel};
pub use crate::matchmaker::{Matchmaker, ResolvedJoin};
pub use crate::pipeline::{FeatureLearner, FitReport, Pipeline};
pub use crate::predictors::Predictor;
pub use crate::preprocessors::Preprocessor;
pub use crate::project::{Project, ProjectState};
pub use crate::relboost::{RelboostHyperparams, RelboostModel};
