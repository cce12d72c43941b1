//! Core data containers: typed columns, frames, encodings, join indices,
//! matches, schema snapshots, the join graph and feature descriptors.

pub mod column;
pub mod encoding;
pub mod feature;
pub mod frame;
pub mod index;
pub mod join_graph;
pub mod matches;
pub mod matrix;
pub mod schema;

pub use column::{Column, FloatColumn, IntColumn, Role};
pub use encoding::{Encoding, EncodingShadow, NULL_CODE, NULL_STRING};
pub use feature::{AbstractFeature, Condition, DataUsed, NO_CATEGORICAL_VALUE};
pub use frame::DataFrame;
pub use index::JoinIndex;
pub use join_graph::{GraphEdge, GraphNode, JoinGraph, JoinSpec, PlaceholderSpec};
pub use matches::Match;
pub use matrix::FeatureMatrix;
pub use schema::{ColumnSchema, FrameSchema};
