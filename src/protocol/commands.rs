//! The serde shapes of the command envelope and verb bodies.
//!
//! Every command is a JSON object `{"type_": <verb>, "name_": <target>,
//! ...}`. The envelope is parsed first; the remaining fields are
//! deserialized into the verb's body type during dispatch.

use std::collections::HashMap;

use serde::Deserialize;

use crate::containers::join_graph::PlaceholderSpec;
use crate::error::{Error, Result};
use crate::expressions::{BoolExpr, FloatExpr, StringExpr};
use crate::pipeline::FeatureLearner;
use crate::predictors::Predictor;
use crate::preprocessors::Preprocessor;

#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub type_: String,
    #[serde(default)]
    pub name_: String,
}

impl Envelope {
    pub fn parse(value: &serde_json::Value) -> Result<Envelope> {
        serde_json::from_value(value.clone())
            .map_err(|e| Error::InvalidArgument(format!("malformed command envelope: {e}")))
    }
}

/// Deserializes the remaining fields of a command into a body type.
pub fn body<T: for<'de> Deserialize<'de>>(value: &serde_json::Value, verb: &str) -> Result<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| Error::InvalidArgument(format!("malformed '{verb}' command: {e}")))
}

// DataFrame verbs

#[derive(Debug, Deserialize)]
pub struct FromCsvCmd {
    pub fname: String,
    #[serde(default)]
    pub roles: HashMap<String, String>,
    #[serde(default)]
    pub delimiter: Option<char>,
    #[serde(default = "default_true")]
    pub has_header: bool,
}

#[derive(Debug, Deserialize)]
pub struct ToCsvCmd {
    pub fname: String,
    #[serde(default)]
    pub delimiter: Option<char>,
}

#[derive(Debug, Deserialize)]
pub struct AddColumnCmd {
    pub column_name: String,
    pub role: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub subroles: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RemoveColumnCmd {
    pub column_name: String,
}

#[derive(Debug, Deserialize)]
pub struct AppendCmd {
    /// The frame whose rows are appended to the target.
    pub other: String,
}

#[derive(Debug, Deserialize)]
pub struct WhereCmd {
    /// Name of the view to create.
    pub new_df: String,
    pub condition: BoolExpr,
}

// Column verbs

#[derive(Debug, Deserialize)]
pub struct GetFloatColumnCmd {
    pub df_name: String,
    pub expression: FloatExpr,
}

#[derive(Debug, Deserialize)]
pub struct GetStringColumnCmd {
    pub df_name: String,
    pub expression: StringExpr,
}

#[derive(Debug, Deserialize)]
pub struct GetUnitCmd {
    pub df_name: String,
    pub column_name: String,
}

#[derive(Debug, Deserialize)]
pub struct SetUnitCmd {
    pub df_name: String,
    pub column_name: String,
    pub unit: String,
}

// Pipeline verbs

#[derive(Debug, Deserialize)]
pub struct PipelineCmd {
    pub data_model: PlaceholderSpec,
    #[serde(default)]
    pub preprocessors: Vec<Preprocessor>,
    pub feature_learners: Vec<FeatureLearner>,
    #[serde(default)]
    pub predictor: Option<Predictor>,
    #[serde(default)]
    pub feature_selector: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct CurveCmd {
    /// Which target's predictions the curve is computed for.
    #[serde(default)]
    pub target_num: usize,
}

fn default_true() -> bool {
    true
}
