//! Feature and condition descriptors shared by both feature learners.

use serde::{Deserialize, Serialize};

use crate::aggregations::Aggregation;

/// Where the data behind a feature or condition lives. Drives both the
/// comparison at evaluation time and the SQL emission rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataUsed {
    /// A categorical column of the peripheral table.
    Categorical,
    /// A discrete column of the peripheral table.
    Discrete,
    /// A lag window over `population.ts - peripheral.ts`.
    Lag,
    /// No column at all (COUNT, AVG TIME BETWEEN).
    NotApplicable,
    /// A numerical column of the peripheral table.
    Numerical,
    /// Equality of same-unit categorical columns across the join.
    SameUnitsCategorical,
    /// Difference of same-unit discrete columns across the join.
    SameUnitsDiscrete,
    /// Difference of same-unit numerical columns across the join.
    SameUnitsNumerical,
    /// A subfeature column produced by a nested learner.
    Subfeatures,
    /// The difference `population.ts - peripheral.ts`.
    TimeDiff,
}

/// Marks a feature that aggregates a plain categorical column without
/// pinning a category value.
pub const NO_CATEGORICAL_VALUE: i32 = -1;

/// A predicate on a match, attached to a FastProp feature or sitting on a
/// Relboost tree node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    pub data_used: DataUsed,
    /// Column index on the peripheral (input) side, meaning depends on
    /// `data_used`.
    #[serde(default)]
    pub input_col: usize,
    /// Column index on the population (output) side, for same-unit
    /// comparisons.
    #[serde(default)]
    pub output_col: usize,
    /// Pinned category for categorical equality conditions.
    #[serde(default = "no_category")]
    pub category_used: i32,
    /// Lag window bounds `[lower, upper)` in time-stamp units.
    #[serde(default)]
    pub bound_lower: f64,
    #[serde(default)]
    pub bound_upper: f64,
}

fn no_category() -> i32 {
    NO_CATEGORICAL_VALUE
}

/// One FastProp feature template: aggregation x column x optional
/// conditions, against a fixed peripheral table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AbstractFeature {
    /// Index of the peripheral table (into the learner's peripheral list).
    pub peripheral: usize,
    pub aggregation: Aggregation,
    pub data_used: DataUsed,
    /// Column index on the peripheral (input) side.
    #[serde(default)]
    pub input_col: usize,
    /// Column index on the population (output) side, for same-unit
    /// aggregations.
    #[serde(default)]
    pub output_col: usize,
    /// Pinned category value, or [`NO_CATEGORICAL_VALUE`].
    #[serde(default = "no_category")]
    pub categorical_value: i32,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl AbstractFeature {
    pub fn new(peripheral: usize, aggregation: Aggregation, data_used: DataUsed) -> Self {
        AbstractFeature {
            peripheral,
            aggregation,
            data_used,
            input_col: 0,
            output_col: 0,
            categorical_value: NO_CATEGORICAL_VALUE,
            conditions: Vec::new(),
        }
    }

    pub fn with_input_col(mut self, input_col: usize) -> Self {
        self.input_col = input_col;
        self
    }

    pub fn with_output_col(mut self, output_col: usize) -> Self {
        self.output_col = output_col;
        self
    }

    pub fn with_category(mut self, category: i32) -> Self {
        self.categorical_value = category;
        self
    }

    pub fn with_conditions(mut self, conditions: Vec<Condition>) -> Self {
        self.conditions = conditions;
        self
    }

    /// Rewrites category codes after a shadow-encoding merge.
    pub fn rewrite_categories(&mut self, remap: &[i32]) {
        if self.categorical_value >= 0 {
            self.categorical_value = remap[self.categorical_value as usize];
        }
        for condition in &mut self.conditions {
            if condition.category_used >= 0 {
                condition.category_used = remap[condition.category_used as usize];
            }
        }
    }
}
