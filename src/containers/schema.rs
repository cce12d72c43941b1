//! Frame schema snapshots.
//!
//! A fitted pipeline records the schema (name, role, unit, subroles per
//! column) of every frame it was trained on and later checks transform
//! inputs against it: the input must contain at least the snapshot's columns
//! by name and role, and must agree in unit wherever the snapshot declares
//! one.

use serde::{Deserialize, Serialize};

use crate::containers::column::Role;
use crate::containers::frame::DataFrame;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub role: Role,
    pub unit: String,
    #[serde(default)]
    pub subroles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FrameSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

impl FrameSchema {
    /// Snapshots a frame's schema.
    pub fn of(frame: &DataFrame) -> Self {
        let mut columns = Vec::new();
        macro_rules! record {
            ($bucket:ident, $role:expr) => {
                for col in &frame.$bucket {
                    columns.push(ColumnSchema {
                        name: col.name.clone(),
                        role: $role,
                        unit: col.unit.clone(),
                        subroles: col.subroles.clone(),
                    });
                }
            };
        }
        record!(categoricals, Role::Categorical);
        record!(discretes, Role::Discrete);
        record!(join_keys, Role::JoinKey);
        record!(numericals, Role::Numerical);
        record!(targets, Role::Target);
        record!(texts, Role::Text);
        record!(time_stamps, Role::TimeStamp);
        record!(unused_floats, Role::UnusedFloat);
        record!(unused_strings, Role::UnusedString);
        FrameSchema {
            name: frame.name.clone(),
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn names_with_role(&self, role: Role) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.role == role)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Checks that `frame` is a valid transform input for this snapshot.
    /// Targets are exempt - transform inputs need no target column.
    pub fn check_compatible(&self, frame: &DataFrame) -> Result<()> {
        for col in &self.columns {
            if col.role == Role::Target {
                continue;
            }
            let found = frame.role_of(&col.name);
            match found {
                None => {
                    return Err(Error::NotFound(format!(
                        "column '{}' ({}) required by the fitted pipeline is missing from frame '{}'",
                        col.name, col.role, frame.name
                    )))
                }
                Some(role) if role != col.role => {
                    return Err(Error::InvalidArgument(format!(
                        "column '{}' in frame '{}' has role '{}', the fitted pipeline expects '{}'",
                        col.name, frame.name, role, col.role
                    )))
                }
                Some(_) => {}
            }
            if !col.unit.is_empty() {
                let unit = frame
                    .float_column(&col.name)
                    .map(|c| c.unit.clone())
                    .or_else(|| frame.int_column(&col.name).map(|c| c.unit.clone()))
                    .unwrap_or_default();
                if unit != col.unit {
                    return Err(Error::Unit(format!(
                        "column '{}' in frame '{}' has unit '{}', the fitted pipeline expects '{}'",
                        col.name, frame.name, unit, col.unit
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::column::Column;

    fn frame() -> DataFrame {
        let mut df = DataFrame::new("pop");
        df.add_int_column(Role::JoinKey, Column::new("id", vec![1, 2]))
            .unwrap();
        df.add_float_column(
            Role::Numerical,
            Column::new("price", vec![1.0, 2.0]).with_unit("EUR"),
        )
        .unwrap();
        df.add_float_column(Role::Target, Column::new("y", vec![0.0, 1.0]))
            .unwrap();
        df
    }

    #[test]
    fn test_snapshot_and_superset_check() {
        let df = frame();
        let schema = FrameSchema::of(&df);
        assert!(schema.check_compatible(&df).is_ok());

        // A superset stays compatible.
        let mut bigger = df.clone();
        bigger
            .add_float_column(Role::Numerical, Column::new("extra", vec![0.0, 0.0]))
            .unwrap();
        assert!(schema.check_compatible(&bigger).is_ok());
    }

    #[test]
    fn test_missing_column_rejected() {
        let df = frame();
        let schema = FrameSchema::of(&df);
        let mut smaller = df.clone();
        smaller.remove_column("price").unwrap();
        assert_eq!(
            schema.check_compatible(&smaller).unwrap_err().tag(),
            "NotFound"
        );
    }

    #[test]
    fn test_unit_disagreement_rejected() {
        let df = frame();
        let schema = FrameSchema::of(&df);
        let mut other = DataFrame::new("pop");
        other
            .add_int_column(Role::JoinKey, Column::new("id", vec![1]))
            .unwrap();
        other
            .add_float_column(
                Role::Numerical,
                Column::new("price", vec![1.0]).with_unit("USD"),
            )
            .unwrap();
        assert_eq!(schema.check_compatible(&other).unwrap_err().tag(), "Unit");
    }

    #[test]
    fn test_target_not_required_at_transform() {
        let df = frame();
        let schema = FrameSchema::of(&df);
        let mut no_target = df.clone();
        no_target.remove_column("y").unwrap();
        assert!(schema.check_compatible(&no_target).is_ok());
    }
}
