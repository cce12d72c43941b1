//! Imputation with dummy columns.
//!
//! Numerical and discrete columns that contain nulls (but are not
//! all-null) get their nulls replaced with the fitted mean; a companion
//! `__imputed` column carries 1.0 where a value was replaced. The filled
//! column keeps the original name so downstream accounting still points at
//! the user column.

use serde::{Deserialize, Serialize};

use crate::containers::column::{Column, FloatColumn, Role};
use crate::containers::frame::DataFrame;
use crate::error::Result;

use super::Registration;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImputationRegistration {
    #[serde(flatten)]
    at: Registration,
    role: Role,
    mean: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Imputation {
    #[serde(default)]
    registrations: Vec<ImputationRegistration>,
}

impl Imputation {
    pub fn new() -> Self {
        Imputation::default()
    }

    pub fn registrations(&self) -> impl Iterator<Item = &Registration> {
        self.registrations.iter().map(|r| &r.at)
    }

    fn apply(col: &FloatColumn, mean: f64) -> (FloatColumn, FloatColumn) {
        let mut filled = Vec::with_capacity(col.len());
        let mut dummy = Vec::with_capacity(col.len());
        for v in col.iter() {
            if v.is_nan() {
                filled.push(mean);
                dummy.push(1.0);
            } else {
                filled.push(v);
                dummy.push(0.0);
            }
        }
        let filled = Column::new(col.name.clone(), filled)
            .with_unit(col.unit.clone())
            .with_subroles(col.subroles.clone());
        let dummy = Column::new(format!("{}__imputed", col.name), dummy);
        (filled, dummy)
    }

    pub fn fit(&mut self, frames: &[DataFrame]) -> Result<Vec<DataFrame>> {
        self.registrations.clear();
        let mut out = Vec::with_capacity(frames.len());
        for (table, frame) in frames.iter().enumerate() {
            let mut frame = frame.clone();
            for (role, bucket) in [
                (Role::Numerical, frames[table].numericals.clone()),
                (Role::Discrete, frames[table].discretes.clone()),
            ] {
                for col in bucket {
                    let share = col.null_share();
                    if share == 0.0 || share == 1.0 {
                        continue;
                    }
                    let mean = crate::aggregations::avg(&col.iter().collect::<Vec<f64>>());
                    self.registrations.push(ImputationRegistration {
                        at: Registration {
                            table,
                            column: col.name.clone(),
                        },
                        role,
                        mean,
                    });
                    let (filled, dummy) = Self::apply(&col, mean);
                    frame.add_float_column(role, filled)?;
                    frame.add_float_column(Role::Numerical, dummy)?;
                }
            }
            out.push(frame);
        }
        Ok(out)
    }

    pub fn transform(&self, frames: &[DataFrame]) -> Result<Vec<DataFrame>> {
        let mut out: Vec<DataFrame> = frames.to_vec();
        for registration in &self.registrations {
            let frame = &mut out[registration.at.table];
            let col = frame
                .float_column(&registration.at.column)
                .ok_or_else(|| {
                    crate::error::Error::NotFound(format!(
                        "column '{}' in frame '{}'",
                        registration.at.column, frame.name
                    ))
                })?
                .clone();
            let (filled, dummy) = Self::apply(&col, registration.mean);
            frame.add_float_column(registration.role, filled)?;
            frame.add_float_column(Role::Numerical, dummy)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_imputes_with_mean_and_dummy() {
        let mut frame = DataFrame::new("pop");
        frame
            .add_float_column(
                Role::Numerical,
                Column::new("x", vec![1.0, f64::NAN, 3.0]),
            )
            .unwrap();

        let mut imputation = Imputation::new();
        let out = imputation.fit(&[frame]).unwrap();

        let filled = out[0].float_column("x").unwrap();
        assert_eq!(filled.iter().collect::<Vec<f64>>(), vec![1.0, 2.0, 3.0]);
        let dummy = out[0].float_column("x__imputed").unwrap();
        assert_eq!(dummy.iter().collect::<Vec<f64>>(), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_transform_reuses_fitted_mean() {
        let mut frame = DataFrame::new("pop");
        frame
            .add_float_column(
                Role::Numerical,
                Column::new("x", vec![1.0, f64::NAN, 3.0]),
            )
            .unwrap();
        let mut imputation = Imputation::new();
        imputation.fit(std::slice::from_ref(&frame)).unwrap();

        let mut other = DataFrame::new("pop");
        other
            .add_float_column(
                Role::Numerical,
                Column::new("x", vec![f64::NAN, 10.0, f64::NAN]),
            )
            .unwrap();
        let out = imputation.transform(&[other]).unwrap();
        let filled = out[0].float_column("x").unwrap();
        // The fit-time mean (2.0), not the transform-time one.
        assert_eq!(filled.iter().collect::<Vec<f64>>(), vec![2.0, 10.0, 2.0]);
    }

    #[test]
    fn test_skips_complete_columns() {
        let mut frame = DataFrame::new("pop");
        frame
            .add_float_column(Role::Numerical, Column::new("x", vec![1.0, 2.0]))
            .unwrap();
        let mut imputation = Imputation::new();
        let out = imputation.fit(&[frame]).unwrap();
        assert!(out[0].float_column("x__imputed").is_none());
    }
}
