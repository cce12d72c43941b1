//! Category-to-target mapping.
//!
//! For each categorical column of the population frame, learns the average
//! target value per category and emits it as a numerical column.
//! Categories seen fewer than `min_freq` times, unseen categories and
//! nulls map to the global target mean.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::containers::column::{Column, Role};
use crate::containers::frame::DataFrame;
use crate::error::{Error, Result};

use super::Registration;

fn default_min_freq() -> usize {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MappingRegistration {
    #[serde(flatten)]
    at: Registration,
    /// `code -> average target`, serialised as pairs.
    mapping: Vec<(i32, f64)>,
    global_mean: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mapping {
    #[serde(default = "default_min_freq")]
    pub min_freq: usize,
    #[serde(default)]
    registrations: Vec<MappingRegistration>,
}

impl Default for Mapping {
    fn default() -> Self {
        Mapping {
            min_freq: default_min_freq(),
            registrations: Vec::new(),
        }
    }
}

impl Mapping {
    pub fn new(min_freq: usize) -> Self {
        Mapping {
            min_freq,
            registrations: Vec::new(),
        }
    }

    pub fn registrations(&self) -> impl Iterator<Item = &Registration> {
        self.registrations.iter().map(|r| &r.at)
    }

    /// Rewrites category codes after a shadow-encoding merge.
    pub fn rewrite_categories(&mut self, remap: &[i32]) {
        for registration in &mut self.registrations {
            for (code, _) in &mut registration.mapping {
                if *code >= 0 {
                    *code = remap[*code as usize];
                }
            }
            registration.mapping.sort_by_key(|(code, _)| *code);
        }
    }

    pub fn fit(&mut self, frames: &[DataFrame]) -> Result<Vec<DataFrame>> {
        self.registrations.clear();
        let population = frames
            .first()
            .ok_or_else(|| Error::InvalidArgument("no frames to preprocess".to_string()))?;
        let Some(target) = population.targets.first() else {
            // Nothing to map against; the preprocessor degrades to a no-op.
            return Ok(frames.to_vec());
        };
        let target_values: Vec<f64> = target.iter().collect();
        let global_mean = crate::aggregations::avg(&target_values);

        let mut out: Vec<DataFrame> = frames.to_vec();
        let frame = &mut out[0];
        for col in population.categoricals.clone() {
            let mut sums: HashMap<i32, (f64, usize)> = HashMap::new();
            for i in 0..col.len() {
                let code = col.get(i);
                let y = target_values[i];
                if code < 0 || y.is_nan() {
                    continue;
                }
                let entry = sums.entry(code).or_insert((0.0, 0));
                entry.0 += y;
                entry.1 += 1;
            }
            let mut mapping: Vec<(i32, f64)> = sums
                .into_iter()
                .filter(|(_, (_, n))| *n >= self.min_freq)
                .map(|(code, (sum, n))| (code, sum / n as f64))
                .collect();
            if mapping.is_empty() {
                continue;
            }
            mapping.sort_by_key(|(code, _)| *code);

            let registration = MappingRegistration {
                at: Registration {
                    table: 0,
                    column: col.name.clone(),
                },
                mapping,
                global_mean,
            };
            let new_col = apply_mapping(&col, &registration);
            frame.add_float_column(Role::Numerical, new_col)?;
            self.registrations.push(registration);
        }
        Ok(out)
    }

    pub fn transform(&self, frames: &[DataFrame]) -> Result<Vec<DataFrame>> {
        let mut out: Vec<DataFrame> = frames.to_vec();
        for registration in &self.registrations {
            let frame = &mut out[registration.at.table];
            let col = frame
                .int_column(&registration.at.column)
                .ok_or_else(|| {
                    Error::NotFound(format!(
                        "column '{}' in frame '{}'",
                        registration.at.column, frame.name
                    ))
                })?
                .clone();
            let new_col = apply_mapping(&col, registration);
            frame.add_float_column(Role::Numerical, new_col)?;
        }
        Ok(out)
    }
}

fn apply_mapping(
    col: &crate::containers::column::IntColumn,
    registration: &MappingRegistration,
) -> crate::containers::column::FloatColumn {
    let lookup: HashMap<i32, f64> = registration.mapping.iter().copied().collect();
    let values: Vec<f64> = (0..col.len())
        .map(|i| {
            lookup
                .get(&col.get(i))
                .copied()
                .unwrap_or(registration.global_mean)
        })
        .collect();
    Column::new(format!("{}__target_avg", col.name), values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maps_categories_to_target_means() {
        let mut frame = DataFrame::new("pop");
        frame
            .add_int_column(Role::Categorical, Column::new("c", vec![0, 0, 1, 1]))
            .unwrap();
        frame
            .add_float_column(Role::Target, Column::new("y", vec![1.0, 3.0, 10.0, 20.0]))
            .unwrap();

        let mut mapping = Mapping::new(1);
        let out = mapping.fit(&[frame]).unwrap();
        let col = out[0].float_column("c__target_avg").unwrap();
        assert_eq!(col.iter().collect::<Vec<f64>>(), vec![2.0, 2.0, 15.0, 15.0]);
    }

    #[test]
    fn test_unseen_category_gets_global_mean() {
        let mut frame = DataFrame::new("pop");
        frame
            .add_int_column(Role::Categorical, Column::new("c", vec![0, 0, 1, 1]))
            .unwrap();
        frame
            .add_float_column(Role::Target, Column::new("y", vec![1.0, 3.0, 10.0, 20.0]))
            .unwrap();
        let mut mapping = Mapping::new(1);
        mapping.fit(std::slice::from_ref(&frame)).unwrap();

        let mut other = DataFrame::new("pop");
        other
            .add_int_column(Role::Categorical, Column::new("c", vec![7, -1]))
            .unwrap();
        let out = mapping.transform(&[other]).unwrap();
        let col = out[0].float_column("c__target_avg").unwrap();
        assert_eq!(col.iter().collect::<Vec<f64>>(), vec![8.5, 8.5]);
    }

    #[test]
    fn test_min_freq_filters_rare_categories() {
        let mut frame = DataFrame::new("pop");
        frame
            .add_int_column(Role::Categorical, Column::new("c", vec![0, 0, 1]))
            .unwrap();
        frame
            .add_float_column(Role::Target, Column::new("y", vec![1.0, 3.0, 100.0]))
            .unwrap();
        let mut mapping = Mapping::new(2);
        let out = mapping.fit(&[frame]).unwrap();
        let col = out[0].float_column("c__target_avg").unwrap();
        // Category 1 is too rare and falls back to the global mean.
        let values: Vec<f64> = col.iter().collect();
        assert_eq!(values[0], 2.0);
        assert!((values[2] - 104.0 / 3.0).abs() < 1e-12);
    }
}
