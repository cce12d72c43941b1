//! Seasonal extraction from time-stamp columns.
//!
//! From each time-stamp column that exhibits variation at the granularity,
//! emits `hour`, `minute`, `month`, `weekday` as categorical columns
//! (codes interned) and `year` as a float column. Granularities whose
//! extracted column has a single distinct value or more than 95 % nulls
//! are skipped at fit time.

use chrono::{DateTime, Datelike, Timelike};
use serde::{Deserialize, Serialize};

use crate::containers::column::{Column, FloatColumn, IntColumn, Role};
use crate::containers::encoding::{Encoding, EncodingShadow, NULL_CODE};
use crate::containers::frame::DataFrame;
use crate::error::Result;

use super::Registration;

const MAX_NULL_SHARE: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Hour,
    Minute,
    Month,
    Weekday,
    Year,
}

impl Granularity {
    pub const ALL: [Granularity; 5] = [
        Granularity::Hour,
        Granularity::Minute,
        Granularity::Month,
        Granularity::Weekday,
        Granularity::Year,
    ];

    pub fn suffix(&self) -> &'static str {
        match self {
            Granularity::Hour => "hour",
            Granularity::Minute => "minute",
            Granularity::Month => "month",
            Granularity::Weekday => "weekday",
            Granularity::Year => "year",
        }
    }

    /// Extracts the granularity from an epoch-second time stamp.
    fn extract(&self, epoch: f64) -> Option<i64> {
        if epoch.is_nan() {
            return None;
        }
        let dt = DateTime::from_timestamp(epoch.floor() as i64, 0)?;
        Some(match self {
            Granularity::Hour => i64::from(dt.hour()),
            Granularity::Minute => i64::from(dt.minute()),
            Granularity::Month => i64::from(dt.month()),
            Granularity::Weekday => i64::from(dt.weekday().number_from_monday()),
            Granularity::Year => i64::from(dt.year()),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SeasonalRegistration {
    #[serde(flatten)]
    at: Registration,
    granularity: Granularity,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Seasonal {
    #[serde(default)]
    registrations: Vec<SeasonalRegistration>,
}

impl Seasonal {
    pub fn new() -> Self {
        Seasonal::default()
    }

    pub fn registrations(&self) -> impl Iterator<Item = &Registration> {
        self.registrations.iter().map(|r| &r.at)
    }

    pub fn fit(
        &mut self,
        frames: &[DataFrame],
        categories: &mut EncodingShadow,
    ) -> Result<Vec<DataFrame>> {
        self.registrations.clear();
        let mut out = Vec::with_capacity(frames.len());
        for (table, frame) in frames.iter().enumerate() {
            let mut frame = frame.clone();
            for ts in frames[table].time_stamps.clone() {
                for granularity in Granularity::ALL {
                    if granularity == Granularity::Year {
                        let col = extract_year(&ts);
                        if has_variation_float(&col) {
                            self.registrations.push(SeasonalRegistration {
                                at: Registration {
                                    table,
                                    column: ts.name.clone(),
                                },
                                granularity,
                            });
                            frame.add_float_column(Role::Numerical, col)?;
                        }
                        continue;
                    }
                    let col =
                        extract_categorical(&ts, granularity, |s| Some(categories.intern(s)));
                    if has_variation_codes(&col) {
                        self.registrations.push(SeasonalRegistration {
                            at: Registration {
                                table,
                                column: ts.name.clone(),
                            },
                            granularity,
                        });
                        frame.add_int_column(Role::Categorical, col)?;
                    }
                }
            }
            out.push(frame);
        }
        Ok(out)
    }

    pub fn transform(&self, frames: &[DataFrame], categories: &Encoding) -> Result<Vec<DataFrame>> {
        let mut out: Vec<DataFrame> = frames.to_vec();
        for registration in &self.registrations {
            let frame = &mut out[registration.at.table];
            let ts = frame.time_stamp(&registration.at.column)?.clone();
            if registration.granularity == Granularity::Year {
                frame.add_float_column(Role::Numerical, extract_year(&ts))?;
            } else {
                let col = extract_categorical(&ts, registration.granularity, |s| {
                    categories.find(s)
                });
                frame.add_int_column(Role::Categorical, col)?;
            }
        }
        Ok(out)
    }
}

fn extract_categorical<F: FnMut(&str) -> Option<i32>>(
    ts: &FloatColumn,
    granularity: Granularity,
    mut intern: F,
) -> IntColumn {
    let codes: Vec<i32> = (0..ts.len())
        .map(|i| match granularity.extract(ts.get(i)) {
            Some(value) => intern(&value.to_string()).unwrap_or(NULL_CODE),
            None => NULL_CODE,
        })
        .collect();
    Column::new(format!("{}__{}", ts.name, granularity.suffix()), codes)
        .with_unit(granularity.suffix())
}

fn extract_year(ts: &FloatColumn) -> FloatColumn {
    let values: Vec<f64> = (0..ts.len())
        .map(|i| match Granularity::Year.extract(ts.get(i)) {
            Some(year) => year as f64,
            None => f64::NAN,
        })
        .collect();
    Column::new(format!("{}__year", ts.name), values).with_unit("year, comparison only")
}

fn has_variation_codes(col: &IntColumn) -> bool {
    if col.is_empty() {
        return false;
    }
    let nulls = col.iter().filter(|&c| c < 0).count();
    if nulls as f64 / col.len() as f64 > MAX_NULL_SHARE {
        return false;
    }
    let distinct: std::collections::HashSet<i32> = col.iter().filter(|&c| c >= 0).collect();
    distinct.len() > 1
}

fn has_variation_float(col: &FloatColumn) -> bool {
    if col.is_empty() || col.null_share() > MAX_NULL_SHARE {
        return false;
    }
    let distinct: std::collections::HashSet<u64> = col
        .iter()
        .filter(|v| !v.is_nan())
        .map(f64::to_bits)
        .collect();
    distinct.len() > 1
}
