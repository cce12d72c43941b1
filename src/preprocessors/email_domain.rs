//! E-mail domain extraction.
//!
//! Applies to categorical and text columns carrying the `email` subrole
//! and emits the lower-cased domain part as a new categorical column.
//! Values that do not look like an e-mail address map to null.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::containers::column::{Column, IntColumn, Role};
use crate::containers::encoding::{Encoding, EncodingShadow, NULL_CODE};
use crate::containers::frame::DataFrame;
use crate::error::Result;

use super::Registration;

pub const SUBROLE: &str = "email";

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@([^@\s]+\.[^@\s]+)$").expect("static regex"))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailDomain {
    #[serde(default)]
    registrations: Vec<Registration>,
}

impl EmailDomain {
    pub fn new() -> Self {
        EmailDomain::default()
    }

    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    fn extract<F: FnMut(&str) -> Option<i32>>(
        col: &IntColumn,
        decode: &Encoding,
        mut intern: F,
    ) -> IntColumn {
        let codes: Vec<i32> = (0..col.len())
            .map(|i| {
                decode
                    .get(col.get(i))
                    .and_then(|s| {
                        email_regex()
                            .captures(s.trim())
                            .map(|c| c[1].to_lowercase())
                    })
                    .and_then(|domain| intern(&domain))
                    .unwrap_or(NULL_CODE)
            })
            .collect();
        Column::new(format!("{}__domain", col.name), codes)
    }

    pub fn fit(
        &mut self,
        frames: &[DataFrame],
        categories: &mut EncodingShadow,
    ) -> Result<Vec<DataFrame>> {
        self.registrations.clear();
        let decoder = super::substring::shadow_snapshot(categories);
        let mut out = Vec::with_capacity(frames.len());
        for (table, frame) in frames.iter().enumerate() {
            let mut frame = frame.clone();
            for col in frames[table]
                .categoricals
                .iter()
                .chain(&frames[table].texts)
            {
                if !col.subroles.iter().any(|s| s == SUBROLE) {
                    continue;
                }
                let new_col = Self::extract(col, &decoder, |s| Some(categories.intern(s)));
                self.registrations.push(Registration {
                    table,
                    column: col.name.clone(),
                });
                frame.add_int_column(Role::Categorical, new_col)?;
            }
            out.push(frame);
        }
        Ok(out)
    }

    pub fn transform(&self, frames: &[DataFrame], categories: &Encoding) -> Result<Vec<DataFrame>> {
        let mut out: Vec<DataFrame> = frames.to_vec();
        for registration in &self.registrations {
            let frame = &mut out[registration.table];
            let col = frame
                .int_column(&registration.column)
                .ok_or_else(|| {
                    crate::error::Error::NotFound(format!(
                        "column '{}' in frame '{}'",
                        registration.column, frame.name
                    ))
                })?
                .clone();
            let new_col = Self::extract(&col, categories, |s| categories.find(s));
            frame.add_int_column(Role::Categorical, new_col)?;
        }
        Ok(out)
    }
}
