//! Substring extraction from categorical and text columns.
//!
//! Applies to columns carrying the `substring` subrole and emits the
//! `[begin, begin+length)` slice of each value as a new interned
//! categorical column.

use serde::{Deserialize, Serialize};

use crate::containers::column::{Column, IntColumn, Role};
use crate::containers::encoding::{Encoding, EncodingShadow, NULL_CODE};
use crate::containers::frame::DataFrame;
use crate::error::Result;

use super::Registration;

pub const SUBROLE: &str = "substring";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Substring {
    pub begin: usize,
    pub length: usize,
    #[serde(default)]
    registrations: Vec<Registration>,
}

impl Substring {
    pub fn new(begin: usize, length: usize) -> Self {
        Substring {
            begin,
            length,
            registrations: Vec::new(),
        }
    }

    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    fn slice(&self, value: &str) -> Option<String> {
        let chars: Vec<char> = value.chars().collect();
        if self.begin >= chars.len() {
            return None;
        }
        let end = (self.begin + self.length).min(chars.len());
        Some(chars[self.begin..end].iter().collect())
    }

    fn extract<F: FnMut(&str) -> Option<i32>>(
        &self,
        col: &IntColumn,
        decode: &Encoding,
        mut intern: F,
    ) -> IntColumn {
        let codes: Vec<i32> = (0..col.len())
            .map(|i| {
                decode
                    .get(col.get(i))
                    .and_then(|s| self.slice(s))
                    .and_then(|s| intern(&s))
                    .unwrap_or(NULL_CODE)
            })
            .collect();
        Column::new(
            format!("{}__substr_{}_{}", col.name, self.begin, self.length),
            codes,
        )
    }

    pub fn fit(
        &mut self,
        frames: &[DataFrame],
        categories: &mut EncodingShadow,
    ) -> Result<Vec<DataFrame>> {
        self.registrations.clear();
        // The shadow's frozen view doubles as the decoder for existing
        // codes.
        let decoder = shadow_snapshot(categories);
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
                let new_col = self.extract(col, &decoder, |s| Some(categories.intern(s)));
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
            let new_col = self.extract(&col, categories, |s| categories.find(s));
            frame.add_int_column(Role::Categorical, new_col)?;
        }
        Ok(out)
    }
}

/// Clones the full decodable view of a shadow into a plain encoding.
pub(crate) fn shadow_snapshot(shadow: &EncodingShadow) -> Encoding {
    let mut out = Encoding::new();
    for i in 0..shadow.len() {
        if let Some(s) = shadow.get(i as i32) {
            out.intern(s);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substring_extraction() {
        let mut shared = Encoding::new();
        let codes = vec![
            shared.intern("DE-4020"),
            shared.intern("AT-1010"),
            NULL_CODE,
        ];
        let mut frame = DataFrame::new("pop");
        frame
            .add_int_column(
                Role::Categorical,
                Column::new("zip", codes).with_subroles(vec![SUBROLE.to_string()]),
            )
            .unwrap();

        let mut shadow = EncodingShadow::new(&shared);
        let mut substring = Substring::new(0, 2);
        let out = substring.fit(&[frame], &mut shadow).unwrap();

        let col = out[0].int_column("zip__substr_0_2").unwrap();
        assert_eq!(shadow.get(col.get(0)), Some("DE"));
        assert_eq!(shadow.get(col.get(1)), Some("AT"));
        assert!(col.is_null(2));
        assert_eq!(substring.registrations().len(), 1);
    }

    #[test]
    fn test_columns_without_subrole_untouched() {
        let mut shared = Encoding::new();
        let codes = vec![shared.intern("DE-4020")];
        let mut frame = DataFrame::new("pop");
        frame
            .add_int_column(Role::Categorical, Column::new("zip", codes))
            .unwrap();
        let mut shadow = EncodingShadow::new(&shared);
        let mut substring = Substring::new(0, 2);
        let out = substring.fit(&[frame], &mut shadow).unwrap();
        assert!(out[0].int_column("zip__substr_0_2").is_none());
    }
}
