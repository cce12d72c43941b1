//! Token-hit columns from free-text fields.
//!
//! At fit time the splitter tokenises every text column (lower-case,
//! alphanumeric runs), keeps the `num_tokens` most frequent tokens, and
//! emits one 0/1 numerical column per kept token. Transform replays the
//! recorded tokens.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::containers::column::{Column, FloatColumn, IntColumn, Role};
use crate::containers::encoding::{Encoding, EncodingShadow};
use crate::containers::frame::DataFrame;
use crate::error::Result;

use super::Registration;

fn default_num_tokens() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenRegistration {
    #[serde(flatten)]
    at: Registration,
    token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextFieldSplitter {
    #[serde(default = "default_num_tokens")]
    pub num_tokens: usize,
    #[serde(default)]
    registrations: Vec<TokenRegistration>,
}

impl Default for TextFieldSplitter {
    fn default() -> Self {
        TextFieldSplitter {
            num_tokens: default_num_tokens(),
            registrations: Vec::new(),
        }
    }
}

fn tokenize(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

fn token_hits(col: &IntColumn, decode: &Encoding, token: &str) -> FloatColumn {
    let values: Vec<f64> = (0..col.len())
        .map(|i| match decode.get(col.get(i)) {
            Some(text) => f64::from(tokenize(text).any(|t| t == token)),
            None => f64::NAN,
        })
        .collect();
    Column::new(format!("{}__contains_{}", col.name, token), values)
}

impl TextFieldSplitter {
    pub fn new(num_tokens: usize) -> Self {
        TextFieldSplitter {
            num_tokens,
            registrations: Vec::new(),
        }
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
        let decoder = super::substring::shadow_snapshot(categories);
        let mut out = Vec::with_capacity(frames.len());
        for (table, frame) in frames.iter().enumerate() {
            let mut frame = frame.clone();
            for col in &frames[table].texts {
                let mut freq: HashMap<String, usize> = HashMap::new();
                for i in 0..col.len() {
                    if let Some(text) = decoder.get(col.get(i)) {
                        for token in tokenize(text) {
                            *freq.entry(token).or_insert(0) += 1;
                        }
                    }
                }
                let mut ranked: Vec<(String, usize)> = freq.into_iter().collect();
                ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

                for (token, _) in ranked.into_iter().take(self.num_tokens) {
                    frame.add_float_column(Role::Numerical, token_hits(col, &decoder, &token))?;
                    self.registrations.push(TokenRegistration {
                        at: Registration {
                            table,
                            column: col.name.clone(),
                        },
                        token,
                    });
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
            let col = frame
                .int_column(&registration.at.column)
                .ok_or_else(|| {
                    crate::error::Error::NotFound(format!(
                        "column '{}' in frame '{}'",
                        registration.at.column, frame.name
                    ))
                })?
                .clone();
            frame.add_float_column(
                Role::Numerical,
                token_hits(&col, categories, &registration.token),
            )?;
        }
        Ok(out)
    }
}
