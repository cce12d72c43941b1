//! Column-wise preprocessors.
//!
//! Each preprocessor discovers its target columns by role and subrole
//! heuristics, materialises new columns under deterministic names at fit
//! time, records the `(table, column)` registrations it acted on, and
//! replays exactly those registrations at transform time.
//!
//! Generated names append a `__<rule>` suffix to the source column, which
//! is what the importance rewrite inverts to map generated columns back to
//! user columns.

pub mod email_domain;
pub mod imputation;
pub mod mapping;
pub mod seasonal;
pub mod substring;
pub mod text_splitter;

pub use email_domain::EmailDomain;
pub use imputation::Imputation;
pub use mapping::Mapping;
pub use seasonal::Seasonal;
pub use substring::Substring;
pub use text_splitter::TextFieldSplitter;

use serde::{Deserialize, Serialize};

use crate::containers::encoding::{Encoding, EncodingShadow};
use crate::containers::frame::DataFrame;
use crate::error::Result;

/// Where a registered column lives: frame 0 is the population, frame `i`
/// the i-th table of the join graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub table: usize,
    pub column: String,
}

/// The tagged sum of all preprocessors, dispatched without a virtual
/// hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type_")]
pub enum Preprocessor {
    Seasonal(Seasonal),
    Substring(Substring),
    EmailDomain(EmailDomain),
    Imputation(Imputation),
    Mapping(Mapping),
    TextFieldSplitter(TextFieldSplitter),
}

impl Preprocessor {
    /// Fits on the given frames and returns the transformed bundle. New
    /// category strings go through the fit's shadow encoding.
    pub fn fit(
        &mut self,
        frames: &[DataFrame],
        categories: &mut EncodingShadow,
    ) -> Result<Vec<DataFrame>> {
        match self {
            Preprocessor::Seasonal(p) => p.fit(frames, categories),
            Preprocessor::Substring(p) => p.fit(frames, categories),
            Preprocessor::EmailDomain(p) => p.fit(frames, categories),
            Preprocessor::Imputation(p) => p.fit(frames),
            Preprocessor::Mapping(p) => p.fit(frames),
            Preprocessor::TextFieldSplitter(p) => p.fit(frames, categories),
        }
    }

    /// Replays the fitted registrations on a compatible bundle. Category
    /// lookups are read-only; unseen strings map to null.
    pub fn transform(
        &self,
        frames: &[DataFrame],
        categories: &Encoding,
    ) -> Result<Vec<DataFrame>> {
        match self {
            Preprocessor::Seasonal(p) => p.transform(frames, categories),
            Preprocessor::Substring(p) => p.transform(frames, categories),
            Preprocessor::EmailDomain(p) => p.transform(frames, categories),
            Preprocessor::Imputation(p) => p.transform(frames),
            Preprocessor::Mapping(p) => p.transform(frames),
            Preprocessor::TextFieldSplitter(p) => p.transform(frames, categories),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Preprocessor::Seasonal(_) => "Seasonal",
            Preprocessor::Substring(_) => "Substring",
            Preprocessor::EmailDomain(_) => "EmailDomain",
            Preprocessor::Imputation(_) => "Imputation",
            Preprocessor::Mapping(_) => "Mapping",
            Preprocessor::TextFieldSplitter(_) => "TextFieldSplitter",
        }
    }
}

/// Maps a generated column name back to the user column it derives from by
/// stripping the generation suffix.
pub fn user_column_of(name: &str) -> &str {
    match name.find("__") {
        Some(pos) => &name[..pos],
        None => name,
    }
}
