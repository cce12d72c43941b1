//! Typed columns.
//!
//! A column is a cheap value-typed handle over a shared buffer: clones see
//! the same data but carry their own name, unit, subroles and optional
//! row-index mapping. Views (subselection, reordering) are expressed through
//! the index vector, so no buffer is copied.
//!
//! Float columns use NaN as null; integer (category code) columns use -1.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The roles a column can hold within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Categorical,
    Discrete,
    JoinKey,
    Numerical,
    Target,
    Text,
    TimeStamp,
    UnusedFloat,
    UnusedString,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Categorical => "categorical",
            Role::Discrete => "discrete",
            Role::JoinKey => "join_key",
            Role::Numerical => "numerical",
            Role::Target => "target",
            Role::Text => "text",
            Role::TimeStamp => "time_stamp",
            Role::UnusedFloat => "unused_float",
            Role::UnusedString => "unused_string",
        }
    }

    pub fn parse(s: &str) -> Result<Role> {
        match s {
            "categorical" => Ok(Role::Categorical),
            "discrete" => Ok(Role::Discrete),
            "join_key" => Ok(Role::JoinKey),
            "numerical" => Ok(Role::Numerical),
            "target" => Ok(Role::Target),
            "text" => Ok(Role::Text),
            "time_stamp" => Ok(Role::TimeStamp),
            "unused_float" => Ok(Role::UnusedFloat),
            "unused_string" => Ok(Role::UnusedString),
            other => Err(Error::InvalidArgument(format!("unknown role '{other}'"))),
        }
    }

    /// Whether columns of this role hold f64 values (as opposed to codes).
    pub fn is_float(&self) -> bool {
        matches!(
            self,
            Role::Discrete | Role::Numerical | Role::Target | Role::TimeStamp | Role::UnusedFloat
        )
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed column: shared buffer + optional row-index view + metadata.
#[derive(Debug, Clone)]
pub struct Column<T> {
    data: Arc<Vec<T>>,
    index: Option<Arc<Vec<u32>>>,
    pub name: String,
    pub unit: String,
    pub subroles: Vec<String>,
}

pub type FloatColumn = Column<f64>;
pub type IntColumn = Column<i32>;

impl<T: Copy> Column<T> {
    pub fn new(name: impl Into<String>, data: Vec<T>) -> Self {
        Column {
            data: Arc::new(data),
            index: None,
            name: name.into(),
            unit: String::new(),
            subroles: Vec::new(),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_subroles(mut self, subroles: Vec<String>) -> Self {
        self.subroles = subroles;
        self
    }

    /// Number of visible rows (after any index mapping).
    pub fn len(&self) -> usize {
        match &self.index {
            Some(ix) => ix.len(),
            None => self.data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The value at visible row `i`.
    #[inline]
    pub fn get(&self, i: usize) -> T {
        match &self.index {
            Some(ix) => self.data[ix[i] as usize],
            None => self.data[i],
        }
    }

    /// Iterates the visible rows in order.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }

    /// A view of this column remapped through `index`. Entries of `index`
    /// refer to the currently visible rows, so views compose.
    pub fn remap(&self, index: &Arc<Vec<u32>>) -> Self {
        let composed = match &self.index {
            Some(own) => Arc::new(index.iter().map(|&i| own[i as usize]).collect()),
            None => Arc::clone(index),
        };
        Column {
            data: Arc::clone(&self.data),
            index: Some(composed),
            name: self.name.clone(),
            unit: self.unit.clone(),
            subroles: self.subroles.clone(),
        }
    }

    /// Copies the visible rows into a fresh contiguous buffer, dropping the
    /// index mapping.
    pub fn materialize(&self) -> Self {
        if self.index.is_none() {
            return self.clone();
        }
        let data: Vec<T> = self.iter().collect();
        Column {
            data: Arc::new(data),
            index: None,
            name: self.name.clone(),
            unit: self.unit.clone(),
            subroles: self.subroles.clone(),
        }
    }

    /// Concatenates `other` below this column, materializing both.
    pub fn append(&self, other: &Column<T>) -> Result<Column<T>> {
        if self.unit != other.unit {
            return Err(Error::Unit(format!(
                "cannot append column '{}': unit '{}' vs. '{}'",
                self.name, self.unit, other.unit
            )));
        }
        let mut data: Vec<T> = self.iter().collect();
        data.extend(other.iter());
        Ok(Column {
            data: Arc::new(data),
            index: None,
            name: self.name.clone(),
            unit: self.unit.clone(),
            subroles: self.subroles.clone(),
        })
    }

    /// Bytes held by the underlying buffer (shared buffers counted once per
    /// handle, like the engine's nbytes accounting).
    pub fn nbytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<T>()
            + self.index.as_ref().map_or(0, |ix| ix.len() * 4)
    }

    /// Read access to the full underlying buffer, ignoring any view.
    pub fn raw(&self) -> &[T] {
        &self.data
    }

    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }
}

impl FloatColumn {
    /// True if the value at row `i` is null (NaN).
    #[inline]
    pub fn is_null(&self, i: usize) -> bool {
        self.get(i).is_nan()
    }

    /// Fraction of null rows; 0.0 on an empty column.
    pub fn null_share(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let nulls = self.iter().filter(|v| v.is_nan()).count();
        nulls as f64 / self.len() as f64
    }
}

impl IntColumn {
    /// True if the code at row `i` is null (-1).
    #[inline]
    pub fn is_null(&self, i: usize) -> bool {
        self.get(i) < 0
    }

    /// Rewrites every non-null code through `remap` into a fresh buffer.
    /// Used after merging a shadow encoding.
    pub fn rewrite_codes(&self, remap: &[i32]) -> IntColumn {
        let data: Vec<i32> = self
            .iter()
            .map(|c| if c < 0 { c } else { remap[c as usize] })
            .collect();
        Column {
            data: Arc::new(data),
            index: None,
            name: self.name.clone(),
            unit: self.unit.clone(),
            subroles: self.subroles.clone(),
        }
    }
}
