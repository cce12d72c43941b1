//! Data frames.
//!
//! A frame is a named bundle of typed columns grouped by role. Column
//! lengths within a frame are invariant-equal across all non-empty role
//! buckets; every mutation re-checks the invariant. Views (`where_mask`,
//! `sort_by_key`) remap rows through an index vector without copying
//! buffers.
//!
//! Join-key indices are computed lazily on first use and cached per frame;
//! any mutation clears the cache.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::containers::column::{FloatColumn, IntColumn, Role};
use crate::containers::index::JoinIndex;
use crate::error::{Error, Result};

/// A named bundle of typed columns plus a lazy join-index cache.
#[derive(Debug, Default)]
pub struct DataFrame {
    pub name: String,

    pub categoricals: Vec<IntColumn>,
    pub discretes: Vec<FloatColumn>,
    pub join_keys: Vec<IntColumn>,
    pub numericals: Vec<FloatColumn>,
    pub targets: Vec<FloatColumn>,
    pub texts: Vec<IntColumn>,
    pub time_stamps: Vec<FloatColumn>,
    pub unused_floats: Vec<FloatColumn>,
    pub unused_strings: Vec<IntColumn>,

    indices: Mutex<HashMap<String, Arc<JoinIndex>>>,
}

impl Clone for DataFrame {
    fn clone(&self) -> Self {
        DataFrame {
            name: self.name.clone(),
            categoricals: self.categoricals.clone(),
            discretes: self.discretes.clone(),
            join_keys: self.join_keys.clone(),
            numericals: self.numericals.clone(),
            targets: self.targets.clone(),
            texts: self.texts.clone(),
            time_stamps: self.time_stamps.clone(),
            unused_floats: self.unused_floats.clone(),
            unused_strings: self.unused_strings.clone(),
            indices: Mutex::new(HashMap::new()),
        }
    }
}

impl DataFrame {
    pub fn new(name: impl Into<String>) -> Self {
        DataFrame {
            name: name.into(),
            ..DataFrame::default()
        }
    }

    /// Number of rows; 0 for a frame without any columns.
    pub fn nrows(&self) -> usize {
        self.float_buckets()
            .iter()
            .flat_map(|b| b.iter())
            .map(FloatColumn::len)
            .next()
            .or_else(|| {
                self.int_buckets()
                    .iter()
                    .flat_map(|b| b.iter())
                    .map(IntColumn::len)
                    .next()
            })
            .unwrap_or(0)
    }

    /// Total bytes held by all column buffers.
    pub fn nbytes(&self) -> usize {
        let floats: usize = self
            .float_buckets()
            .iter()
            .flat_map(|b| b.iter())
            .map(FloatColumn::nbytes)
            .sum();
        let ints: usize = self
            .int_buckets()
            .iter()
            .flat_map(|b| b.iter())
            .map(IntColumn::nbytes)
            .sum();
        floats + ints
    }

    pub fn ncols(&self) -> usize {
        self.float_buckets()
            .iter()
            .map(|b| b.len())
            .sum::<usize>()
            + self.int_buckets().iter().map(|b| b.len()).sum::<usize>()
    }

    fn float_buckets(&self) -> [&Vec<FloatColumn>; 5] {
        [
            &self.discretes,
            &self.numericals,
            &self.targets,
            &self.time_stamps,
            &self.unused_floats,
        ]
    }

    fn int_buckets(&self) -> [&Vec<IntColumn>; 4] {
        [
            &self.categoricals,
            &self.join_keys,
            &self.texts,
            &self.unused_strings,
        ]
    }

    /// Checks the row-length invariant across all non-empty buckets.
    pub fn check_lengths(&self) -> Result<()> {
        let n = self.nrows();
        let bad = self
            .float_buckets()
            .iter()
            .flat_map(|b| b.iter())
            .map(|c| (c.name.clone(), c.len()))
            .chain(
                self.int_buckets()
                    .iter()
                    .flat_map(|b| b.iter())
                    .map(|c| (c.name.clone(), c.len())),
            )
            .find(|(_, len)| *len != n);
        if let Some((name, len)) = bad {
            return Err(Error::Shape(format!(
                "column '{}' in frame '{}' has {} rows, expected {}",
                name, self.name, len, n
            )));
        }
        Ok(())
    }

    /// Adds a float column under `role`, enforcing the length invariant.
    pub fn add_float_column(&mut self, role: Role, col: FloatColumn) -> Result<()> {
        if !role.is_float() {
            return Err(Error::InvalidArgument(format!(
                "role '{role}' does not hold float columns"
            )));
        }
        if self.ncols() > 0 && col.len() != self.nrows() {
            return Err(Error::Shape(format!(
                "column '{}' has {} rows, frame '{}' has {}",
                col.name,
                col.len(),
                self.name,
                self.nrows()
            )));
        }
        self.remove_column_silent(&col.name);
        match role {
            Role::Discrete => self.discretes.push(col),
            Role::Numerical => self.numericals.push(col),
            Role::Target => self.targets.push(col),
            Role::TimeStamp => self.time_stamps.push(col),
            Role::UnusedFloat => self.unused_floats.push(col),
            _ => unreachable!(),
        }
        self.invalidate_indices();
        Ok(())
    }

    /// Adds an integer (code) column under `role`, enforcing the length
    /// invariant.
    pub fn add_int_column(&mut self, role: Role, col: IntColumn) -> Result<()> {
        if role.is_float() {
            return Err(Error::InvalidArgument(format!(
                "role '{role}' does not hold category-code columns"
            )));
        }
        if self.ncols() > 0 && col.len() != self.nrows() {
            return Err(Error::Shape(format!(
                "column '{}' has {} rows, frame '{}' has {}",
                col.name,
                col.len(),
                self.name,
                self.nrows()
            )));
        }
        self.remove_column_silent(&col.name);
        match role {
            Role::Categorical => self.categoricals.push(col),
            Role::JoinKey => self.join_keys.push(col),
            Role::Text => self.texts.push(col),
            Role::UnusedString => self.unused_strings.push(col),
            _ => unreachable!(),
        }
        self.invalidate_indices();
        Ok(())
    }

    fn remove_column_silent(&mut self, name: &str) {
        self.categoricals.retain(|c| c.name != name);
        self.discretes.retain(|c| c.name != name);
        self.join_keys.retain(|c| c.name != name);
        self.numericals.retain(|c| c.name != name);
        self.targets.retain(|c| c.name != name);
        self.texts.retain(|c| c.name != name);
        self.time_stamps.retain(|c| c.name != name);
        self.unused_floats.retain(|c| c.name != name);
        self.unused_strings.retain(|c| c.name != name);
    }

    /// Removes a column by name; errors when absent.
    pub fn remove_column(&mut self, name: &str) -> Result<()> {
        if self.role_of(name).is_none() {
            return Err(Error::NotFound(format!(
                "column '{}' in frame '{}'",
                name, self.name
            )));
        }
        self.remove_column_silent(name);
        self.invalidate_indices();
        Ok(())
    }

    /// The role of a named column, if present.
    pub fn role_of(&self, name: &str) -> Option<Role> {
        let float_roles = [
            (Role::Discrete, &self.discretes),
            (Role::Numerical, &self.numericals),
            (Role::Target, &self.targets),
            (Role::TimeStamp, &self.time_stamps),
            (Role::UnusedFloat, &self.unused_floats),
        ];
        for (role, bucket) in float_roles {
            if bucket.iter().any(|c| c.name == name) {
                return Some(role);
            }
        }
        let int_roles = [
            (Role::Categorical, &self.categoricals),
            (Role::JoinKey, &self.join_keys),
            (Role::Text, &self.texts),
            (Role::UnusedString, &self.unused_strings),
        ];
        for (role, bucket) in int_roles {
            if bucket.iter().any(|c| c.name == name) {
                return Some(role);
            }
        }
        None
    }

    pub fn float_column(&self, name: &str) -> Option<&FloatColumn> {
        self.float_buckets()
            .into_iter()
            .flat_map(|b| b.iter())
            .find(|c| c.name == name)
    }

    pub fn int_column(&self, name: &str) -> Option<&IntColumn> {
        self.int_buckets()
            .into_iter()
            .flat_map(|b| b.iter())
            .find(|c| c.name == name)
    }

    pub fn float_column_mut(&mut self, name: &str) -> Option<&mut FloatColumn> {
        self.discretes
            .iter_mut()
            .chain(self.numericals.iter_mut())
            .chain(self.targets.iter_mut())
            .chain(self.time_stamps.iter_mut())
            .chain(self.unused_floats.iter_mut())
            .find(|c| c.name == name)
    }

    pub fn int_column_mut(&mut self, name: &str) -> Option<&mut IntColumn> {
        self.categoricals
            .iter_mut()
            .chain(self.join_keys.iter_mut())
            .chain(self.texts.iter_mut())
            .chain(self.unused_strings.iter_mut())
            .find(|c| c.name == name)
    }

    pub fn join_key(&self, name: &str) -> Result<&IntColumn> {
        self.join_keys
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "join key '{}' in frame '{}'",
                    name, self.name
                ))
            })
    }

    pub fn time_stamp(&self, name: &str) -> Result<&FloatColumn> {
        self.time_stamps
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "time stamp '{}' in frame '{}'",
                    name, self.name
                ))
            })
    }

    /// The primary time stamp, by convention the first one declared.
    pub fn primary_time_stamp(&self) -> Option<&FloatColumn> {
        self.time_stamps.first()
    }

    /// A view with rows remapped through `index` (applies to every column).
    pub fn sort_by_key(&self, index: Vec<u32>) -> DataFrame {
        let ix = Arc::new(index);
        let mut out = DataFrame::new(self.name.clone());
        out.categoricals = self.categoricals.iter().map(|c| c.remap(&ix)).collect();
        out.discretes = self.discretes.iter().map(|c| c.remap(&ix)).collect();
        out.join_keys = self.join_keys.iter().map(|c| c.remap(&ix)).collect();
        out.numericals = self.numericals.iter().map(|c| c.remap(&ix)).collect();
        out.targets = self.targets.iter().map(|c| c.remap(&ix)).collect();
        out.texts = self.texts.iter().map(|c| c.remap(&ix)).collect();
        out.time_stamps = self.time_stamps.iter().map(|c| c.remap(&ix)).collect();
        out.unused_floats = self.unused_floats.iter().map(|c| c.remap(&ix)).collect();
        out.unused_strings = self.unused_strings.iter().map(|c| c.remap(&ix)).collect();
        out
    }

    /// A view keeping the rows where `mask` is true.
    pub fn where_mask(&self, mask: &[bool]) -> Result<DataFrame> {
        if mask.len() != self.nrows() {
            return Err(Error::Shape(format!(
                "mask has {} entries, frame '{}' has {} rows",
                mask.len(),
                self.name,
                self.nrows()
            )));
        }
        let index: Vec<u32> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &keep)| keep.then_some(i as u32))
            .collect();
        Ok(self.sort_by_key(index))
    }

    /// Appends `other` row-wise. Columns are matched by name and must agree
    /// in role and unit; both frames must have identical column sets.
    pub fn append(&self, other: &DataFrame) -> Result<DataFrame> {
        let mut out = DataFrame::new(self.name.clone());

        macro_rules! append_bucket {
            ($bucket:ident, $role:expr) => {
                for col in &self.$bucket {
                    let other_col = other.$bucket.iter().find(|c| c.name == col.name).ok_or_else(
                        || {
                            Error::Shape(format!(
                                "cannot append to frame '{}': column '{}' ({}) missing from '{}'",
                                self.name,
                                col.name,
                                $role,
                                other.name
                            ))
                        },
                    )?;
                    out.$bucket.push(col.append(other_col)?);
                }
                if other.$bucket.len() != self.$bucket.len() {
                    return Err(Error::Shape(format!(
                        "cannot append to frame '{}': extra {} columns in '{}'",
                        self.name, $role, other.name
                    )));
                }
            };
        }

        append_bucket!(categoricals, Role::Categorical);
        append_bucket!(discretes, Role::Discrete);
        append_bucket!(join_keys, Role::JoinKey);
        append_bucket!(numericals, Role::Numerical);
        append_bucket!(targets, Role::Target);
        append_bucket!(texts, Role::Text);
        append_bucket!(time_stamps, Role::TimeStamp);
        append_bucket!(unused_floats, Role::UnusedFloat);
        append_bucket!(unused_strings, Role::UnusedString);

        out.check_lengths()?;
        Ok(out)
    }

    /// The join index for a join-key column, built on first use and cached.
    /// Runs are sorted by the primary time stamp when one is present.
    pub fn join_index(&self, key_name: &str) -> Result<Arc<JoinIndex>> {
        {
            let cache = self.indices.lock();
            if let Some(index) = cache.get(key_name) {
                return Ok(Arc::clone(index));
            }
        }
        let key = self.join_key(key_name)?;
        let index = Arc::new(JoinIndex::build(key, self.primary_time_stamp()));
        self.indices
            .lock()
            .insert(key_name.to_string(), Arc::clone(&index));
        Ok(index)
    }

    fn invalidate_indices(&self) {
        self.indices.lock().clear();
    }
}
