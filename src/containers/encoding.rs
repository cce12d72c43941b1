//! Bidirectional map between strings and category codes.
//!
//! Codes are handed out in insertion order, so they are monotonic and stable
//! for the lifetime of the encoding. The null string maps to -1 and is never
//! stored. Two encodings live in a project: one for category values, one for
//! join-key values.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The string representing null on the wire and in CSV files.
pub const NULL_STRING: &str = "NULL";

/// Code representing null in categorical and join-key columns.
pub const NULL_CODE: i32 = -1;

/// Append-only string interner. `intern` assigns `len()` on first insertion,
/// then returns the stable code.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Encoding {
    strings: Vec<String>,
    #[serde(skip)]
    map: HashMap<String, i32>,
}

impl Encoding {
    pub fn new() -> Self {
        Encoding::default()
    }

    /// Rebuilds the lookup map after deserialization.
    pub fn rebuild_map(&mut self) {
        self.map = self
            .strings
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i as i32))
            .collect();
    }

    /// Interns a string, returning its code. The null string is never stored
    /// and always maps to [`NULL_CODE`].
    pub fn intern(&mut self, s: &str) -> i32 {
        if s == NULL_STRING {
            return NULL_CODE;
        }
        if let Some(&code) = self.map.get(s) {
            return code;
        }
        let code = self.strings.len() as i32;
        self.strings.push(s.to_string());
        self.map.insert(s.to_string(), code);
        code
    }

    /// Looks up a string without inserting.
    pub fn find(&self, s: &str) -> Option<i32> {
        if s == NULL_STRING {
            return Some(NULL_CODE);
        }
        self.map.get(s).copied()
    }

    /// The string for a code; `None` for null or out-of-range codes.
    pub fn get(&self, code: i32) -> Option<&str> {
        if code < 0 {
            return None;
        }
        self.strings.get(code as usize).map(String::as_str)
    }

    /// The string for a code, rendering null as [`NULL_STRING`].
    pub fn get_or_null(&self, code: i32) -> &str {
        self.get(code).unwrap_or(NULL_STRING)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    /// Copies strings from `other` that are not yet present, in order,
    /// and returns a remap table: `remap[code_in_other] = code_in_self`.
    pub fn append(&mut self, other: &Encoding) -> Vec<i32> {
        other.strings.iter().map(|s| self.intern(s)).collect()
    }
}

/// A per-fit overlay over a frozen encoding prefix.
///
/// A fit must not mutate the shared project encoding while holding only a
/// read lock, so it interns new strings into a shadow. On success the shadow
/// suffix is merged into the shared encoding under the write lock; the
/// returned remap table rewrites any columns that reference shadow codes.
/// On failure the shadow is simply dropped and the shared encoding is
/// untouched.
#[derive(Debug, Clone)]
pub struct EncodingShadow {
    parent: Encoding,
    suffix: Encoding,
}

impl EncodingShadow {
    /// Takes a snapshot of the shared encoding as the frozen prefix.
    pub fn new(parent: &Encoding) -> Self {
        EncodingShadow {
            parent: parent.clone(),
            suffix: Encoding::new(),
        }
    }

    /// Interns into the parent prefix when present, otherwise into the
    /// shadow suffix. Suffix codes continue the parent's code space.
    pub fn intern(&mut self, s: &str) -> i32 {
        if s == NULL_STRING {
            return NULL_CODE;
        }
        if let Some(code) = self.parent.find(s) {
            return code;
        }
        self.parent.len() as i32 + self.suffix.intern(s)
    }

    pub fn get(&self, code: i32) -> Option<&str> {
        if code < 0 {
            return None;
        }
        let parent_len = self.parent.len() as i32;
        if code < parent_len {
            self.parent.get(code)
        } else {
            self.suffix.get(code - parent_len)
        }
    }

    pub fn len(&self) -> usize {
        self.parent.len() + self.suffix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if the fit interned anything beyond the shared prefix.
    pub fn has_new_strings(&self) -> bool {
        !self.suffix.is_empty()
    }

    /// Merges the suffix into `shared` (to be called under the project write
    /// lock). Returns a remap table covering the full shadow code space:
    /// `remap[shadow_code] = shared_code`. The parent prefix maps onto
    /// itself, so callers only need to rewrite columns when the shared
    /// encoding grew concurrently.
    pub fn merge_into(self, shared: &mut Encoding) -> Vec<i32> {
        let mut remap: Vec<i32> = (0..self.parent.len() as i32).collect();
        for s in self.suffix.strings() {
            remap.push(shared.intern(s));
        }
        remap
    }
}
