//! Project state and the per-project lock.
//!
//! A project bundles the frames, pipelines and the two shared encodings.
//! One read-write lock guards the whole bundle: readers (content queries,
//! transforms on fitted pipelines) take shared locks, writers (add,
//! append, delete, fit commits) take the exclusive lock. A fit follows the
//! weak-write pattern: it snapshots the state under the shared lock, works
//! on local shadow encodings, and upgrades to the exclusive lock only to
//! commit.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;

use crate::containers::encoding::{Encoding, EncodingShadow};
use crate::containers::frame::DataFrame;
use crate::error::{Error, Result};
use crate::pipeline::Pipeline;
use crate::storage;

#[derive(Debug, Default)]
pub struct ProjectState {
    pub name: String,
    pub frames: HashMap<String, DataFrame>,
    pub pipelines: HashMap<String, Pipeline>,
    pub categories: Encoding,
    pub join_keys_encoding: Encoding,
}

impl ProjectState {
    pub fn new(name: impl Into<String>) -> Self {
        ProjectState {
            name: name.into(),
            ..ProjectState::default()
        }
    }

    pub fn frame(&self, name: &str) -> Result<&DataFrame> {
        self.frames
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("data frame '{name}'")))
    }

    pub fn frame_mut(&mut self, name: &str) -> Result<&mut DataFrame> {
        self.frames
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("data frame '{name}'")))
    }

    pub fn pipeline(&self, name: &str) -> Result<&Pipeline> {
        self.pipelines
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("pipeline '{name}'")))
    }

    pub fn pipeline_mut(&mut self, name: &str) -> Result<&mut Pipeline> {
        self.pipelines
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("pipeline '{name}'")))
    }

    /// The snapshot a fit takes under the shared lock: frame clones (cheap,
    /// buffers are shared) plus a shadow over the category encoding.
    pub fn fit_snapshot(&self) -> (HashMap<String, DataFrame>, EncodingShadow) {
        (self.frames.clone(), EncodingShadow::new(&self.categories))
    }

    /// Persists the whole project under `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        storage::save_encoding(&dir.join("categories.json"), &self.categories)?;
        storage::save_encoding(&dir.join("join_keys_encoding.json"), &self.join_keys_encoding)?;

        let data_dir = dir.join("data");
        std::fs::create_dir_all(&data_dir)?;
        for (name, frame) in &self.frames {
            storage::save_frame(&data_dir.join(name), frame)?;
        }

        let pipelines_dir = dir.join("pipelines");
        std::fs::create_dir_all(&pipelines_dir)?;
        for (name, pipeline) in &self.pipelines {
            storage::save_pipeline(&pipelines_dir.join(name), pipeline)?;
        }
        Ok(())
    }

    /// Loads a project saved by [`ProjectState::save`]. Missing pieces
    /// (a fresh directory) load as empty.
    pub fn load(dir: &Path, name: &str) -> Result<ProjectState> {
        let mut state = ProjectState::new(name);

        let categories_path = dir.join("categories.json");
        if categories_path.exists() {
            state.categories = storage::load_encoding(&categories_path)?;
        }
        let join_keys_path = dir.join("join_keys_encoding.json");
        if join_keys_path.exists() {
            state.join_keys_encoding = storage::load_encoding(&join_keys_path)?;
        }

        let data_dir = dir.join("data");
        if data_dir.exists() {
            for entry in std::fs::read_dir(&data_dir)? {
                let entry = entry?;
                if entry.path().is_dir() {
                    let frame = storage::load_frame(&entry.path())?;
                    state.frames.insert(frame.name.clone(), frame);
                }
            }
        }

        let pipelines_dir = dir.join("pipelines");
        if pipelines_dir.exists() {
            for entry in std::fs::read_dir(&pipelines_dir)? {
                let entry = entry?;
                if entry.path().is_dir() {
                    let pipeline = storage::load_pipeline(&entry.path())?;
                    let pipeline_name = entry
                        .file_name()
                        .to_str()
                        .unwrap_or_default()
                        .to_string();
                    state.pipelines.insert(pipeline_name, pipeline);
                }
            }
        }
        Ok(state)
    }
}

/// A project behind its read-write lock.
#[derive(Debug)]
pub struct Project {
    pub state: RwLock<ProjectState>,
}

impl Project {
    pub fn new(state: ProjectState) -> Self {
        Project {
            state: RwLock::new(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::column::{Column, Role};

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = ProjectState::new("demo");
        state.categories.intern("red");
        state.join_keys_encoding.intern("k1");

        let mut frame = DataFrame::new("trades");
        frame
            .add_float_column(Role::Numerical, Column::new("v", vec![1.0, 2.0]))
            .unwrap();
        state.frames.insert("trades".to_string(), frame);

        state.save(dir.path()).unwrap();
        let back = ProjectState::load(dir.path(), "demo").unwrap();
        assert_eq!(back.categories.find("red"), Some(0));
        assert_eq!(back.join_keys_encoding.find("k1"), Some(0));
        assert!(back.frames.contains_key("trades"));
    }

    #[test]
    fn test_missing_frame_is_not_found() {
        let state = ProjectState::new("demo");
        assert_eq!(state.frame("nope").unwrap_err().tag(), "NotFound");
        assert_eq!(state.pipeline("nope").unwrap_err().tag(), "NotFound");
    }

    #[test]
    fn test_fit_snapshot_shares_buffers() {
        let mut state = ProjectState::new("demo");
        let mut frame = DataFrame::new("trades");
        frame
            .add_float_column(Role::Numerical, Column::new("v", vec![1.0]))
            .unwrap();
        state.frames.insert("trades".to_string(), frame);
        state.categories.intern("red");

        let (frames, shadow) = state.fit_snapshot();
        assert!(frames.contains_key("trades"));
        assert_eq!(shadow.len(), 1);
    }
}
