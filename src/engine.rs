//! The project manager: the daemon's top-level state.
//!
//! Holds every loaded project behind `Arc` and serialises `set_project` /
//! `delete_project` against each other through the registry mutex; work
//! inside a project is guarded by that project's own read-write lock, so
//! fits on different projects proceed concurrently.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::project::{Project, ProjectState};

#[derive(Debug)]
pub struct ProjectManager {
    config: Config,
    projects: Mutex<HashMap<String, Arc<Project>>>,
}

impl ProjectManager {
    pub fn new(config: Config) -> Self {
        ProjectManager {
            config,
            projects: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn project_dir(&self, name: &str) -> PathBuf {
        self.config.projects.root.join(name)
    }

    fn check_name(name: &str) -> Result<()> {
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.contains("..")
            || name.starts_with('.')
        {
            return Err(Error::InvalidArgument(format!(
                "'{name}' is not a valid project name"
            )));
        }
        Ok(())
    }

    /// Opens a project, loading it from disk when it was saved before and
    /// creating it otherwise.
    pub fn set_project(&self, name: &str) -> Result<Arc<Project>> {
        Self::check_name(name)?;
        let mut projects = self.projects.lock();
        if let Some(project) = projects.get(name) {
            return Ok(Arc::clone(project));
        }

        let dir = self.project_dir(name);
        let state = if dir.exists() {
            info!(project = name, "loading project from disk");
            ProjectState::load(&dir, name)?
        } else {
            info!(project = name, "creating project");
            std::fs::create_dir_all(&dir)?;
            ProjectState::new(name)
        };

        let project = Arc::new(Project::new(state));
        projects.insert(name.to_string(), Arc::clone(&project));
        Ok(project)
    }

    /// A project that was opened before.
    pub fn get_project(&self, name: &str) -> Result<Arc<Project>> {
        self.projects
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("project '{name}' (call set_project first)")))
    }

    /// Drops a project from memory and deletes its directory.
    pub fn delete_project(&self, name: &str) -> Result<()> {
        Self::check_name(name)?;
        let mut projects = self.projects.lock();
        projects.remove(name);
        let dir = self.project_dir(name);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        info!(project = name, "project deleted");
        Ok(())
    }

    /// Saves a loaded project to disk.
    pub fn save_project(&self, name: &str) -> Result<()> {
        let project = self.get_project(name)?;
        let state = project.state.read();
        state.save(&self.project_dir(name))
    }

    /// Every project on disk plus any created in this session.
    pub fn list_projects(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.projects.lock().keys().cloned().collect();
        if self.config.projects.root.exists() {
            for entry in std::fs::read_dir(&self.config.projects.root)? {
                let entry = entry?;
                if entry.path().is_dir() {
                    if let Some(name) = entry.file_name().to_str() {
                        if !names.iter().any(|n| n == name) {
                            names.push(name.to_string());
                        }
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (ProjectManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.projects.root = dir.path().to_path_buf();
        (ProjectManager::new(config), dir)
    }

    #[test]
    fn test_set_and_get_project() {
        let (manager, _dir) = manager();
        manager.set_project("demo").unwrap();
        assert!(manager.get_project("demo").is_ok());
        assert_eq!(manager.get_project("other").unwrap_err().tag(), "NotFound");
    }

    #[test]
    fn test_set_project_is_idempotent() {
        let (manager, _dir) = manager();
        let a = manager.set_project("demo").unwrap();
        let b = manager.set_project("demo").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_delete_project_removes_directory() {
        let (manager, _dir) = manager();
        manager.set_project("demo").unwrap();
        manager.save_project("demo").unwrap();
        assert!(manager.project_dir("demo").exists());
        manager.delete_project("demo").unwrap();
        assert!(!manager.project_dir("demo").exists());
        assert!(manager.get_project("demo").is_err());
    }

    #[test]
    fn test_list_projects_includes_disk() {
        let (manager, _dir) = manager();
        manager.set_project("a").unwrap();
        manager.set_project("b").unwrap();
        manager.save_project("a").unwrap();
        let names = manager.list_projects().unwrap();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let (manager, _dir) = manager();
        assert!(manager.set_project("../escape").is_err());
        assert!(manager.set_project("").is_err());
        assert!(manager.set_project("a/b").is_err());
    }

    #[test]
    fn test_reload_from_disk() {
        let (manager, dir) = manager();
        {
            let project = manager.set_project("demo").unwrap();
            project.state.write().categories.intern("red");
            manager.save_project("demo").unwrap();
        }

        let mut config = Config::default();
        config.projects.root = dir.path().to_path_buf();
        let fresh = ProjectManager::new(config);
        let project = fresh.set_project("demo").unwrap();
        assert_eq!(project.state.read().categories.find("red"), Some(0));
    }
}
