//! Configuration system.
//!
//! Hierarchical configuration loading from:
//! - featmill.toml (base configuration)
//! - featmill.local.toml (git-ignored local overrides)
//! - Environment variables (FEATMILL_* prefix, `__` section separator)
//!
//! ## Example
//!
//! ```toml
//! # featmill.toml
//! [server]
//! port = 1708
//!
//! [projects]
//! root = "/var/lib/featmill/projects"
//!
//! [engine]
//! num_threads = 0
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! FEATMILL_SERVER__PORT=1709
//! FEATMILL_PROJECTS__ROOT=/custom/path
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration struct.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub projects: ProjectsConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// TCP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port the daemon listens on. The bind address is always loopback;
    /// non-loopback peers are rejected at accept time.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum accepted command size in bytes.
    #[serde(default = "default_max_command_size")]
    pub max_command_size: usize,
}

/// Where projects live on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectsConfig {
    /// Base directory; each project gets `{root}/{name}/`.
    #[serde(default = "default_projects_root")]
    pub root: PathBuf,
}

/// Engine-wide defaults for fits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker threads for parallel fit stages. 0 = all available cores.
    #[serde(default)]
    pub num_threads: usize,

    /// Number of candidate-split slots the optimisation criterion may hold
    /// before it argsort-prunes the lowest-scoring ones.
    #[serde(default = "default_storage_capacity")]
    pub criterion_storage_capacity: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Optional log file; stderr when unset.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_port() -> u16 {
    1708
}
fn default_max_command_size() -> usize {
    64 * 1024 * 1024
}
fn default_projects_root() -> PathBuf {
    PathBuf::from("./projects")
}
fn default_storage_capacity() -> usize {
    500_000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: default_port(),
            max_command_size: default_max_command_size(),
        }
    }
}

impl Default for ProjectsConfig {
    fn default() -> Self {
        ProjectsConfig {
            root: default_projects_root(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            num_threads: 0,
            criterion_storage_capacity: default_storage_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from the default locations.
    ///
    /// Merges in order:
    /// 1. featmill.toml (base configuration)
    /// 2. featmill.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (FEATMILL_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("featmill.toml"))
            .merge(Toml::file("featmill.local.toml"))
            .merge(Env::prefixed("FEATMILL_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path.
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("FEATMILL_").split("__"))
            .extract()
    }

    /// Number of worker threads after resolving the 0 = all-cores default.
    pub fn resolved_num_threads(&self) -> usize {
        if self.engine.num_threads == 0 {
            num_cpus::get()
        } else {
            self.engine.num_threads
        }
    }
}
