/// Configuration management for pyflow
///
/// Handles the storage root, runner policy, container execution and the worker
/// handoff variables. Every field can be set through a `PYFLOW_*` environment variable.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Storage configuration
    pub storage: StorageConfig,
    /// Runner behaviour
    pub runner: RunnerConfig,
    /// Container execution settings
    pub container: ContainerConfig,
    /// Execution handed to this process by a launcher
    pub worker: WorkerConfig,
}

/// Storage root configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding `functions/` and `journal.db` (default: "~/.pyflow")
    pub root: PathBuf,
}

/// Runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Abort the run at the first failed stub instead of continuing
    pub fail_fast: bool,
    /// Record every stub transition in `<root>/journal.db`
    pub journal: bool,
}

/// Remote execution through a container engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Run stubs inside containers rather than in-process
    pub enabled: bool,
    /// Container CLI to invoke (e.g., "docker", "podman")
    pub engine: String,
    /// Image override; defaults to `<function>:latest`
    pub image: Option<String>,
    /// Where the storage root is mounted inside the container
    pub mount_point: String,
}

/// Worker handoff (set by the container launcher)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub function: Option<String>,
    pub execution_id: Option<String>,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                root: std::env::var("PYFLOW_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| default_root()),
            },
            runner: RunnerConfig {
                fail_fast: env_flag("PYFLOW_FAIL_FAST", false),
                journal: env_flag("PYFLOW_JOURNAL", true),
            },
            container: ContainerConfig {
                enabled: env_flag("PYFLOW_CONTAINER", false),
                engine: std::env::var("PYFLOW_CONTAINER_ENGINE")
                    .unwrap_or_else(|_| "docker".to_string()),
                image: std::env::var("PYFLOW_CONTAINER_IMAGE").ok(),
                mount_point: std::env::var("PYFLOW_CONTAINER_MOUNT")
                    .unwrap_or_else(|_| "/root/.pyflow".to_string()),
            },
            worker: WorkerConfig {
                function: std::env::var("PYFLOW_FUNCTION").ok(),
                execution_id: std::env::var("PYFLOW_EXECUTION_ID").ok(),
            },
        }
    }
}

impl Config {
    /// Configuration rooted at an explicit directory, ignoring the environment
    ///
    /// Used by tests and embedders that manage their own storage location.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig { root: root.into() },
            runner: RunnerConfig {
                fail_fast: false,
                journal: true,
            },
            container: ContainerConfig {
                enabled: false,
                engine: "docker".to_string(),
                image: None,
                mount_point: "/root/.pyflow".to_string(),
            },
            worker: WorkerConfig::default(),
        }
    }
}

fn default_root() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".pyflow")
}

/// Parse a boolean environment variable ("1"/"true"/"yes" are true)
fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}
