//! Application configuration model.
//!
//! Loaded hierarchically by `infrastructure::config::ConfigLoader`:
//! defaults, then `.hivemind/config.yaml`, then `.hivemind/local.yaml`,
//! then `HIVEMIND_*` environment variables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base workspace directory tasks run against.
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// Project grouping key attached to instances and events.
    #[serde(default = "default_project")]
    pub project: String,

    /// Driver used for routing and single-agent execution by default.
    #[serde(default = "default_primary_driver")]
    pub primary_driver: String,

    /// Hard ceiling on simultaneously admitted workers.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub sessions: SessionConfig,

    #[serde(default)]
    pub worktree: WorktreeSettings,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LogConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorSettings,

    /// Named driver configurations. A driver with a `command` runs that
    /// binary; without one it is backed by the built-in mock.
    #[serde(default)]
    pub drivers: HashMap<String, DriverSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Root directory for per-workspace session files.
    #[serde(default = "default_sessions_root")]
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeSettings {
    /// Unlocked worktrees older than this are removed by cleanup.
    #[serde(default = "default_cleanup_after_hours")]
    pub cleanup_after_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Directory for rolling log files; stdout only when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    #[serde(default = "default_single_timeout")]
    pub single_timeout_secs: u64,
    #[serde(default = "default_multi_timeout")]
    pub multi_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverSettings {
    /// External binary to run; the task is appended to its arguments.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cost_per_1k_tokens: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            project: default_project(),
            primary_driver: default_primary_driver(),
            max_concurrent: default_max_concurrent(),
            database: DatabaseConfig::default(),
            sessions: SessionConfig::default(),
            worktree: WorktreeSettings::default(),
            server: ServerConfig::default(),
            logging: LogConfig::default(),
            orchestrator: OrchestratorSettings::default(),
            drivers: HashMap::new(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { root: default_sessions_root() }
    }
}

impl Default for WorktreeSettings {
    fn default() -> Self {
        Self { cleanup_after_hours: default_cleanup_after_hours() }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            enable_cors: true,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            log_dir: None,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            single_timeout_secs: default_single_timeout(),
            multi_timeout_secs: default_multi_timeout(),
        }
    }
}

fn default_workspace() -> String {
    ".".to_string()
}

fn default_project() -> String {
    "default".to_string()
}

fn default_primary_driver() -> String {
    "mock".to_string()
}

fn default_max_concurrent() -> usize {
    10
}

fn default_db_path() -> String {
    ".hivemind/hivemind.db".to_string()
}

fn default_sessions_root() -> PathBuf {
    PathBuf::from(".hivemind/sessions")
}

fn default_cleanup_after_hours() -> u64 {
    24
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8765
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_single_timeout() -> u64 {
    300
}

fn default_multi_timeout() -> u64 {
    600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_concurrent, 10);
        assert_eq!(config.database.path, ".hivemind/hivemind.db");
        assert_eq!(config.worktree.cleanup_after_hours, 24);
        assert_eq!(config.orchestrator.single_timeout_secs, 300);
        assert_eq!(config.orchestrator.multi_timeout_secs, 600);
    }
}
