//! Tasklane CLI Configuration
//!
//! Loaded from an optional TOML file with two sections:
//! - `[task]`: the task subsystem configuration (`TaskConfig`)
//! - `[cli]`: behaviour of the simulated task workers and output defaults
//!
//! Missing sections and fields fall back to their defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tasklane_core::TaskConfig;

use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the CLI application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub task: TaskConfig,
    pub cli: CliConfig,
}

/// CLI-specific configuration options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Enable verbose logging output
    pub verbose: bool,

    /// Suffix the simulated task workers append to every payload
    pub echo_suffix: String,

    /// Simulated execution time of one task, in milliseconds
    pub task_delay_ms: u64,

    /// Timeout used when a command does not give one
    pub default_timeout_ms: u64,

    /// Capacity of each task worker's queue
    pub queue_depth: usize,
}

// ----------------------------------------------------------------------------
// Default Implementations
// ----------------------------------------------------------------------------

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            task: TaskConfig::default().with_task_workers(4),
            cli: CliConfig::default(),
        }
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            echo_suffix: "-done".to_string(),
            task_delay_ms: 0,
            default_timeout_ms: 2000,
            queue_depth: 64,
        }
    }
}

// ----------------------------------------------------------------------------
// Loading
// ----------------------------------------------------------------------------

impl AppConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config
            .task
            .validate()
            .map_err(|e| CliError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [task]
            task_worker_num = 2

            [cli]
            echo_suffix = "!"
            "#,
        )
        .unwrap();

        assert_eq!(config.task.task_worker_num, 2);
        assert_eq!(config.task.worker_num, 4);
        assert_eq!(config.cli.echo_suffix, "!");
        assert_eq!(config.cli.default_timeout_ms, 2000);
    }

    #[test]
    fn test_invalid_task_config_is_rejected() {
        let err = AppConfig::from_toml("[task]\nworker_num = 0\n").unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = AppConfig::default();
        let text = config.to_toml().unwrap();
        assert_eq!(AppConfig::from_toml(&text).unwrap(), config);
    }
}
