//! Task subsystem configuration
//!
//! A single serde-friendly structure consumed by the framer, the dispatcher
//! and the wait coordinators. Loading it from disk is the caller's business.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::frame::FrameHeader;
use crate::{TaskError, TaskResult};

/// Default size of one IPC message between processes
pub const DEFAULT_IPC_MAX_SIZE: usize = 8192;

/// Default cap on the number of tasks in one wait-all call
pub const DEFAULT_WAIT_ALL_LIMIT: usize = 1024;

// ----------------------------------------------------------------------------
// Task Configuration
// ----------------------------------------------------------------------------

/// Configuration for task dispatch and the wait protocols
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Number of connection-serving workers
    pub worker_num: usize,
    /// Number of task workers in the pool (0 disables tasks)
    pub task_worker_num: usize,
    /// Size of one IPC message; payloads that don't fit are spilled to disk
    pub ipc_max_size: usize,
    /// Directory for spill and aggregation files
    pub tmp_dir: PathBuf,
    /// File name prefix for spilled payloads
    pub spill_prefix: String,
    /// File name prefix for wait-all aggregation files
    pub aggregation_prefix: String,
    /// Maximum number of tasks in one wait-all call (`None` = unbounded)
    pub wait_all_limit: Option<usize>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            worker_num: 4,
            task_worker_num: 0,
            ipc_max_size: DEFAULT_IPC_MAX_SIZE,
            tmp_dir: std::env::temp_dir(),
            spill_prefix: "tasklane.task.".to_string(),
            aggregation_prefix: "tasklane.wait.".to_string(),
            wait_all_limit: Some(DEFAULT_WAIT_ALL_LIMIT),
        }
    }
}

impl TaskConfig {
    /// Small pool with a tiny IPC size so the spill path gets exercised
    pub fn testing() -> Self {
        Self {
            worker_num: 2,
            task_worker_num: 3,
            ipc_max_size: 256,
            ..Self::default()
        }
    }

    /// Larger pool for batch-heavy deployments
    pub fn high_throughput() -> Self {
        Self {
            worker_num: 8,
            task_worker_num: 16,
            ipc_max_size: 65536,
            wait_all_limit: Some(4096),
            ..Self::default()
        }
    }

    pub fn with_task_workers(mut self, task_worker_num: usize) -> Self {
        self.task_worker_num = task_worker_num;
        self
    }

    pub fn with_tmp_dir(mut self, tmp_dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = tmp_dir.into();
        self
    }

    /// Payloads strictly shorter than this travel inline
    pub fn inline_threshold(&self) -> usize {
        self.ipc_max_size.saturating_sub(FrameHeader::SIZE)
    }

    /// Total number of workers addressable by pipe messages
    pub fn total_workers(&self) -> usize {
        self.worker_num + self.task_worker_num
    }

    pub fn validate(&self) -> TaskResult<()> {
        if self.worker_num == 0 {
            return Err(TaskError::config_error("worker_num must be at least 1"));
        }
        if self.total_workers() > u16::MAX as usize {
            return Err(TaskError::config_error(format!(
                "too many workers: {} (max {})",
                self.total_workers(),
                u16::MAX
            )));
        }
        if self.ipc_max_size <= FrameHeader::SIZE {
            return Err(TaskError::config_error(format!(
                "ipc_max_size {} leaves no room for the {}-byte frame header",
                self.ipc_max_size,
                FrameHeader::SIZE
            )));
        }
        if self.spill_prefix.is_empty() || self.aggregation_prefix.is_empty() {
            return Err(TaskError::config_error("file prefixes must not be empty"));
        }
        if self.wait_all_limit == Some(0) {
            return Err(TaskError::config_error(
                "wait_all_limit of 0 would reject every batch; use None for no limit",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TaskConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.inline_threshold(), DEFAULT_IPC_MAX_SIZE - FrameHeader::SIZE);
        assert_eq!(config.task_worker_num, 0);
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(TaskConfig::testing().validate().is_ok());
        assert!(TaskConfig::high_throughput().validate().is_ok());
    }

    #[test]
    fn test_rejects_tiny_ipc_size() {
        let config = TaskConfig {
            ipc_max_size: FrameHeader::SIZE,
            ..TaskConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_wait_all_limit() {
        let config = TaskConfig {
            wait_all_limit: Some(0),
            ..TaskConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
