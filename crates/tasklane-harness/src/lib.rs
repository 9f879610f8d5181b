//! Tasklane Harness
//!
//! An in-process stand-in for the multi-process server engine. It provides:
//! - `LocalCluster`: started flag, per-worker result slots and notifiers,
//!   worker pipes and a stub task pool running on a tokio runtime
//! - `LocalEngine`: one process's view of the cluster, implementing
//!   `tasklane_core::Engine`
//! - `TaskExecutor`: the task handler run by every simulated task worker
//!
//! Tests and the CLI drive the runtime through this crate; a production
//! deployment would implement `Engine` over real processes instead.

pub mod cluster;
pub mod executor;

pub use cluster::{HarnessConfig, LocalCluster, LocalEngine, Outbound};
pub use executor::{echo_with_suffix, silent, FnExecutor, TaskExecutor, TaskOutcome};
