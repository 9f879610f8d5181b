//! Core types for the task subsystem
//!
//! Newtypes for identifiers that cross process boundaries, plus the small
//! enums used to describe where a task goes and who is asking.

use core::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Task Identifier
// ----------------------------------------------------------------------------

/// Identifier assigned to a task by the worker that issued it
///
/// Ids come from a per-process counter and are only unique within the issuing
/// worker. Two workers can hand out the same id, so results must never be
/// matched across workers by raw id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(u32);

impl TaskId {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Worker Identifier
// ----------------------------------------------------------------------------

/// Global worker id
///
/// Event workers occupy `0..worker_num`, task workers follow at
/// `worker_num..worker_num + task_worker_num`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId(u16);

impl WorkerId {
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u16> for WorkerId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

/// Connection handle owned by the engine
pub type SessionId = u32;

/// Largest session id the engine hands out
pub const MAX_SESSION_ID: SessionId = 1 << 24;

// ----------------------------------------------------------------------------
// Dispatch Targets
// ----------------------------------------------------------------------------

/// Where a task should run inside the task pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    /// Let the pool pick (round-robin)
    Any,
    /// A specific task worker, by pool index (`0..task_worker_num`)
    Worker(usize),
}

impl Destination {
    pub fn from_index(index: Option<usize>) -> Self {
        match index {
            Some(i) => Destination::Worker(i),
            None => Destination::Any,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Any => write!(f, "any"),
            Destination::Worker(i) => write!(f, "task-worker[{}]", i),
        }
    }
}

/// How the pool should admit a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Fire-and-forget submission; backpressure from the pool is inherited
    NonBlocking,
    /// Submission used by the wait protocols; may block until admitted
    Blocking,
}

// ----------------------------------------------------------------------------
// Process Role
// ----------------------------------------------------------------------------

/// Which kind of process the calling code runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessRole {
    /// Master / routing process
    Master,
    /// Connection-serving worker
    Worker(WorkerId),
    /// Task-executing worker
    TaskWorker(WorkerId),
}

impl ProcessRole {
    pub fn worker_id(self) -> Option<WorkerId> {
        match self {
            ProcessRole::Master => None,
            ProcessRole::Worker(id) | ProcessRole::TaskWorker(id) => Some(id),
        }
    }

    pub fn is_worker(self) -> bool {
        matches!(self, ProcessRole::Worker(_))
    }

    pub fn is_task_worker(self) -> bool {
        matches!(self, ProcessRole::TaskWorker(_))
    }

    pub fn is_master(self) -> bool {
        matches!(self, ProcessRole::Master)
    }
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessRole::Master => write!(f, "master"),
            ProcessRole::Worker(id) => write!(f, "worker {}", id),
            ProcessRole::TaskWorker(id) => write!(f, "task worker {}", id),
        }
    }
}

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

/// Process-wide task counters shared by every worker
#[derive(Debug, Default)]
pub struct TaskStats {
    tasking_num: AtomicI64,
}

impl TaskStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A task was admitted by the pool
    pub fn task_dispatched(&self) {
        self.tasking_num.fetch_add(1, Ordering::AcqRel);
    }

    /// A task worker finished executing a task
    pub fn task_done(&self) {
        self.tasking_num.fetch_sub(1, Ordering::AcqRel);
    }

    /// Tasks currently dispatched but not yet executed
    pub fn tasking_num(&self) -> i64 {
        self.tasking_num.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_predicates() {
        let worker = ProcessRole::Worker(WorkerId::new(1));
        let task = ProcessRole::TaskWorker(WorkerId::new(5));

        assert!(worker.is_worker());
        assert!(!worker.is_task_worker());
        assert!(task.is_task_worker());
        assert!(ProcessRole::Master.is_master());
        assert_eq!(ProcessRole::Master.worker_id(), None);
        assert_eq!(task.worker_id(), Some(WorkerId::new(5)));
    }

    #[test]
    fn test_stats_counting() {
        let stats = TaskStats::new();
        stats.task_dispatched();
        stats.task_dispatched();
        stats.task_done();
        assert_eq!(stats.tasking_num(), 1);
    }

    #[test]
    fn test_destination_from_index() {
        assert_eq!(Destination::from_index(None), Destination::Any);
        assert_eq!(Destination::from_index(Some(2)), Destination::Worker(2));
        assert_eq!(Destination::Worker(2).to_string(), "task-worker[2]");
    }
}
