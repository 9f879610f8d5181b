//! Task execution inside the stub pool
//!
//! A [`TaskExecutor`] plays the part of the application's task handler in
//! every simulated task worker.

use std::sync::Arc;
use std::time::Duration;

use tasklane_core::{Frame, Framer, TaskId, WorkerId};
use tracing::warn;

/// What a task worker does once it has executed a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Finish immediately with this result
    Reply(Vec<u8>),
    /// Finish with this result after a delay
    ReplyAfter(Duration, Vec<u8>),
    /// Never finish
    NoReply,
}

/// Handler run by every simulated task worker
pub trait TaskExecutor: Send + Sync + 'static {
    /// Execute one task; `worker` is the global id of the task worker
    fn execute(&self, worker: WorkerId, frame: Frame) -> TaskOutcome;
}

/// Executor built from a closure over the unpacked payload
pub struct FnExecutor<F> {
    handler: F,
}

impl<F> FnExecutor<F>
where
    F: Fn(TaskId, Vec<u8>) -> TaskOutcome + Send + Sync + 'static,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> TaskExecutor for FnExecutor<F>
where
    F: Fn(TaskId, Vec<u8>) -> TaskOutcome + Send + Sync + 'static,
{
    fn execute(&self, worker: WorkerId, frame: Frame) -> TaskOutcome {
        let task_id = frame.task_id();
        match Framer::unpack(frame) {
            Ok(payload) => (self.handler)(task_id, payload),
            Err(e) => {
                warn!("Task worker {} could not unpack task {}: {}", worker, task_id, e);
                TaskOutcome::NoReply
            }
        }
    }
}

/// Executor that appends `suffix` to every payload
pub fn echo_with_suffix(suffix: &'static str) -> Arc<dyn TaskExecutor> {
    Arc::new(FnExecutor::new(move |_, mut payload: Vec<u8>| {
        payload.extend_from_slice(suffix.as_bytes());
        TaskOutcome::Reply(payload)
    }))
}

/// Executor that never answers
pub fn silent() -> Arc<dyn TaskExecutor> {
    Arc::new(FnExecutor::new(|_, _| TaskOutcome::NoReply))
}
