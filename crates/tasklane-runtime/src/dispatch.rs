//! Task dispatcher
//!
//! Fire-and-forget submission of a task to the pool. The result comes back
//! later as an `on_finish` event on the issuing worker.

use tasklane_core::{
    Destination, DispatchMode, Engine, FrameKind, Framer, PreconditionError, TaskId, TaskResult,
    WorkerId,
};
use tracing::{debug, warn};

/// Check everything that must hold before a task may leave this worker
///
/// Checked in order: server started, pool configured, destination within the
/// pool, caller is a connection-serving worker. Returns the caller's id.
pub(crate) fn check_task_context(engine: &dyn Engine, dst: Destination) -> TaskResult<WorkerId> {
    if !engine.started() {
        warn!("Server is not running, cannot dispatch task");
        return Err(PreconditionError::NotStarted.into());
    }

    let pool_size = engine.task_worker_num();
    if pool_size == 0 {
        warn!("Cannot dispatch task: task_worker_num is 0");
        return Err(PreconditionError::PoolNotConfigured.into());
    }

    if let Destination::Worker(dst) = dst {
        if dst >= pool_size {
            warn!("Destination worker {} must be less than {}", dst, pool_size);
            return Err(PreconditionError::InvalidDestination { dst, pool_size }.into());
        }
    }

    let role = engine.role();
    match role.worker_id() {
        Some(worker) if role.is_worker() => Ok(worker),
        _ => {
            warn!("Task dispatch attempted from {}", role);
            Err(PreconditionError::WrongContext {
                expected: "worker",
                actual: role,
            }
            .into())
        }
    }
}

/// Submit a task without waiting for its result
///
/// `mode` only governs admission into the pool: a full queue may still block
/// the caller in either mode. On success the in-flight counter is bumped and
/// the assigned task id is returned.
pub fn submit(
    engine: &dyn Engine,
    framer: &Framer,
    payload: &[u8],
    dst: Destination,
    mode: DispatchMode,
) -> TaskResult<TaskId> {
    check_task_context(engine, dst)?;

    let mut frame = framer.pack(FrameKind::Task, payload)?;
    frame.set_nonblocking();
    let task_id = frame.task_id();

    match engine.dispatch(frame, dst, mode) {
        Ok(index) => {
            engine.stats().task_dispatched();
            debug!("Task {} dispatched to task worker {} ({})", task_id, index, dst);
            Ok(task_id)
        }
        Err(e) => {
            warn!("Failed to dispatch task {}: {}", task_id, e);
            Err(e.into())
        }
    }
}
