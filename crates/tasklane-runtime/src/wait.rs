//! Single wait coordinator
//!
//! Dispatches one task and blocks the calling worker until the result lands
//! in its result slot or the deadline passes. The worker serves no
//! connections while it waits.

use std::time::{Duration, Instant};

use tasklane_core::{
    Destination, DispatchMode, Engine, FrameKind, Framer, TaskError, TaskResult,
};
use tracing::{debug, warn};

use crate::dispatch::check_task_context;

/// Run one task synchronously and return its result payload
///
/// Fails with [`TaskError::Timeout`] when no result for this task arrives
/// within `timeout`. A result left behind by an earlier abandoned wait is
/// discarded and the wait continues for whatever time remains.
pub fn wait_one(
    engine: &dyn Engine,
    framer: &Framer,
    payload: &[u8],
    timeout: Duration,
    dst: Destination,
) -> TaskResult<Vec<u8>> {
    let worker = check_task_context(engine, dst)?;
    let notifier = engine.notifier(worker);
    let slot = engine.result_slot(worker);

    let stale = notifier.drain();
    if stale > 0 {
        debug!("Worker {} drained {} stale notifications", worker, stale);
    }
    slot.clear_result();

    let frame = framer.pack(FrameKind::Task, payload)?;
    let task_id = frame.task_id();

    if let Err(e) = engine.dispatch(frame, dst, DispatchMode::Blocking) {
        warn!("Failed to dispatch task {}: {}", task_id, e);
        return Err(e.into());
    }
    engine.stats().task_dispatched();

    // None when the timeout is too far out to represent; wait without one
    let deadline = Instant::now().checked_add(timeout);
    loop {
        let remaining = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => timeout,
        };
        if !notifier.wait(remaining) {
            warn!("Task {} timed out after {:?}", task_id, timeout);
            return Err(TaskError::timeout(timeout));
        }

        match slot.take_result() {
            Some(result) if result.task_id() == task_id => return Framer::unpack(result),
            Some(stale) => {
                debug!("Discarding stale result of task {}", stale.task_id());
                stale.discard();
            }
            None => debug!("Spurious wake-up while waiting for task {}", task_id),
        }
    }
}
