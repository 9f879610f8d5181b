//! Task-worker side of the task protocol
//!
//! When a task worker is done with a task it hands the result back along the
//! route the task was issued on:
//!
//! - fire-and-forget tasks: a `Finish` frame down the origin worker's pipe,
//!   surfacing as `on_finish` there;
//! - wait-all tasks: one record appended to the batch's aggregation file,
//!   then the completion counter, then a wake-up;
//! - single-wait tasks: the origin's result slot, then a wake-up.

use tracing::{debug, warn};

use crate::aggregate::{append_record, AppendOutcome};
use crate::engine::Engine;
use crate::errors::PreconditionError;
use crate::frame::{FrameHeader, Framer};
use crate::TaskResult;

/// How a result was delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Sent to the origin worker's `on_finish`
    Piped,
    /// Stored in the origin worker's result slot
    Slot,
    /// Appended to the wait-all aggregation file
    Aggregated,
    /// The origin stopped waiting; the result is lost
    Dropped,
}

/// Deliver the result of `task` back to the worker that issued it
pub fn finish(
    engine: &dyn Engine,
    framer: &Framer,
    task: &FrameHeader,
    result: &[u8],
) -> TaskResult<Delivery> {
    if !engine.started() {
        warn!("Server is not running, cannot finish task {}", task.task_id);
        return Err(PreconditionError::NotStarted.into());
    }

    let origin = task.origin;
    let frame = framer.pack_reply(task, result)?;

    if task.flags.is_nonblocking() {
        engine.send_to_worker(origin, frame)?;
        return Ok(Delivery::Piped);
    }

    let slot = engine.result_slot(origin);

    if task.flags.is_wait_all() {
        let Some(path) = slot.aggregation_path() else {
            debug!("Worker {} has no wait-all batch, dropping task {}", origin, task.task_id);
            frame.discard();
            return Ok(Delivery::Dropped);
        };

        match append_record(&path, &frame) {
            Ok(AppendOutcome::Written) => {}
            Ok(AppendOutcome::FileGone) => {
                frame.discard();
                return Ok(Delivery::Dropped);
            }
            Err(e) => {
                warn!("Failed to append result of task {} to {:?}: {}", task.task_id, path, e);
                frame.discard();
                return Err(e);
            }
        }

        slot.mark_finished();
        engine.notifier(origin).notify();
        return Ok(Delivery::Aggregated);
    }

    if let Some(stale) = slot.store_result(frame) {
        debug!("Overwrote unclaimed result of task {}", stale.task_id());
        stale.discard();
    }
    engine.notifier(origin).notify();
    Ok(Delivery::Slot)
}
