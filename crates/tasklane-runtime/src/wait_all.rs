//! Wait-all coordinator
//!
//! Dispatches a batch of tasks and blocks until every one of them has
//! reported back or the deadline passes. Task workers append their results
//! to a per-call aggregation file in whatever order they finish; results are
//! matched back to request indices through the id table built while
//! dispatching, never by task id alone.

use std::collections::BTreeMap;
use std::time::Duration;

use tasklane_core::{
    AggregationFile, Destination, DispatchMode, Engine, FrameKind, Framer, RecordReader,
    TaskConfig, TaskError, TaskId, TaskResult,
};
use tracing::{debug, info, warn};

use crate::dispatch::check_task_context;

/// Results of a wait-all batch, keyed by request index
///
/// Indices whose dispatch failed map to an empty payload. Indices still
/// pending when the deadline passed are absent.
pub type WaitAllResults = BTreeMap<usize, Vec<u8>>;

/// Run a batch of tasks synchronously
///
/// Each wake-up that does not complete the batch restarts the `timeout`
/// window. The aggregation file is removed before returning on every path,
/// and results nobody claimed are discarded with it.
pub fn wait_all<P: AsRef<[u8]>>(
    engine: &dyn Engine,
    framer: &Framer,
    config: &TaskConfig,
    payloads: &[P],
    timeout: Duration,
) -> TaskResult<WaitAllResults> {
    let worker = check_task_context(engine, Destination::Any)?;

    if let Some(limit) = config.wait_all_limit {
        if payloads.len() > limit {
            warn!("Too many tasks for one wait-all call: {} > {}", payloads.len(), limit);
            return Err(TaskError::CapacityExceeded {
                requested: payloads.len(),
                limit,
            });
        }
    }

    let file = AggregationFile::create(&config.tmp_dir, &config.aggregation_prefix)?;
    let slot = engine.result_slot(worker);
    let notifier = engine.notifier(worker);

    slot.begin_batch(file.path());
    notifier.drain();

    let mut results = WaitAllResults::new();
    let mut ids: Vec<Option<TaskId>> = vec![None; payloads.len()];
    let mut outstanding = 0usize;

    for (index, payload) in payloads.iter().enumerate() {
        let mut frame = match framer.pack(FrameKind::Task, payload.as_ref()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to frame task at index {}: {}", index, e);
                results.insert(index, Vec::new());
                continue;
            }
        };
        frame.set_wait_all();
        let task_id = frame.task_id();

        match engine.dispatch(frame, Destination::Any, DispatchMode::Blocking) {
            Ok(_) => {
                engine.stats().task_dispatched();
                ids[index] = Some(task_id);
                outstanding += 1;
            }
            Err(e) => {
                warn!("Failed to dispatch task {} at index {}: {}", task_id, index, e);
                results.insert(index, Vec::new());
            }
        }
    }

    // Late writers from an abandoned batch may append here and bump the
    // counter, so it only says when to look; indices settle by id.
    let mut consumed = 0usize;
    let mut unresolved = outstanding;
    let mut timed_out = false;
    while unresolved > 0 {
        if !notifier.wait(timeout) {
            timed_out = true;
            break;
        }
        if slot.finished() < outstanding {
            continue;
        }
        unresolved -= collect_records(&file, &mut consumed, &mut ids, &mut results);
    }

    // Late writers find no path and drop their results from here on
    slot.end_batch();

    if unresolved > 0 {
        unresolved -= collect_records(&file, &mut consumed, &mut ids, &mut results);
    }
    if timed_out {
        warn!(
            "Wait-all timed out with {}/{} tasks finished",
            outstanding - unresolved,
            outstanding
        );
    }

    file.dispose(consumed);

    info!(
        "Wait-all resolved {}/{} tasks ({} failed to dispatch)",
        outstanding - unresolved,
        payloads.len(),
        payloads.len() - outstanding
    );

    Ok(results)
}

/// Read records appended since `consumed` and settle the ones this batch
/// issued
///
/// Returns how many indices were settled. Records of unknown tasks are
/// discarded.
fn collect_records(
    file: &AggregationFile,
    consumed: &mut usize,
    ids: &mut [Option<TaskId>],
    results: &mut WaitAllResults,
) -> usize {
    let contents = match file.contents() {
        Ok(contents) => contents,
        Err(e) => {
            warn!("Failed to read aggregation file {:?}: {}", file.path(), e);
            return 0;
        }
    };
    let Some(fresh) = contents.get(*consumed..) else {
        return 0;
    };

    let mut settled = 0usize;
    let mut reader = RecordReader::new(fresh);
    for record in reader.by_ref() {
        let frame = match record {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Skipping record in aggregation file {:?}: {}", file.path(), e);
                continue;
            }
        };

        let task_id = frame.task_id();
        let Some(index) = ids.iter().position(|id| *id == Some(task_id)) else {
            debug!("Ignoring result of unknown task {}", task_id);
            frame.discard();
            continue;
        };
        ids[index] = None;
        settled += 1;

        match Framer::unpack(frame) {
            Ok(payload) => {
                results.insert(index, payload);
            }
            Err(e) => warn!("Failed to unpack result of task {}: {}", task_id, e),
        }
    }

    *consumed += reader.offset();
    settled
}
