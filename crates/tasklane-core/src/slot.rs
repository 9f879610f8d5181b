//! Per-worker result slot
//!
//! Shared between one connection-serving worker and every task worker. It
//! holds the pending result of a single wait, and for wait-all batches the
//! completion counter plus the path of the aggregation file task workers
//! append to.
//!
//! The lock guards only the slot fields. Task workers never hold it while
//! writing a result record, so unrelated completions are not serialized.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::frame::Frame;

/// Fields protected by the slot lock
#[derive(Debug, Default)]
pub struct SlotState {
    /// Result of the current single wait, if delivered
    pub pending: Option<Frame>,
    /// Aggregation file of the current wait-all batch
    pub aggregation: Option<PathBuf>,
}

/// Result slot of one worker
#[derive(Debug, Default)]
pub struct ResultSlot {
    state: Mutex<SlotState>,
    finished: AtomicUsize,
}

impl ResultSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scoped access to the slot fields; released when the guard drops
    pub fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock()
    }

    /// Prepare the slot for a new wait-all batch
    pub fn begin_batch(&self, aggregation: &Path) {
        let mut state = self.lock();
        self.finished.store(0, Ordering::Release);
        state.aggregation = Some(aggregation.to_path_buf());
    }

    /// Detach the aggregation file; late writers will find nothing to append to
    pub fn end_batch(&self) {
        self.lock().aggregation = None;
    }

    pub fn aggregation_path(&self) -> Option<PathBuf> {
        self.lock().aggregation.clone()
    }

    /// Count one wait-all result as written, returning the new total
    pub fn mark_finished(&self) -> usize {
        self.finished.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::Acquire)
    }

    /// Store a single-wait result, returning whatever it replaced
    pub fn store_result(&self, frame: Frame) -> Option<Frame> {
        self.lock().pending.replace(frame)
    }

    pub fn take_result(&self) -> Option<Frame> {
        self.lock().pending.take()
    }

    /// Forget any single-wait result left over from an earlier wait
    pub fn clear_result(&self) {
        if let Some(stale) = self.take_result() {
            stale.discard();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameBody, FrameFlags, FrameHeader, FrameKind};
    use crate::types::{TaskId, WorkerId};

    fn create_test_frame(id: u32) -> Frame {
        Frame {
            header: FrameHeader {
                task_id: TaskId::new(id),
                len: 2,
                origin: WorkerId::new(3),
                kind: FrameKind::Finish,
                flags: FrameFlags::NONE,
            },
            body: FrameBody::Inline(b"ok".to_vec()),
        }
    }

    #[test]
    fn test_begin_batch_resets_counter() {
        let slot = ResultSlot::new();
        slot.mark_finished();
        slot.mark_finished();

        slot.begin_batch(Path::new("/tmp/batch"));
        assert_eq!(slot.finished(), 0);
        assert_eq!(slot.aggregation_path(), Some(PathBuf::from("/tmp/batch")));

        assert_eq!(slot.mark_finished(), 1);
        slot.end_batch();
        assert_eq!(slot.aggregation_path(), None);
    }

    #[test]
    fn test_store_and_take_result() {
        let slot = ResultSlot::new();
        assert!(slot.store_result(create_test_frame(1)).is_none());

        let replaced = slot.store_result(create_test_frame(2)).unwrap();
        assert_eq!(replaced.task_id(), TaskId::new(1));

        assert_eq!(slot.take_result().unwrap().task_id(), TaskId::new(2));
        assert!(slot.take_result().is_none());
    }

    #[test]
    fn test_clear_result() {
        let slot = ResultSlot::new();
        slot.store_result(create_test_frame(9));
        slot.clear_result();
        assert!(slot.take_result().is_none());
    }
}
