//! Property-based tests for payload framing
//!
//! These tests verify that framing is symmetric whichever path a payload
//! takes (inline or spilled), that encoded frames survive the trip through
//! the aggregation file, and that task ids from one framer never repeat.

use std::collections::HashSet;

use proptest::prelude::*;
use tasklane_core::{
    encode_record, Frame, FrameKind, Framer, RecordReader, TaskConfig, WorkerId,
};

/// IPC size used by these tests; the inline threshold is this minus the header
const IPC_MAX_SIZE: usize = 512;

fn create_test_framer(dir: &std::path::Path) -> Framer {
    let config = TaskConfig {
        ipc_max_size: IPC_MAX_SIZE,
        ..TaskConfig::testing().with_tmp_dir(dir)
    };
    Framer::new(&config, WorkerId::new(0))
}

/// Payloads on both sides of the inline threshold
fn arb_payload() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..IPC_MAX_SIZE / 2),
        prop::collection::vec(any::<u8>(), IPC_MAX_SIZE..IPC_MAX_SIZE * 8),
    ]
}

fn arb_kind() -> impl Strategy<Value = FrameKind> {
    prop_oneof![
        Just(FrameKind::Task),
        Just(FrameKind::Finish),
        Just(FrameKind::PipeMessage),
    ]
}

proptest! {
    /// Property: unpack(pack(P)) == P for any payload, inline or spilled
    #[test]
    fn pack_unpack_roundtrip(payload in arb_payload(), kind in arb_kind()) {
        let dir = tempfile::tempdir().unwrap();
        let framer = create_test_framer(dir.path());

        let frame = framer.pack(kind, &payload).unwrap();
        prop_assert_eq!(frame.is_spilled(), payload.len() >= framer.inline_threshold());
        prop_assert_eq!(frame.kind(), kind);

        let unpacked = Framer::unpack(frame).unwrap();
        prop_assert_eq!(unpacked, payload);

        // Spill files are consumed by unpack
        prop_assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    /// Property: a frame survives encode/decode with its payload intact
    #[test]
    fn encoded_frame_unpacks_to_payload(payload in arb_payload()) {
        let dir = tempfile::tempdir().unwrap();
        let framer = create_test_framer(dir.path());

        let frame = framer.pack(FrameKind::Task, &payload).unwrap();
        let id = frame.task_id();
        let bytes = frame.encode().unwrap();

        let (decoded, consumed) = Frame::decode(&bytes).unwrap();
        prop_assert_eq!(consumed, bytes.len());
        prop_assert_eq!(decoded.task_id(), id);
        prop_assert_eq!(Framer::unpack(decoded).unwrap(), payload);
    }

    /// Property: a sequence of records reads back in order with matching ids
    #[test]
    fn record_sequence_reads_back(payloads in prop::collection::vec(arb_payload(), 1..8)) {
        let dir = tempfile::tempdir().unwrap();
        let framer = create_test_framer(dir.path());

        let mut buf = Vec::new();
        let mut ids = Vec::new();
        for payload in &payloads {
            let frame = framer.pack(FrameKind::Finish, payload).unwrap();
            ids.push(frame.task_id());
            buf.extend_from_slice(&encode_record(&frame).unwrap());
        }

        let frames: Vec<Frame> = RecordReader::new(&buf).map(|r| r.unwrap()).collect();
        prop_assert_eq!(frames.len(), payloads.len());
        for ((frame, id), payload) in frames.into_iter().zip(ids).zip(payloads) {
            prop_assert_eq!(frame.task_id(), id);
            prop_assert_eq!(Framer::unpack(frame).unwrap(), payload);
        }
    }

    /// Property: task ids from one framer are pairwise distinct
    #[test]
    fn task_ids_are_distinct(count in 1usize..2000) {
        let framer = Framer::new(&TaskConfig::testing(), WorkerId::new(1));
        let ids: HashSet<_> = (0..count).map(|_| framer.next_task_id()).collect();
        prop_assert_eq!(ids.len(), count);
    }
}

#[test]
fn test_ids_from_pack_are_distinct() {
    let dir = tempfile::tempdir().unwrap();
    let framer = create_test_framer(dir.path());

    let mut seen = HashSet::new();
    for i in 0..100u32 {
        let frame = framer.pack(FrameKind::Task, &i.to_le_bytes()).unwrap();
        assert!(seen.insert(frame.task_id()), "duplicate id {}", frame.task_id());
    }
}

#[test]
fn test_framers_in_different_workers_may_collide() {
    // Ids are only unique per issuing worker
    let a = Framer::new(&TaskConfig::testing(), WorkerId::new(0));
    let b = Framer::new(&TaskConfig::testing(), WorkerId::new(1));
    assert_eq!(a.next_task_id(), b.next_task_id());
}
