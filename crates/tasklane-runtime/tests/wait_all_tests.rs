//! Integration Tests for the Wait-All Protocol
//!
//! Drives `wait_all` against the in-process cluster: out-of-order completion,
//! per-index dispatch failure, timeouts with partial results, late writers
//! after the aggregation file is gone, and spilled payloads in both
//! directions.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use proptest::prelude::*;
use tasklane_core::{Engine, PreconditionError, TaskConfig, TaskError};
use tasklane_harness::{
    echo_with_suffix, FnExecutor, HarnessConfig, LocalCluster, TaskExecutor, TaskOutcome,
};
use tasklane_runtime::{ServerBuilder, TaskServer};

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

fn create_test_cluster(dir: &Path, executor: Arc<dyn TaskExecutor>) -> LocalCluster {
    let config = TaskConfig::testing().with_tmp_dir(dir);
    LocalCluster::start(config, HarnessConfig::default(), executor).unwrap()
}

fn create_test_server(cluster: &LocalCluster, worker: u16) -> TaskServer {
    let engine: Arc<dyn Engine> = cluster.worker(worker);
    ServerBuilder::new(engine)
        .with_config(cluster.config().clone())
        .build()
        .unwrap()
}

/// Executor that replies `payload + "-done"` after a delay taken from the
/// first payload byte, in tens of milliseconds
fn delayed_echo() -> Arc<dyn TaskExecutor> {
    Arc::new(FnExecutor::new(|_, mut payload: Vec<u8>| {
        let delay = Duration::from_millis(u64::from(payload.first().copied().unwrap_or(0)) * 10);
        payload.extend_from_slice(b"-done");
        TaskOutcome::ReplyAfter(delay, payload)
    }))
}

fn done(payload: &[u8]) -> Vec<u8> {
    let mut expected = payload.to_vec();
    expected.extend_from_slice(b"-done");
    expected
}

fn leftover_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

// ----------------------------------------------------------------------------
// Completion Tests
// ----------------------------------------------------------------------------

#[test]
fn test_three_tasks_echo_done() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = create_test_cluster(dir.path(), echo_with_suffix("-done"));
    let server = create_test_server(&cluster, 0);

    let payloads: Vec<Vec<u8>> = vec![
        b"payload-00".to_vec(),
        b"payload-01".to_vec(),
        b"payload-02".to_vec(),
    ];
    let results = server.wait_all(&payloads, Duration::from_secs(2)).unwrap();

    assert_eq!(results.len(), 3);
    for (index, payload) in payloads.iter().enumerate() {
        assert_eq!(results[&index], done(payload));
    }
    assert_eq!(cluster.dispatch_calls(), 3);
    assert_eq!(leftover_files(dir.path()), 0);
}

#[test]
fn test_out_of_order_completion() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = create_test_cluster(dir.path(), delayed_echo());
    let server = create_test_server(&cluster, 1);

    // First task finishes last
    let payloads = vec![vec![30u8, b'a'], vec![15u8, b'b'], vec![0u8, b'c']];
    let results = server.wait_all(&payloads, Duration::from_secs(2)).unwrap();

    assert_eq!(results.len(), 3);
    for (index, payload) in payloads.iter().enumerate() {
        assert_eq!(results[&index], done(payload));
    }
}

#[test]
fn test_empty_batch() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = create_test_cluster(dir.path(), echo_with_suffix("-done"));
    let server = create_test_server(&cluster, 0);

    let payloads: Vec<Vec<u8>> = Vec::new();
    let started = Instant::now();
    let results = server.wait_all(&payloads, Duration::from_secs(2)).unwrap();

    assert!(results.is_empty());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(leftover_files(dir.path()), 0);
}

#[test]
fn test_spilled_payloads() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = create_test_cluster(dir.path(), echo_with_suffix("-done"));
    let server = create_test_server(&cluster, 0);

    let big = vec![b'z'; cluster.config().ipc_max_size * 4];
    let payloads = vec![big.clone(), b"small".to_vec()];
    let results = server.wait_all(&payloads, Duration::from_secs(2)).unwrap();

    assert_eq!(results[&0], done(&big));
    assert_eq!(results[&1], done(b"small"));
    assert_eq!(leftover_files(dir.path()), 0);
}

// ----------------------------------------------------------------------------
// Failure Tests
// ----------------------------------------------------------------------------

#[test]
fn test_dispatch_failure_at_index() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = create_test_cluster(dir.path(), echo_with_suffix("-done"));
    let server = create_test_server(&cluster, 0);
    cluster.reject_dispatch(1);

    let payloads = vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()];
    let results = server.wait_all(&payloads, Duration::from_secs(2)).unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[&0], done(b"one"));
    assert!(results[&1].is_empty());
    assert_eq!(results[&2], done(b"three"));
}

#[test]
fn test_every_dispatch_fails_without_waiting() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = create_test_cluster(dir.path(), echo_with_suffix("-done"));
    let server = create_test_server(&cluster, 0);
    cluster.reject_dispatch(0);
    cluster.reject_dispatch(1);

    let started = Instant::now();
    let results = server
        .wait_all(&[b"a".to_vec(), b"b".to_vec()], Duration::from_secs(5))
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(results.len(), 2);
    assert!(results.values().all(|r| r.is_empty()));
}

#[test]
fn test_not_started_makes_no_dispatch_calls() {
    let dir = tempfile::tempdir().unwrap();
    let config = TaskConfig::testing().with_tmp_dir(dir.path());
    let cluster =
        LocalCluster::new(config, HarnessConfig::default(), echo_with_suffix("-done")).unwrap();
    let server = create_test_server(&cluster, 0);

    let err = server
        .wait_all(&[b"a".to_vec()], Duration::from_secs(1))
        .unwrap_err();

    assert!(matches!(
        err,
        TaskError::Precondition(PreconditionError::NotStarted)
    ));
    assert_eq!(cluster.dispatch_calls(), 0);
    assert_eq!(leftover_files(dir.path()), 0);
}

#[test]
fn test_capacity_limit() {
    let dir = tempfile::tempdir().unwrap();
    let config = TaskConfig {
        wait_all_limit: Some(2),
        ..TaskConfig::testing().with_tmp_dir(dir.path())
    };
    let cluster =
        LocalCluster::start(config, HarnessConfig::default(), echo_with_suffix("-done")).unwrap();
    let server = create_test_server(&cluster, 0);

    let payloads = vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()];
    let err = server.wait_all(&payloads, Duration::from_secs(1)).unwrap_err();

    assert!(matches!(
        err,
        TaskError::CapacityExceeded {
            requested: 3,
            limit: 2
        }
    ));
    assert_eq!(cluster.dispatch_calls(), 0);
}

#[test]
fn test_master_cannot_wait() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = create_test_cluster(dir.path(), echo_with_suffix("-done"));
    let engine: Arc<dyn Engine> = cluster.master();
    let server = ServerBuilder::new(engine)
        .with_config(cluster.config().clone())
        .build()
        .unwrap();

    let err = server
        .wait_all(&[b"a".to_vec()], Duration::from_secs(1))
        .unwrap_err();
    assert!(matches!(
        err,
        TaskError::Precondition(PreconditionError::WrongContext { .. })
    ));
    assert_eq!(cluster.dispatch_calls(), 0);
}

// ----------------------------------------------------------------------------
// Timeout Tests
// ----------------------------------------------------------------------------

#[test]
fn test_timeout_returns_partial_results() {
    let dir = tempfile::tempdir().unwrap();
    let executor: Arc<dyn TaskExecutor> = Arc::new(FnExecutor::new(|_, payload: Vec<u8>| {
        if payload == b"slow" {
            TaskOutcome::NoReply
        } else {
            let mut reply = payload;
            reply.extend_from_slice(b"-done");
            TaskOutcome::Reply(reply)
        }
    }));
    let cluster = create_test_cluster(dir.path(), executor);
    let server = create_test_server(&cluster, 0);

    let payloads = vec![b"fast".to_vec(), b"slow".to_vec()];
    let started = Instant::now();
    let results = server
        .wait_all(&payloads, Duration::from_millis(200))
        .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(results.len(), 1);
    assert_eq!(results[&0], done(b"fast"));
    assert!(!results.contains_key(&1));
    assert_eq!(leftover_files(dir.path()), 0);
}

#[test]
fn test_late_result_from_abandoned_batch_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = create_test_cluster(dir.path(), delayed_echo());
    let server = create_test_server(&cluster, 0);

    // Its result lands ~100ms into the next batch
    let abandoned = server
        .wait_all(&[vec![15u8]], Duration::from_millis(50))
        .unwrap();
    assert!(abandoned.is_empty());

    let payload = vec![60u8, b'b'];
    let results = server
        .wait_all(&[payload.clone()], Duration::from_secs(3))
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[&0], done(&payload));

    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(leftover_files(dir.path()), 0);
}

#[test]
fn test_unbounded_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = create_test_cluster(dir.path(), delayed_echo());
    let server = create_test_server(&cluster, 0);

    let payloads = vec![vec![5u8], vec![1u8]];
    let results = server.wait_all(&payloads, Duration::MAX).unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[&0], done(&payloads[0]));
    assert_eq!(results[&1], done(&payloads[1]));
}

#[test]
fn test_late_writer_does_not_recreate_file() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = create_test_cluster(dir.path(), delayed_echo());
    let server = create_test_server(&cluster, 0);

    let results = server
        .wait_all(&[vec![30u8]], Duration::from_millis(50))
        .unwrap();
    assert!(results.is_empty());

    // Let the late result arrive and be dropped
    std::thread::sleep(Duration::from_millis(500));
    assert_eq!(leftover_files(dir.path()), 0);

    // The next batch is unaffected
    let results = server
        .wait_all(&[vec![0u8, b'x']], Duration::from_secs(2))
        .unwrap();
    assert_eq!(results[&0], done(&[0u8, b'x']));
    assert_eq!(leftover_files(dir.path()), 0);
}

// ----------------------------------------------------------------------------
// Property Tests
// ----------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// Property: every index resolves to its own echo, whatever order the
    /// task workers finish in
    #[test]
    fn wait_all_resolves_by_index(
        payloads in prop::collection::vec(
            (0u8..5, prop::collection::vec(any::<u8>(), 1..32)).prop_map(|(delay, mut body)| {
                body.insert(0, delay);
                body
            }),
            1..8,
        )
    ) {
        let dir = tempfile::tempdir().unwrap();
        let cluster = create_test_cluster(dir.path(), delayed_echo());
        let server = create_test_server(&cluster, 1);

        let results = server.wait_all(&payloads, Duration::from_secs(2)).unwrap();

        prop_assert_eq!(results.len(), payloads.len());
        for (index, payload) in payloads.iter().enumerate() {
            prop_assert_eq!(&results[&index], &done(payload));
        }
    }
}
