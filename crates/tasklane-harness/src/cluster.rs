//! In-process engine
//!
//! [`LocalCluster`] stands in for the multi-process server engine. Worker
//! "processes" are [`LocalEngine`] views sharing one state block; task
//! workers are tokio tasks draining bounded queues, so a full queue applies
//! the same backpressure a real pool pipe would.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tasklane_core::{
    finish, Destination, DispatchError, DispatchMode, Engine, EngineEvent, EventCounter, Frame,
    FrameKind, Framer, Notifier, PreconditionError, ProcessRole, ResultSlot, SessionId,
    TaskConfig, TaskError, TaskResult, TaskStats, WorkerId,
};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::executor::{TaskExecutor, TaskOutcome};

// ----------------------------------------------------------------------------
// Harness Configuration
// ----------------------------------------------------------------------------

/// Knobs of the simulated engine
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Capacity of each task worker's queue
    pub queue_depth: usize,
    /// Whether an IPv4 UDP listener exists
    pub udp_ipv4: bool,
    /// Whether an IPv6 UDP listener exists
    pub udp_ipv6: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            queue_depth: 64,
            udp_ipv4: true,
            udp_ipv6: false,
        }
    }
}

/// Something the engine was asked to put on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Send {
        session: SessionId,
        data: Vec<u8>,
    },
    Close {
        session: SessionId,
        reset: bool,
    },
    Datagram {
        address: String,
        port: u16,
        data: Vec<u8>,
        server_socket: Option<i32>,
    },
    File {
        session: SessionId,
        path: PathBuf,
        offset: u64,
    },
}

// ----------------------------------------------------------------------------
// Shared State
// ----------------------------------------------------------------------------

struct ClusterShared {
    config: TaskConfig,
    harness: HarnessConfig,
    started: AtomicBool,
    stats: TaskStats,
    slots: Vec<Arc<ResultSlot>>,
    notifiers: Vec<Arc<EventCounter>>,
    pipes: Vec<Mutex<VecDeque<EngineEvent>>>,
    queues: Vec<mpsc::Sender<Frame>>,
    round_robin: AtomicUsize,
    dispatch_calls: AtomicUsize,
    rejected_calls: Mutex<HashSet<usize>>,
    outbound: Mutex<Vec<Outbound>>,
}

// ----------------------------------------------------------------------------
// Local Cluster
// ----------------------------------------------------------------------------

/// Simulated server: event workers, a task pool and the plumbing between them
pub struct LocalCluster {
    shared: Arc<ClusterShared>,
    runtime: Option<Runtime>,
}

impl LocalCluster {
    /// Build the cluster and its task pool; the server is not started yet
    pub fn new(
        config: TaskConfig,
        harness: HarnessConfig,
        executor: Arc<dyn TaskExecutor>,
    ) -> TaskResult<Self> {
        config.validate()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.task_worker_num.max(1))
            .thread_name("tasklane-task-worker")
            .enable_time()
            .build()?;

        let mut queues = Vec::with_capacity(config.task_worker_num);
        let mut receivers = Vec::with_capacity(config.task_worker_num);
        for _ in 0..config.task_worker_num {
            let (tx, rx) = mpsc::channel(harness.queue_depth.max(1));
            queues.push(tx);
            receivers.push(rx);
        }

        let shared = Arc::new(ClusterShared {
            slots: (0..config.worker_num).map(|_| Arc::new(ResultSlot::new())).collect(),
            notifiers: (0..config.worker_num).map(|_| Arc::new(EventCounter::new())).collect(),
            pipes: (0..config.total_workers()).map(|_| Mutex::new(VecDeque::new())).collect(),
            queues,
            config,
            harness,
            started: AtomicBool::new(false),
            stats: TaskStats::new(),
            round_robin: AtomicUsize::new(0),
            dispatch_calls: AtomicUsize::new(0),
            rejected_calls: Mutex::new(HashSet::new()),
            outbound: Mutex::new(Vec::new()),
        });

        for (index, rx) in receivers.into_iter().enumerate() {
            let id = WorkerId::new((shared.config.worker_num + index) as u16);
            let engine = Arc::new(LocalEngine {
                shared: Arc::clone(&shared),
                role: ProcessRole::TaskWorker(id),
            });
            let framer = Framer::new(&shared.config, id);
            runtime.spawn(run_task_worker(engine, framer, Arc::clone(&executor), rx));
        }

        info!(
            "Local cluster ready: {} workers, {} task workers",
            shared.config.worker_num, shared.config.task_worker_num
        );

        Ok(Self {
            shared,
            runtime: Some(runtime),
        })
    }

    /// Build and start in one go
    pub fn start(
        config: TaskConfig,
        harness: HarnessConfig,
        executor: Arc<dyn TaskExecutor>,
    ) -> TaskResult<Self> {
        let cluster = Self::new(config, harness, executor)?;
        cluster.set_started(true);
        Ok(cluster)
    }

    pub fn set_started(&self, started: bool) {
        self.shared.started.store(started, Ordering::Release);
    }

    pub fn config(&self) -> &TaskConfig {
        &self.shared.config
    }

    /// Engine view of a connection-serving worker
    pub fn worker(&self, id: u16) -> Arc<LocalEngine> {
        self.engine(ProcessRole::Worker(WorkerId::new(id)))
    }

    /// Engine view of the master process
    pub fn master(&self) -> Arc<LocalEngine> {
        self.engine(ProcessRole::Master)
    }

    /// Engine view of a task worker, by pool index
    pub fn task_worker(&self, index: usize) -> Arc<LocalEngine> {
        let id = WorkerId::new((self.shared.config.worker_num + index) as u16);
        self.engine(ProcessRole::TaskWorker(id))
    }

    pub fn engine(&self, role: ProcessRole) -> Arc<LocalEngine> {
        Arc::new(LocalEngine {
            shared: Arc::clone(&self.shared),
            role,
        })
    }

    /// Number of dispatch calls made so far, admitted or not
    pub fn dispatch_calls(&self) -> usize {
        self.shared.dispatch_calls.load(Ordering::Acquire)
    }

    /// Make the `call`-th dispatch (0-based, counted across the cluster) fail
    /// as if the pool were full
    pub fn reject_dispatch(&self, call: usize) {
        self.shared.rejected_calls.lock().insert(call);
    }

    /// Drain the events queued on a worker's pipe
    pub fn take_events(&self, worker: WorkerId) -> Vec<EngineEvent> {
        match self.shared.pipes.get(worker.index()) {
            Some(pipe) => pipe.lock().drain(..).collect(),
            None => Vec::new(),
        }
    }

    /// Everything sent to connections so far
    pub fn outbound(&self) -> Vec<Outbound> {
        self.shared.outbound.lock().clone()
    }

    pub fn stats(&self) -> &TaskStats {
        &self.shared.stats
    }
}

impl Drop for LocalCluster {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

async fn run_task_worker(
    engine: Arc<LocalEngine>,
    framer: Framer,
    executor: Arc<dyn TaskExecutor>,
    mut queue: mpsc::Receiver<Frame>,
) {
    let worker = framer.worker();
    debug!("Task worker {} started", worker);

    while let Some(frame) = queue.recv().await {
        let header = frame.header;
        let outcome = executor.execute(worker, frame);

        let result = match outcome {
            TaskOutcome::Reply(data) => Some(data),
            TaskOutcome::ReplyAfter(delay, data) => {
                tokio::time::sleep(delay).await;
                Some(data)
            }
            TaskOutcome::NoReply => None,
        };

        if let Some(data) = result {
            if let Err(e) = finish(engine.as_ref(), &framer, &header, &data) {
                warn!("Task worker {} failed to finish task {}: {}", worker, header.task_id, e);
            }
        }
        engine.stats().task_done();
    }

    debug!("Task worker {} stopped", worker);
}

// ----------------------------------------------------------------------------
// Local Engine
// ----------------------------------------------------------------------------

/// One process's view of the simulated engine
pub struct LocalEngine {
    shared: Arc<ClusterShared>,
    role: ProcessRole,
}

impl LocalEngine {
    fn event_worker_index(&self, worker: WorkerId) -> usize {
        // Only event workers own a slot; anything else maps to #0
        if worker.index() < self.shared.slots.len() {
            worker.index()
        } else {
            warn!("Worker {} has no result slot, using #0", worker);
            0
        }
    }

    fn record(&self, outbound: Outbound) {
        self.shared.outbound.lock().push(outbound);
    }
}

impl Engine for LocalEngine {
    fn started(&self) -> bool {
        self.shared.started.load(Ordering::Acquire)
    }

    fn role(&self) -> ProcessRole {
        self.role
    }

    fn worker_num(&self) -> usize {
        self.shared.config.worker_num
    }

    fn task_worker_num(&self) -> usize {
        self.shared.config.task_worker_num
    }

    fn dispatch(
        &self,
        frame: Frame,
        dst: Destination,
        mode: DispatchMode,
    ) -> Result<usize, DispatchError> {
        let call = self.shared.dispatch_calls.fetch_add(1, Ordering::AcqRel);
        if self.shared.rejected_calls.lock().remove(&call) {
            debug!("Rejecting dispatch call {} (injected)", call);
            frame.discard();
            return Err(DispatchError::PoolFull);
        }

        let size = self.shared.queues.len();
        let index = match dst {
            Destination::Any if size > 0 => {
                self.shared.round_robin.fetch_add(1, Ordering::AcqRel) % size
            }
            Destination::Worker(index) if index < size => index,
            Destination::Any | Destination::Worker(_) => {
                let worker = match dst {
                    Destination::Worker(index) => index,
                    Destination::Any => 0,
                };
                frame.discard();
                return Err(DispatchError::NoSuchWorker { worker });
            }
        };

        let queue = &self.shared.queues[index];
        let sent = match mode {
            DispatchMode::NonBlocking => match queue.try_send(frame) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(frame)) => {
                    debug!("Task worker {} queue full, waiting for room", index);
                    queue.blocking_send(frame).map_err(|e| e.0)
                }
                Err(mpsc::error::TrySendError::Closed(frame)) => Err(frame),
            },
            DispatchMode::Blocking => queue.blocking_send(frame).map_err(|e| e.0),
        };

        match sent {
            Ok(()) => Ok(index),
            Err(frame) => {
                frame.discard();
                Err(DispatchError::PoolClosed)
            }
        }
    }

    fn result_slot(&self, worker: WorkerId) -> Arc<ResultSlot> {
        Arc::clone(&self.shared.slots[self.event_worker_index(worker)])
    }

    fn notifier(&self, worker: WorkerId) -> Arc<dyn Notifier> {
        self.shared.notifiers[self.event_worker_index(worker)].clone()
    }

    fn send_to_worker(&self, worker: WorkerId, frame: Frame) -> TaskResult<()> {
        let Some(pipe) = self.shared.pipes.get(worker.index()) else {
            frame.discard();
            return Err(PreconditionError::InvalidWorker {
                worker,
                total: self.shared.pipes.len(),
            }
            .into());
        };

        let event = match frame.kind() {
            FrameKind::Task => EngineEvent::Task(frame),
            FrameKind::Finish => EngineEvent::Finish(frame),
            FrameKind::PipeMessage => EngineEvent::PipeMessage(frame),
        };
        pipe.lock().push_back(event);
        Ok(())
    }

    fn stats(&self) -> &TaskStats {
        &self.shared.stats
    }

    fn send_to_connection(&self, session: SessionId, data: &[u8]) -> TaskResult<()> {
        self.record(Outbound::Send {
            session,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn close_connection(&self, session: SessionId, reset: bool) -> TaskResult<()> {
        self.record(Outbound::Close { session, reset });
        Ok(())
    }

    fn has_udp_listener(&self, ipv6: bool) -> bool {
        if ipv6 {
            self.shared.harness.udp_ipv6
        } else {
            self.shared.harness.udp_ipv4
        }
    }

    fn send_datagram(
        &self,
        address: &str,
        port: u16,
        data: &[u8],
        server_socket: Option<i32>,
    ) -> TaskResult<()> {
        if address.is_empty() {
            return Err(TaskError::engine_error("empty datagram address"));
        }
        self.record(Outbound::Datagram {
            address: address.to_string(),
            port,
            data: data.to_vec(),
            server_socket,
        });
        Ok(())
    }

    fn send_file(&self, session: SessionId, path: &Path, offset: u64) -> TaskResult<()> {
        self.record(Outbound::File {
            session,
            path: path.to_path_buf(),
            offset,
        });
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
