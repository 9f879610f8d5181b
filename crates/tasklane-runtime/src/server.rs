//! Task server facade
//!
//! One [`TaskServer`] lives in each process. It owns that process's framer
//! (and so its task id sequence), its view of the engine and the event
//! router, and exposes the task API to application code.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tasklane_core::{
    finish, Delivery, Destination, DispatchMode, Engine, EngineEvent, EventKind, FrameHeader,
    FrameKind, Framer, PreconditionError, ProcessRole, SessionId, TaskConfig, TaskId, TaskResult,
    WorkerId,
};
use tracing::{debug, warn};

use crate::router::{EventRouter, Routed};
use crate::wait_all::WaitAllResults;
use crate::{connection, dispatch, wait, wait_all};

/// Task API of one process
pub struct TaskServer {
    engine: Arc<dyn Engine>,
    framer: Framer,
    config: TaskConfig,
    router: EventRouter,
}

impl TaskServer {
    pub(crate) fn new(engine: Arc<dyn Engine>, config: TaskConfig, router: EventRouter) -> Self {
        // The master can issue neither tasks nor pipe messages, so its framer
        // id is never observed.
        let worker = engine.role().worker_id().unwrap_or(WorkerId::new(0));
        let framer = Framer::new(&config, worker);
        Self {
            engine,
            framer,
            config,
            router,
        }
    }

    pub fn role(&self) -> ProcessRole {
        self.engine.role()
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Tasks dispatched and not yet executed, across the whole server
    pub fn tasking_num(&self) -> i64 {
        self.engine.stats().tasking_num()
    }

    // ------------------------------------------------------------------------
    // Task API
    // ------------------------------------------------------------------------

    /// Fire-and-forget task; the result arrives as `on_finish`
    ///
    /// `dst` of `None` lets the pool pick a task worker round-robin.
    pub fn submit(&self, payload: &[u8], dst: Option<usize>) -> TaskResult<TaskId> {
        self.submit_with_mode(payload, dst, DispatchMode::NonBlocking)
    }

    pub fn submit_with_mode(
        &self,
        payload: &[u8],
        dst: Option<usize>,
        mode: DispatchMode,
    ) -> TaskResult<TaskId> {
        dispatch::submit(
            self.engine.as_ref(),
            &self.framer,
            payload,
            Destination::from_index(dst),
            mode,
        )
    }

    /// Run one task and block this worker until its result arrives
    pub fn wait_one(
        &self,
        payload: &[u8],
        timeout: Duration,
        dst: Option<usize>,
    ) -> TaskResult<Vec<u8>> {
        wait::wait_one(
            self.engine.as_ref(),
            &self.framer,
            payload,
            timeout,
            Destination::from_index(dst),
        )
    }

    /// Run a batch of tasks and block this worker until all have reported
    pub fn wait_all<P: AsRef<[u8]>>(
        &self,
        payloads: &[P],
        timeout: Duration,
    ) -> TaskResult<WaitAllResults> {
        wait_all::wait_all(
            self.engine.as_ref(),
            &self.framer,
            &self.config,
            payloads,
            timeout,
        )
    }

    /// Return the result of `task` to the worker that issued it
    ///
    /// Only task workers finish tasks.
    pub fn finish(&self, task: &FrameHeader, result: &[u8]) -> TaskResult<Delivery> {
        let role = self.engine.role();
        if !role.is_task_worker() {
            warn!("finish called from {}", role);
            return Err(PreconditionError::WrongContext {
                expected: "task worker",
                actual: role,
            }
            .into());
        }
        finish(self.engine.as_ref(), &self.framer, task, result)
    }

    /// Send an out-of-band message to a sibling worker's `on_pipe_message`
    pub fn send_message(&self, worker: WorkerId, payload: &[u8]) -> TaskResult<()> {
        if !self.engine.started() {
            warn!("Server is not running, cannot send message");
            return Err(PreconditionError::NotStarted.into());
        }

        let role = self.engine.role();
        let Some(current) = role.worker_id() else {
            warn!("send_message called from {}", role);
            return Err(PreconditionError::WrongContext {
                expected: "worker or task worker",
                actual: role,
            }
            .into());
        };

        if worker == current {
            warn!("Cannot send message to self");
            return Err(PreconditionError::SelfMessage { worker }.into());
        }

        let total = self.engine.worker_num() + self.engine.task_worker_num();
        if worker.index() >= total {
            warn!("Worker {} is invalid (total {})", worker, total);
            return Err(PreconditionError::InvalidWorker { worker, total }.into());
        }

        if !self.router.is_registered(EventKind::PipeMessage) {
            warn!("No pipe-message handler registered, cannot use send_message");
            return Err(PreconditionError::PipeHandlerMissing.into());
        }

        let mut frame = self.framer.pack(FrameKind::PipeMessage, payload)?;
        frame.set_nonblocking();
        debug!("Sending pipe message {} to worker {}", frame.task_id(), worker);
        self.engine.send_to_worker(worker, frame)
    }

    // ------------------------------------------------------------------------
    // Engine Callbacks
    // ------------------------------------------------------------------------

    /// Route an engine event, finishing tasks whose handler returned a result
    pub fn handle_event(&self, event: EngineEvent) -> TaskResult<Routed> {
        let routed = self.router.route(event)?;
        if let Routed::Reply { task, result } = &routed {
            self.finish(task, result)?;
        }
        Ok(routed)
    }

    // ------------------------------------------------------------------------
    // Connection Primitives
    // ------------------------------------------------------------------------

    pub fn send(&self, session: SessionId, data: &[u8]) -> TaskResult<()> {
        connection::send(self.engine.as_ref(), session, data)
    }

    pub fn close(&self, session: SessionId, reset: bool) -> TaskResult<()> {
        connection::close(self.engine.as_ref(), session, reset)
    }

    pub fn sendto(
        &self,
        address: &str,
        port: u16,
        data: &[u8],
        server_socket: Option<i32>,
    ) -> TaskResult<()> {
        connection::sendto(self.engine.as_ref(), address, port, data, server_socket)
    }

    pub fn sendfile(&self, session: SessionId, path: &Path, offset: u64) -> TaskResult<()> {
        connection::sendfile(self.engine.as_ref(), session, path, offset)
    }
}
