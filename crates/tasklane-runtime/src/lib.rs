//! Tasklane Runtime
//!
//! The task API of a multi-process server, built on the `tasklane-core`
//! engine seam:
//! - `submit`: fire-and-forget dispatch to the task pool
//! - `wait_one`: dispatch one task and block until its result arrives
//! - `wait_all`: dispatch a batch and block until every result arrives
//! - `EventRouter`: engine events to application callbacks
//! - `TaskServer`: the per-process facade over all of the above
//!
//! `wait_one` and `wait_all` block the calling worker for their whole
//! duration; it serves no connections meanwhile. A worker must not run two
//! waits at once, since both share its single result slot and notifier.

pub mod builder;
pub mod connection;
pub mod dispatch;
pub mod router;
pub mod server;
pub mod wait;
pub mod wait_all;

pub use builder::ServerBuilder;
pub use dispatch::submit;
pub use router::{EventRouter, NoopHandler, Routed, ServerHandler};
pub use server::TaskServer;
pub use wait::wait_one;
pub use wait_all::{wait_all, WaitAllResults};

// Re-export core types for convenience
pub use tasklane_core::{
    Delivery, Destination, DispatchMode, EngineEvent, EventKind, EventMask, TaskConfig, TaskError,
    TaskId, TaskResult, WorkerId,
};
