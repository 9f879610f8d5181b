//! The engine seam
//!
//! The reactor, connection I/O, process supervision and the task pool itself
//! live outside this workspace. [`Engine`] is everything the task subsystem
//! needs from them; [`EngineEvent`] is everything they deliver back.
//!
//! Each process gets its own view of the engine, so [`Engine::role`] answers
//! "who is calling" for the process the code runs in.

use std::path::Path;
use std::sync::Arc;

use crate::datagram::DatagramKind;
use crate::frame::Frame;
use crate::notify::Notifier;
use crate::slot::ResultSlot;
use crate::types::{Destination, DispatchMode, ProcessRole, SessionId, TaskStats, WorkerId};
use crate::errors::DispatchError;
use crate::TaskResult;

// ----------------------------------------------------------------------------
// Engine Interface
// ----------------------------------------------------------------------------

/// Services the task subsystem consumes from the surrounding server engine
pub trait Engine: Send + Sync {
    /// Whether the server has been started
    fn started(&self) -> bool;

    /// Role of the process this view belongs to
    fn role(&self) -> ProcessRole;

    /// Number of connection-serving workers
    fn worker_num(&self) -> usize;

    /// Number of task workers in the pool
    fn task_worker_num(&self) -> usize;

    /// Hand a frame to the task pool, returning the pool index it went to
    ///
    /// `Destination::Any` selects round-robin. May block when the pool's
    /// queue is full, whatever the mode.
    fn dispatch(
        &self,
        frame: Frame,
        dst: Destination,
        mode: DispatchMode,
    ) -> Result<usize, DispatchError>;

    /// Result slot of a connection-serving worker
    fn result_slot(&self, worker: WorkerId) -> Arc<ResultSlot>;

    /// Notification channel of a connection-serving worker
    fn notifier(&self, worker: WorkerId) -> Arc<dyn Notifier>;

    /// Push a frame down the pipe of any worker (task results, pipe messages)
    fn send_to_worker(&self, worker: WorkerId, frame: Frame) -> TaskResult<()>;

    /// Shared task counters
    fn stats(&self) -> &TaskStats;

    /// Write raw bytes to a connection
    fn send_to_connection(&self, session: SessionId, data: &[u8]) -> TaskResult<()>;

    /// Close a connection, optionally discarding its send buffer
    fn close_connection(&self, session: SessionId, reset: bool) -> TaskResult<()>;

    /// Whether a UDP listener of the given family exists
    fn has_udp_listener(&self, ipv6: bool) -> bool;

    /// Send a datagram; `server_socket` picks the listener, `None` = default
    fn send_datagram(
        &self,
        address: &str,
        port: u16,
        data: &[u8],
        server_socket: Option<i32>,
    ) -> TaskResult<()>;

    /// Stream a file to a connection starting at `offset`
    fn send_file(&self, session: SessionId, path: &Path, offset: u64) -> TaskResult<()>;
}

// ----------------------------------------------------------------------------
// Engine Events
// ----------------------------------------------------------------------------

/// Events the engine delivers into the task subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Start,
    Shutdown,
    WorkerStart {
        worker: WorkerId,
    },
    WorkerStop {
        worker: WorkerId,
    },
    Connect {
        session: SessionId,
        reactor: u16,
    },
    Receive {
        session: SessionId,
        data: Vec<u8>,
    },
    Close {
        session: SessionId,
        reactor: u16,
    },
    Packet {
        kind: DatagramKind,
        server_socket: i32,
        raw: Vec<u8>,
    },
    /// A task arrived at a task worker
    Task(Frame),
    /// A fire-and-forget task result arrived at its origin worker
    Finish(Frame),
    /// A sibling worker sent an out-of-band message
    PipeMessage(Frame),
}

impl EngineEvent {
    /// Event kind, for callback registration checks
    pub fn kind(&self) -> EventKind {
        match self {
            EngineEvent::Start => EventKind::Start,
            EngineEvent::Shutdown => EventKind::Shutdown,
            EngineEvent::WorkerStart { .. } => EventKind::WorkerStart,
            EngineEvent::WorkerStop { .. } => EventKind::WorkerStop,
            EngineEvent::Connect { .. } => EventKind::Connect,
            EngineEvent::Receive { .. } => EventKind::Receive,
            EngineEvent::Close { .. } => EventKind::Close,
            EngineEvent::Packet { .. } => EventKind::Packet,
            EngineEvent::Task(_) => EventKind::Task,
            EngineEvent::Finish(_) => EventKind::Finish,
            EngineEvent::PipeMessage(_) => EventKind::PipeMessage,
        }
    }
}

/// Callback kinds an application can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Start,
    Shutdown,
    WorkerStart,
    WorkerStop,
    Connect,
    Receive,
    Close,
    Packet,
    Task,
    Finish,
    PipeMessage,
}

impl EventKind {
    pub const ALL: [EventKind; 11] = [
        EventKind::Start,
        EventKind::Shutdown,
        EventKind::WorkerStart,
        EventKind::WorkerStop,
        EventKind::Connect,
        EventKind::Receive,
        EventKind::Close,
        EventKind::Packet,
        EventKind::Task,
        EventKind::Finish,
        EventKind::PipeMessage,
    ];

    pub const fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

/// Set of callbacks the application wants registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventMask(u16);

impl EventMask {
    pub const NONE: Self = Self(0);

    pub fn all() -> Self {
        EventKind::ALL.iter().fold(Self::NONE, |mask, kind| mask.with(*kind))
    }

    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    pub const fn contains(self, kind: EventKind) -> bool {
        (self.0 & kind.bit()) != 0
    }

    pub fn with(mut self, kind: EventKind) -> Self {
        self.0 |= kind.bit();
        self
    }

    pub fn without(mut self, kind: EventKind) -> Self {
        self.0 &= !kind.bit();
        self
    }

    pub fn kinds(self) -> impl Iterator<Item = EventKind> {
        EventKind::ALL.into_iter().filter(move |kind| self.contains(*kind))
    }
}

impl FromIterator<EventKind> for EventMask {
    fn from_iter<I: IntoIterator<Item = EventKind>>(iter: I) -> Self {
        iter.into_iter().fold(Self::NONE, |mask, kind| mask.with(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_mask() {
        let mask: EventMask = [EventKind::Task, EventKind::Finish].into_iter().collect();

        assert!(mask.contains(EventKind::Task));
        assert!(mask.contains(EventKind::Finish));
        assert!(!mask.contains(EventKind::PipeMessage));
        assert_eq!(mask.kinds().count(), 2);

        let mask = mask.without(EventKind::Task);
        assert!(!mask.contains(EventKind::Task));
    }

    #[test]
    fn test_all_mask_covers_every_kind() {
        let mask = EventMask::all();
        assert!(EventKind::ALL.iter().all(|kind| mask.contains(*kind)));
        assert_eq!(mask.kinds().count(), EventKind::ALL.len());
    }

    #[test]
    fn test_event_kind() {
        let event = EngineEvent::Connect {
            session: 1,
            reactor: 0,
        };
        assert_eq!(event.kind(), EventKind::Connect);
        assert_eq!(EngineEvent::Start.kind(), EventKind::Start);
    }
}
