//! Tasklane Core
//!
//! This crate provides the foundational types of the tasklane task subsystem:
//! the wire frame every task, result and pipe message travels in, the spill
//! path for payloads too large for one IPC message, the per-worker result
//! slot and notification channel the wait protocols block on, the wait-all
//! aggregation file format, and the [`Engine`] seam through which the
//! surrounding server runtime is driven.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod aggregate;
pub mod completion;
pub mod config;
pub mod datagram;
pub mod engine;
pub mod errors;
pub mod frame;
pub mod notify;
pub mod slot;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use aggregate::{append_record, encode_record, AggregationFile, AppendOutcome, RecordReader};
pub use completion::{finish, Delivery};
pub use config::TaskConfig;
pub use datagram::{decode_datagram, encode_datagram, split_header, ClientInfo, Datagram, DatagramKind};
pub use engine::{Engine, EngineEvent, EventKind, EventMask};
pub use errors::{DispatchError, FramingError, PreconditionError, Result, TaskError, TaskResult};
pub use frame::{Frame, FrameBody, FrameFlags, FrameHeader, FrameKind, Framer, SpillRef};
pub use notify::{EventCounter, Notifier};
pub use slot::{ResultSlot, SlotState};
pub use types::{
    Destination, DispatchMode, ProcessRole, SessionId, TaskId, TaskStats, WorkerId, MAX_SESSION_ID,
};
