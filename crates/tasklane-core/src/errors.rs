//! Error types for the task subsystem
//!
//! Every operation in this workspace fails closed: preconditions are checked
//! before any side effect, and the caller receives one of the variants below
//! instead of a panic. The specific enums mirror the failure taxonomy of the
//! dispatch and wait protocols and are unified by [`TaskError`].

use std::path::PathBuf;

use crate::types::{ProcessRole, WorkerId};

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Conditions that must hold before a call has any side effect
#[derive(Debug, thiserror::Error)]
pub enum PreconditionError {
    #[error("Server is not running")]
    NotStarted,
    #[error("Task pool is not configured (task_worker_num is 0)")]
    PoolNotConfigured,
    #[error("Destination worker {dst} must be less than task_worker_num ({pool_size})")]
    InvalidDestination { dst: usize, pool_size: usize },
    #[error("Operation can only be used in a {expected} process, called from {actual}")]
    WrongContext {
        expected: &'static str,
        actual: ProcessRole,
    },
    #[error("Cannot send message to self (worker {worker})")]
    SelfMessage { worker: WorkerId },
    #[error("Worker {worker} is invalid (total workers: {total})")]
    InvalidWorker { worker: WorkerId, total: usize },
    #[error("No pipe-message handler registered, cannot use send_message")]
    PipeHandlerMissing,
    #[error("Payload is empty")]
    EmptyPayload,
    #[error("Invalid session id {session}")]
    InvalidSession { session: u32 },
    #[error("No UDP listener for {family}")]
    NoUdpListener { family: &'static str },
    #[error("File {path:?} has no data past offset {offset}")]
    FileTooShort { path: PathBuf, offset: u64 },
}

/// Failures while building or reading a wire frame
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("Failed to spill payload to {path:?}: {source}")]
    SpillFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Spilled payload at {path:?} is unreadable: {source}")]
    SpillUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Spilled payload length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("Frame truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("Unknown frame kind: {kind}")]
    UnknownKind { kind: u8 },
    #[error("Spill path is not valid UTF-8")]
    InvalidPath,
    #[error("Payload of {size} bytes exceeds the frame length field")]
    PayloadTooLarge { size: usize },
    #[error("Record checksum mismatch for task {task_id}")]
    ChecksumMismatch { task_id: u32 },
}

/// Failures reported by the task pool when handing off a frame
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Task pool queue is full")]
    PoolFull,
    #[error("Task pool is closed")]
    PoolClosed,
    #[error("Task worker {worker} does not exist")]
    NoSuchWorker { worker: usize },
    #[error("Dispatch rejected: {reason}")]
    Rejected { reason: String },
}

// ----------------------------------------------------------------------------
// Core Error Type
// ----------------------------------------------------------------------------

/// Unified error for every public operation of the task subsystem
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Precondition failed: {0}")]
    Precondition(#[from] PreconditionError),

    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Batch of {requested} tasks exceeds the wait-all limit of {limit}")]
    CapacityExceeded { requested: usize, limit: usize },

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("Engine error: {reason}")]
    Engine { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl TaskError {
    /// Service has not been started yet
    pub fn not_started() -> Self {
        TaskError::Precondition(PreconditionError::NotStarted)
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        TaskError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create an engine error with a reason
    pub fn engine_error<T: Into<String>>(reason: T) -> Self {
        TaskError::Engine {
            reason: reason.into(),
        }
    }

    /// Create a timeout error from a duration
    pub fn timeout(duration: std::time::Duration) -> Self {
        TaskError::Timeout {
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Whether this error was raised before any side effect took place
    pub fn is_precondition(&self) -> bool {
        matches!(self, TaskError::Precondition(_))
    }

    /// Whether this error means the caller simply gave up waiting
    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::Timeout { .. })
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, TaskError>;
pub type TaskResult<T> = Result<T>;
