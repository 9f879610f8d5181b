//! Payload framing across process boundaries
//!
//! Every payload that leaves a process (tasks, task results, pipe messages)
//! travels as a [`Frame`]: a fixed 12-byte header followed by either the
//! payload itself or, when the payload does not fit into one IPC message, a
//! small descriptor pointing at a temporary file holding the bytes.
//!
//! Header layout (little-endian):
//!
//! | offset | size | field     |
//! |--------|------|-----------|
//! | 0      | 4    | task id   |
//! | 4      | 4    | body len  |
//! | 8      | 2    | origin    |
//! | 10     | 1    | kind      |
//! | 11     | 1    | flags     |
//!
//! A spilled body is `payload_len: u32` followed by the UTF-8 file path.
//! [`Framer::unpack`] is the one routine every consumer uses to get the
//! payload back, so inline and spilled frames are symmetric for all callers.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::TaskConfig;
use crate::errors::FramingError;
use crate::types::{TaskId, WorkerId};
use crate::TaskResult;

// ----------------------------------------------------------------------------
// Frame Kind
// ----------------------------------------------------------------------------

/// What a frame carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// A task on its way to the pool
    Task = 1,
    /// A task result on its way back
    Finish = 2,
    /// An out-of-band message between sibling workers
    PipeMessage = 3,
}

impl FrameKind {
    pub fn from_u8(value: u8) -> Result<Self, FramingError> {
        match value {
            1 => Ok(FrameKind::Task),
            2 => Ok(FrameKind::Finish),
            3 => Ok(FrameKind::PipeMessage),
            other => Err(FramingError::UnknownKind { kind: other }),
        }
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

// ----------------------------------------------------------------------------
// Frame Flags
// ----------------------------------------------------------------------------

/// Mode bits carried in the frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// No mode bits
    pub const NONE: Self = Self(0x00);

    /// Fire-and-forget task; the result goes to `onFinish`
    pub const NONBLOCK: Self = Self(0x01);

    /// Task belongs to a wait-all batch; the result goes to the aggregation file
    pub const WAITALL: Self = Self(0x02);

    /// Body is a spill descriptor, not the payload
    pub const SPILLED: Self = Self(0x04);

    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    pub const fn as_u8(self) -> u8 {
        self.0
    }

    pub const fn is_nonblocking(self) -> bool {
        (self.0 & Self::NONBLOCK.0) != 0
    }

    pub const fn is_wait_all(self) -> bool {
        (self.0 & Self::WAITALL.0) != 0
    }

    pub const fn is_spilled(self) -> bool {
        (self.0 & Self::SPILLED.0) != 0
    }

    pub fn with_nonblocking(mut self) -> Self {
        self.0 |= Self::NONBLOCK.0;
        self
    }

    pub fn with_wait_all(mut self) -> Self {
        self.0 |= Self::WAITALL.0;
        self
    }

    fn with_spilled(mut self, spilled: bool) -> Self {
        if spilled {
            self.0 |= Self::SPILLED.0;
        } else {
            self.0 &= !Self::SPILLED.0;
        }
        self
    }
}

// ----------------------------------------------------------------------------
// Frame Header
// ----------------------------------------------------------------------------

/// Fixed-size header in front of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub task_id: TaskId,
    /// Length of the body that follows the header
    pub len: u32,
    /// Worker that produced the frame
    pub origin: WorkerId,
    pub kind: FrameKind,
    pub flags: FrameFlags,
}

impl FrameHeader {
    /// Encoded header size in bytes
    pub const SIZE: usize = 12;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.task_id.as_u32().to_le_bytes());
        bytes[4..8].copy_from_slice(&self.len.to_le_bytes());
        bytes[8..10].copy_from_slice(&self.origin.as_u16().to_le_bytes());
        bytes[10] = self.kind.as_u8();
        bytes[11] = self.flags.as_u8();
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FramingError> {
        if bytes.len() < Self::SIZE {
            return Err(FramingError::Truncated {
                needed: Self::SIZE,
                available: bytes.len(),
            });
        }

        let task_id = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let origin = u16::from_le_bytes([bytes[8], bytes[9]]);

        Ok(Self {
            task_id: TaskId::new(task_id),
            len,
            origin: WorkerId::new(origin),
            kind: FrameKind::from_u8(bytes[10])?,
            flags: FrameFlags::new(bytes[11]),
        })
    }
}

// ----------------------------------------------------------------------------
// Frame Body
// ----------------------------------------------------------------------------

/// Location of a payload that was too large to travel inline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpillRef {
    pub path: PathBuf,
    pub length: usize,
}

impl SpillRef {
    fn encode(&self) -> Result<Vec<u8>, FramingError> {
        let path = self.path.to_str().ok_or(FramingError::InvalidPath)?;
        let length =
            u32::try_from(self.length).map_err(|_| FramingError::PayloadTooLarge { size: self.length })?;

        let mut bytes = Vec::with_capacity(4 + path.len());
        bytes.extend_from_slice(&length.to_le_bytes());
        bytes.extend_from_slice(path.as_bytes());
        Ok(bytes)
    }

    fn decode(bytes: &[u8]) -> Result<Self, FramingError> {
        if bytes.len() < 4 {
            return Err(FramingError::Truncated {
                needed: 4,
                available: bytes.len(),
            });
        }
        let length = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let path = std::str::from_utf8(&bytes[4..]).map_err(|_| FramingError::InvalidPath)?;
        Ok(Self {
            path: PathBuf::from(path),
            length,
        })
    }
}

/// Frame contents: the payload itself or a pointer to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameBody {
    Inline(Vec<u8>),
    Spilled(SpillRef),
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One unit of inter-process traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub body: FrameBody,
}

impl Frame {
    pub fn task_id(&self) -> TaskId {
        self.header.task_id
    }

    pub fn origin(&self) -> WorkerId {
        self.header.origin
    }

    pub fn kind(&self) -> FrameKind {
        self.header.kind
    }

    pub fn flags(&self) -> FrameFlags {
        self.header.flags
    }

    pub fn is_spilled(&self) -> bool {
        matches!(self.body, FrameBody::Spilled(_))
    }

    /// Mark the frame as a fire-and-forget task
    pub fn set_nonblocking(&mut self) {
        self.header.flags = self.header.flags.with_nonblocking();
    }

    /// Mark the frame as part of a wait-all batch
    pub fn set_wait_all(&mut self) {
        self.header.flags = self.header.flags.with_wait_all();
    }

    /// Serialize header and body into one contiguous buffer
    pub fn encode(&self) -> TaskResult<Vec<u8>> {
        let body = match &self.body {
            FrameBody::Inline(data) => std::borrow::Cow::Borrowed(data.as_slice()),
            FrameBody::Spilled(spill) => std::borrow::Cow::Owned(spill.encode()?),
        };
        let len = u32::try_from(body.len())
            .map_err(|_| FramingError::PayloadTooLarge { size: body.len() })?;

        let header = FrameHeader {
            len,
            flags: self.header.flags.with_spilled(self.is_spilled()),
            ..self.header
        };

        let mut bytes = Vec::with_capacity(FrameHeader::SIZE + body.len());
        bytes.extend_from_slice(&header.to_bytes());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Parse one frame from the front of `bytes`, returning it with the
    /// number of bytes consumed
    pub fn decode(bytes: &[u8]) -> TaskResult<(Frame, usize)> {
        let header = FrameHeader::from_bytes(bytes)?;
        let end = FrameHeader::SIZE + header.len as usize;
        if bytes.len() < end {
            return Err(FramingError::Truncated {
                needed: end,
                available: bytes.len(),
            }
            .into());
        }

        let raw = &bytes[FrameHeader::SIZE..end];
        let body = if header.flags.is_spilled() {
            FrameBody::Spilled(SpillRef::decode(raw)?)
        } else {
            FrameBody::Inline(raw.to_vec())
        };

        Ok((Frame { header, body }, end))
    }

    /// Drop a frame that will never be unpacked, removing its spill file
    pub fn discard(self) {
        if let FrameBody::Spilled(spill) = self.body {
            if let Err(e) = fs::remove_file(&spill.path) {
                debug!("Spill file {:?} already gone: {}", spill.path, e);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Framer
// ----------------------------------------------------------------------------

/// Per-process frame builder
///
/// Owns the task id counter of the process it lives in. Each worker process
/// has exactly one, so ids are unique per issuing worker and nothing more.
#[derive(Debug)]
pub struct Framer {
    worker: WorkerId,
    next_id: AtomicU32,
    inline_threshold: usize,
    tmp_dir: PathBuf,
    spill_prefix: String,
}

impl Framer {
    pub fn new(config: &TaskConfig, worker: WorkerId) -> Self {
        Self {
            worker,
            next_id: AtomicU32::new(0),
            inline_threshold: config.inline_threshold(),
            tmp_dir: config.tmp_dir.clone(),
            spill_prefix: config.spill_prefix.clone(),
        }
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn inline_threshold(&self) -> usize {
        self.inline_threshold
    }

    /// Take the next task id for this process
    pub fn next_task_id(&self) -> TaskId {
        TaskId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Frame a new payload under a freshly assigned task id
    pub fn pack(&self, kind: FrameKind, payload: &[u8]) -> TaskResult<Frame> {
        let task_id = self.next_task_id();
        self.build(task_id, kind, FrameFlags::NONE, payload)
    }

    /// Frame a task result under the id of the task it answers
    ///
    /// The mode bits of the task are carried over so the result can be
    /// routed the same way the task was issued.
    pub fn pack_reply(&self, task: &FrameHeader, payload: &[u8]) -> TaskResult<Frame> {
        let flags = FrameFlags::new(task.flags.as_u8() & !FrameFlags::SPILLED.as_u8());
        self.build(task.task_id, FrameKind::Finish, flags, payload)
    }

    fn build(
        &self,
        task_id: TaskId,
        kind: FrameKind,
        flags: FrameFlags,
        payload: &[u8],
    ) -> TaskResult<Frame> {
        let body = if payload.len() < self.inline_threshold {
            FrameBody::Inline(payload.to_vec())
        } else {
            FrameBody::Spilled(self.spill(payload)?)
        };

        let len = match &body {
            FrameBody::Inline(data) => data.len(),
            FrameBody::Spilled(spill) => spill.encode()?.len(),
        };
        let len = u32::try_from(len).map_err(|_| FramingError::PayloadTooLarge { size: len })?;

        Ok(Frame {
            header: FrameHeader {
                task_id,
                len,
                origin: self.worker,
                kind,
                flags: flags.with_spilled(matches!(body, FrameBody::Spilled(_))),
            },
            body,
        })
    }

    fn spill(&self, payload: &[u8]) -> Result<SpillRef, FramingError> {
        let path = self
            .tmp_dir
            .join(format!("{}{}", self.spill_prefix, Uuid::new_v4().simple()));
        if path.to_str().is_none() {
            return Err(FramingError::InvalidPath);
        }

        let written = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .and_then(|mut file| file.write_all(payload));

        if let Err(source) = written {
            warn!("Large task pack failed: {:?}: {}", path, source);
            let _ = fs::remove_file(&path);
            return Err(FramingError::SpillFailed { path, source });
        }

        debug!("Spilled {} bytes to {:?}", payload.len(), path);
        Ok(SpillRef {
            path,
            length: payload.len(),
        })
    }

    /// Recover the payload of a frame
    ///
    /// Spilled payloads are read back and their backing file is removed,
    /// whether or not the read succeeds.
    pub fn unpack(frame: Frame) -> TaskResult<Vec<u8>> {
        match frame.body {
            FrameBody::Inline(data) => Ok(data),
            FrameBody::Spilled(spill) => read_spilled(&spill.path, spill.length),
        }
    }
}

fn read_spilled(path: &Path, expected: usize) -> TaskResult<Vec<u8>> {
    let read = fs::read(path);
    if let Err(e) = fs::remove_file(path) {
        debug!("Could not remove spill file {:?}: {}", path, e);
    }

    let data = read.map_err(|source| {
        warn!("Large task unpack failed: {:?}: {}", path, source);
        FramingError::SpillUnreadable {
            path: path.to_path_buf(),
            source,
        }
    })?;

    if data.len() != expected {
        warn!(
            "Spilled payload {:?} has {} bytes, header says {}",
            path,
            data.len(),
            expected
        );
        return Err(FramingError::LengthMismatch {
            expected,
            actual: data.len(),
        }
        .into());
    }

    Ok(data)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
