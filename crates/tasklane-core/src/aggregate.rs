//! Wait-all aggregation file
//!
//! A wait-all batch collects its results in a uniquely named file. Task
//! workers append one self-describing record per result, in whatever order
//! they finish:
//!
//! ```text
//! FrameHeader (12) | body (header.len) | crc32(header | body) (4)
//! ```
//!
//! The file is removed when the [`AggregationFile`] guard drops, on every
//! exit path of the wait. Writers open it for append without creating it, so
//! a result that arrives after the wait gave up is dropped instead of
//! resurrecting the file.

use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{FramingError, TaskError};
use crate::frame::{Frame, FrameHeader};
use crate::TaskResult;

/// Size of the trailing checksum
pub const RECORD_CHECKSUM_SIZE: usize = 4;

// ----------------------------------------------------------------------------
// Record Codec
// ----------------------------------------------------------------------------

/// Encode one result frame as an aggregation record
pub fn encode_record(frame: &Frame) -> TaskResult<Vec<u8>> {
    let mut bytes = frame.encode()?;
    let checksum = crc32fast::hash(&bytes);
    bytes.extend_from_slice(&checksum.to_le_bytes());
    Ok(bytes)
}

/// Sequential reader over the records of an aggregation file
///
/// Yields each record in file order. A record whose checksum does not match
/// yields an error and is skipped; a torn record yields one error and ends
/// iteration, since its length cannot be trusted.
pub struct RecordReader<'a> {
    buf: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> RecordReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: 0,
            failed: false,
        }
    }

    /// Bytes consumed so far, skipped records included
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn read_next(&mut self) -> TaskResult<Frame> {
        let rest = &self.buf[self.offset..];
        let (frame, consumed) = Frame::decode(rest)?;

        let end = consumed + RECORD_CHECKSUM_SIZE;
        if rest.len() < end {
            return Err(FramingError::Truncated {
                needed: end,
                available: rest.len(),
            }
            .into());
        }

        let stored = u32::from_le_bytes([
            rest[consumed],
            rest[consumed + 1],
            rest[consumed + 2],
            rest[consumed + 3],
        ]);
        if crc32fast::hash(&rest[..consumed]) != stored {
            self.offset += end;
            return Err(FramingError::ChecksumMismatch {
                task_id: frame.task_id().as_u32(),
            }
            .into());
        }

        self.offset += end;
        Ok(frame)
    }
}

impl Iterator for RecordReader<'_> {
    type Item = TaskResult<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }
        match self.read_next() {
            Ok(frame) => Some(Ok(frame)),
            Err(e @ TaskError::Framing(FramingError::ChecksumMismatch { .. })) => Some(Err(e)),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Writer Side
// ----------------------------------------------------------------------------

/// Outcome of appending a result to an aggregation file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Written,
    /// The batch already gave up and removed its file
    FileGone,
}

/// Append one record to an existing aggregation file
///
/// The whole record goes out in a single write so concurrent appenders do
/// not interleave. A missing file is not an error.
pub fn append_record(path: &Path, frame: &Frame) -> TaskResult<AppendOutcome> {
    let record = encode_record(frame)?;

    let mut file = match OpenOptions::new().append(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Aggregation file {:?} is gone, dropping task {}", path, frame.task_id());
            return Ok(AppendOutcome::FileGone);
        }
        Err(e) => return Err(e.into()),
    };

    file.write_all(&record)?;
    Ok(AppendOutcome::Written)
}

// ----------------------------------------------------------------------------
// Owner Side
// ----------------------------------------------------------------------------

/// Aggregation file owned by the waiting worker
///
/// Deleted when dropped, or earlier through [`AggregationFile::dispose`].
#[derive(Debug)]
pub struct AggregationFile {
    path: PathBuf,
    removed: bool,
}

impl AggregationFile {
    /// Create a fresh, empty, uniquely named file in `dir`
    pub fn create(dir: &Path, prefix: &str) -> TaskResult<Self> {
        let path = dir.join(format!("{}{}", prefix, Uuid::new_v4().simple()));
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                warn!("Failed to create aggregation file {:?}: {}", path, e);
                e
            })?;
        debug!("Created aggregation file {:?}", path);
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read everything appended so far
    pub fn contents(&self) -> TaskResult<Vec<u8>> {
        Ok(fs::read(&self.path)?)
    }

    /// Remove the file and discard every record past `consumed`
    ///
    /// The file is unlinked while still open, so writers that arrive later
    /// find nothing, and records appended after the owner's last read still
    /// get their spill files removed.
    pub fn dispose(mut self, consumed: usize) {
        let opened = fs::File::open(&self.path);
        self.remove();

        let mut file = match opened {
            Ok(file) => file,
            Err(e) => {
                warn!("Failed to reopen aggregation file {:?}: {}", self.path, e);
                return;
            }
        };
        let mut contents = Vec::new();
        if let Err(e) = file.read_to_end(&mut contents) {
            warn!("Failed to sweep aggregation file {:?}: {}", self.path, e);
            return;
        }

        let Some(tail) = contents.get(consumed..) else {
            return;
        };
        for frame in RecordReader::new(tail).filter_map(|record| record.ok()) {
            debug!("Discarding unclaimed result of task {}", frame.task_id());
            frame.discard();
        }
    }

    fn remove(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove aggregation file {:?}: {}", self.path, e);
        }
    }
}

impl Drop for AggregationFile {
    fn drop(&mut self) {
        self.remove();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
