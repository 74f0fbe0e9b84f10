//! Chunked, time-stamped record stream for capturing and replaying engine
//! state.
//!
//! Frame layout (little endian):
//!
//! ```text
//! magic "FWR\0" | version: u32 | body length: u64 | JSON body
//! ```

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::anchor::SpongyAnchorPose;
use crate::backend::TrackableBackend;
use crate::engine::{AlignmentMetrics, Engine};
use crate::error::StreamError;
use crate::ids::{AnchorEdge, FragmentId};
use crate::manager::AnchorManager;
use crate::persistence::SessionSnapshot;
use crate::pose::Pose;

pub const STREAM_MAGIC: [u8; 4] = *b"FWR\0";
pub const STREAM_VERSION: u32 = 1;
pub const HEADER_LEN: usize = 16;
pub const DEFAULT_CHUNK_SIZE: usize = 4096;
/// Bodies larger than this are rejected as corrupt.
pub const MAX_BODY_LEN: u64 = 64 * 1024 * 1024;

/// Ephemeral state useful for debugging and visualization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransientState {
    pub head: Pose,
    pub alignment: Pose,
    pub most_significant_fragment: FragmentId,
    pub metrics: AlignmentMetrics,
    pub spongy_anchors: Vec<SpongyAnchorPose>,
    pub edges: Vec<AnchorEdge>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Seconds on the stream's own time axis.
    pub timestamp: f64,
    pub session: Uuid,
    pub include_persistent: bool,
    pub include_transient: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent: Option<SessionSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transient: Option<TransientState>,
}

pub fn encode_frame(record: &Record) -> Result<Vec<u8>, StreamError> {
    let body = serde_json::to_vec(record)?;
    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&STREAM_MAGIC);
    frame.extend_from_slice(&STREAM_VERSION.to_le_bytes());
    frame.extend_from_slice(&(body.len() as u64).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

fn decode_header(header: &[u8; HEADER_LEN]) -> Result<usize, StreamError> {
    if header[..4] != STREAM_MAGIC {
        return Err(StreamError::Format("bad magic".into()));
    }
    let mut word = [0u8; 4];
    word.copy_from_slice(&header[4..8]);
    let version = u32::from_le_bytes(word);
    if version != STREAM_VERSION {
        return Err(StreamError::Format(format!("unsupported version {version}")));
    }
    let mut dword = [0u8; 8];
    dword.copy_from_slice(&header[8..16]);
    let len = u64::from_le_bytes(dword);
    if len > MAX_BODY_LEN {
        return Err(StreamError::Format(format!("body length {len} too large")));
    }
    usize::try_from(len).map_err(|_| StreamError::Format(format!("body length {len} too large")))
}

/// Write side. One record is buffered at a time.
#[derive(Debug)]
pub struct RecordWriter {
    session: Uuid,
    include_persistent: bool,
    include_transient: bool,
    chunk_size: usize,
    buffer: Vec<u8>,
    cursor: usize,
    /// (timestamp, host time) of the buffered record.
    pending: Option<(f64, f64)>,
    /// (timestamp, host time) of the last fully flushed record.
    flushed: Option<(f64, f64)>,
    records_written: u64,
}

impl RecordWriter {
    pub fn new(include_persistent: bool, include_transient: bool) -> Self {
        Self {
            session: Uuid::new_v4(),
            include_persistent,
            include_transient,
            chunk_size: DEFAULT_CHUNK_SIZE,
            buffer: Vec::new(),
            cursor: 0,
            pending: None,
            flushed: None,
            records_written: 0,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn session(&self) -> Uuid {
        self.session
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Bytes of the buffered record not yet written.
    pub fn bytes_remaining(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    pub fn has_pending(&self) -> bool {
        self.bytes_remaining() > 0
    }

    /// Drop any partially written record. The time axis continues from the
    /// last record that was fully flushed.
    pub fn restart(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
        self.pending = None;
    }

    fn next_timestamp(&self, now: f64) -> f64 {
        match self.flushed {
            Some((stamp, host)) => stamp + (now - host).max(0.0),
            None => 0.0,
        }
    }

    /// Snapshot the manager into the buffer, replacing any unwritten record.
    /// `now` is the host clock in seconds.
    pub fn gather_record<E: Engine>(
        &mut self,
        manager: &AnchorManager<E>,
        now: f64,
    ) -> Result<(), StreamError> {
        if self.has_pending() {
            tracing::debug!("discarding {} unwritten bytes", self.bytes_remaining());
        }
        let timestamp = self.next_timestamp(now);
        let persistent = if self.include_persistent {
            Some(manager.session_snapshot()?)
        } else {
            None
        };
        let transient = self.include_transient.then(|| TransientState {
            head: manager.head(),
            alignment: manager.alignment(),
            most_significant_fragment: manager.most_significant_fragment(),
            metrics: *manager.metrics(),
            spongy_anchors: manager.store().snapshot(),
            edges: manager.store().edges().copied().collect(),
        });
        let record = Record {
            timestamp,
            session: self.session,
            include_persistent: self.include_persistent,
            include_transient: self.include_transient,
            persistent,
            transient,
        };
        self.buffer = encode_frame(&record)?;
        self.cursor = 0;
        self.pending = Some((timestamp, now));
        Ok(())
    }

    /// Write at most `max` bytes of the buffered record.
    pub fn write_chunk_to<W: Write>(&mut self, sink: &mut W, max: usize) -> io::Result<usize> {
        let end = (self.cursor + max).min(self.buffer.len());
        let written = sink.write(&self.buffer[self.cursor..end])?;
        self.cursor += written;
        if self.cursor == self.buffer.len() {
            if let Some(stamp) = self.pending.take() {
                self.flushed = Some(stamp);
                self.records_written += 1;
            }
            self.buffer.clear();
            self.cursor = 0;
        }
        Ok(written)
    }

    /// Drain the buffered record in chunks. Returns bytes written.
    pub fn write_record_to<W: Write>(&mut self, sink: &mut W) -> io::Result<usize> {
        let mut total = 0;
        while self.has_pending() {
            let n = self.write_chunk_to(sink, self.chunk_size)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "sink accepted no bytes",
                ));
            }
            total += n;
        }
        sink.flush()?;
        Ok(total)
    }
}

/// Read side. Pulls one record at a time, never more bytes than declared.
#[derive(Debug, Default)]
pub struct RecordReader {
    header: [u8; HEADER_LEN],
    header_filled: usize,
    body: Vec<u8>,
    body_len: Option<usize>,
}

impl RecordReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes still needed to complete the current record. Zero once a
    /// complete record is waiting to be applied.
    pub fn bytes_needed(&self) -> usize {
        match self.body_len {
            None => HEADER_LEN - self.header_filled,
            Some(len) => len - self.body.len(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.body_len.is_some() && self.bytes_needed() == 0
    }

    /// Nothing of the next record has been read yet.
    pub fn is_idle(&self) -> bool {
        self.header_filled == 0 && self.body_len.is_none()
    }

    /// Read up to `bytes_needed()` bytes from `source` in one call.
    ///
    /// A malformed header is consumed and the reader starts over, so the
    /// caller can keep reading from the bytes that follow it.
    pub fn read_record_from<R: Read>(&mut self, source: &mut R) -> Result<usize, StreamError> {
        let needed = self.bytes_needed();
        if needed == 0 {
            return Ok(0);
        }
        let n = match self.body_len {
            None => {
                let start = self.header_filled;
                let n = source.read(&mut self.header[start..start + needed])?;
                self.header_filled += n;
                n
            }
            Some(_) => {
                let start = self.body.len();
                self.body.resize(start + needed, 0);
                let n = source.read(&mut self.body[start..])?;
                self.body.truncate(start + n);
                n
            }
        };
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stream ended mid-record").into());
        }
        if self.body_len.is_none() && self.header_filled == HEADER_LEN {
            let len = match decode_header(&self.header) {
                Ok(len) => len,
                Err(err) => {
                    *self = Self::default();
                    return Err(err);
                }
            };
            self.body = Vec::with_capacity(len);
            self.body_len = Some(len);
        }
        Ok(n)
    }

    /// Decode the completed record and reset for the next one.
    pub fn take_record(&mut self) -> Result<Record, StreamError> {
        if !self.is_complete() {
            return Err(StreamError::NotReady);
        }
        let body = std::mem::take(&mut self.body);
        *self = Self::default();
        Ok(serde_json::from_slice(&body)?)
    }

    /// Commit the completed record: its persistent part, if any, rehydrates
    /// the manager.
    pub fn apply_record<E: Engine, B: TrackableBackend>(
        &mut self,
        manager: &mut AnchorManager<E>,
        backend: &mut B,
    ) -> Result<Record, StreamError> {
        let record = self.take_record()?;
        if let Some(snapshot) = &record.persistent {
            manager.rehydrate(snapshot, backend)?;
        }
        Ok(record)
    }
}
