// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Strata records - Record addressing
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// A record is addressed by the byte offset of the chunk that holds it and
// its index within that chunk. Writers hand out `FutureRecordPosition`s
// because, with background encoding, a chunk's offset is only fixed once
// every earlier chunk has reached the sink.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::error::{RecordsError, RecordsResult};

/// Length of [`RecordPosition::to_bytes`].
pub const POSITION_BYTES: usize = 12;

// ---------------------------------------------------------------------------
// RecordPosition
// ---------------------------------------------------------------------------

/// Canonical address of a record: `(chunk_begin, record_index)`.
///
/// Ordered by chunk offset first, then by index within the chunk.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct RecordPosition {
    chunk_begin: u64,
    record_index: u32,
}

impl RecordPosition {
    pub fn new(chunk_begin: u64, record_index: u32) -> Self {
        Self {
            chunk_begin,
            record_index,
        }
    }

    /// Byte offset of the chunk holding the record.
    pub fn chunk_begin(&self) -> u64 {
        self.chunk_begin
    }

    /// Index of the record within its chunk.
    pub fn record_index(&self) -> u32 {
        self.record_index
    }

    /// Coarse non-decreasing number for progress reporting.
    ///
    /// Distinct positions may share a numeric value; use the pair to
    /// address records exactly.
    pub fn numeric(&self) -> u64 {
        self.chunk_begin.saturating_add(u64::from(self.record_index))
    }

    /// Compact big-endian form. Byte order matches position order.
    pub fn to_bytes(&self) -> [u8; POSITION_BYTES] {
        let mut bytes = [0u8; POSITION_BYTES];
        bytes[..8].copy_from_slice(&self.chunk_begin.to_be_bytes());
        bytes[8..].copy_from_slice(&self.record_index.to_be_bytes());
        bytes
    }

    /// Parse the form produced by [`RecordPosition::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> RecordsResult<Self> {
        if bytes.len() != POSITION_BYTES {
            return Err(RecordsError::InvalidArgument(format!(
                "record position must be {POSITION_BYTES} bytes, got {}",
                bytes.len()
            )));
        }
        let mut begin = [0u8; 8];
        begin.copy_from_slice(&bytes[..8]);
        let mut index = [0u8; 4];
        index.copy_from_slice(&bytes[8..]);
        Ok(Self::new(u64::from_be_bytes(begin), u32::from_be_bytes(index)))
    }
}

impl fmt::Display for RecordPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chunk_begin, self.record_index)
    }
}

impl FromStr for RecordPosition {
    type Err = RecordsError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || RecordsError::InvalidArgument(format!("invalid record position {text:?}"));
        let (begin, index) = text.split_once('/').ok_or_else(invalid)?;
        Ok(Self::new(
            begin.parse().map_err(|_| invalid())?,
            index.parse().map_err(|_| invalid())?,
        ))
    }
}

// ---------------------------------------------------------------------------
// Chunk offset resolution
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum CellState {
    Pending,
    Resolved(u64),
    Abandoned(String),
}

/// Shared slot for the sink offset of one chunk.
#[derive(Debug)]
struct ChunkBeginCell {
    state: Mutex<CellState>,
    changed: Condvar,
}

impl ChunkBeginCell {
    fn settle(&self, new_state: CellState) {
        let mut state = self.state.lock();
        if matches!(*state, CellState::Pending) {
            *state = new_state;
            self.changed.notify_all();
        }
    }
}

/// Writer-side handle that settles a chunk's offset.
///
/// Dropping it while still pending abandons every future waiting on it, so
/// a failed or discarded writer never leaves callers blocked.
#[derive(Debug)]
pub(crate) struct ChunkBeginPromise {
    cell: Arc<ChunkBeginCell>,
}

impl ChunkBeginPromise {
    pub(crate) fn new() -> Self {
        Self {
            cell: Arc::new(ChunkBeginCell {
                state: Mutex::new(CellState::Pending),
                changed: Condvar::new(),
            }),
        }
    }

    /// Fix the chunk offset. Later calls are ignored.
    pub(crate) fn resolve(&self, chunk_begin: u64) {
        self.cell.settle(CellState::Resolved(chunk_begin));
    }

    /// A handle that can resolve this chunk's offset but does not abandon
    /// it when dropped.
    pub(crate) fn resolver(&self) -> ChunkBeginResolver {
        ChunkBeginResolver {
            cell: Arc::clone(&self.cell),
        }
    }

    /// A future for record `record_index` of this chunk.
    pub(crate) fn future(&self, record_index: u32) -> FutureRecordPosition {
        FutureRecordPosition {
            cell: Arc::clone(&self.cell),
            record_index,
        }
    }
}

impl Drop for ChunkBeginPromise {
    fn drop(&mut self) {
        self.cell.settle(CellState::Abandoned(
            "writer stopped before the chunk offset was known".to_string(),
        ));
    }
}

/// Secondary resolving handle for a [`ChunkBeginPromise`].
#[derive(Debug, Clone)]
pub(crate) struct ChunkBeginResolver {
    cell: Arc<ChunkBeginCell>,
}

impl ChunkBeginResolver {
    pub(crate) fn resolve(&self, chunk_begin: u64) {
        self.cell.settle(CellState::Resolved(chunk_begin));
    }
}

// ---------------------------------------------------------------------------
// FutureRecordPosition
// ---------------------------------------------------------------------------

/// Position of a written record, available once its chunk offset is fixed.
#[derive(Debug, Clone)]
pub struct FutureRecordPosition {
    cell: Arc<ChunkBeginCell>,
    record_index: u32,
}

impl FutureRecordPosition {
    /// An already resolved future.
    pub fn ready(position: RecordPosition) -> Self {
        let promise = ChunkBeginPromise::new();
        promise.resolve(position.chunk_begin());
        promise.future(position.record_index())
    }

    /// Block until the chunk offset is known.
    ///
    /// Fails with [`RecordsError::PositionUnavailable`] if the writer failed
    /// or was dropped first.
    pub fn get(&self) -> RecordsResult<RecordPosition> {
        let mut state = self.cell.state.lock();
        loop {
            if let Some(result) = self.settled(&state) {
                return result;
            }
            self.cell.changed.wait(&mut state);
        }
    }

    /// Non-blocking variant of [`FutureRecordPosition::get`]; `None` while
    /// the chunk offset is still pending.
    pub fn try_get(&self) -> Option<RecordsResult<RecordPosition>> {
        self.settled(&self.cell.state.lock())
    }

    pub fn is_ready(&self) -> bool {
        !matches!(*self.cell.state.lock(), CellState::Pending)
    }

    /// Index within the chunk, known from the moment of writing.
    pub fn record_index(&self) -> u32 {
        self.record_index
    }

    fn settled(&self, state: &CellState) -> Option<RecordsResult<RecordPosition>> {
        match state {
            CellState::Pending => None,
            CellState::Resolved(begin) => Some(Ok(RecordPosition::new(*begin, self.record_index))),
            CellState::Abandoned(reason) => {
                Some(Err(RecordsError::PositionUnavailable(reason.clone())))
            }
        }
    }
}
