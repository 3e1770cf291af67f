// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Strata records - Record reader
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The `RecordReader` walks chunk headers through a seekable source, verifies
// each chunk's checksum, and decodes record-bearing chunks one at a time.
// Damaged chunks are reported as data-loss errors; `recover` then scans
// forward for the next chunk that validates and reports exactly which byte
// range had to be skipped.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};

use tracing::{debug, info, warn};

use crate::chunk::{Chunk, ChunkHeader, ChunkType, CHUNK_HEADER_SIZE};
use crate::chunk_encoding::{ChunkDecoder, FieldProjection};
use crate::error::{RecordsError, RecordsResult};
use crate::metadata::RecordsMetadata;
use crate::position::RecordPosition;

/// Bytes examined per read while scanning for a valid chunk.
const SCAN_WINDOW: usize = 64 << 10;

/// Largest up-front allocation made on the strength of a header field.
const MAX_PREALLOCATION: u64 = 16 << 20;

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

/// Reader configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordReaderOptions {
    field_projection: FieldProjection,
}

impl RecordReaderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode only some fields of transposed chunks. Simple chunks always
    /// yield whole records.
    pub fn set_field_projection(mut self, field_projection: FieldProjection) -> Self {
        self.field_projection = field_projection;
        self
    }

    pub fn field_projection(&self) -> &FieldProjection {
        &self.field_projection
    }
}

/// Byte range passed over by [`RecordReader::recover`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRegion {
    /// Offset of the damaged chunk.
    pub begin: u64,
    /// Offset of the next valid chunk.
    pub end: u64,
    /// What was wrong with the damaged data.
    pub message: String,
}

impl SkippedRegion {
    pub fn len(&self) -> u64 {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }
}

impl fmt::Display for SkippedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{}): {}", self.begin, self.end, self.message)
    }
}

/// Lifecycle of a [`RecordReader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderState {
    Open,
    Closed,
    /// The source failed; the message is reported by every later call.
    Failed(String),
}

/// Damage found at a chunk boundary, kept until recovered from.
#[derive(Debug)]
struct Damage {
    begin: u64,
    message: String,
}

// ---------------------------------------------------------------------------
// RecordReader
// ---------------------------------------------------------------------------

/// Reads records from a seekable source.
pub struct RecordReader<R: Read + Seek> {
    src: R,

    options: RecordReaderOptions,

    state: ReaderState,

    /// Offset of the chunk `decoder` was built from.
    chunk_begin: u64,

    /// Records of the current chunk.
    decoder: Option<ChunkDecoder>,

    /// Offset of the next chunk header to read.
    next_chunk: u64,

    /// Record index to start at in the chunk at `next_chunk`, after a seek.
    seek_index: Option<u64>,

    /// Where `src` is positioned, when known.
    src_pos: Option<u64>,

    damage: Option<Damage>,
}

impl<R: Read + Seek> RecordReader<R> {
    /// A reader positioned at the start of `src`. Nothing is read yet.
    pub fn new(src: R) -> Self {
        Self::with_options(src, RecordReaderOptions::default())
    }

    pub fn with_options(src: R, options: RecordReaderOptions) -> Self {
        Self {
            src,
            options,
            state: ReaderState::Open,
            chunk_begin: 0,
            decoder: None,
            next_chunk: 0,
            seek_index: None,
            src_pos: None,
            damage: None,
        }
    }

    /// The next record, or `None` at the end of the stream.
    ///
    /// A damaged chunk yields an error with [`RecordsError::is_data_loss`]
    /// set; the same error is reported until [`recover`] or [`seek`].
    ///
    /// [`recover`]: RecordReader::recover
    /// [`seek`]: RecordReader::seek
    pub fn read_record(&mut self) -> RecordsResult<Option<Vec<u8>>> {
        self.check_open()?;
        if let Some(damage) = &self.damage {
            return Err(RecordsError::corruption(damage.begin, damage.message.clone()));
        }
        loop {
            if let Some(record) = self.decoder.as_mut().and_then(ChunkDecoder::read_record) {
                return Ok(Some(record.to_vec()));
            }
            let offset = self.next_chunk;
            let chunk = match self.read_chunk_at(offset) {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    self.decoder = None;
                    return Ok(None);
                }
                Err(e) => return Err(self.on_error(offset, e)),
            };
            if let Err(e) = self.enter_chunk(offset, chunk) {
                return Err(self.on_error(offset, e));
            }
        }
    }

    /// Iterate over the remaining records. Iteration ends at the end of the
    /// stream or after yielding the first error.
    pub fn records(&mut self) -> Records<'_, R> {
        Records {
            reader: self,
            done: false,
        }
    }

    /// Skip past damage reported by [`read_record`].
    ///
    /// Returns the skipped byte range and leaves the reader at the next
    /// chunk that validates. Returns `None` when there is no damage to skip
    /// or no valid chunk follows it; in the latter case the damage stays and
    /// [`close`] reports it.
    ///
    /// [`read_record`]: RecordReader::read_record
    /// [`close`]: RecordReader::close
    pub fn recover(&mut self) -> RecordsResult<Option<SkippedRegion>> {
        self.check_open()?;
        let Some(begin) = self.damage.as_ref().map(|damage| damage.begin) else {
            return Ok(None);
        };
        let found = match self.find_valid_chunk_after(begin) {
            Ok(found) => found,
            Err(e) => return Err(self.fail(e)),
        };
        let Some(end) = found else {
            warn!(begin, "No valid chunk after damaged region");
            return Ok(None);
        };
        let message = self
            .damage
            .take()
            .map(|damage| damage.message)
            .unwrap_or_default();
        self.decoder = None;
        self.seek_index = None;
        self.next_chunk = end;
        let region = SkippedRegion {
            begin,
            end,
            message,
        };
        warn!(begin, end, skipped = region.len(), message = %region.message, "Skipped damaged region");
        Ok(Some(region))
    }

    /// Resume cursor: seeking to it continues with the next record.
    ///
    /// Inside a chunk this is the next record's own position. Between
    /// chunks it is `(next chunk offset, 0)`, and the chunk there may be
    /// padding or a signature that holds no records, so it need not equal
    /// the position the writer reported for that record.
    pub fn pos(&self) -> RecordPosition {
        if let Some(index) = self.seek_index {
            return RecordPosition::new(self.next_chunk, clamp_index(index));
        }
        match &self.decoder {
            Some(decoder) if !decoder.is_exhausted() => {
                RecordPosition::new(self.chunk_begin, clamp_index(decoder.index()))
            }
            _ => RecordPosition::new(self.next_chunk, 0),
        }
    }

    /// Move to `position`. Problems with the target surface on the next
    /// [`read_record`](RecordReader::read_record).
    pub fn seek(&mut self, position: RecordPosition) -> RecordsResult<()> {
        self.check_open()?;
        self.damage = None;
        self.decoder = None;
        self.next_chunk = position.chunk_begin();
        self.seek_index = Some(u64::from(position.record_index()));
        Ok(())
    }

    /// Move by a numeric position value.
    ///
    /// Numeric values of distinct positions can coincide, so this does not
    /// always find the record that produced `value`. It targets the last
    /// chunk beginning at or before `value`, at record index
    /// `value - chunk_begin` clamped to that chunk's record count (which
    /// lands at the start of the following chunk when clamped).
    ///
    /// Walks chunk headers from the start of the stream.
    pub fn seek_numeric(&mut self, value: u64) -> RecordsResult<()> {
        self.check_open()?;
        let mut target = (0u64, 0u64);
        let mut offset = 0u64;
        while offset <= value {
            let header = match self.read_header_at(offset) {
                Ok(Some(header)) => header,
                Ok(None) => break,
                Err(e) if e.is_data_loss() => {
                    debug!(offset, error = %e, "Stopped header walk at damaged chunk");
                    break;
                }
                Err(e) => return Err(self.fail(e)),
            };
            target = (offset, header.num_records);
            offset = header.chunk_end(offset);
        }
        let (chunk_begin, num_records) = target;
        let index = (value - chunk_begin).min(num_records);
        self.seek(RecordPosition::new(chunk_begin, clamp_index(index)))
    }

    /// Serialized metadata stored at the start of the stream, if any.
    ///
    /// Does not move the read cursor.
    pub fn read_serialized_metadata(&mut self) -> RecordsResult<Option<Vec<u8>>> {
        self.check_open()?;
        match self.read_chunk_at(0) {
            Ok(Some(chunk)) if chunk.header.chunk_type == ChunkType::FileMetadata => {
                Ok(Some(chunk.data))
            }
            Ok(_) => Ok(None),
            Err(e) if e.is_data_loss() => Err(e),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Typed metadata stored at the start of the stream, if any.
    pub fn read_metadata(&mut self) -> RecordsResult<Option<RecordsMetadata>> {
        self.read_serialized_metadata()?
            .map(|bytes| RecordsMetadata::from_bytes(&bytes))
            .transpose()
    }

    /// Verify the stream begins with a file signature, optionally preceded
    /// by a metadata chunk.
    pub fn check_file_format(&mut self) -> RecordsResult<()> {
        self.check_open()?;
        let mut offset = 0;
        for _ in 0..2 {
            let chunk = match self.read_chunk_at(offset) {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    return Err(RecordsError::corruption(offset, "missing file signature"))
                }
                Err(e) if e.is_data_loss() => return Err(e),
                Err(e) => return Err(self.fail(e)),
            };
            match chunk.header.chunk_type {
                ChunkType::FileSignature => return Ok(()),
                ChunkType::FileMetadata if offset == 0 => {
                    offset = chunk.header.chunk_end(offset);
                }
                other => {
                    return Err(RecordsError::corruption(
                        offset,
                        format!("expected file signature, found {other:?} chunk"),
                    ))
                }
            }
        }
        Err(RecordsError::corruption(offset, "missing file signature"))
    }

    /// Close the reader, reporting damage that was never recovered from.
    pub fn close(&mut self) -> RecordsResult<()> {
        match &self.state {
            ReaderState::Closed => return Ok(()),
            ReaderState::Failed(message) => return Err(RecordsError::Failed(message.clone())),
            ReaderState::Open => {}
        }
        self.state = ReaderState::Closed;
        self.decoder = None;
        if let Some(damage) = self.damage.take() {
            return Err(RecordsError::corruption(damage.begin, damage.message));
        }
        info!(pos = %self.pos(), "Closed records reader");
        Ok(())
    }

    pub fn state(&self) -> &ReaderState {
        &self.state
    }

    pub fn options(&self) -> &RecordReaderOptions {
        &self.options
    }

    pub fn get_ref(&self) -> &R {
        &self.src
    }

    pub fn into_inner(self) -> R {
        self.src
    }

    // -- internals ----------------------------------------------------------

    fn check_open(&self) -> RecordsResult<()> {
        match &self.state {
            ReaderState::Open => Ok(()),
            ReaderState::Closed => Err(RecordsError::Closed),
            ReaderState::Failed(message) => Err(RecordsError::Failed(message.clone())),
        }
    }

    /// Data loss is kept for `recover`; anything else ends the reader.
    fn on_error(&mut self, offset: u64, error: RecordsError) -> RecordsError {
        if error.is_data_loss() {
            warn!(offset, error = %error, "Damaged chunk");
            self.decoder = None;
            self.seek_index = None;
            self.damage = Some(Damage {
                begin: offset,
                message: error.to_string(),
            });
            error
        } else {
            self.fail(error)
        }
    }

    fn fail(&mut self, error: RecordsError) -> RecordsError {
        if self.state == ReaderState::Open {
            let message = error.to_string();
            warn!(error = %message, "Records reader failed");
            self.state = ReaderState::Failed(message);
        }
        error
    }

    /// Make the chunk read at `offset` current.
    fn enter_chunk(&mut self, offset: u64, chunk: Chunk) -> RecordsResult<()> {
        let seek_index = self.seek_index.take();
        let end = chunk.header.chunk_end(offset);
        if !chunk.header.chunk_type.carries_records() {
            debug!(offset, chunk_type = ?chunk.header.chunk_type, "Skipped chunk");
            self.next_chunk = end;
            return Ok(());
        }
        let mut decoder = ChunkDecoder::decode(&chunk, &self.options.field_projection, offset)?;
        if let Some(index) = seek_index {
            decoder.set_index(index);
        }
        debug!(offset, records = decoder.num_records(), "Read chunk");
        self.chunk_begin = offset;
        self.decoder = Some(decoder);
        self.next_chunk = end;
        Ok(())
    }

    fn seek_src(&mut self, offset: u64) -> io::Result<()> {
        if self.src_pos != Some(offset) {
            self.src_pos = None;
            self.src.seek(SeekFrom::Start(offset))?;
            self.src_pos = Some(offset);
        }
        Ok(())
    }

    /// Read and check the header at `offset`; `None` at a clean end of
    /// stream.
    fn read_header_at(&mut self, offset: u64) -> RecordsResult<Option<ChunkHeader>> {
        self.seek_src(offset)?;
        let mut bytes = [0u8; CHUNK_HEADER_SIZE];
        let n = self.read_src(&mut bytes)?;
        if n == 0 {
            return Ok(None);
        }
        if n < CHUNK_HEADER_SIZE {
            return Err(RecordsError::corruption(
                offset,
                format!("truncated chunk header ({n} of {CHUNK_HEADER_SIZE} bytes)"),
            ));
        }
        ChunkHeader::decode(&bytes, offset).map(Some)
    }

    /// Read and verify the whole chunk at `offset`; `None` at a clean end
    /// of stream.
    fn read_chunk_at(&mut self, offset: u64) -> RecordsResult<Option<Chunk>> {
        let Some(header) = self.read_header_at(offset)? else {
            return Ok(None);
        };
        let mut data = Vec::with_capacity(header.data_size.min(MAX_PREALLOCATION) as usize);
        let read = (&mut self.src).take(header.data_size).read_to_end(&mut data);
        self.src_pos = None;
        let read = read?;
        self.src_pos = Some(offset + CHUNK_HEADER_SIZE as u64 + read as u64);
        if (read as u64) < header.data_size {
            return Err(RecordsError::corruption(
                offset,
                format!("truncated chunk ({read} of {} payload bytes)", header.data_size),
            ));
        }
        let chunk = Chunk { header, data };
        chunk.verify(offset)?;
        Ok(Some(chunk))
    }

    /// Fill `buf` from the source, stopping early only at end of stream.
    fn read_src(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let start = self.src_pos;
        let mut filled = 0;
        while filled < buf.len() {
            match self.src.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.src_pos = None;
                    return Err(e);
                }
            }
        }
        self.src_pos = start.map(|pos| pos + filled as u64);
        Ok(filled)
    }

    /// Offset of the first chunk after `begin` whose header and checksum
    /// validate.
    ///
    /// Candidates are checked against the header bytes already in the scan
    /// window, and a payload is only read for a chunk that fits in the
    /// source.
    fn find_valid_chunk_after(&mut self, begin: u64) -> RecordsResult<Option<u64>> {
        self.src_pos = None;
        let src_len = self.src.seek(SeekFrom::End(0))?;
        self.src_pos = Some(src_len);

        let mut window = vec![0u8; SCAN_WINDOW + CHUNK_HEADER_SIZE];
        let mut window_start = begin + 1;
        loop {
            self.seek_src(window_start)?;
            let n = self.read_src(&mut window)?;
            if n < CHUNK_HEADER_SIZE {
                return Ok(None);
            }
            let candidates = n - CHUNK_HEADER_SIZE + 1;
            for i in 0..candidates {
                let offset = window_start + i as u64;
                let Some(header) = candidate_header(&window[i..i + CHUNK_HEADER_SIZE], offset)
                else {
                    continue;
                };
                if header.chunk_end(offset) > src_len {
                    continue;
                }
                match self.read_chunk_at(offset) {
                    Ok(Some(_)) => return Ok(Some(offset)),
                    Ok(None) => {}
                    Err(e) if e.is_data_loss() => {}
                    Err(e) => return Err(e),
                }
            }
            if n < window.len() {
                return Ok(None);
            }
            window_start += candidates as u64;
        }
    }
}

/// Structural header check of a recovery candidate, done before reading
/// any of its payload.
fn candidate_header(bytes: &[u8], offset: u64) -> Option<ChunkHeader> {
    if ChunkType::from_byte(bytes[0]).is_none() || bytes[1..8].iter().any(|&b| b != 0) {
        return None;
    }
    let bytes: &[u8; CHUNK_HEADER_SIZE] = bytes.try_into().ok()?;
    ChunkHeader::decode(bytes, offset).ok()
}

fn clamp_index(index: u64) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}

// ---------------------------------------------------------------------------
// Records iterator
// ---------------------------------------------------------------------------

/// Iterator returned by [`RecordReader::records`].
pub struct Records<'a, R: Read + Seek> {
    reader: &'a mut RecordReader<R>,
    done: bool,
}

impl<R: Read + Seek> Iterator for Records<'_, R> {
    type Item = RecordsResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
