// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Strata records - Record writer
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The `RecordWriter` buffers records into the active chunk, closes the chunk
// once it reaches the configured size, and appends framed chunks to a
// `ByteSink`. With `parallelism > 0` closed chunks are encoded on background
// workers, but they still reach the sink strictly in the order they were
// closed, so the output bytes do not depend on thread scheduling.

use std::mem;

use tracing::{debug, info, warn};

use crate::chunk::Chunk;
use crate::chunk_encoding::{ChunkEncoder, MAX_RECORDS_PER_CHUNK};
use crate::error::{RecordsError, RecordsResult};
use crate::options::RecordWriterOptions;
use crate::pipeline::EncodePipeline;
use crate::position::{ChunkBeginPromise, FutureRecordPosition, RecordPosition};
use crate::sink::{ByteSink, FlushType};

// ---------------------------------------------------------------------------
// WriterState
// ---------------------------------------------------------------------------

/// Lifecycle of a [`RecordWriter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterState {
    /// Accepting records.
    Open,
    /// Closed cleanly. Terminal.
    Closed,
    /// An operation failed; the message is reported by every later call.
    Failed(String),
}

// ---------------------------------------------------------------------------
// RecordWriter
// ---------------------------------------------------------------------------

/// Writes records as chunks to a byte sink.
pub struct RecordWriter<S: ByteSink> {
    /// `None` only after [`RecordWriter::into_inner`].
    sink: Option<S>,

    options: RecordWriterOptions,

    state: WriterState,

    /// Sink offset just past the last byte written.
    pos: u64,

    /// Records of the chunk currently being filled.
    active: ChunkEncoder,

    /// Offset promise of the active chunk, created lazily by the first
    /// record or by `pos()`.
    active_promise: Option<ChunkBeginPromise>,

    /// Background encoders, when `parallelism > 0`. Submitted chunks carry
    /// their offset promises with them.
    pipeline: Option<EncodePipeline>,
}

impl<S: ByteSink> RecordWriter<S> {
    /// Create a writer over `sink`.
    ///
    /// Options are validated before anything is written. A sink at offset 0
    /// receives the metadata chunk (if any) and the file signature; a sink
    /// positioned further along is treated as an append and gets neither.
    pub fn new(mut sink: S, options: RecordWriterOptions) -> RecordsResult<Self> {
        let metadata = options.validate()?;
        let pos = match options.assumed_pos() {
            Some(pos) => pos,
            None => sink.position()?.ok_or_else(|| {
                RecordsError::InvalidArgument(
                    "sink cannot report its position; set assumed_pos".to_string(),
                )
            })?,
        };
        let pipeline = match options.parallelism() {
            0 => None,
            parallelism => Some(EncodePipeline::new(parallelism)?),
        };

        let mut writer = Self {
            sink: Some(sink),
            active: ChunkEncoder::new(&options),
            options,
            state: WriterState::Open,
            pos,
            active_promise: None,
            pipeline,
        };

        if pos == 0 {
            if let Some(metadata) = metadata {
                writer.write_chunk(&Chunk::metadata(metadata))?;
            }
            writer.write_chunk(&Chunk::signature())?;
        }
        if writer.options.pad_to_block_boundary() {
            writer.pad()?;
        }

        info!(
            start = pos,
            pos = writer.pos,
            options = %writer.options,
            "Opened records writer"
        );
        Ok(writer)
    }

    /// Append one record.
    pub fn write_record(&mut self, record: &[u8]) -> RecordsResult<()> {
        self.add_record(record).map(|_| ())
    }

    /// Append one record and return where it will live.
    pub fn write_record_with_key(&mut self, record: &[u8]) -> RecordsResult<FutureRecordPosition> {
        self.add_record(record)
    }

    /// Append records in order, stopping at the first failure.
    pub fn write_records<I>(&mut self, records: I) -> RecordsResult<()>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        for record in records {
            self.add_record(record.as_ref())?;
        }
        Ok(())
    }

    /// Append records in order and return their positions.
    pub fn write_records_with_keys<I>(&mut self, records: I) -> RecordsResult<Vec<FutureRecordPosition>>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        records
            .into_iter()
            .map(|record| self.add_record(record.as_ref()))
            .collect()
    }

    /// Close the active chunk, write every pending chunk, and push the
    /// data as far as `flush_type` requires.
    ///
    /// Each flush ends the current chunk, so flushing often produces
    /// smaller chunks that compress worse.
    pub fn flush(&mut self, flush_type: FlushType) -> RecordsResult<()> {
        self.check_open()?;
        self.close_chunk()?;
        self.drain()?;
        // A promise handed out by `pos()` for a still empty chunk is fixed
        // here; padding may move the next chunk, but seeking to the promised
        // offset still reaches the next record.
        self.resolve_active_if_unblocked();
        self.active_promise = None;

        if self.options.pad_to_block_boundary() {
            self.pad()?;
        }
        if flush_type != FlushType::FromObject {
            let result = match self.sink.as_mut() {
                Some(sink) => sink.flush(flush_type),
                None => return Err(RecordsError::Closed),
            };
            if let Err(e) = result {
                return Err(self.fail(e.into()));
            }
        }
        debug!(pos = self.pos, ?flush_type, "Flushed records writer");
        Ok(())
    }

    /// Flush everything and close the writer.
    ///
    /// Closing a closed writer does nothing; closing a failed writer
    /// reports the stored failure again.
    pub fn close(&mut self) -> RecordsResult<()> {
        match &self.state {
            WriterState::Closed => return Ok(()),
            WriterState::Failed(message) => return Err(RecordsError::Failed(message.clone())),
            WriterState::Open => {}
        }
        self.flush(FlushType::FromObject)?;
        self.pipeline = None;
        self.state = WriterState::Closed;

        if self.options.close_sink() {
            if let Some(sink) = self.sink.as_mut() {
                if let Err(e) = sink.close() {
                    let message = e.to_string();
                    warn!(error = %message, "Closing records sink failed");
                    self.state = WriterState::Failed(message);
                    return Err(e.into());
                }
            }
        }
        info!(pos = self.pos, "Closed records writer");
        Ok(())
    }

    /// Position the next written record will occupy.
    ///
    /// Until that record's chunk is written this may name the offset where
    /// padding begins rather than the chunk itself; both lead a reader to
    /// the same record.
    pub fn pos(&mut self) -> FutureRecordPosition {
        match self.state {
            WriterState::Open => {}
            WriterState::Closed => return FutureRecordPosition::ready(RecordPosition::new(self.pos, 0)),
            WriterState::Failed(_) => return ChunkBeginPromise::new().future(0),
        }
        let index = self.active.num_records() as u32;
        self.active_promise
            .get_or_insert_with(|| new_chunk_promise(self.pipeline.as_ref(), self.pos))
            .future(index)
    }

    /// Close the writer and hand back the sink.
    pub fn into_inner(mut self) -> RecordsResult<S> {
        self.close()?;
        self.sink.take().ok_or(RecordsError::Closed)
    }

    pub fn state(&self) -> &WriterState {
        &self.state
    }

    pub fn options(&self) -> &RecordWriterOptions {
        &self.options
    }

    pub fn get_ref(&self) -> Option<&S> {
        self.sink.as_ref()
    }

    /// Delay every background chunk encoding by a pseudo-random amount.
    #[cfg(test)]
    pub(crate) fn set_encode_jitter(&self, max: std::time::Duration) {
        if let Some(pipeline) = &self.pipeline {
            pipeline.set_encode_jitter(max);
        }
    }

    // -- internals ----------------------------------------------------------

    fn add_record(&mut self, record: &[u8]) -> RecordsResult<FutureRecordPosition> {
        self.check_open()?;
        let index = self.active.num_records() as u32;
        let future = self
            .active_promise
            .get_or_insert_with(|| new_chunk_promise(self.pipeline.as_ref(), self.pos))
            .future(index);
        if let Err(e) = self.active.add_record(record) {
            return Err(self.fail(e));
        }
        if self.active.decoded_data_size() >= self.options.chunk_size()
            || self.active.num_records() >= MAX_RECORDS_PER_CHUNK
        {
            self.close_chunk()?;
        }
        Ok(future)
    }

    /// Hand the active chunk to the encoder and start a new one.
    fn close_chunk(&mut self) -> RecordsResult<()> {
        if self.active.is_empty() {
            return Ok(());
        }
        let promise = self.active_promise.take();
        let mut encoder = mem::replace(&mut self.active, ChunkEncoder::new(&self.options));

        if self.pipeline.is_none() {
            let chunk = match encoder.encode() {
                Ok(chunk) => chunk,
                Err(e) => return Err(self.fail(e)),
            };
            return self.write_record_chunk(&chunk, promise);
        }

        let parallelism = self.options.parallelism();
        while self.pipeline.as_ref().map_or(0, EncodePipeline::in_flight) >= parallelism {
            self.write_next_encoded(true)?;
        }
        let promise = promise.unwrap_or_else(ChunkBeginPromise::new);
        let submitted = match self.pipeline.as_mut() {
            Some(pipeline) => pipeline.submit(encoder, promise, self.pos),
            None => Err(RecordsError::Closed),
        };
        if let Err(e) = submitted {
            return Err(self.fail(e));
        }
        while self.write_next_encoded(false)? {}
        Ok(())
    }

    /// Write the oldest encoded chunk, if available (or, with `wait`,
    /// once available). Returns whether a chunk was written.
    fn write_next_encoded(&mut self, wait: bool) -> RecordsResult<bool> {
        let next = match self.pipeline.as_mut() {
            Some(pipeline) if wait => pipeline.next_blocking(),
            Some(pipeline) => pipeline.next_ready(),
            None => None,
        };
        let chunk = match next {
            None => return Ok(false),
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => return Err(self.fail(e)),
        };
        // Its offset was fixed by the pipeline.
        self.write_record_chunk(&chunk, None)?;
        self.resolve_active_if_unblocked();
        Ok(true)
    }

    /// Write every submitted chunk.
    fn drain(&mut self) -> RecordsResult<()> {
        while self.write_next_encoded(true)? {}
        Ok(())
    }

    fn write_record_chunk(
        &mut self,
        chunk: &Chunk,
        promise: Option<ChunkBeginPromise>,
    ) -> RecordsResult<()> {
        let chunk_begin = self.pos;
        self.write_chunk(chunk)?;
        if let Some(promise) = promise {
            promise.resolve(chunk_begin);
        }
        debug!(
            chunk_begin,
            records = chunk.header.num_records,
            decoded_size = chunk.header.decoded_data_size,
            encoded_size = chunk.encoded_size(),
            "Wrote chunk"
        );
        Ok(())
    }

    /// Once no earlier chunk is outstanding, the active chunk's offset is
    /// the current position.
    fn resolve_active_if_unblocked(&self) {
        if self.pipeline.as_ref().map_or(0, EncodePipeline::in_flight) == 0 {
            if let Some(promise) = &self.active_promise {
                promise.resolve(self.pos);
            }
        }
    }

    fn pad(&mut self) -> RecordsResult<()> {
        if let Some(padding) = Chunk::padding_at(self.pos) {
            self.write_chunk(&padding)?;
        }
        Ok(())
    }

    fn write_chunk(&mut self, chunk: &Chunk) -> RecordsResult<()> {
        let result = match self.sink.as_mut() {
            Some(sink) => sink
                .write_all(&chunk.header.encode())
                .and_then(|()| sink.write_all(&chunk.data)),
            None => return Err(RecordsError::Closed),
        };
        if let Err(e) = result {
            return Err(self.fail(e.into()));
        }
        self.pos += chunk.encoded_size();
        Ok(())
    }

    fn check_open(&self) -> RecordsResult<()> {
        match &self.state {
            WriterState::Open => Ok(()),
            WriterState::Closed => Err(RecordsError::Closed),
            WriterState::Failed(message) => Err(RecordsError::Failed(message.clone())),
        }
    }

    /// Record the first failure and abandon every outstanding position.
    fn fail(&mut self, error: RecordsError) -> RecordsError {
        if self.state == WriterState::Open {
            let message = error.to_string();
            warn!(pos = self.pos, error = %message, "Records writer failed");
            self.state = WriterState::Failed(message);
        }
        self.active_promise = None;
        self.pipeline = None;
        error
    }
}

impl<S: ByteSink> Drop for RecordWriter<S> {
    fn drop(&mut self) {
        if self.state == WriterState::Open {
            if let Err(e) = self.close() {
                warn!(error = %e, "Records writer failed while closing on drop");
            }
        }
    }
}

/// A promise for a new chunk. Resolved at once when nothing written before
/// it is still outstanding, otherwise by the pipeline once every earlier
/// chunk is encoded.
fn new_chunk_promise(pipeline: Option<&EncodePipeline>, pos: u64) -> ChunkBeginPromise {
    let promise = ChunkBeginPromise::new();
    match pipeline {
        Some(pipeline) if pipeline.in_flight() > 0 => pipeline.set_tail(promise.resolver()),
        _ => promise.resolve(pos),
    }
    promise
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ChunkType, BLOCK_SIZE, CHUNK_HEADER_SIZE};
    use crate::metadata::RecordsMetadata;
    use crate::sink::SequentialSink;
    use std::io;
    use std::thread;
    use std::time::{Duration, Instant};

    fn writer(options: &str) -> RecordWriter<Vec<u8>> {
        RecordWriter::new(Vec::new(), options.parse().unwrap()).unwrap()
    }

    /// Chunk types and offsets found by walking headers.
    fn chunk_layout(bytes: &[u8]) -> Vec<(u64, ChunkType)> {
        let mut layout = Vec::new();
        let mut pos = 0usize;
        while pos < bytes.len() {
            let header: [u8; CHUNK_HEADER_SIZE] =
                bytes[pos..pos + CHUNK_HEADER_SIZE].try_into().unwrap();
            let header = crate::chunk::ChunkHeader::decode(&header, pos as u64).unwrap();
            layout.push((pos as u64, header.chunk_type));
            pos = header.chunk_end(pos as u64) as usize;
        }
        layout
    }

    /// Sink that fails every write after the first `budget` bytes.
    struct FailingSink {
        written: Vec<u8>,
        budget: usize,
    }

    impl ByteSink for FailingSink {
        fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            if self.written.len() + data.len() > self.budget {
                return Err(io::Error::other("disk full"));
            }
            self.written.extend_from_slice(data);
            Ok(())
        }

        fn flush(&mut self, _flush_type: FlushType) -> io::Result<()> {
            Ok(())
        }

        fn position(&mut self) -> io::Result<Option<u64>> {
            Ok(Some(self.written.len() as u64))
        }
    }

    #[test]
    fn test_one_record_per_chunk() {
        let mut w = writer("uncompressed,chunk_size:1");
        w.write_record(b"a").unwrap();
        let key = w.write_record_with_key(b"bb").unwrap();
        w.write_record(b"ccc").unwrap();
        let bytes = w.into_inner().unwrap();

        let layout = chunk_layout(&bytes);
        let types: Vec<ChunkType> = layout.iter().map(|(_, t)| *t).collect();
        assert_eq!(
            types,
            vec![
                ChunkType::FileSignature,
                ChunkType::Simple,
                ChunkType::Simple,
                ChunkType::Simple
            ]
        );
        // "bb" lives in the chunk right after the one holding "a".
        assert_eq!(key.get().unwrap(), RecordPosition::new(layout[2].0, 0));
    }

    #[test]
    fn test_positions_within_chunk() {
        let mut w = writer("uncompressed");
        let first = w.write_record_with_key(b"x").unwrap();
        let second = w.write_record_with_key(b"y").unwrap();
        assert_eq!(first.get().unwrap(), RecordPosition::new(CHUNK_HEADER_SIZE as u64, 0));
        assert_eq!(second.get().unwrap(), RecordPosition::new(CHUNK_HEADER_SIZE as u64, 1));
        assert!(first.get().unwrap() < second.get().unwrap());
    }

    #[test]
    fn test_pos_matches_next_record() {
        let mut w = writer("uncompressed,chunk_size:1");
        w.write_record(b"first").unwrap();
        let predicted = w.pos();
        let actual = w.write_record_with_key(b"second").unwrap();
        assert_eq!(predicted.get().unwrap(), actual.get().unwrap());
    }

    #[test]
    fn test_empty_writer_writes_only_signature() {
        let bytes = writer("").into_inner().unwrap();
        assert_eq!(bytes.len(), CHUNK_HEADER_SIZE);
        assert_eq!(bytes[0], b's');
    }

    #[test]
    fn test_metadata_precedes_signature_on_fresh_file() {
        let options = RecordWriterOptions::new()
            .set_metadata(RecordsMetadata::new().with_comment("hello"));
        let bytes = RecordWriter::new(Vec::new(), options)
            .unwrap()
            .into_inner()
            .unwrap();
        let types: Vec<ChunkType> = chunk_layout(&bytes).into_iter().map(|(_, t)| t).collect();
        assert_eq!(types, vec![ChunkType::FileMetadata, ChunkType::FileSignature]);
    }

    #[test]
    fn test_append_writes_no_signature() {
        let mut sink = writer("").into_inner().unwrap();
        let start = sink.len();
        let options = RecordWriterOptions::new()
            .set_metadata(RecordsMetadata::new().with_comment("ignored on append"));
        let mut appender = RecordWriter::new(&mut sink, options).unwrap();
        appender.write_record(b"more").unwrap();
        appender.close().unwrap();
        drop(appender);
        assert_eq!(sink[start], b'r');
    }

    #[test]
    fn test_padding_aligns_chunks() {
        let mut w = writer("uncompressed,pad_to_block_boundary,chunk_size:100");
        let mut keys = Vec::new();
        for i in 0..10u8 {
            keys.push(w.write_record_with_key(&[i; 150]).unwrap());
            if i % 3 == 0 {
                w.flush(FlushType::FromObject).unwrap();
            }
        }
        let bytes = w.into_inner().unwrap();
        assert_eq!(bytes.len() as u64 % BLOCK_SIZE, 0);
        // Chunks following a padding chunk start on a block boundary.
        let layout = chunk_layout(&bytes);
        for pair in layout.windows(2) {
            if pair[0].1 == ChunkType::Padding {
                assert_eq!(pair[1].0 % BLOCK_SIZE, 0);
            }
        }
        assert_eq!(keys[0].get().unwrap().chunk_begin(), BLOCK_SIZE);
    }

    #[test]
    fn test_sequential_sink_needs_assumed_pos() {
        let error = RecordWriter::new(SequentialSink::new(Vec::new()), RecordWriterOptions::new())
            .err()
            .unwrap();
        assert!(matches!(error, RecordsError::InvalidArgument(_)));

        let options = RecordWriterOptions::new().set_assumed_pos(0);
        let mut w = RecordWriter::new(SequentialSink::new(Vec::new()), options).unwrap();
        let key = w.write_record_with_key(b"piped").unwrap();
        let sink = w.into_inner().unwrap();
        assert_eq!(key.get().unwrap().chunk_begin(), CHUNK_HEADER_SIZE as u64);
        assert!(sink.get_ref().len() > CHUNK_HEADER_SIZE);
    }

    #[test]
    fn test_conflicting_metadata_rejected_before_writing() {
        let options = RecordWriterOptions::new()
            .set_metadata(RecordsMetadata::new().with_comment("a"))
            .set_serialized_metadata(b"b".to_vec());
        let mut sink = Vec::new();
        assert!(RecordWriter::new(&mut sink, options).is_err());
        assert!(sink.is_empty());
    }

    #[test]
    fn test_close_is_idempotent_and_blocks_writes() {
        let mut w = writer("");
        w.write_record(b"x").unwrap();
        w.close().unwrap();
        w.close().unwrap();
        assert_eq!(w.state(), &WriterState::Closed);
        assert!(matches!(w.write_record(b"y"), Err(RecordsError::Closed)));
        assert!(matches!(w.flush(FlushType::FromProcess), Err(RecordsError::Closed)));
    }

    #[test]
    fn test_failure_is_sticky() {
        let sink = FailingSink {
            written: Vec::new(),
            budget: CHUNK_HEADER_SIZE + 10,
        };
        let mut w = RecordWriter::new(sink, "uncompressed".parse().unwrap()).unwrap();
        let key = w.write_record_with_key(&[7u8; 64]).unwrap();
        assert!(matches!(w.flush(FlushType::FromObject), Err(RecordsError::Io(_))));
        assert!(matches!(w.state(), WriterState::Failed(_)));
        assert!(matches!(w.write_record(b"x"), Err(RecordsError::Failed(_))));
        assert!(matches!(w.close(), Err(RecordsError::Failed(_))));
        // Its chunk was never written, so the key can still resolve to the
        // offset known when the record was added.
        assert!(key.get().is_ok());
    }

    #[test]
    fn test_failure_settles_pending_positions() {
        let sink = FailingSink {
            written: Vec::new(),
            budget: CHUNK_HEADER_SIZE + 10,
        };
        let options: RecordWriterOptions = "uncompressed,parallelism:2,chunk_size:1".parse().unwrap();
        let mut w = RecordWriter::new(sink, options).unwrap();
        w.set_encode_jitter(Duration::from_millis(20));
        let keys: Vec<_> = (0..4u8)
            .map_while(|i| w.write_record_with_key(&[i; 32]).ok())
            .collect();
        let _ = w.close();
        assert!(matches!(w.state(), WriterState::Failed(_)));
        // Offsets fixed before the sink failed stay resolved; the rest are
        // abandoned. Nothing is left waiting.
        assert!(keys.iter().all(FutureRecordPosition::is_ready));
        let resolved: Vec<RecordPosition> = keys.iter().map_while(|key| key.get().ok()).collect();
        assert!(resolved.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(keys[resolved.len()..].iter().all(|key| matches!(
            key.get(),
            Err(RecordsError::PositionUnavailable(_))
        )));
    }

    #[test]
    fn test_parallel_output_matches_synchronous() {
        let records: Vec<Vec<u8>> = (0..500u32)
            .map(|i| format!("record number {i} {}", "x".repeat((i % 37) as usize)).into_bytes())
            .collect();
        let base = "zstd:3,chunk_size:2k";

        let mut sync = writer(base);
        let sync_keys = sync.write_records_with_keys(&records).unwrap();
        sync.flush(FlushType::FromObject).unwrap();
        sync.write_records(&records[..50]).unwrap();
        let sync_bytes = sync.into_inner().unwrap();

        let mut parallel = writer(&format!("{base},parallelism:4"));
        parallel.set_encode_jitter(Duration::from_millis(3));
        let parallel_keys = parallel.write_records_with_keys(&records).unwrap();
        parallel.flush(FlushType::FromObject).unwrap();
        parallel.write_records(&records[..50]).unwrap();
        let parallel_bytes = parallel.into_inner().unwrap();

        assert_eq!(sync_bytes, parallel_bytes);
        for (a, b) in sync_keys.iter().zip(&parallel_keys) {
            assert_eq!(a.get().unwrap(), b.get().unwrap());
        }
    }

    #[test]
    fn test_parallel_keys_resolve_in_order() {
        let mut w = writer("uncompressed,chunk_size:64,parallelism:3");
        w.set_encode_jitter(Duration::from_millis(2));
        let keys = w
            .write_records_with_keys((0..200u32).map(|i| i.to_le_bytes()))
            .unwrap();
        w.close().unwrap();
        let positions: Vec<RecordPosition> = keys.iter().map(|k| k.get().unwrap()).collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
    }

    /// Poll `key` for up to five seconds without touching the writer.
    fn ready_while_idle(key: &FutureRecordPosition) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !key.is_ready() {
            if Instant::now() > deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    #[test]
    fn test_parallel_keys_resolve_while_writer_idle() {
        let mut w = writer("uncompressed,chunk_size:1,parallelism:2");
        w.set_encode_jitter(Duration::from_millis(50));
        let keys: Vec<_> = (0..3u8)
            .map(|i| w.write_record_with_key(&[i; 8]).unwrap())
            .collect();

        let ready: Vec<bool> = keys.iter().map(ready_while_idle).collect();
        assert_eq!(ready, vec![true; 3]);
        let positions: Vec<RecordPosition> = keys.iter().map(|k| k.get().unwrap()).collect();

        let bytes = w.into_inner().unwrap();
        let expected: Vec<RecordPosition> = chunk_layout(&bytes)[1..]
            .iter()
            .map(|(offset, _)| RecordPosition::new(*offset, 0))
            .collect();
        assert_eq!(positions, expected);
    }

    #[test]
    fn test_active_chunk_key_resolves_while_writer_idle() {
        let mut w = writer("uncompressed,chunk_size:64,parallelism:2");
        w.set_encode_jitter(Duration::from_millis(20));
        // Fills and closes the first chunk.
        let first = w.write_record_with_key(&[1u8; 64]).unwrap();
        let tail = w.write_record_with_key(b"tail").unwrap();
        let next = w.pos();

        assert!(ready_while_idle(&first));
        assert!(ready_while_idle(&tail));
        assert!(ready_while_idle(&next));
        let tail_position = tail.get().unwrap();
        assert_eq!(
            next.get().unwrap(),
            RecordPosition::new(tail_position.chunk_begin(), 1)
        );

        let bytes = w.into_inner().unwrap();
        let layout = chunk_layout(&bytes);
        assert_eq!(first.get().unwrap(), RecordPosition::new(layout[1].0, 0));
        assert_eq!(tail_position, RecordPosition::new(layout[2].0, 0));
    }

    #[test]
    fn test_in_flight_chunks_bounded_by_parallelism() {
        let mut w = writer("uncompressed,chunk_size:16,parallelism:3");
        w.set_encode_jitter(Duration::from_millis(5));
        let mut peak = 0;
        for i in 0..60u32 {
            w.write_record(&[i as u8; 16]).unwrap();
            let in_flight = w.pipeline.as_ref().map_or(0, EncodePipeline::in_flight);
            assert!(in_flight <= 3, "{in_flight} chunks in flight");
            peak = peak.max(in_flight);
        }
        assert!(peak > 0);
        w.flush(FlushType::FromObject).unwrap();
        assert_eq!(w.pipeline.as_ref().map_or(0, EncodePipeline::in_flight), 0);
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum SinkEvent {
        Flush(FlushType),
        Close,
    }

    /// In-memory sink that logs flushes and closes along with the length at
    /// that moment.
    #[derive(Default)]
    struct RecordingSink {
        data: Vec<u8>,
        events: Vec<(SinkEvent, u64)>,
    }

    impl ByteSink for RecordingSink {
        fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            self.data.extend_from_slice(data);
            Ok(())
        }

        fn flush(&mut self, flush_type: FlushType) -> io::Result<()> {
            self.events
                .push((SinkEvent::Flush(flush_type), self.data.len() as u64));
            Ok(())
        }

        fn position(&mut self) -> io::Result<Option<u64>> {
            Ok(Some(self.data.len() as u64))
        }

        fn close(&mut self) -> io::Result<()> {
            self.events.push((SinkEvent::Close, self.data.len() as u64));
            Ok(())
        }
    }

    #[test]
    fn test_flush_levels_reach_sink_after_padding() {
        let mut sink = RecordingSink::default();
        let options: RecordWriterOptions = "uncompressed,pad_to_block_boundary".parse().unwrap();
        let mut w = RecordWriter::new(&mut sink, options.set_close_sink(false)).unwrap();

        w.write_record(b"object").unwrap();
        w.flush(FlushType::FromObject).unwrap();
        assert_eq!(w.pos % BLOCK_SIZE, 0);
        let after_object = w.pos;

        w.write_record(b"process").unwrap();
        w.flush(FlushType::FromProcess).unwrap();
        let after_process = w.pos;

        w.write_record(b"machine").unwrap();
        w.flush(FlushType::FromMachine).unwrap();
        let after_machine = w.pos;

        w.close().unwrap();
        drop(w);

        // FromObject never reaches the sink, and the sink is left open.
        assert_eq!(
            sink.events,
            vec![
                (SinkEvent::Flush(FlushType::FromProcess), after_process),
                (SinkEvent::Flush(FlushType::FromMachine), after_machine),
            ]
        );
        assert!(after_object < after_process && after_process < after_machine);
        for (_, len) in &sink.events {
            assert_eq!(len % BLOCK_SIZE, 0);
        }
        assert_eq!(sink.data.len() as u64 % BLOCK_SIZE, 0);
    }

    #[test]
    fn test_close_releases_sink_once() {
        let mut sink = RecordingSink::default();
        let mut w = RecordWriter::new(&mut sink, RecordWriterOptions::new()).unwrap();
        w.write_record(b"x").unwrap();
        w.close().unwrap();
        w.close().unwrap();
        drop(w);
        let len = sink.data.len() as u64;
        assert_eq!(sink.events, vec![(SinkEvent::Close, len)]);
    }
}
