// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Strata records - Background chunk encoding
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// A fixed pool of worker threads encodes closed chunks while the writer
// keeps accepting records. Workers finish in any order; a shared sequencer
// releases encoded chunks in submission order, fixes each chunk's sink
// offset as it goes, and forwards the chunk to the writer. Offsets therefore
// resolve as soon as encoding catches up, without waiting for the writer to
// be called again.

use std::collections::BTreeMap;
use std::hash::Hasher;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use tracing::debug;
use twox_hash::XxHash64;

use crate::chunk::Chunk;
use crate::chunk_encoding::ChunkEncoder;
use crate::error::{RecordsError, RecordsResult};
use crate::position::{ChunkBeginPromise, ChunkBeginResolver};

struct EncodeJob {
    seq: u64,
    encoder: ChunkEncoder,
    promise: ChunkBeginPromise,
    /// Sink offset of the chunk when nothing was in flight at submission.
    start: Option<u64>,
}

struct Encoded {
    result: RecordsResult<Chunk>,
    promise: ChunkBeginPromise,
    start: Option<u64>,
}

/// Release state shared by the workers.
#[derive(Default)]
struct Sequencer {
    /// Encoded chunks that finished ahead of an earlier one.
    waiting: BTreeMap<u64, Encoded>,
    /// Sequence number of the next chunk to release.
    next_seq: u64,
    submitted: u64,
    /// Sink offset just past the last released chunk.
    end: u64,
    /// Offset promise of the writer's active chunk.
    tail: Option<ChunkBeginResolver>,
    /// Set after an encoding error or on shutdown; nothing resolves after it.
    stopped: bool,
}

impl Sequencer {
    fn release(&mut self, ordered: &Sender<RecordsResult<Chunk>>) {
        while let Some(encoded) = self.waiting.remove(&self.next_seq) {
            self.next_seq += 1;
            if self.stopped {
                continue;
            }
            match &encoded.result {
                Ok(chunk) => {
                    let chunk_begin = encoded.start.unwrap_or(self.end);
                    encoded.promise.resolve(chunk_begin);
                    self.end = chunk_begin + chunk.encoded_size();
                }
                Err(_) => self.stopped = true,
            }
            if ordered.send(encoded.result).is_err() {
                self.stopped = true;
            }
        }
        self.resolve_tail();
    }

    fn resolve_tail(&self) {
        if !self.stopped && self.next_seq == self.submitted {
            if let Some(tail) = &self.tail {
                tail.resolve(self.end);
            }
        }
    }
}

/// Worker pool plus the sequencer in front of the writer.
pub(crate) struct EncodePipeline {
    jobs: Option<Sender<EncodeJob>>,
    /// Encoded chunks in submission order.
    ordered: Receiver<RecordsResult<Chunk>>,
    sequencer: Arc<Mutex<Sequencer>>,
    workers: Vec<JoinHandle<()>>,
    /// Sequence number of the next submitted chunk.
    next_seq: u64,
    /// Sequence number of the next chunk handed back to the writer.
    next_out: u64,
    /// Upper bound in microseconds of an artificial per-chunk delay.
    jitter_micros: Arc<AtomicU64>,
}

impl EncodePipeline {
    /// Start `parallelism` workers.
    pub(crate) fn new(parallelism: usize) -> RecordsResult<Self> {
        let (job_tx, job_rx) = bounded::<EncodeJob>(parallelism);
        let (ordered_tx, ordered_rx) = unbounded::<RecordsResult<Chunk>>();
        let sequencer = Arc::new(Mutex::new(Sequencer::default()));
        let jitter_micros = Arc::new(AtomicU64::new(0));

        let mut workers = Vec::with_capacity(parallelism);
        for id in 0..parallelism {
            let jobs = job_rx.clone();
            let ordered = ordered_tx.clone();
            let sequencer = Arc::clone(&sequencer);
            let jitter = Arc::clone(&jitter_micros);
            let handle = thread::Builder::new()
                .name(format!("strata-encode-{id}"))
                .spawn(move || encode_worker(jobs, ordered, sequencer, jitter))?;
            workers.push(handle);
        }
        debug!(parallelism, "started chunk encoding workers");

        Ok(Self {
            jobs: Some(job_tx),
            ordered: ordered_rx,
            sequencer,
            workers,
            next_seq: 0,
            next_out: 0,
            jitter_micros,
        })
    }

    /// Chunks submitted but not yet handed back.
    pub(crate) fn in_flight(&self) -> usize {
        (self.next_seq - self.next_out) as usize
    }

    /// Queue a closed chunk for encoding.
    ///
    /// `pos` is the writer's sink offset. It becomes the chunk's offset
    /// when nothing is in flight; otherwise the chunk follows the one
    /// submitted before it.
    pub(crate) fn submit(
        &mut self,
        encoder: ChunkEncoder,
        promise: ChunkBeginPromise,
        pos: u64,
    ) -> RecordsResult<()> {
        let job = EncodeJob {
            seq: self.next_seq,
            encoder,
            promise,
            start: (self.in_flight() == 0).then_some(pos),
        };
        {
            let mut sequencer = self.sequencer.lock();
            sequencer.submitted += 1;
            sequencer.tail = None;
        }
        self.jobs
            .as_ref()
            .ok_or_else(workers_gone)?
            .send(job)
            .map_err(|_| workers_gone())?;
        self.next_seq += 1;
        Ok(())
    }

    /// Resolve `tail` once every submitted chunk has been encoded, at the
    /// offset just past them.
    pub(crate) fn set_tail(&self, tail: ChunkBeginResolver) {
        let mut sequencer = self.sequencer.lock();
        sequencer.tail = Some(tail);
        sequencer.resolve_tail();
    }

    /// The next chunk in submission order, waiting for it if necessary.
    ///
    /// `None` when nothing is in flight.
    pub(crate) fn next_blocking(&mut self) -> Option<RecordsResult<Chunk>> {
        if self.in_flight() == 0 {
            return None;
        }
        let result = self.ordered.recv().unwrap_or_else(|_| Err(workers_gone()));
        self.next_out += 1;
        Some(result)
    }

    /// The next chunk in submission order if it is already encoded.
    pub(crate) fn next_ready(&mut self) -> Option<RecordsResult<Chunk>> {
        if self.in_flight() == 0 {
            return None;
        }
        let result = match self.ordered.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => Err(workers_gone()),
        };
        self.next_out += 1;
        Some(result)
    }

    /// Delay each chunk's encoding by a pseudo-random amount up to `max`.
    #[cfg(test)]
    pub(crate) fn set_encode_jitter(&self, max: Duration) {
        self.jitter_micros
            .store(max.as_micros() as u64, Ordering::Relaxed);
    }
}

impl Drop for EncodePipeline {
    fn drop(&mut self) {
        let waiting = {
            let mut sequencer = self.sequencer.lock();
            sequencer.stopped = true;
            sequencer.tail = None;
            mem::take(&mut sequencer.waiting)
        };
        // Unreleased chunks abandon their offsets.
        drop(waiting);
        // Closing the job channel ends every worker loop.
        self.jobs = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn workers_gone() -> RecordsError {
    RecordsError::EncoderFailed("chunk encoding workers exited".to_string())
}

fn encode_worker(
    jobs: Receiver<EncodeJob>,
    ordered: Sender<RecordsResult<Chunk>>,
    sequencer: Arc<Mutex<Sequencer>>,
    jitter: Arc<AtomicU64>,
) {
    for job in jobs.iter() {
        if sequencer.lock().stopped {
            continue;
        }
        let EncodeJob {
            seq,
            mut encoder,
            promise,
            start,
        } = job;
        let max_delay = jitter.load(Ordering::Relaxed);
        if max_delay > 0 {
            let mut hasher = XxHash64::with_seed(max_delay);
            hasher.write_u64(seq);
            thread::sleep(Duration::from_micros(hasher.finish() % max_delay));
        }
        let result = encoder.encode();

        let mut sequencer = sequencer.lock();
        sequencer.waiting.insert(
            seq,
            Encoded {
                result,
                promise,
                start,
            },
        );
        sequencer.release(&ordered);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::RecordWriterOptions;
    use crate::position::FutureRecordPosition;

    fn encoder_with(record: &[u8]) -> ChunkEncoder {
        let options: RecordWriterOptions = "uncompressed".parse().unwrap();
        let mut encoder = ChunkEncoder::new(&options);
        encoder.add_record(record).unwrap();
        encoder
    }

    #[test]
    fn test_results_come_back_in_submission_order() {
        let mut pipeline = EncodePipeline::new(4).unwrap();
        pipeline.set_encode_jitter(Duration::from_millis(5));

        let mut expected = Vec::new();
        let mut received = Vec::new();
        for i in 0..32u32 {
            let record = i.to_le_bytes();
            expected.push(encoder_with(&record).encode().unwrap());
            while pipeline.in_flight() >= 4 {
                received.push(pipeline.next_blocking().unwrap().unwrap());
            }
            pipeline
                .submit(encoder_with(&record), ChunkBeginPromise::new(), 0)
                .unwrap();
        }
        while let Some(chunk) = pipeline.next_blocking() {
            received.push(chunk.unwrap());
        }
        assert_eq!(received, expected);
        assert_eq!(pipeline.in_flight(), 0);
    }

    #[test]
    fn test_next_ready_does_not_block() {
        let mut pipeline = EncodePipeline::new(1).unwrap();
        assert!(pipeline.next_ready().is_none());
        pipeline
            .submit(encoder_with(b"x"), ChunkBeginPromise::new(), 0)
            .unwrap();
        let chunk = pipeline.next_blocking().unwrap().unwrap();
        assert_eq!(chunk.header.num_records, 1);
        assert!(pipeline.next_ready().is_none());
    }

    #[test]
    fn test_offsets_resolve_without_draining() {
        let mut pipeline = EncodePipeline::new(3).unwrap();
        pipeline.set_encode_jitter(Duration::from_millis(5));

        let records: [&[u8]; 3] = [b"a", b"bbbb", b"cc"];
        let mut futures = Vec::new();
        for record in records {
            let promise = ChunkBeginPromise::new();
            futures.push(promise.future(0));
            pipeline.submit(encoder_with(record), promise, 100).unwrap();
        }
        let tail = ChunkBeginPromise::new();
        let tail_future = tail.future(0);
        pipeline.set_tail(tail.resolver());

        // Nothing is taken from the pipeline while these resolve.
        let mut expected = 100;
        for (future, record) in futures.iter().zip(records) {
            assert_eq!(future.get().unwrap().chunk_begin(), expected);
            expected += encoder_with(record).encode().unwrap().encoded_size();
        }
        assert_eq!(tail_future.get().unwrap().chunk_begin(), expected);
        assert_eq!(pipeline.in_flight(), 3);
    }

    #[test]
    fn test_tail_set_after_encoding_resolves_at_once() {
        let mut pipeline = EncodePipeline::new(1).unwrap();
        let promise = ChunkBeginPromise::new();
        let first = promise.future(0);
        pipeline.submit(encoder_with(b"x"), promise, 40).unwrap();
        assert_eq!(first.get().unwrap().chunk_begin(), 40);
        let size = encoder_with(b"x").encode().unwrap().encoded_size();

        let tail = ChunkBeginPromise::new();
        pipeline.set_tail(tail.resolver());
        assert_eq!(tail.future(0).try_get().unwrap().unwrap().chunk_begin(), 40 + size);
    }

    #[test]
    fn test_drop_settles_every_offset() {
        let mut pipeline = EncodePipeline::new(2).unwrap();
        pipeline.set_encode_jitter(Duration::from_millis(20));
        let futures: Vec<FutureRecordPosition> = (0..2u8)
            .map(|i| {
                let promise = ChunkBeginPromise::new();
                let future = promise.future(0);
                pipeline.submit(encoder_with(&[i]), promise, 0).unwrap();
                future
            })
            .collect();
        drop(pipeline);
        // Each offset either resolved before shutdown or was abandoned.
        assert!(futures.iter().all(FutureRecordPosition::is_ready));
    }
}
