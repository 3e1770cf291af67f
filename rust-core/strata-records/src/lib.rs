// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Strata records crate
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// A record container format: sequences of opaque byte-string records packed
// into checksummed, optionally compressed chunks in a single byte stream,
// with positional addressing, parallel encoding, and recovery from damage.
//
// # Architecture
//
// A stream is a sequence of **chunks**. Each chunk is a 40-byte header
// followed by its payload. Record-bearing chunks use either the simple
// encoding (lengths plus concatenated bytes) or the transposed encoding
// (protocol-buffer fields regrouped into per-field buffers, readable with
// field projection). Padding chunks can align chunk boundaries to 64 KiB
// blocks so that damaged files resynchronise quickly and independently
// written files can be concatenated.
//
// ## Stream layout
//
// ```text
// [metadata chunk]     -- optional, fresh files only
// [signature chunk]    -- fresh files only
// [padding chunk]      -- when pad_to_block_boundary is set
// [record chunk] ...   -- mixed with padding after flushes
// ```
//
// ## Usage
//
// ```no_run
// use std::fs::File;
// use strata_records::{RecordReader, RecordWriter, RecordWriterOptions};
//
// let options: RecordWriterOptions = "zstd:3,chunk_size:256k".parse().unwrap();
// let mut writer = RecordWriter::new(File::create("/tmp/events.strata").unwrap(), options).unwrap();
// let key = writer.write_record_with_key(b"first event").unwrap();
// writer.write_record(b"second event").unwrap();
// writer.close().unwrap();
//
// let mut reader = RecordReader::new(File::open("/tmp/events.strata").unwrap());
// reader.seek(key.get().unwrap()).unwrap();
// while let Some(record) = reader.read_record().unwrap() {
//     println!("{} bytes", record.len());
// }
// ```

pub mod chunk;
pub mod chunk_encoding;
pub mod compression;
pub mod error;
pub mod metadata;
pub mod options;
mod pipeline;
pub mod position;
pub mod reader;
pub mod sink;
pub mod varint;
pub mod writer;

// Re-export the primary public API for ergonomic imports.
pub use chunk::{Chunk, ChunkHeader, ChunkType, BLOCK_SIZE, CHUNK_HEADER_SIZE};
pub use chunk_encoding::{ChunkDecoder, ChunkEncoder, FieldProjection};
pub use error::{RecordsError, RecordsResult};
pub use metadata::RecordsMetadata;
pub use options::{CompressionType, CompressorOptions, RecordWriterOptions, DEFAULT_CHUNK_SIZE};
pub use position::{FutureRecordPosition, RecordPosition};
pub use reader::{ReaderState, RecordReader, RecordReaderOptions, Records, SkippedRegion};
pub use sink::{ByteSink, FlushType, SequentialSink};
pub use writer::{RecordWriter, WriterState};
