// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//!
//! Chunk walking and whole-file verification.
//!
//! `describe` reads chunk headers one after another without decoding any
//! records; `verify` reads every record through a `RecordReader` and
//! collects the regions it had to skip.

use std::io::{Read, Seek, SeekFrom};

use serde::Serialize;
use strata_records::{
    Chunk, ChunkHeader, ChunkType, CompressionType, RecordReader, RecordsError, RecordsResult,
    SkippedRegion, CHUNK_HEADER_SIZE,
};
use tracing::debug;

/// One chunk as listed by `strata describe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkSummary {
    pub offset: u64,
    pub chunk_type: &'static str,
    pub data_size: u64,
    pub decoded_data_size: u64,
    pub num_records: u64,
    /// Compression of record-bearing chunks.
    pub compression: Option<&'static str>,
}

/// Every chunk that validates, up to the first damage.
#[derive(Debug, Default, Serialize)]
pub struct Description {
    pub file_len: u64,
    pub chunks: Vec<ChunkSummary>,
    /// Where and why the walk stopped early.
    pub damage: Option<String>,
}

impl Description {
    pub fn num_records(&self) -> u64 {
        self.chunks.iter().map(|chunk| chunk.num_records).sum()
    }
}

/// A byte range `verify` could not read records from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skipped {
    pub begin: u64,
    pub end: u64,
    pub message: String,
}

impl From<SkippedRegion> for Skipped {
    fn from(region: SkippedRegion) -> Self {
        Self {
            begin: region.begin,
            end: region.end,
            message: region.message,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct Verification {
    pub file_len: u64,
    /// Why the file does not start like a records file, if it doesn't.
    pub format_error: Option<String>,
    pub records: u64,
    pub record_bytes: u64,
    pub skipped: Vec<Skipped>,
}

impl Verification {
    pub fn is_clean(&self) -> bool {
        self.format_error.is_none() && self.skipped.is_empty()
    }

    pub fn skipped_bytes(&self) -> u64 {
        self.skipped.iter().map(|region| region.end - region.begin).sum()
    }
}

pub fn chunk_type_name(chunk_type: ChunkType) -> &'static str {
    match chunk_type {
        ChunkType::FileSignature => "signature",
        ChunkType::FileMetadata => "metadata",
        ChunkType::Padding => "padding",
        ChunkType::Simple => "simple",
        ChunkType::Transposed => "transposed",
    }
}

fn compression_name(compression: CompressionType) -> &'static str {
    match compression {
        CompressionType::None => "none",
        CompressionType::Brotli => "brotli",
        CompressionType::Zstd => "zstd",
    }
}

/// List the chunks of `src` from offset 0.
pub fn describe<R: Read + Seek>(src: &mut R) -> RecordsResult<Description> {
    let file_len = src.seek(SeekFrom::End(0))?;
    let mut description = Description {
        file_len,
        ..Default::default()
    };
    let mut offset = 0;
    while offset < file_len {
        match read_chunk(src, offset, file_len) {
            Ok(chunk) => {
                description.chunks.push(summarize(&chunk, offset));
                offset = chunk.header.chunk_end(offset);
            }
            Err(e) if e.is_data_loss() => {
                description.damage = Some(e.to_string());
                break;
            }
            Err(e) => return Err(e),
        }
    }
    debug!(chunks = description.chunks.len(), file_len, "Described records file");
    Ok(description)
}

fn read_chunk<R: Read + Seek>(src: &mut R, offset: u64, file_len: u64) -> RecordsResult<Chunk> {
    let remaining = file_len - offset;
    if remaining < CHUNK_HEADER_SIZE as u64 {
        return Err(RecordsError::Corruption {
            offset,
            reason: format!("truncated chunk header ({remaining} bytes left)"),
        });
    }
    src.seek(SeekFrom::Start(offset))?;
    let mut header_bytes = [0u8; CHUNK_HEADER_SIZE];
    src.read_exact(&mut header_bytes)?;
    let header = ChunkHeader::decode(&header_bytes, offset)?;

    if header.data_size > remaining - CHUNK_HEADER_SIZE as u64 {
        return Err(RecordsError::Corruption {
            offset,
            reason: format!("payload of {} bytes runs past the end of the file", header.data_size),
        });
    }
    let mut data = vec![0u8; header.data_size as usize];
    src.read_exact(&mut data)?;
    let chunk = Chunk { header, data };
    chunk.verify(offset)?;
    Ok(chunk)
}

fn summarize(chunk: &Chunk, offset: u64) -> ChunkSummary {
    let compression = if chunk.header.chunk_type.carries_records() {
        chunk
            .data
            .first()
            .and_then(|&byte| CompressionType::from_byte(byte))
            .map(compression_name)
    } else {
        None
    };
    ChunkSummary {
        offset,
        chunk_type: chunk_type_name(chunk.header.chunk_type),
        data_size: chunk.header.data_size,
        decoded_data_size: chunk.header.decoded_data_size,
        num_records: chunk.header.num_records,
        compression,
    }
}

/// Read every record of `src`, skipping damage.
pub fn verify<R: Read + Seek>(mut src: R) -> RecordsResult<Verification> {
    let file_len = src.seek(SeekFrom::End(0))?;
    src.seek(SeekFrom::Start(0))?;
    let mut verification = Verification {
        file_len,
        ..Default::default()
    };

    let mut reader = RecordReader::new(src);
    match reader.check_file_format() {
        Ok(()) => {}
        Err(e) if e.is_data_loss() => verification.format_error = Some(e.to_string()),
        Err(e) => return Err(e),
    }

    loop {
        match reader.read_record() {
            Ok(Some(record)) => {
                verification.records += 1;
                verification.record_bytes += record.len() as u64;
            }
            Ok(None) => break,
            Err(e) if e.is_data_loss() => {
                if let Some(region) = reader.recover()? {
                    verification.skipped.push(region.into());
                    continue;
                }
                let begin = damage_offset(&e).unwrap_or(file_len);
                verification.skipped.push(Skipped {
                    begin,
                    end: file_len,
                    message: e.to_string(),
                });
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(verification)
}

fn damage_offset(error: &RecordsError) -> Option<u64> {
    match error {
        RecordsError::Corruption { offset, .. } | RecordsError::ChecksumMismatch { offset, .. } => {
            Some(*offset)
        }
        _ => None,
    }
}
