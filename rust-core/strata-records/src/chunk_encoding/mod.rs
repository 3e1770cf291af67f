// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Strata records - Chunk encoders and decoders
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// A `ChunkEncoder` accumulates the records of one chunk and turns them into
// a framed `Chunk`; a `ChunkDecoder` reverses that. The encoding variant is
// picked once from the writer options when an encoder is created:
//
// - simple:     record lengths and record bytes in two compressed blocks
// - transposed: protocol-buffer fields regrouped into per-field buffers and
//               compressed in buckets, readable with field projection

mod simple;
mod transpose;

use std::collections::BTreeSet;

use crate::chunk::{Chunk, ChunkType};
use crate::error::{RecordsError, RecordsResult};
use crate::options::RecordWriterOptions;

use simple::SimpleEncoder;
use transpose::TransposeEncoder;

/// Largest number of records a single chunk may hold.
///
/// Record indices are `u32`, so every record of a chunk must be addressable.
pub const MAX_RECORDS_PER_CHUNK: u64 = u32::MAX as u64;

// ---------------------------------------------------------------------------
// FieldProjection
// ---------------------------------------------------------------------------

/// Which top-level fields a reader needs from transposed chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldProjection {
    /// Decode whole records.
    #[default]
    All,
    /// Keep only the listed top-level field numbers.
    Fields(BTreeSet<u32>),
}

impl FieldProjection {
    pub fn fields(fields: impl IntoIterator<Item = u32>) -> Self {
        Self::Fields(fields.into_iter().collect())
    }

    pub fn includes(&self, field: u32) -> bool {
        match self {
            Self::All => true,
            Self::Fields(fields) => fields.contains(&field),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

// ---------------------------------------------------------------------------
// ChunkEncoder
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum EncoderVariant {
    Simple(SimpleEncoder),
    Transposed(TransposeEncoder),
}

/// Accumulates the records of one chunk.
///
/// Once an operation fails the encoder stays failed until [`reset`].
///
/// [`reset`]: ChunkEncoder::reset
#[derive(Debug)]
pub struct ChunkEncoder {
    variant: EncoderVariant,
    num_records: u64,
    decoded_data_size: u64,
    failure: Option<String>,
}

impl ChunkEncoder {
    /// An empty encoder of the variant selected by `options`.
    pub fn new(options: &RecordWriterOptions) -> Self {
        let variant = if options.transpose() {
            let threshold = (options.bucket_fraction() * options.chunk_size() as f64) as u64;
            EncoderVariant::Transposed(TransposeEncoder::new(
                options.compressor().clone(),
                threshold.max(1),
            ))
        } else {
            EncoderVariant::Simple(SimpleEncoder::new(options.compressor().clone()))
        };
        Self {
            variant,
            num_records: 0,
            decoded_data_size: 0,
            failure: None,
        }
    }

    /// Append one record to the chunk.
    pub fn add_record(&mut self, record: &[u8]) -> RecordsResult<()> {
        if let Some(failure) = &self.failure {
            return Err(RecordsError::Failed(failure.clone()));
        }
        if self.num_records >= MAX_RECORDS_PER_CHUNK {
            return Err(self.fail(format!(
                "chunk already holds {MAX_RECORDS_PER_CHUNK} records"
            )));
        }
        let Some(decoded_data_size) = self.decoded_data_size.checked_add(record.len() as u64)
        else {
            return Err(self.fail("decoded chunk size overflows u64".to_string()));
        };
        match &mut self.variant {
            EncoderVariant::Simple(encoder) => encoder.add_record(record),
            EncoderVariant::Transposed(encoder) => encoder.add_record(record),
        }
        self.num_records += 1;
        self.decoded_data_size = decoded_data_size;
        Ok(())
    }

    pub fn num_records(&self) -> u64 {
        self.num_records
    }

    /// Sum of the lengths of the records added so far.
    pub fn decoded_data_size(&self) -> u64 {
        self.decoded_data_size
    }

    pub fn is_empty(&self) -> bool {
        self.num_records == 0
    }

    pub fn is_healthy(&self) -> bool {
        self.failure.is_none()
    }

    /// Finish the chunk and drain the encoder, leaving it empty.
    pub fn encode(&mut self) -> RecordsResult<Chunk> {
        if let Some(failure) = &self.failure {
            return Err(RecordsError::Failed(failure.clone()));
        }
        let (chunk_type, payload) = match &mut self.variant {
            EncoderVariant::Simple(encoder) => (ChunkType::Simple, encoder.encode()),
            EncoderVariant::Transposed(encoder) => (ChunkType::Transposed, encoder.encode()),
        };
        let payload = match payload {
            Ok(payload) => payload,
            Err(e) => return Err(self.fail(e.to_string())),
        };
        let chunk = Chunk::new(chunk_type, payload, self.num_records, self.decoded_data_size);
        self.num_records = 0;
        self.decoded_data_size = 0;
        Ok(chunk)
    }

    /// Discard accumulated records and clear any failure.
    pub fn reset(&mut self) {
        match &mut self.variant {
            EncoderVariant::Simple(encoder) => encoder.clear(),
            EncoderVariant::Transposed(encoder) => encoder.clear(),
        }
        self.num_records = 0;
        self.decoded_data_size = 0;
        self.failure = None;
    }

    fn fail(&mut self, message: String) -> RecordsError {
        self.failure = Some(message.clone());
        RecordsError::EncoderFailed(message)
    }
}

// ---------------------------------------------------------------------------
// ChunkDecoder
// ---------------------------------------------------------------------------

/// Records of one decoded chunk with a read cursor.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    values: Vec<u8>,
    /// End offset in `values` of each record.
    limits: Vec<usize>,
    index: usize,
}

impl ChunkDecoder {
    /// Decode a record-bearing chunk that began at `offset` in the stream.
    ///
    /// Every failure is reported as corruption at `offset`.
    pub fn decode(chunk: &Chunk, projection: &FieldProjection, offset: u64) -> RecordsResult<Self> {
        let header = &chunk.header;
        let decoded = match header.chunk_type {
            ChunkType::Simple => {
                simple::decode(&chunk.data, header.num_records, header.decoded_data_size)
            }
            ChunkType::Transposed => transpose::decode(
                &chunk.data,
                header.num_records,
                header.decoded_data_size,
                projection,
            ),
            other => Err(format!("{other:?} chunk holds no records")),
        };
        let (values, limits) = decoded.map_err(|reason| RecordsError::corruption(offset, reason))?;
        Ok(Self {
            values,
            limits,
            index: 0,
        })
    }

    /// The next record, advancing the cursor.
    pub fn read_record(&mut self) -> Option<&[u8]> {
        let end = *self.limits.get(self.index)?;
        let start = match self.index {
            0 => 0,
            i => self.limits[i - 1],
        };
        self.index += 1;
        Some(&self.values[start..end])
    }

    pub fn num_records(&self) -> u64 {
        self.limits.len() as u64
    }

    /// Index of the record the next read returns.
    pub fn index(&self) -> u64 {
        self.index as u64
    }

    /// Move the cursor; indices past the end leave it exhausted.
    pub fn set_index(&mut self, index: u64) {
        self.index = usize::try_from(index)
            .unwrap_or(usize::MAX)
            .min(self.limits.len());
    }

    pub fn is_exhausted(&self) -> bool {
        self.index >= self.limits.len()
    }
}

/// Split `values` by consecutive `lengths`, checking the totals add up.
pub(crate) fn limits_from_lengths(
    lengths: impl IntoIterator<Item = u64>,
    values_len: usize,
) -> Result<Vec<usize>, String> {
    let mut limits = Vec::new();
    let mut end: usize = 0;
    for length in lengths {
        end = usize::try_from(length)
            .ok()
            .and_then(|length| end.checked_add(length))
            .filter(|&end| end <= values_len)
            .ok_or_else(|| "record lengths exceed the decoded values".to_string())?;
        limits.push(end);
    }
    if end != values_len {
        return Err(format!(
            "record lengths cover {end} of {values_len} decoded bytes"
        ));
    }
    Ok(limits)
}
