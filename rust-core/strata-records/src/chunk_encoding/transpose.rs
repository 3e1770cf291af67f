// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Strata records - Transposed chunk encoding
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Records are taken apart as protocol-buffer wire format. Each value goes to
// the buffer of its (field number, wire type); similar values then sit next
// to each other and compress far better than whole records do. A transcript
// lists, per record, which buffers its fields came from, so the records can
// be reassembled byte for byte. Records that are not canonical wire format
// are kept whole in a separate raw buffer.
//
// Payload layout:
//   [1 byte:  compression type]
//   [varint:  length of header block]     [header block, compressed]
//   [varint:  length of transcript block] [transcript block, compressed]
//   [bucket blocks, each compressed, concatenated]
//
// Header block:
//   varint num_buckets, then varint compressed length of each bucket
//   varint num_buffers, then per buffer:
//     varint field, u8 wire type (0xFF for raw), varint bucket, varint length
//
// Transcript, per record: varint 0 for a raw record, otherwise varint n+1
// followed by n buffer indices in field order.

use std::collections::{BTreeMap, HashMap};

use crate::compression::{compress_to_vec, decompress_block};
use crate::error::RecordsResult;
use crate::options::{CompressionType, CompressorOptions};
use crate::varint::{read_canonical_varint, read_varint, write_varint};

use super::{limits_from_lengths, FieldProjection};

/// Wire type byte marking the raw record buffer.
const RAW_WIRE_TYPE: u8 = 0xFF;

/// Largest valid protocol-buffer field number.
const MAX_FIELD_NUMBER: u32 = (1 << 29) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    Fixed32,
}

impl WireType {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::Varint),
            1 => Some(Self::Fixed64),
            2 => Some(Self::LengthDelimited),
            5 => Some(Self::Fixed32),
            _ => None,
        }
    }

    fn bits(self) -> u8 {
        match self {
            Self::Varint => 0,
            Self::Fixed64 => 1,
            Self::LengthDelimited => 2,
            Self::Fixed32 => 5,
        }
    }
}

/// Buffer key; sorting groups buffers of one wire type together.
type FieldKey = (WireType, u32);

/// Byte length of the value at the start of `data`, or `None` if it is
/// truncated or not canonical.
fn value_len(wire_type: WireType, data: &[u8]) -> Option<usize> {
    match wire_type {
        WireType::Varint => {
            let mut pos = 0;
            read_canonical_varint(data, &mut pos)?;
            Some(pos)
        }
        WireType::Fixed64 => (data.len() >= 8).then_some(8),
        WireType::Fixed32 => (data.len() >= 4).then_some(4),
        WireType::LengthDelimited => {
            let mut pos = 0;
            let len = usize::try_from(read_canonical_varint(data, &mut pos)?).ok()?;
            let end = pos.checked_add(len)?;
            (end <= data.len()).then_some(end)
        }
    }
}

/// Split a record into `(key, value bytes)` pairs, or `None` if it is not
/// canonical wire format.
fn parse_fields(record: &[u8]) -> Option<Vec<(FieldKey, &[u8])>> {
    let mut fields = Vec::new();
    let mut pos = 0;
    while pos < record.len() {
        let tag = read_canonical_varint(record, &mut pos)?;
        let wire_type = WireType::from_bits((tag & 7) as u8)?;
        let field = u32::try_from(tag >> 3).ok()?;
        if field == 0 || field > MAX_FIELD_NUMBER {
            return None;
        }
        let len = value_len(wire_type, &record[pos..])?;
        fields.push(((wire_type, field), &record[pos..pos + len]));
        pos += len;
    }
    Some(fields)
}

fn tag(key: FieldKey) -> u64 {
    (u64::from(key.1) << 3) | u64::from(key.0.bits())
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(super) struct TransposeEncoder {
    compressor: CompressorOptions,
    bucket_threshold: u64,
    buffers: BTreeMap<FieldKey, Vec<u8>>,
    raw: Vec<u8>,
    /// Per record: `None` for raw, else how many keys it added to `keys`.
    shapes: Vec<Option<usize>>,
    keys: Vec<FieldKey>,
}

struct BufferEntry {
    field: u32,
    wire_type: u8,
    bucket: usize,
    len: usize,
}

impl TransposeEncoder {
    pub(super) fn new(compressor: CompressorOptions, bucket_threshold: u64) -> Self {
        Self {
            compressor,
            bucket_threshold,
            buffers: BTreeMap::new(),
            raw: Vec::new(),
            shapes: Vec::new(),
            keys: Vec::new(),
        }
    }

    pub(super) fn add_record(&mut self, record: &[u8]) {
        match parse_fields(record) {
            Some(fields) => {
                self.shapes.push(Some(fields.len()));
                for (key, value) in fields {
                    self.buffers.entry(key).or_default().extend_from_slice(value);
                    self.keys.push(key);
                }
            }
            None => {
                self.shapes.push(None);
                write_varint(&mut self.raw, record.len() as u64);
                self.raw.extend_from_slice(record);
            }
        }
    }

    pub(super) fn encode(&mut self) -> RecordsResult<Vec<u8>> {
        let mut buckets: Vec<Vec<u8>> = Vec::new();
        let mut entries: Vec<BufferEntry> = Vec::new();
        let mut indices: HashMap<FieldKey, usize> = HashMap::new();
        let mut open_bucket: Option<(WireType, usize)> = None;

        for (&key, data) in &self.buffers {
            let bucket = match open_bucket {
                Some((wire_type, bucket))
                    if wire_type == key.0
                        && (buckets[bucket].len() as u64) < self.bucket_threshold =>
                {
                    bucket
                }
                _ => {
                    buckets.push(Vec::new());
                    buckets.len() - 1
                }
            };
            open_bucket = Some((key.0, bucket));
            buckets[bucket].extend_from_slice(data);
            indices.insert(key, entries.len());
            entries.push(BufferEntry {
                field: key.1,
                wire_type: key.0.bits(),
                bucket,
                len: data.len(),
            });
        }
        if self.shapes.iter().any(Option::is_none) {
            entries.push(BufferEntry {
                field: 0,
                wire_type: RAW_WIRE_TYPE,
                bucket: buckets.len(),
                len: self.raw.len(),
            });
            buckets.push(std::mem::take(&mut self.raw));
        }

        let mut transcript = Vec::new();
        let mut keys = self.keys.iter();
        for shape in &self.shapes {
            match shape {
                None => write_varint(&mut transcript, 0),
                Some(count) => {
                    write_varint(&mut transcript, *count as u64 + 1);
                    for key in keys.by_ref().take(*count) {
                        write_varint(&mut transcript, indices[key] as u64);
                    }
                }
            }
        }

        let mut compressed_buckets = Vec::with_capacity(buckets.len());
        for bucket in &buckets {
            compressed_buckets.push(compress_to_vec(&self.compressor, bucket)?);
        }

        let mut header = Vec::new();
        write_varint(&mut header, compressed_buckets.len() as u64);
        for bucket in &compressed_buckets {
            write_varint(&mut header, bucket.len() as u64);
        }
        write_varint(&mut header, entries.len() as u64);
        for entry in &entries {
            write_varint(&mut header, u64::from(entry.field));
            header.push(entry.wire_type);
            write_varint(&mut header, entry.bucket as u64);
            write_varint(&mut header, entry.len as u64);
        }

        let mut payload = vec![self.compressor.compression_type().to_byte()];
        for block in [&header, &transcript] {
            let compressed = compress_to_vec(&self.compressor, block)?;
            write_varint(&mut payload, compressed.len() as u64);
            payload.extend_from_slice(&compressed);
        }
        for bucket in compressed_buckets {
            payload.extend_from_slice(&bucket);
        }

        self.clear();
        Ok(payload)
    }

    pub(super) fn clear(&mut self) {
        self.buffers.clear();
        self.raw.clear();
        self.shapes.clear();
        self.keys.clear();
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn varint(&mut self, what: &str) -> Result<u64, String> {
        read_varint(self.data, &mut self.pos).ok_or_else(|| format!("truncated {what}"))
    }

    fn usize(&mut self, what: &str) -> Result<usize, String> {
        usize::try_from(self.varint(what)?).map_err(|_| format!("{what} out of range"))
    }

    fn byte(&mut self, what: &str) -> Result<u8, String> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| format!("truncated {what}"))?;
        self.pos += 1;
        Ok(byte)
    }

    fn bytes(&mut self, len: usize, what: &str) -> Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| format!("truncated {what}"))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn is_done(&self) -> bool {
        self.pos == self.data.len()
    }
}

struct DecodedBuffer {
    field: u32,
    /// `None` for the raw buffer.
    wire_type: Option<WireType>,
    bucket: usize,
    len: usize,
}

/// Decode a transposed payload into record bytes and their end offsets.
///
/// Buckets holding only fields outside `projection` are never decompressed.
pub(super) fn decode(
    payload: &[u8],
    num_records: u64,
    decoded_data_size: u64,
    projection: &FieldProjection,
) -> Result<(Vec<u8>, Vec<usize>), String> {
    let mut input = Reader::new(payload);
    let type_byte = input.byte("compression type")?;
    let compression_type = CompressionType::from_byte(type_byte)
        .ok_or_else(|| format!("unknown compression type {type_byte:#04x}"))?;
    let decompress = |block: &[u8]| decompress_block(compression_type, block).map_err(|e| e.to_string());

    let header_len = input.usize("header length")?;
    let header = decompress(input.bytes(header_len, "header block")?)?;
    let transcript_len = input.usize("transcript length")?;
    let transcript = decompress(input.bytes(transcript_len, "transcript block")?)?;

    let mut header = Reader::new(&header);
    let num_buckets = header.usize("bucket count")?;
    let mut bucket_blocks = Vec::new();
    for _ in 0..num_buckets {
        let len = header.usize("bucket length")?;
        bucket_blocks.push(input.bytes(len, "bucket block")?);
    }
    if !input.is_done() {
        return Err("trailing bytes after the last bucket".to_string());
    }

    let num_buffers = header.usize("buffer count")?;
    let mut buffers = Vec::new();
    let mut bucket_sizes = vec![0usize; num_buckets];
    for _ in 0..num_buffers {
        let field = u32::try_from(header.varint("field number")?)
            .map_err(|_| "field number out of range".to_string())?;
        let wire_byte = header.byte("wire type")?;
        let wire_type = match wire_byte {
            RAW_WIRE_TYPE => None,
            bits => Some(
                WireType::from_bits(bits).ok_or_else(|| format!("invalid wire type {bits}"))?,
            ),
        };
        let bucket = header.usize("bucket index")?;
        let len = header.usize("buffer length")?;
        let bucket_size = bucket_sizes
            .get_mut(bucket)
            .ok_or_else(|| format!("buffer refers to missing bucket {bucket}"))?;
        *bucket_size = bucket_size
            .checked_add(len)
            .ok_or_else(|| "bucket size overflows".to_string())?;
        buffers.push(DecodedBuffer {
            field,
            wire_type,
            bucket,
            len,
        });
    }
    if !header.is_done() {
        return Err("trailing bytes in header block".to_string());
    }

    let needed: Vec<bool> = buffers
        .iter()
        .map(|buffer| buffer.wire_type.is_none() || projection.includes(buffer.field))
        .collect();

    // Decompress needed buckets and carve them into buffer slices.
    let mut bucket_data: Vec<Option<Vec<u8>>> = vec![None; num_buckets];
    for (buffer, &is_needed) in buffers.iter().zip(&needed) {
        if is_needed && bucket_data[buffer.bucket].is_none() {
            let data = decompress(bucket_blocks[buffer.bucket])?;
            if data.len() != bucket_sizes[buffer.bucket] {
                return Err(format!(
                    "bucket {} holds {} bytes, buffers declare {}",
                    buffer.bucket,
                    data.len(),
                    bucket_sizes[buffer.bucket]
                ));
            }
            bucket_data[buffer.bucket] = Some(data);
        }
    }
    let mut bucket_offsets = vec![0usize; num_buckets];
    let mut slices: Vec<Option<Reader<'_>>> = Vec::with_capacity(buffers.len());
    for (buffer, &is_needed) in buffers.iter().zip(&needed) {
        let start = bucket_offsets[buffer.bucket];
        bucket_offsets[buffer.bucket] += buffer.len;
        slices.push(match (&bucket_data[buffer.bucket], is_needed) {
            (Some(data), true) => Some(Reader::new(&data[start..start + buffer.len])),
            _ => None,
        });
    }

    let raw_index = buffers.iter().position(|buffer| buffer.wire_type.is_none());
    let mut transcript = Reader::new(&transcript);
    let mut values = Vec::with_capacity(usize::try_from(decoded_data_size).unwrap_or(0).min(16 << 20));
    let mut lengths = Vec::new();
    while !transcript.is_done() {
        if lengths.len() as u64 == num_records {
            return Err(format!("transcript describes more than {num_records} records"));
        }
        let record_start = values.len();
        match transcript.varint("record shape")? {
            0 => {
                let raw = match raw_index {
                    Some(index) => slices[index].as_mut(),
                    None => None,
                }
                .ok_or_else(|| "raw record without raw buffer".to_string())?;
                let len = raw.usize("raw record length")?;
                values.extend_from_slice(raw.bytes(len, "raw record")?);
            }
            shape => {
                for _ in 0..shape - 1 {
                    let index = transcript.usize("buffer index")?;
                    let buffer = buffers
                        .get(index)
                        .ok_or_else(|| format!("transcript refers to missing buffer {index}"))?;
                    let wire_type = buffer
                        .wire_type
                        .ok_or_else(|| "field refers to the raw buffer".to_string())?;
                    let Some(source) = slices[index].as_mut() else {
                        continue;
                    };
                    let len = value_len(wire_type, &source.data[source.pos..])
                        .ok_or_else(|| format!("truncated value of field {}", buffer.field))?;
                    write_varint(&mut values, tag((wire_type, buffer.field)));
                    values.extend_from_slice(source.bytes(len, "field value")?);
                }
            }
        }
        lengths.push((values.len() - record_start) as u64);
    }
    if lengths.len() as u64 != num_records {
        return Err(format!(
            "transcript describes {} records, header declares {num_records}",
            lengths.len()
        ));
    }
    if let Some(index) = slices
        .iter()
        .position(|slice| slice.as_ref().is_some_and(|slice| !slice.is_done()))
    {
        return Err(format!("buffer {index} has unconsumed values"));
    }
    if projection.is_all() && values.len() as u64 != decoded_data_size {
        return Err(format!(
            "decoded {} bytes, header declares {decoded_data_size}",
            values.len()
        ));
    }

    let limits = limits_from_lengths(lengths, values.len())?;
    Ok((values, limits))
}
