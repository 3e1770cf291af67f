// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Strata records - Simple chunk encoding
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Payload layout:
//   [1 byte:  compression type]
//   [varint:  length of the sizes block]
//   [sizes block]   -- compressed varint record lengths
//   [values block]  -- compressed concatenated record bytes

use crate::compression::{compress_block, compress_to_vec, decompress_block};
use crate::error::RecordsResult;
use crate::options::{CompressionType, CompressorOptions};
use crate::varint::{read_varint, write_varint};

use super::limits_from_lengths;

#[derive(Debug)]
pub(super) struct SimpleEncoder {
    compressor: CompressorOptions,
    sizes: Vec<u8>,
    values: Vec<u8>,
}

impl SimpleEncoder {
    pub(super) fn new(compressor: CompressorOptions) -> Self {
        Self {
            compressor,
            sizes: Vec::new(),
            values: Vec::new(),
        }
    }

    pub(super) fn add_record(&mut self, record: &[u8]) {
        write_varint(&mut self.sizes, record.len() as u64);
        self.values.extend_from_slice(record);
    }

    pub(super) fn encode(&mut self) -> RecordsResult<Vec<u8>> {
        let sizes_block = compress_to_vec(&self.compressor, &self.sizes)?;
        let mut payload = Vec::with_capacity(sizes_block.len() + self.values.len() / 2 + 16);
        payload.push(self.compressor.compression_type().to_byte());
        write_varint(&mut payload, sizes_block.len() as u64);
        payload.extend_from_slice(&sizes_block);
        compress_block(&self.compressor, &self.values, &mut payload)?;
        self.clear();
        Ok(payload)
    }

    pub(super) fn clear(&mut self) {
        self.sizes.clear();
        self.values.clear();
    }
}

/// Decode a simple payload into record bytes and their end offsets.
pub(super) fn decode(
    payload: &[u8],
    num_records: u64,
    decoded_data_size: u64,
) -> Result<(Vec<u8>, Vec<usize>), String> {
    let (&type_byte, rest) = payload
        .split_first()
        .ok_or_else(|| "empty simple chunk payload".to_string())?;
    let compression_type = CompressionType::from_byte(type_byte)
        .ok_or_else(|| format!("unknown compression type {type_byte:#04x}"))?;

    let mut pos = 0;
    let sizes_len = read_varint(rest, &mut pos)
        .and_then(|len| usize::try_from(len).ok())
        .filter(|&len| len <= rest.len() - pos)
        .ok_or_else(|| "invalid sizes block length".to_string())?;
    let sizes_block = &rest[pos..pos + sizes_len];
    let values_block = &rest[pos + sizes_len..];

    let sizes = decompress_block(compression_type, sizes_block).map_err(|e| e.to_string())?;
    let values = decompress_block(compression_type, values_block).map_err(|e| e.to_string())?;
    if values.len() as u64 != decoded_data_size {
        return Err(format!(
            "decoded {} bytes, header declares {decoded_data_size}",
            values.len()
        ));
    }

    let mut lengths = Vec::new();
    let mut cursor = 0;
    while cursor < sizes.len() {
        if lengths.len() as u64 == num_records {
            return Err(format!("more than {num_records} record sizes"));
        }
        let length =
            read_varint(&sizes, &mut cursor).ok_or_else(|| "truncated record size".to_string())?;
        lengths.push(length);
    }
    if lengths.len() as u64 != num_records {
        return Err(format!(
            "found {} record sizes, header declares {num_records}",
            lengths.len()
        ));
    }

    let limits = limits_from_lengths(lengths, values.len())?;
    Ok((values, limits))
}
