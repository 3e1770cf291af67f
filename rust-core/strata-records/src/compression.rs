// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Strata records - Block compression
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Chunk payloads are made of independently compressed blocks. A block
// compressed with brotli or zstd is prefixed with the varint length of its
// uncompressed contents so decoding can size buffers and detect damage; an
// uncompressed block is stored verbatim.

use std::io::Read;

use crate::error::{RecordsError, RecordsResult};
use crate::options::{CompressionType, CompressorOptions, MAX_ZSTD_WINDOW_LOG};
use crate::varint::{read_varint, write_varint};

/// Brotli's largest window without the non-standard large-window mode.
const BROTLI_MAX_STANDARD_WINDOW_LOG: u32 = 24;

/// Brotli window used when the options say `auto`.
const BROTLI_DEFAULT_WINDOW_LOG: u32 = 22;

/// Largest up-front allocation made on the strength of a size prefix.
const MAX_PREALLOCATION: usize = 16 << 20;

/// Compress `data` as one block and append it to `out`.
pub fn compress_block(
    options: &CompressorOptions,
    data: &[u8],
    out: &mut Vec<u8>,
) -> RecordsResult<()> {
    match options.compression_type() {
        CompressionType::None => {
            out.extend_from_slice(data);
        }
        CompressionType::Brotli => {
            write_varint(out, data.len() as u64);
            let mut params = brotli::enc::BrotliEncoderParams::default();
            params.quality = options.level();
            params.lgwin = options
                .window_log()
                .unwrap_or(BROTLI_DEFAULT_WINDOW_LOG)
                .min(BROTLI_MAX_STANDARD_WINDOW_LOG) as i32;
            let mut input = data;
            brotli::BrotliCompress(&mut input, out, &params)
                .map_err(|e| RecordsError::Compression(format!("brotli: {e}")))?;
        }
        CompressionType::Zstd => {
            write_varint(out, data.len() as u64);
            let mut compressor = zstd::bulk::Compressor::new(options.level())
                .map_err(|e| RecordsError::Compression(format!("zstd: {e}")))?;
            if let Some(window_log) = options.window_log() {
                compressor
                    .set_parameter(zstd::zstd_safe::CParameter::WindowLog(window_log))
                    .map_err(|e| RecordsError::Compression(format!("zstd window_log: {e}")))?;
            }
            let compressed = compressor
                .compress(data)
                .map_err(|e| RecordsError::Compression(format!("zstd: {e}")))?;
            out.extend_from_slice(&compressed);
        }
    }
    Ok(())
}

/// Compress `data` as one block into a fresh buffer.
pub fn compress_to_vec(options: &CompressorOptions, data: &[u8]) -> RecordsResult<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() / 2 + 16);
    compress_block(options, data, &mut out)?;
    Ok(out)
}

/// Decompress a whole block produced by [`compress_block`].
pub fn decompress_block(compression_type: CompressionType, block: &[u8]) -> RecordsResult<Vec<u8>> {
    if compression_type == CompressionType::None {
        return Ok(block.to_vec());
    }

    let mut pos = 0;
    let expected = read_varint(block, &mut pos)
        .ok_or_else(|| RecordsError::Compression("missing uncompressed size".to_string()))?;
    let compressed = &block[pos..];

    let reader: Box<dyn Read + '_> = match compression_type {
        CompressionType::None => return Ok(block.to_vec()),
        CompressionType::Brotli => Box::new(brotli::Decompressor::new(compressed, 4096)),
        CompressionType::Zstd => {
            let mut decoder = zstd::stream::read::Decoder::new(compressed)
                .map_err(|e| RecordsError::Compression(format!("zstd: {e}")))?;
            decoder
                .window_log_max(MAX_ZSTD_WINDOW_LOG)
                .map_err(|e| RecordsError::Compression(format!("zstd window_log_max: {e}")))?;
            Box::new(decoder)
        }
    };

    let mut out = Vec::with_capacity((expected as usize).min(MAX_PREALLOCATION));
    // Reading one byte past the declared size detects a lying prefix
    // without decompressing an unbounded amount.
    reader
        .take(expected.saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|e| RecordsError::Compression(format!("{compression_type:?}: {e}")))?;

    if out.len() as u64 != expected {
        return Err(RecordsError::Compression(format!(
            "decompressed {} bytes, block declares {expected}",
            out.len()
        )));
    }
    Ok(out)
}
