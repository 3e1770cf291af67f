// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Strata records - Writer options and the options grammar
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `RecordWriterOptions` is an immutable configuration value attached to a
// writer. It can be built with the `set_*` methods or parsed from the
// comma-separated text form:
//
// ```text
// options    ::= option? ("," option?)*
// option     ::= "default"
//              | "transpose" (":" bool)?
//              | "uncompressed"
//              | "brotli" (":" 0..11)?        -- default 9
//              | "zstd" (":" -32..22)?        -- default 9
//              | "window_log" ":" ("auto" | 10..31)
//              | "chunk_size" ":" size        -- e.g. "1M", default 1M
//              | "bucket_fraction" ":" 0.0..1.0
//              | "pad_to_block_boundary" (":" bool)?
//              | "parallelism" ":" 0..
// bool       ::= "true" | "false"
// ```
//
// Options are order-insensitive and each may appear at most once; the three
// compression options count as one.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{RecordsError, RecordsResult};
use crate::metadata::RecordsMetadata;

/// Default target uncompressed chunk size (1 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 1 << 20;

/// Default brotli quality.
pub const DEFAULT_BROTLI_LEVEL: i32 = 9;

/// Default zstd compression level.
pub const DEFAULT_ZSTD_LEVEL: i32 = 9;

/// Smallest window log accepted by any compressor.
pub const MIN_WINDOW_LOG: u32 = 10;

/// Largest window log accepted for brotli.
pub const MAX_BROTLI_WINDOW_LOG: u32 = 30;

/// Largest window log accepted for zstd.
pub const MAX_ZSTD_WINDOW_LOG: u32 = 31;

// ---------------------------------------------------------------------------
// CompressionType
// ---------------------------------------------------------------------------

/// Compression algorithm applied to chunk payload blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionType {
    /// Blocks are stored verbatim.
    None,
    /// Brotli.
    Brotli,
    /// Zstandard.
    Zstd,
}

impl CompressionType {
    /// Decode the compression byte stored at the start of a chunk payload.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::None),
            b'b' => Some(Self::Brotli),
            b'z' => Some(Self::Zstd),
            _ => None,
        }
    }

    /// Encode this compression type as its on-disk byte.
    pub fn to_byte(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Brotli => b'b',
            Self::Zstd => b'z',
        }
    }
}

// ---------------------------------------------------------------------------
// CompressorOptions
// ---------------------------------------------------------------------------

/// Compression algorithm plus its tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressorOptions {
    compression_type: CompressionType,
    level: i32,
    window_log: Option<u32>,
}

impl Default for CompressorOptions {
    fn default() -> Self {
        Self::brotli(DEFAULT_BROTLI_LEVEL)
    }
}

impl CompressorOptions {
    /// No compression.
    pub fn uncompressed() -> Self {
        Self {
            compression_type: CompressionType::None,
            level: 0,
            window_log: None,
        }
    }

    /// Brotli at the given quality (0..=11).
    pub fn brotli(level: i32) -> Self {
        Self {
            compression_type: CompressionType::Brotli,
            level,
            window_log: None,
        }
    }

    /// Zstd at the given level (-32..=22).
    pub fn zstd(level: i32) -> Self {
        Self {
            compression_type: CompressionType::Zstd,
            level,
            window_log: None,
        }
    }

    /// Set the LZ77 window log; `None` keeps the algorithm default.
    pub fn with_window_log(mut self, window_log: Option<u32>) -> Self {
        self.window_log = window_log;
        self
    }

    pub fn compression_type(&self) -> CompressionType {
        self.compression_type
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    pub fn window_log(&self) -> Option<u32> {
        self.window_log
    }

    /// Check level and window log against the limits of the algorithm.
    pub fn validate(&self) -> RecordsResult<()> {
        match self.compression_type {
            CompressionType::None => {
                if let Some(window_log) = self.window_log {
                    return Err(RecordsError::invalid_option(
                        format!("window_log:{window_log}"),
                        "window_log must be auto when uncompressed",
                    ));
                }
            }
            CompressionType::Brotli => {
                if !(0..=11).contains(&self.level) {
                    return Err(RecordsError::invalid_option(
                        format!("brotli:{}", self.level),
                        "brotli level must be in 0..=11",
                    ));
                }
                check_window_log(self.window_log, MAX_BROTLI_WINDOW_LOG, "brotli")?;
            }
            CompressionType::Zstd => {
                if !(-32..=22).contains(&self.level) {
                    return Err(RecordsError::invalid_option(
                        format!("zstd:{}", self.level),
                        "zstd level must be in -32..=22",
                    ));
                }
                check_window_log(self.window_log, MAX_ZSTD_WINDOW_LOG, "zstd")?;
            }
        }
        Ok(())
    }
}

fn check_window_log(window_log: Option<u32>, max: u32, algorithm: &str) -> RecordsResult<()> {
    match window_log {
        Some(window_log) if !(MIN_WINDOW_LOG..=max).contains(&window_log) => {
            Err(RecordsError::invalid_option(
                format!("window_log:{window_log}"),
                format!("{algorithm} window_log must be auto or in {MIN_WINDOW_LOG}..={max}"),
            ))
        }
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// RecordWriterOptions
// ---------------------------------------------------------------------------

/// Configuration of a `RecordWriter`.
///
/// Everything in the options grammar plus the settings that only make sense
/// programmatically: file metadata, an assumed starting position for
/// sequential sinks, and whether closing the writer closes the sink.
#[derive(Debug, Clone)]
pub struct RecordWriterOptions {
    compressor: CompressorOptions,
    transpose: bool,
    chunk_size: u64,
    bucket_fraction: f64,
    pad_to_block_boundary: bool,
    parallelism: usize,
    metadata: Option<RecordsMetadata>,
    serialized_metadata: Option<Vec<u8>>,
    assumed_pos: Option<u64>,
    close_sink: bool,
}

impl Default for RecordWriterOptions {
    fn default() -> Self {
        Self {
            compressor: CompressorOptions::default(),
            transpose: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            bucket_fraction: 1.0,
            pad_to_block_boundary: false,
            parallelism: 0,
            metadata: None,
            serialized_metadata: None,
            assumed_pos: None,
            close_sink: true,
        }
    }
}

impl RecordWriterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the text form. Equivalent to `text.parse()`.
    pub fn from_text(text: &str) -> RecordsResult<Self> {
        text.parse()
    }

    pub fn set_compressor(mut self, compressor: CompressorOptions) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn set_transpose(mut self, transpose: bool) -> Self {
        self.transpose = transpose;
        self
    }

    pub fn set_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn set_bucket_fraction(mut self, bucket_fraction: f64) -> Self {
        self.bucket_fraction = bucket_fraction;
        self
    }

    pub fn set_pad_to_block_boundary(mut self, pad: bool) -> Self {
        self.pad_to_block_boundary = pad;
        self
    }

    pub fn set_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Typed metadata written once at the start of a fresh file.
    pub fn set_metadata(mut self, metadata: RecordsMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Pre-serialized metadata written once at the start of a fresh file.
    /// Conflicts with [`set_metadata`](Self::set_metadata).
    pub fn set_serialized_metadata(mut self, serialized: impl Into<Vec<u8>>) -> Self {
        self.serialized_metadata = Some(serialized.into());
        self
    }

    /// Treat the sink as sequential-only, starting at `pos`.
    pub fn set_assumed_pos(mut self, pos: u64) -> Self {
        self.assumed_pos = Some(pos);
        self
    }

    /// Whether `RecordWriter::close` also closes the sink.
    pub fn set_close_sink(mut self, close_sink: bool) -> Self {
        self.close_sink = close_sink;
        self
    }

    pub fn compressor(&self) -> &CompressorOptions {
        &self.compressor
    }

    pub fn transpose(&self) -> bool {
        self.transpose
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn bucket_fraction(&self) -> f64 {
        self.bucket_fraction
    }

    pub fn pad_to_block_boundary(&self) -> bool {
        self.pad_to_block_boundary
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn metadata(&self) -> Option<&RecordsMetadata> {
        self.metadata.as_ref()
    }

    pub fn serialized_metadata(&self) -> Option<&[u8]> {
        self.serialized_metadata.as_deref()
    }

    pub fn assumed_pos(&self) -> Option<u64> {
        self.assumed_pos
    }

    pub fn close_sink(&self) -> bool {
        self.close_sink
    }

    /// Validate the whole configuration and produce the metadata bytes to
    /// write at the start of a fresh file, if any.
    ///
    /// Called by the writer before it touches the sink.
    pub fn validate(&self) -> RecordsResult<Option<Vec<u8>>> {
        self.compressor.validate()?;
        if self.chunk_size == 0 {
            return Err(RecordsError::invalid_option(
                "chunk_size:0",
                "chunk_size must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.bucket_fraction) {
            return Err(RecordsError::invalid_option(
                format!("bucket_fraction:{}", self.bucket_fraction),
                "bucket_fraction must be in 0.0..=1.0",
            ));
        }
        match (&self.metadata, &self.serialized_metadata) {
            (Some(_), Some(_)) => Err(RecordsError::InvalidArgument(
                "metadata and serialized_metadata are mutually exclusive".to_string(),
            )),
            (Some(metadata), None) if !metadata.is_empty() => Ok(Some(metadata.to_bytes()?)),
            (None, Some(serialized)) if !serialized.is_empty() => Ok(Some(serialized.clone())),
            _ => Ok(None),
        }
    }
}

impl FromStr for RecordWriterOptions {
    type Err = RecordsError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut options = Self::default();
        let mut compression: Option<CompressorOptions> = None;
        let mut window_log: Option<u32> = None;
        let mut seen: HashSet<&str> = HashSet::new();

        for token in text.split(',') {
            if token.is_empty() {
                continue;
            }
            let (key, value) = match token.split_once(':') {
                Some((key, value)) => (key, Some(value)),
                None => (token, None),
            };
            let group = match key {
                "uncompressed" | "brotli" | "zstd" => "compression",
                other => other,
            };
            if !seen.insert(group) {
                return Err(RecordsError::invalid_option(
                    token,
                    format!("option {group} given more than once"),
                ));
            }

            match key {
                "default" => {
                    no_value(token, value)?;
                }
                "transpose" => {
                    options.transpose = parse_bool(token, value)?;
                }
                "uncompressed" => {
                    no_value(token, value)?;
                    compression = Some(CompressorOptions::uncompressed());
                }
                "brotli" => {
                    let level = parse_level(token, value, DEFAULT_BROTLI_LEVEL, 0, 11)?;
                    compression = Some(CompressorOptions::brotli(level));
                }
                "zstd" => {
                    let level = parse_level(token, value, DEFAULT_ZSTD_LEVEL, -32, 22)?;
                    compression = Some(CompressorOptions::zstd(level));
                }
                "window_log" => {
                    window_log = match required(token, value)? {
                        "auto" => None,
                        raw => {
                            let parsed: u32 = raw.parse().map_err(|_| {
                                RecordsError::invalid_option(token, "expected \"auto\" or an integer")
                            })?;
                            if !(MIN_WINDOW_LOG..=MAX_ZSTD_WINDOW_LOG).contains(&parsed) {
                                return Err(RecordsError::invalid_option(
                                    token,
                                    format!("window_log must be auto or in {MIN_WINDOW_LOG}..={MAX_ZSTD_WINDOW_LOG}"),
                                ));
                            }
                            Some(parsed)
                        }
                    };
                }
                "chunk_size" => {
                    options.chunk_size = parse_size(token, required(token, value)?)?;
                }
                "bucket_fraction" => {
                    let raw = required(token, value)?;
                    let fraction: f64 = raw.parse().map_err(|_| {
                        RecordsError::invalid_option(token, "expected a real number")
                    })?;
                    if !(0.0..=1.0).contains(&fraction) {
                        return Err(RecordsError::invalid_option(
                            token,
                            "bucket_fraction must be in 0.0..=1.0",
                        ));
                    }
                    options.bucket_fraction = fraction;
                }
                "pad_to_block_boundary" => {
                    options.pad_to_block_boundary = parse_bool(token, value)?;
                }
                "parallelism" => {
                    let raw = required(token, value)?;
                    options.parallelism = raw.parse().map_err(|_| {
                        RecordsError::invalid_option(token, "expected a non-negative integer")
                    })?;
                }
                _ => {
                    return Err(RecordsError::invalid_option(token, "unknown option"));
                }
            }
        }

        let compressor = compression
            .unwrap_or_default()
            .with_window_log(window_log);
        compressor.validate()?;
        options.compressor = compressor;
        Ok(options)
    }
}

impl fmt::Display for RecordWriterOptions {
    /// Canonical text form; parsing it yields equal grammar settings.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.compressor.compression_type {
            CompressionType::None => write!(f, "uncompressed")?,
            CompressionType::Brotli => write!(f, "brotli:{}", self.compressor.level)?,
            CompressionType::Zstd => write!(f, "zstd:{}", self.compressor.level)?,
        }
        match self.compressor.window_log {
            Some(window_log) => write!(f, ",window_log:{window_log}")?,
            None => write!(f, ",window_log:auto")?,
        }
        write!(
            f,
            ",transpose:{},chunk_size:{},bucket_fraction:{},pad_to_block_boundary:{},parallelism:{}",
            self.transpose,
            self.chunk_size,
            self.bucket_fraction,
            self.pad_to_block_boundary,
            self.parallelism
        )
    }
}

// ---------------------------------------------------------------------------
// Token helpers
// ---------------------------------------------------------------------------

fn no_value(token: &str, value: Option<&str>) -> RecordsResult<()> {
    match value {
        None => Ok(()),
        Some(_) => Err(RecordsError::invalid_option(token, "option takes no value")),
    }
}

fn required<'a>(token: &str, value: Option<&'a str>) -> RecordsResult<&'a str> {
    value.ok_or_else(|| RecordsError::invalid_option(token, "option requires a value"))
}

fn parse_bool(token: &str, value: Option<&str>) -> RecordsResult<bool> {
    match value {
        None | Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(_) => Err(RecordsError::invalid_option(
            token,
            "expected \"true\" or \"false\"",
        )),
    }
}

fn parse_level(
    token: &str,
    value: Option<&str>,
    default: i32,
    min: i32,
    max: i32,
) -> RecordsResult<i32> {
    let Some(raw) = value else {
        return Ok(default);
    };
    let level: i32 = raw
        .parse()
        .map_err(|_| RecordsError::invalid_option(token, "expected an integer level"))?;
    if !(min..=max).contains(&level) {
        return Err(RecordsError::invalid_option(
            token,
            format!("level must be in {min}..={max}"),
        ));
    }
    Ok(level)
}

/// Parse a size written as a real number with an optional binary suffix
/// (`B`, `k`/`K`, `M`, `G`, `T`, `P`, `E`).
fn parse_size(token: &str, raw: &str) -> RecordsResult<u64> {
    let (number, shift) = match raw.chars().last() {
        Some('B') => (&raw[..raw.len() - 1], 0),
        Some('k' | 'K') => (&raw[..raw.len() - 1], 10),
        Some('M') => (&raw[..raw.len() - 1], 20),
        Some('G') => (&raw[..raw.len() - 1], 30),
        Some('T') => (&raw[..raw.len() - 1], 40),
        Some('P') => (&raw[..raw.len() - 1], 50),
        Some('E') => (&raw[..raw.len() - 1], 60),
        _ => (raw, 0),
    };
    let value: f64 = number
        .parse()
        .map_err(|_| RecordsError::invalid_option(token, "expected a size such as 512k or 1M"))?;
    let bytes = (value * (1u64 << shift) as f64).round();
    if !bytes.is_finite() || bytes < 1.0 || bytes > u64::MAX as f64 {
        return Err(RecordsError::invalid_option(
            token,
            "chunk_size must be at least 1 byte and fit in 64 bits",
        ));
    }
    Ok(bytes as u64)
}
