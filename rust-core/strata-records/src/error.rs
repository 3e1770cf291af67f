// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Strata records - Error types
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Defines all error conditions that can arise while writing or reading a
// records file: configuration mistakes, sink I/O failures, data corruption,
// and invalid state transitions.

use thiserror::Error;

/// Errors that can occur while writing or reading records.
#[derive(Debug, Error)]
pub enum RecordsError {
    /// An I/O error occurred on the underlying byte sink or source.
    #[error("records I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The options string (or an option value) is malformed or out of range.
    #[error("invalid option {token:?}: {reason}")]
    InvalidOptions {
        /// The offending option token as it appeared in the input.
        token: String,
        /// Why the token was rejected.
        reason: String,
    },

    /// A construction argument conflicts with another or is unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The stream holds bytes that do not form a valid chunk at `offset`.
    /// The reader can skip past this with `RecordReader::recover`.
    #[error("corrupted chunk at offset {offset}: {reason}")]
    Corruption {
        /// Byte offset of the chunk that failed to validate.
        offset: u64,
        /// Human-readable description of the damage.
        reason: String,
    },

    /// The chunk checksum did not match the stored value.
    #[error("checksum mismatch for chunk at offset {offset}: expected {expected:#018x}, got {actual:#018x}")]
    ChecksumMismatch {
        /// Byte offset of the chunk header.
        offset: u64,
        /// Checksum stored in the chunk header.
        expected: u64,
        /// Checksum computed over the header fields and payload.
        actual: u64,
    },

    /// A chunk encoder hit an unrecoverable internal limit.
    #[error("chunk encoder failed: {0}")]
    EncoderFailed(String),

    /// The compression library rejected its input or parameters.
    #[error("compression error: {0}")]
    Compression(String),

    /// The writer or reader has already been closed.
    #[error("object is closed")]
    Closed,

    /// A previous operation failed; the stored message is reported again.
    #[error("object failed earlier: {0}")]
    Failed(String),

    /// A future record position can never be resolved because its writer
    /// failed or was dropped before the chunk offset became known.
    #[error("record position unavailable: {0}")]
    PositionUnavailable(String),

    /// Typed metadata could not be serialized or parsed.
    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

impl RecordsError {
    /// Returns `true` for damage that only affects part of the stream.
    ///
    /// A reader reporting such an error can continue with
    /// `RecordReader::recover`; every other error is terminal for the
    /// instance that produced it.
    pub fn is_data_loss(&self) -> bool {
        matches!(
            self,
            RecordsError::Corruption { .. } | RecordsError::ChecksumMismatch { .. }
        )
    }

    pub(crate) fn corruption(offset: u64, reason: impl Into<String>) -> Self {
        RecordsError::Corruption {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_option(token: impl Into<String>, reason: impl Into<String>) -> Self {
        RecordsError::InvalidOptions {
            token: token.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience type alias for records results.
pub type RecordsResult<T> = Result<T, RecordsError>;
