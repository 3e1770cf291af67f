// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Strata records - Chunk framing
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Every chunk on the wire is a fixed 40-byte header followed by its payload.
// The header checksum covers the other header fields and the whole payload,
// so a chunk either validates completely or not at all.
//
// On-disk header format (all integers little-endian):
//   [1 byte:  chunk_type]          -- 's' signature, 'm' metadata, 'p' padding,
//                                     'r' simple records, 't' transposed records
//   [7 bytes: reserved]            -- must be zero
//   [8 bytes: data_size (u64)]     -- payload length
//   [8 bytes: num_records (u64)]
//   [8 bytes: decoded_data_size (u64)]
//   [8 bytes: checksum (u64)]      -- xxHash64 of header[0..32] ++ payload

use std::hash::Hasher;

use twox_hash::XxHash64;

use crate::error::{RecordsError, RecordsResult};

/// Alignment unit for padding chunks (64 KiB).
pub const BLOCK_SIZE: u64 = 1 << 16;

/// Size of the fixed chunk header.
pub const CHUNK_HEADER_SIZE: usize = 40;

/// Number of header bytes covered by the checksum (everything before it).
const CHECKSUMMED_HEADER_SIZE: usize = 32;

// ---------------------------------------------------------------------------
// ChunkType
// ---------------------------------------------------------------------------

/// What a chunk contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkType {
    /// Marks the start of a records file. Empty payload.
    FileSignature,
    /// Serialized file metadata. Holds no records.
    FileMetadata,
    /// Zero bytes that advance the stream to a block boundary.
    Padding,
    /// Records stored with the simple encoding.
    Simple,
    /// Records stored with the transposed encoding.
    Transposed,
}

impl ChunkType {
    /// Decode the first header byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b's' => Some(Self::FileSignature),
            b'm' => Some(Self::FileMetadata),
            b'p' => Some(Self::Padding),
            b'r' => Some(Self::Simple),
            b't' => Some(Self::Transposed),
            _ => None,
        }
    }

    /// Encode this chunk type as its header byte.
    pub fn to_byte(self) -> u8 {
        match self {
            Self::FileSignature => b's',
            Self::FileMetadata => b'm',
            Self::Padding => b'p',
            Self::Simple => b'r',
            Self::Transposed => b't',
        }
    }

    /// `true` for chunk types that hold records.
    pub fn carries_records(self) -> bool {
        matches!(self, Self::Simple | Self::Transposed)
    }
}

// ---------------------------------------------------------------------------
// ChunkHeader
// ---------------------------------------------------------------------------

/// Decoded chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub chunk_type: ChunkType,
    pub data_size: u64,
    pub num_records: u64,
    pub decoded_data_size: u64,
    pub checksum: u64,
}

impl ChunkHeader {
    /// Serialize to the 40-byte on-disk form.
    pub fn encode(&self) -> [u8; CHUNK_HEADER_SIZE] {
        let mut bytes = [0u8; CHUNK_HEADER_SIZE];
        bytes[0] = self.chunk_type.to_byte();
        bytes[8..16].copy_from_slice(&self.data_size.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.num_records.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.decoded_data_size.to_le_bytes());
        bytes[32..40].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Parse and sanity-check a header read at `offset`.
    ///
    /// This checks structure only; the checksum needs the payload and is
    /// verified by [`Chunk::verify`].
    pub fn decode(bytes: &[u8; CHUNK_HEADER_SIZE], offset: u64) -> RecordsResult<Self> {
        let chunk_type = ChunkType::from_byte(bytes[0]).ok_or_else(|| {
            RecordsError::corruption(offset, format!("unknown chunk type {:#04x}", bytes[0]))
        })?;
        if bytes[1..8].iter().any(|&b| b != 0) {
            return Err(RecordsError::corruption(offset, "reserved header bytes are not zero"));
        }
        let field = |range: std::ops::Range<usize>| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[range]);
            u64::from_le_bytes(raw)
        };
        let header = Self {
            chunk_type,
            data_size: field(8..16),
            num_records: field(16..24),
            decoded_data_size: field(24..32),
            checksum: field(32..40),
        };

        if !chunk_type.carries_records() && header.num_records != 0 {
            return Err(RecordsError::corruption(
                offset,
                format!("{chunk_type:?} chunk declares {} records", header.num_records),
            ));
        }
        if chunk_type == ChunkType::FileSignature && header.data_size != 0 {
            return Err(RecordsError::corruption(offset, "signature chunk has a payload"));
        }
        if header.num_records > u64::from(u32::MAX) + 1 {
            return Err(RecordsError::corruption(
                offset,
                format!("chunk declares {} records", header.num_records),
            ));
        }
        Ok(header)
    }

    /// Offset just past a chunk with this header beginning at `chunk_begin`.
    pub fn chunk_end(&self, chunk_begin: u64) -> u64 {
        chunk_begin
            .saturating_add(CHUNK_HEADER_SIZE as u64)
            .saturating_add(self.data_size)
    }
}

/// xxHash64 (seed 0) of the checksummed header prefix followed by the payload.
pub fn compute_checksum(header: &[u8; CHUNK_HEADER_SIZE], payload: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(&header[..CHECKSUMMED_HEADER_SIZE]);
    hasher.write(payload);
    hasher.finish()
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// A framed chunk: header plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub header: ChunkHeader,
    pub data: Vec<u8>,
}

impl Chunk {
    /// Build a chunk and compute its checksum.
    pub fn new(chunk_type: ChunkType, data: Vec<u8>, num_records: u64, decoded_data_size: u64) -> Self {
        let mut header = ChunkHeader {
            chunk_type,
            data_size: data.len() as u64,
            num_records,
            decoded_data_size,
            checksum: 0,
        };
        header.checksum = compute_checksum(&header.encode(), &data);
        Self { header, data }
    }

    /// The chunk written at the start of every fresh file.
    pub fn signature() -> Self {
        Self::new(ChunkType::FileSignature, Vec::new(), 0, 0)
    }

    /// A chunk holding serialized file metadata.
    pub fn metadata(serialized: Vec<u8>) -> Self {
        let size = serialized.len() as u64;
        Self::new(ChunkType::FileMetadata, serialized, 0, size)
    }

    /// A padding chunk written at `pos` so the following chunk begins on a
    /// block boundary, or `None` when `pos` is already aligned.
    pub fn padding_at(pos: u64) -> Option<Self> {
        let remainder = pos % BLOCK_SIZE;
        if remainder == 0 {
            return None;
        }
        let mut gap = BLOCK_SIZE - remainder;
        if gap < CHUNK_HEADER_SIZE as u64 {
            gap += BLOCK_SIZE;
        }
        let payload = vec![0u8; (gap - CHUNK_HEADER_SIZE as u64) as usize];
        Some(Self::new(ChunkType::Padding, payload, 0, 0))
    }

    /// Total bytes this chunk occupies on the wire.
    pub fn encoded_size(&self) -> u64 {
        CHUNK_HEADER_SIZE as u64 + self.data.len() as u64
    }

    /// Serialize header and payload into one buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_size() as usize);
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&self.data);
        out
    }

    /// Verify the checksum of a chunk read from `offset`.
    pub fn verify(&self, offset: u64) -> RecordsResult<()> {
        if self.header.data_size != self.data.len() as u64 {
            return Err(RecordsError::corruption(
                offset,
                format!(
                    "payload is {} bytes, header declares {}",
                    self.data.len(),
                    self.header.data_size
                ),
            ));
        }
        let actual = compute_checksum(&self.header.encode(), &self.data);
        if actual != self.header.checksum {
            return Err(RecordsError::ChecksumMismatch {
                offset,
                expected: self.header.checksum,
                actual,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let chunk = Chunk::new(ChunkType::Simple, vec![1, 2, 3], 7, 99);
        let bytes = chunk.to_bytes();
        assert_eq!(bytes.len(), CHUNK_HEADER_SIZE + 3);
        assert_eq!(bytes[0], b'r');
        assert!(bytes[1..8].iter().all(|&b| b == 0));
        assert_eq!(u64::from_le_bytes(bytes[8..16].try_into().unwrap()), 3);
        assert_eq!(u64::from_le_bytes(bytes[16..24].try_into().unwrap()), 7);
        assert_eq!(u64::from_le_bytes(bytes[24..32].try_into().unwrap()), 99);
        assert_eq!(
            u64::from_le_bytes(bytes[32..40].try_into().unwrap()),
            chunk.header.checksum
        );
        assert_eq!(&bytes[40..], &[1, 2, 3]);
    }

    #[test]
    fn test_decode_then_verify() {
        let chunk = Chunk::new(ChunkType::Transposed, b"payload".to_vec(), 2, 10);
        let bytes = chunk.to_bytes();
        let header_bytes: [u8; CHUNK_HEADER_SIZE] = bytes[..CHUNK_HEADER_SIZE].try_into().unwrap();
        let header = ChunkHeader::decode(&header_bytes, 0).unwrap();
        assert_eq!(header, chunk.header);
        let decoded = Chunk {
            header,
            data: bytes[CHUNK_HEADER_SIZE..].to_vec(),
        };
        decoded.verify(0).unwrap();
    }

    #[test]
    fn test_flipped_payload_byte_fails_checksum() {
        let mut chunk = Chunk::new(ChunkType::Simple, vec![0u8; 64], 1, 64);
        chunk.data[10] ^= 0x01;
        match chunk.verify(128) {
            Err(RecordsError::ChecksumMismatch { offset, expected, actual }) => {
                assert_eq!(offset, 128);
                assert_ne!(expected, actual);
            }
            other => panic!("expected checksum mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_checksum_covers_header_fields() {
        let mut chunk = Chunk::new(ChunkType::Simple, vec![5u8; 8], 1, 8);
        chunk.header.num_records = 2;
        assert!(chunk.verify(0).is_err());
    }

    #[test]
    fn test_unknown_type_and_reserved_bytes_rejected() {
        let mut bytes = Chunk::signature().header.encode();
        bytes[0] = b'x';
        assert!(ChunkHeader::decode(&bytes, 0).unwrap_err().is_data_loss());

        let mut bytes = Chunk::signature().header.encode();
        bytes[3] = 1;
        assert!(ChunkHeader::decode(&bytes, 0).is_err());
    }

    #[test]
    fn test_non_record_chunk_with_records_rejected() {
        let chunk = Chunk::new(ChunkType::Padding, vec![0; 4], 3, 0);
        assert!(ChunkHeader::decode(&chunk.header.encode(), 0).is_err());
    }

    #[test]
    fn test_padding_reaches_block_boundary() {
        assert!(Chunk::padding_at(0).is_none());
        assert!(Chunk::padding_at(BLOCK_SIZE * 3).is_none());

        for pos in [1u64, 40, 1000, BLOCK_SIZE - 41, BLOCK_SIZE - 40, BLOCK_SIZE - 1, BLOCK_SIZE + 7] {
            let padding = Chunk::padding_at(pos).unwrap();
            let end = pos + padding.encoded_size();
            assert_eq!(end % BLOCK_SIZE, 0, "pos {pos}");
            assert!(padding.data.iter().all(|&b| b == 0));
            assert_eq!(padding.header.num_records, 0);
        }

        // A gap smaller than a header spills into the following block.
        let padding = Chunk::padding_at(BLOCK_SIZE - 1).unwrap();
        assert_eq!(padding.encoded_size(), BLOCK_SIZE + 1);
    }

    #[test]
    fn test_metadata_chunk() {
        let chunk = Chunk::metadata(b"{}".to_vec());
        assert_eq!(chunk.header.chunk_type, ChunkType::FileMetadata);
        assert_eq!(chunk.header.num_records, 0);
        assert_eq!(chunk.header.decoded_data_size, 2);
    }
}
