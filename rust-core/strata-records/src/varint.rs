// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Strata records - LEB128 varints
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unsigned base-128 varints as used by chunk payloads and by the protocol
// buffer wire format that transposed chunks take apart. Each byte carries
// 7 bits of data and a continuation flag in the high bit.

/// Longest encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Append `value` to `buf` as a varint.
pub fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Number of bytes `write_varint` emits for `value`.
pub fn varint_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Decode a varint starting at `*pos`, advancing `*pos` past it.
///
/// Returns `None` if the input ends mid-varint or the encoding is longer
/// than ten bytes.
pub fn read_varint(data: &[u8], pos: &mut usize) -> Option<u64> {
    let mut value: u64 = 0;
    for i in 0..MAX_VARINT_LEN {
        let byte = *data.get(*pos + i)?;
        if i == MAX_VARINT_LEN - 1 && byte > 1 {
            return None;
        }
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            *pos += i + 1;
            return Some(value);
        }
    }
    None
}

/// Like [`read_varint`], but rejects encodings that are not the shortest
/// possible form, so that re-encoding the value reproduces the input bytes.
pub fn read_canonical_varint(data: &[u8], pos: &mut usize) -> Option<u64> {
    let start = *pos;
    let value = read_varint(data, pos)?;
    if *pos - start != varint_len(value) {
        *pos = start;
        return None;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_values_take_one_byte() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 0);
        write_varint(&mut buf, 127);
        assert_eq!(buf, vec![0x00, 0x7F]);
        assert_eq!(varint_len(0), 1);
        assert_eq!(varint_len(127), 1);
        assert_eq!(varint_len(128), 2);
    }

    #[test]
    fn test_max_value_takes_ten_bytes() {
        let mut buf = Vec::new();
        write_varint(&mut buf, u64::MAX);
        assert_eq!(buf.len(), MAX_VARINT_LEN);
        assert_eq!(varint_len(u64::MAX), MAX_VARINT_LEN);

        let mut pos = 0;
        assert_eq!(read_varint(&buf, &mut pos), Some(u64::MAX));
        assert_eq!(pos, MAX_VARINT_LEN);
    }

    #[test]
    fn test_read_sequence() {
        let mut buf = Vec::new();
        for value in [1u64, 300, 70_000, 1 << 40] {
            write_varint(&mut buf, value);
        }
        let mut pos = 0;
        assert_eq!(read_varint(&buf, &mut pos), Some(1));
        assert_eq!(read_varint(&buf, &mut pos), Some(300));
        assert_eq!(read_varint(&buf, &mut pos), Some(70_000));
        assert_eq!(read_varint(&buf, &mut pos), Some(1 << 40));
        assert_eq!(pos, buf.len());
        assert_eq!(read_varint(&buf, &mut pos), None);
    }

    #[test]
    fn test_truncated_varint() {
        let mut pos = 0;
        assert_eq!(read_varint(&[0x80, 0x80], &mut pos), None);
        assert_eq!(pos, 0);
    }

    #[test]
    fn test_overlong_varint_is_not_canonical() {
        // 1 encoded in two bytes.
        let data = [0x81, 0x00];
        let mut pos = 0;
        assert_eq!(read_varint(&data, &mut pos), Some(1));

        let mut pos = 0;
        assert_eq!(read_canonical_varint(&data, &mut pos), None);
        assert_eq!(pos, 0);
    }

    #[test]
    fn test_eleven_byte_varint_rejected() {
        let data = [0xFF; 11];
        let mut pos = 0;
        assert_eq!(read_varint(&data, &mut pos), None);
    }
}
