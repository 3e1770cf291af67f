// SPDX-License-Identifier: PMPL-1.0-or-later
// Fuzz target for chunk payload decoding with a valid header

#![no_main]

use libfuzzer_sys::fuzz_target;
use strata_records::{Chunk, ChunkDecoder, ChunkType, FieldProjection};

fuzz_target!(|data: &[u8]| {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };
    let Some((&count, payload)) = rest.split_first() else {
        return;
    };
    let chunk_type = if selector & 1 == 0 {
        ChunkType::Simple
    } else {
        ChunkType::Transposed
    };
    let projection = if selector & 2 == 0 {
        FieldProjection::All
    } else {
        FieldProjection::fields([1, u32::from(selector >> 2)])
    };
    let chunk = Chunk::new(
        chunk_type,
        payload.to_vec(),
        u64::from(count),
        payload.len() as u64 * 4,
    );
    if let Ok(mut decoder) = ChunkDecoder::decode(&chunk, &projection, 0) {
        let mut read = 0;
        while decoder.read_record().is_some() {
            read += 1;
        }
        assert_eq!(read, decoder.num_records());
    }
});
