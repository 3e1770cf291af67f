// SPDX-License-Identifier: PMPL-1.0-or-later
// Fuzz target for reading records from arbitrary bytes

#![no_main]

use std::io::Cursor;

use libfuzzer_sys::fuzz_target;
use strata_records::RecordReader;

fuzz_target!(|data: &[u8]| {
    let mut reader = RecordReader::new(Cursor::new(data));
    let _ = reader.check_file_format();
    let _ = reader.read_metadata();

    // Every read either yields a record, ends the stream, or reports damage
    // that recovery moves strictly forward past.
    let mut last_skip = None;
    loop {
        match reader.read_record() {
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(e) if e.is_data_loss() => match reader.recover() {
                Ok(Some(region)) => {
                    assert!(region.end > region.begin);
                    assert!(last_skip.map_or(true, |end| region.begin >= end));
                    last_skip = Some(region.end);
                }
                Ok(None) => break,
                Err(e) => panic!("recover failed on an in-memory source: {e}"),
            },
            Err(e) => panic!("read failed on an in-memory source: {e}"),
        }
    }
    let _ = reader.close();
});
