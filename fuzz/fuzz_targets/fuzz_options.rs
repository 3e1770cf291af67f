// SPDX-License-Identifier: PMPL-1.0-or-later
// Fuzz target for the writer options grammar

#![no_main]

use libfuzzer_sys::fuzz_target;
use strata_records::RecordWriterOptions;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(options) = text.parse::<RecordWriterOptions>() {
            // The canonical form must parse back to the same settings.
            let canonical = options.to_string();
            let reparsed: RecordWriterOptions = canonical
                .parse()
                .unwrap_or_else(|e| panic!("canonical form {canonical:?} rejected: {e}"));
            assert_eq!(reparsed.to_string(), canonical);
        }
    }
});
