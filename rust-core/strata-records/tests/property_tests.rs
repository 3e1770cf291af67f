// SPDX-License-Identifier: PMPL-1.0-or-later
//! Property-based tests for strata records

use std::io::Cursor;

use proptest::prelude::*;
use strata_records::{
    FieldProjection, RecordPosition, RecordReader, RecordReaderOptions, RecordWriter,
    RecordWriterOptions,
};

/// Generate arbitrary records, including empty ones
fn arb_records() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..200), 0..60)
}

/// Generate valid options strings
fn arb_options() -> impl Strategy<Value = String> {
    (
        prop_oneof![
            Just("uncompressed".to_string()),
            (0..=11i32).prop_map(|level| format!("brotli:{level}")),
            (-5..=9i32).prop_map(|level| format!("zstd:{level}")),
        ],
        any::<bool>(),
        prop_oneof![Just("1"), Just("64"), Just("1k"), Just("1M")],
        (0..=4u32).prop_map(|quarters| f64::from(quarters) / 4.0),
        any::<bool>(),
        0..3usize,
    )
        .prop_map(
            |(compression, transpose, chunk_size, bucket_fraction, pad, parallelism)| {
                format!(
                    "{compression},transpose:{transpose},chunk_size:{chunk_size},\
                     bucket_fraction:{bucket_fraction},pad_to_block_boundary:{pad},\
                     parallelism:{parallelism}"
                )
            },
        )
}

fn write(options: &str, records: &[Vec<u8>]) -> (Vec<u8>, Vec<RecordPosition>) {
    let options: RecordWriterOptions = options.parse().unwrap();
    let mut writer = RecordWriter::new(Vec::new(), options).unwrap();
    let keys = writer.write_records_with_keys(records).unwrap();
    let bytes = writer.into_inner().unwrap();
    (bytes, keys.iter().map(|key| key.get().unwrap()).collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_round_trip(records in arb_records(), options in arb_options()) {
        let (bytes, _) = write(&options, &records);
        let mut reader = RecordReader::new(Cursor::new(bytes));
        let read: Vec<Vec<u8>> = reader.records().collect::<Result<_, _>>().unwrap();
        prop_assert_eq!(read, records);
    }

    #[test]
    fn test_positions_increase_and_seek(records in arb_records(), options in arb_options()) {
        let (bytes, positions) = write(&options, &records);
        prop_assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));

        let mut reader = RecordReader::new(Cursor::new(bytes));
        for (record, position) in records.iter().zip(&positions) {
            reader.seek(*position).unwrap();
            let read = reader.read_record().unwrap();
            prop_assert_eq!(read.as_ref(), Some(record));
        }
    }

    #[test]
    fn test_position_byte_form(begin in any::<u64>(), index in any::<u32>()) {
        let position = RecordPosition::new(begin, index);
        prop_assert_eq!(RecordPosition::from_bytes(&position.to_bytes()).unwrap(), position);
        prop_assert_eq!(position.to_string().parse::<RecordPosition>().unwrap(), position);
    }

    #[test]
    fn test_projection_never_changes_record_count(
        records in arb_records(),
        fields in prop::collection::btree_set(1..5u32, 0..3),
    ) {
        let (bytes, _) = write("transpose,uncompressed,bucket_fraction:0", &records);
        let options = RecordReaderOptions::new()
            .set_field_projection(FieldProjection::Fields(fields));
        let mut reader = RecordReader::with_options(Cursor::new(bytes), options);
        let count = reader.records().map(Result::unwrap).count();
        prop_assert_eq!(count, records.len());
    }

    #[test]
    fn test_arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..400)) {
        let mut reader = RecordReader::new(Cursor::new(bytes));
        let _ = reader.check_file_format();
        for _ in 0..8 {
            match reader.read_record() {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) if e.is_data_loss() => {
                    if reader.recover().unwrap().is_none() {
                        break;
                    }
                }
                Err(e) => return Err(TestCaseError::fail(e.to_string())),
            }
        }
    }
}
