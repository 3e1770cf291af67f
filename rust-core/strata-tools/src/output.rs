// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//!
//! Rendering of inspection results.
//!
//! - **Table**: human-readable output using `comfy-table`.
//! - **JSON**: pretty-printed JSON for scripting.

use std::fmt;

use clap::ValueEnum;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};
use serde::Serialize;

use crate::inspect::{Description, Verification};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// How `strata cat` prints each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RecordEncoding {
    /// UTF-8, with invalid sequences replaced.
    Text,
    Hex,
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
}

fn numeric(value: u64) -> Cell {
    Cell::new(value).set_alignment(CellAlignment::Right)
}

pub fn format_description(description: &Description, format: OutputFormat) -> String {
    if format == OutputFormat::Json {
        return to_json(description);
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "offset",
        "type",
        "data size",
        "decoded size",
        "records",
        "compression",
    ]);
    for chunk in &description.chunks {
        table.add_row(vec![
            numeric(chunk.offset),
            Cell::new(chunk.chunk_type),
            numeric(chunk.data_size),
            numeric(chunk.decoded_data_size),
            numeric(chunk.num_records),
            Cell::new(chunk.compression.unwrap_or("")),
        ]);
    }

    let chunk_count = description.chunks.len();
    let mut out = format!(
        "{table}\n({chunk_count} chunk{}, {} records, {} bytes)",
        if chunk_count == 1 { "" } else { "s" },
        description.num_records(),
        description.file_len,
    );
    if let Some(damage) = &description.damage {
        out.push_str(&format!("\nstopped at damage: {damage}"));
    }
    out
}

pub fn format_verification(verification: &Verification, format: OutputFormat) -> String {
    if format == OutputFormat::Json {
        return to_json(verification);
    }

    let mut out = String::new();
    if let Some(error) = &verification.format_error {
        out.push_str(&format!("not a records file: {error}\n"));
    }
    if !verification.skipped.is_empty() {
        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["begin", "end", "bytes", "reason"]);
        for region in &verification.skipped {
            table.add_row(vec![
                numeric(region.begin),
                numeric(region.end),
                numeric(region.end - region.begin),
                Cell::new(&region.message),
            ]);
        }
        out.push_str(&format!("{table}\n"));
    }
    out.push_str(&format!(
        "{} records ({} bytes) read, {} bytes skipped in {} region{}",
        verification.records,
        verification.record_bytes,
        verification.skipped_bytes(),
        verification.skipped.len(),
        if verification.skipped.len() == 1 { "" } else { "s" },
    ));
    out
}

pub fn format_record(record: &[u8], encoding: RecordEncoding) -> String {
    match encoding {
        RecordEncoding::Text => String::from_utf8_lossy(record).into_owned(),
        RecordEncoding::Hex => record.iter().map(|byte| format!("{byte:02x}")).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::{ChunkSummary, Skipped};

    fn description() -> Description {
        Description {
            file_len: 140,
            chunks: vec![
                ChunkSummary {
                    offset: 0,
                    chunk_type: "signature",
                    data_size: 0,
                    decoded_data_size: 0,
                    num_records: 0,
                    compression: None,
                },
                ChunkSummary {
                    offset: 40,
                    chunk_type: "simple",
                    data_size: 60,
                    decoded_data_size: 48,
                    num_records: 6,
                    compression: Some("brotli"),
                },
            ],
            damage: None,
        }
    }

    #[test]
    fn test_description_table() {
        let out = format_description(&description(), OutputFormat::Table);
        assert!(out.contains("signature"));
        assert!(out.contains("brotli"));
        assert!(out.ends_with("(2 chunks, 6 records, 140 bytes)"));
    }

    #[test]
    fn test_description_json() {
        let out = format_description(&description(), OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["chunks"][1]["num_records"], 6);
        assert_eq!(value["chunks"][0]["compression"], serde_json::Value::Null);
    }

    #[test]
    fn test_verification_summary() {
        let verification = Verification {
            file_len: 500,
            format_error: None,
            records: 9,
            record_bytes: 90,
            skipped: vec![Skipped {
                begin: 100,
                end: 180,
                message: "checksum mismatch".to_string(),
            }],
        };
        let out = format_verification(&verification, OutputFormat::Table);
        assert!(out.contains("checksum mismatch"));
        assert!(out.ends_with("9 records (90 bytes) read, 80 bytes skipped in 1 region"));
    }

    #[test]
    fn test_format_record() {
        assert_eq!(format_record(b"\x00\xffab", RecordEncoding::Hex), "00ff6162");
        assert_eq!(format_record(b"hi\xff", RecordEncoding::Text), "hi\u{fffd}");
    }
}
