// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Strata records - File metadata
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Optional descriptive metadata stored once at the start of a fresh file.
// The typed form is persisted as JSON; callers that already hold serialized
// bytes can hand those to the writer directly instead.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::RecordsResult;

/// Descriptive metadata of a records file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordsMetadata {
    /// Fully qualified name of the message type stored in the records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_type_name: Option<String>,

    /// Free-form human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Application-defined key/value attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl RecordsMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record_type_name(mut self, name: impl Into<String>) -> Self {
        self.record_type_name = Some(name.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// `true` when no field is set; such metadata is not written at all.
    pub fn is_empty(&self) -> bool {
        self.record_type_name.is_none() && self.comment.is_none() && self.attributes.is_empty()
    }

    pub fn to_bytes(&self) -> RecordsResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> RecordsResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_round_trip() {
        let metadata = RecordsMetadata::new()
            .with_record_type_name("example.Event")
            .with_comment("nightly export")
            .with_attribute("source", "ingest-7");
        let bytes = metadata.to_bytes().unwrap();
        assert_eq!(RecordsMetadata::from_bytes(&bytes).unwrap(), metadata);
    }

    #[test]
    fn test_unset_fields_are_omitted() {
        let metadata = RecordsMetadata::new().with_record_type_name("a.B");
        let text = String::from_utf8(metadata.to_bytes().unwrap()).unwrap();
        assert_eq!(text, r#"{"record_type_name":"a.B"}"#);
    }

    #[test]
    fn test_is_empty() {
        assert!(RecordsMetadata::new().is_empty());
        assert!(!RecordsMetadata::new().with_comment("x").is_empty());
    }

    #[test]
    fn test_garbage_is_a_metadata_error() {
        assert!(RecordsMetadata::from_bytes(b"\x00\x01not json").is_err());
    }
}
