//! Binary payloads attached to work items.
//!
//! File uploads read bytes from an item's binary map and downloads attach
//! their content to the output item. Hosts with their own buffer storage
//! implement `BinaryData`; `InlineBinary` keeps the bytes base64-encoded in
//! the item itself.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::DavError;
use crate::operation::WorkItem;

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// A binary attachment as carried by a work item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryRef {
    /// Base64-encoded content.
    pub data: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

/// Host buffer helpers used by file operations.
pub trait BinaryData {
    /// Bytes stored under `property` for the item at `index`.
    fn read_input(&self, index: usize, item: &WorkItem, property: &str) -> Result<Vec<u8>, DavError>;

    /// Wrap downloaded bytes as an output attachment.
    fn wrap_output(
        &self,
        bytes: Vec<u8>,
        file_name: Option<String>,
        mime_type: &str,
    ) -> Result<BinaryRef, DavError>;
}

/// Keeps attachment bytes base64-encoded inside the work item.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineBinary;

impl BinaryData for InlineBinary {
    fn read_input(&self, _index: usize, item: &WorkItem, property: &str) -> Result<Vec<u8>, DavError> {
        let binary = item
            .binary
            .as_ref()
            .and_then(|b| b.get(property))
            .ok_or_else(|| DavError::MissingBinaryInput {
                property: property.to_string(),
            })?;
        STANDARD
            .decode(binary.data.as_bytes())
            .map_err(|e| DavError::invalid_parameter(property, format!("binary data is not valid base64: {e}")))
    }

    fn wrap_output(
        &self,
        bytes: Vec<u8>,
        file_name: Option<String>,
        mime_type: &str,
    ) -> Result<BinaryRef, DavError> {
        Ok(BinaryRef {
            file_size: Some(bytes.len() as u64),
            data: STANDARD.encode(&bytes),
            mime_type: mime_type.to_string(),
            file_name,
        })
    }
}

/// MIME type for `file_name` from its extension, or the generic default.
pub fn guess_mime_type(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_raw()
        .unwrap_or(DEFAULT_MIME_TYPE)
        .to_string()
}

/// Strip parameters (`; charset=...`) from a Content-Type value.
pub fn essence(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or(content_type).trim()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn item_with(property: &str, data: &str) -> WorkItem {
        let mut binary = BTreeMap::new();
        binary.insert(
            property.to_string(),
            BinaryRef {
                data: data.to_string(),
                mime_type: "text/plain".to_string(),
                ..BinaryRef::default()
            },
        );
        WorkItem {
            json: serde_json::Map::new(),
            binary: Some(binary),
        }
    }

    #[test]
    fn reads_base64_property() {
        let item = item_with("data", "aGVsbG8=");
        assert_eq!(InlineBinary.read_input(0, &item, "data").unwrap(), b"hello");
    }

    #[test]
    fn missing_property_is_reported() {
        let item = item_with("data", "aGVsbG8=");
        let err = InlineBinary.read_input(0, &item, "attachment").unwrap_err();
        assert!(matches!(err, DavError::MissingBinaryInput { ref property } if property == "attachment"));

        let empty = WorkItem::default();
        assert!(matches!(
            InlineBinary.read_input(0, &empty, "data").unwrap_err(),
            DavError::MissingBinaryInput { .. }
        ));
    }

    #[test]
    fn invalid_base64_is_a_parameter_error() {
        let item = item_with("data", "***");
        assert!(matches!(
            InlineBinary.read_input(0, &item, "data").unwrap_err(),
            DavError::InvalidParameter { .. }
        ));
    }

    #[test]
    fn wrap_output_encodes_and_sizes() {
        let out = InlineBinary
            .wrap_output(b"hello".to_vec(), Some("a.txt".to_string()), "text/plain")
            .unwrap();
        assert_eq!(out.data, "aGVsbG8=");
        assert_eq!(out.file_size, Some(5));
        assert_eq!(out.file_name.as_deref(), Some("a.txt"));
    }

    #[test]
    fn mime_guessing() {
        assert_eq!(guess_mime_type("report.pdf"), "application/pdf");
        assert_eq!(guess_mime_type("noext"), DEFAULT_MIME_TYPE);
        assert_eq!(essence("text/calendar; charset=utf-8"), "text/calendar");
    }
}
