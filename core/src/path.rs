//! Path normalization for DAV resource paths.
//!
//! Every path that ends up in a request URL passes through here exactly
//! once. Segments are decoded then re-encoded so that already-escaped input
//! is not escaped twice; a segment that does not decode cleanly is encoded
//! as written.

use once_cell::sync::Lazy;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;

use crate::error::DavError;

/// Characters left unescaped in a path segment: `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

static ABSOLUTE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^https?://").expect("absolute URL regex should be valid"));

/// What to do when a path field holds an absolute URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsoluteUrlPolicy {
    /// Return the URL unchanged. Only for hrefs handed back by the server.
    PassThrough,
    /// Fail with `DavError::InvalidPath`.
    Reject,
}

pub fn is_absolute_url(value: &str) -> bool {
    ABSOLUTE_URL.is_match(value)
}

/// Normalize `path` under the given policy. `field` names the input in errors.
pub fn normalize(path: &str, policy: AbsoluteUrlPolicy, field: &str) -> Result<String, DavError> {
    if is_absolute_url(path) {
        return match policy {
            AbsoluteUrlPolicy::PassThrough => Ok(path.to_string()),
            AbsoluteUrlPolicy::Reject => Err(DavError::InvalidPath {
                field: field.to_string(),
                path: path.to_string(),
            }),
        };
    }

    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let encoded: Vec<String> = trimmed
        .split('/')
        .map(|segment| {
            if segment.is_empty() {
                String::new()
            } else {
                encode_segment(segment)
            }
        })
        .collect();
    Ok(format!("/{}", encoded.join("/")))
}

/// Permissive normalization: absolute URLs pass through unchanged.
pub fn normalize_path(path: &str) -> String {
    match normalize(path, AbsoluteUrlPolicy::PassThrough, "path") {
        Ok(normalized) => normalized,
        Err(_) => path.to_string(),
    }
}

/// Strict normalization: absolute URLs are rejected.
pub fn normalize_strict(path: &str, field: &str) -> Result<String, DavError> {
    normalize(path, AbsoluteUrlPolicy::Reject, field)
}

/// Concatenate a collection path and a child identifier for a single later
/// normalization. `extension` is skipped when `id` already carries it.
pub fn join_child(parent: &str, id: &str, extension: &str) -> String {
    let parent = parent.trim_end_matches('/');
    let id = id.trim_start_matches('/');
    if extension.is_empty() || id.to_ascii_lowercase().ends_with(extension) {
        format!("{parent}/{id}")
    } else {
        format!("{parent}/{id}{extension}")
    }
}

/// Last non-empty path segment, percent-decoded. Used for download file names.
pub fn file_name(path: &str) -> Option<String> {
    let without_query = path.split(['?', '#']).next().unwrap_or(path);
    let last = without_query.trim_end_matches('/').rsplit('/').next()?;
    if last.is_empty() {
        return None;
    }
    Some(decode_lossy(last))
}

/// Percent-decode, falling back to the raw text when decoding fails.
pub fn decode_lossy(value: &str) -> String {
    strict_decode(value).unwrap_or_else(|| value.to_string())
}

fn encode_segment(segment: &str) -> String {
    let source = strict_decode(segment).unwrap_or_else(|| segment.to_string());
    utf8_percent_encode(&source, SEGMENT).to_string()
}

/// Decode like `decodeURIComponent`: malformed escapes or non-UTF-8 output fail.
fn strict_decode(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return None;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    percent_decode_str(value)
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}
