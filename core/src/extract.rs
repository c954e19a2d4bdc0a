//! Multi-status response extraction.
//!
//! # Design
//! A targeted pattern scan, not an XML parse. The document is cut into one
//! chunk per `<D:response>` block and each property is looked up inside the
//! chunk independently, so a missing or empty property only leaves that
//! field unset. Namespace prefixes are matched literally (`D:` for DAV,
//! `C:` for CalDAV/CardDAV); servers emitting other prefixes produce no
//! records. Extraction never fails.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::path;

/// What kind of collection or resource a response describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExtractKind {
    Calendar,
    AddressBook,
    Event,
    Contact,
    Resource,
}

/// One `<D:response>` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedResource {
    pub href: String,
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    #[serde(default)]
    pub is_collection: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<String>,
}

fn element(name: &str) -> Regex {
    let pattern = format!(r"(?s)<{name}(?:\s[^>]*)?>(.*?)</{name}\s*>");
    Regex::new(&pattern).expect("element regex should be valid")
}

static RESPONSE: Lazy<Regex> = Lazy::new(|| element("D:response"));
static HREF: Lazy<Regex> = Lazy::new(|| element("D:href"));
static ETAG: Lazy<Regex> = Lazy::new(|| element("D:getetag"));
static DISPLAY_NAME: Lazy<Regex> = Lazy::new(|| element("D:displayname"));
static CALENDAR_DESCRIPTION: Lazy<Regex> = Lazy::new(|| element("C:calendar-description"));
static ADDRESS_BOOK_DESCRIPTION: Lazy<Regex> = Lazy::new(|| element("C:addressbook-description"));
static CALENDAR_DATA: Lazy<Regex> = Lazy::new(|| element("C:calendar-data"));
static ADDRESS_DATA: Lazy<Regex> = Lazy::new(|| element("C:address-data"));
static CONTENT_TYPE: Lazy<Regex> = Lazy::new(|| element("D:getcontenttype"));
static LAST_MODIFIED: Lazy<Regex> = Lazy::new(|| element("D:getlastmodified"));
static CONTENT_LENGTH: Lazy<Regex> = Lazy::new(|| element("D:getcontentlength"));
static RESOURCE_TYPE: Lazy<Regex> = Lazy::new(|| element("D:resourcetype"));

static TAG_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(?:[A-Za-z][\w.-]*:)?([A-Za-z][\w.-]*)[^>]*>").expect("tag regex should be valid")
});
static COMPONENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<C:comp\s+name\s*=\s*"([^"]+)""#).expect("component regex should be valid")
});
static CDATA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^<!\[CDATA\[(.*)\]\]>$").expect("CDATA regex should be valid"));

/// Extract every `<D:response>` block that carries an href, in document order.
pub fn extract(xml: &str, kind: ExtractKind) -> Vec<ParsedResource> {
    RESPONSE
        .captures_iter(xml)
        .filter_map(|caps| caps.get(1))
        .filter_map(|chunk| extract_one(chunk.as_str(), kind))
        .collect()
}

fn extract_one(chunk: &str, kind: ExtractKind) -> Option<ParsedResource> {
    let href = text_of(&HREF, chunk)?;
    let mut resource = ParsedResource {
        href: path::decode_lossy(&href),
        etag: text_of(&ETAG, chunk),
        display_name: text_of(&DISPLAY_NAME, chunk),
        ..ParsedResource::default()
    };

    if let Some(types) = inner_of(&RESOURCE_TYPE, chunk) {
        resource.resource_types = TAG_NAME
            .captures_iter(types)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .collect();
        resource.is_collection = types.contains("collection");
    }

    match kind {
        ExtractKind::Calendar | ExtractKind::AddressBook => {
            resource.description = text_of(&CALENDAR_DESCRIPTION, chunk)
                .or_else(|| text_of(&ADDRESS_BOOK_DESCRIPTION, chunk));
            resource.components = COMPONENT
                .captures_iter(chunk)
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .collect();
        }
        ExtractKind::Event | ExtractKind::Contact => {
            resource.data =
                text_of(&CALENDAR_DATA, chunk).or_else(|| text_of(&ADDRESS_DATA, chunk));
        }
        ExtractKind::Resource => {
            resource.content_type = text_of(&CONTENT_TYPE, chunk);
            resource.last_modified = text_of(&LAST_MODIFIED, chunk);
            resource.content_length =
                text_of(&CONTENT_LENGTH, chunk).and_then(|len| len.parse::<u64>().ok());
        }
    }

    Some(resource)
}

fn inner_of<'a>(pattern: &Regex, chunk: &'a str) -> Option<&'a str> {
    pattern
        .captures(chunk)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Trimmed, CDATA-unwrapped, entity-decoded text of the first match.
fn text_of(pattern: &Regex, chunk: &str) -> Option<String> {
    let raw = inner_of(pattern, chunk)?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(cdata) = CDATA.captures(raw).and_then(|c| c.get(1)) {
        return Some(cdata.as_str().to_string());
    }
    let text = match quick_xml::escape::unescape(raw) {
        Ok(unescaped) => unescaped.into_owned(),
        Err(_) => raw.to_string(),
    };
    Some(text)
}
