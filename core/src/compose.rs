//! Request composition: one builder per DAV operation.
//!
//! # Design
//! Builders are pure functions of the run context and the operation's
//! parameters. They validate and normalize paths, pick the method and
//! headers, and attach the body. Nothing here performs I/O, so a request can
//! be inspected (or rejected) before it ever reaches a transport.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::DavContext;
use crate::error::DavError;
use crate::http::{HttpMethod, HttpRequest};
use crate::path::{self, AbsoluteUrlPolicy};
use crate::xml::{self, ContactFilter, TimeRange};

pub const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";
pub const CALENDAR_CONTENT_TYPE: &str = "text/calendar";
pub const VCARD_CONTENT_TYPE: &str = "text/vcard";

const CALDAV_TIMESTAMP: &str = "%Y%m%dT%H%M%SZ";

/// `Depth` header values accepted for property queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Depth {
    #[serde(rename = "0")]
    Zero,
    #[default]
    #[serde(rename = "1")]
    One,
    #[serde(rename = "infinity")]
    Infinity,
}

impl Depth {
    pub fn as_str(self) -> &'static str {
        match self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        }
    }
}

/// Which events a calendar-query should return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    All,
    Range { start: String, end: String },
    Date { date: String },
}

impl EventFilter {
    /// The CalDAV time-range for this filter; `None` matches every event.
    pub fn time_range(&self) -> Result<Option<TimeRange>, DavError> {
        match self {
            EventFilter::All => Ok(None),
            EventFilter::Range { start, end } => {
                let start = parse_timestamp("start", start)?;
                let end = parse_timestamp("end", end)?;
                if end < start {
                    return Err(DavError::invalid_parameter(
                        "end",
                        "the end of the range is before its start",
                    ));
                }
                Ok(Some(TimeRange {
                    start: start.format(CALDAV_TIMESTAMP).to_string(),
                    end: end.format(CALDAV_TIMESTAMP).to_string(),
                }))
            }
            EventFilter::Date { date } => {
                let day = parse_timestamp("date", date)?.date_naive();
                let start = day.and_time(NaiveTime::MIN).and_utc();
                let end = day
                    .and_hms_milli_opt(23, 59, 59, 999)
                    .ok_or_else(|| DavError::invalid_parameter("date", "day out of range"))?
                    .and_utc();
                Ok(Some(TimeRange {
                    start: start.format(CALDAV_TIMESTAMP).to_string(),
                    end: end.format(CALDAV_TIMESTAMP).to_string(),
                }))
            }
        }
    }
}

/// Whether a PUT creates a resource or overwrites one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    /// `If-Match: <etag>` when an etag is known, `If-Match: *` otherwise.
    Update { etag: Option<String> },
}

/// Parse a caller-supplied date or timestamp into UTC.
///
/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM:SS[.fff]` (read as UTC), the CalDAV
/// form `YYYYMMDDTHHMMSSZ`, and a bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_timestamp(name: &str, value: &str) -> Result<DateTime<Utc>, DavError> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        CALDAV_TIMESTAMP,
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc());
    }
    Err(DavError::invalid_parameter(
        name,
        format!("'{value}' is not a recognised date or timestamp"),
    ))
}

pub fn get_calendars(ctx: &DavContext, home_path: &str) -> Result<HttpRequest, DavError> {
    let url = ctx.resolve(home_path, AbsoluteUrlPolicy::Reject, "calendarHomePath")?;
    Ok(xml_request(HttpMethod::Propfind, url, Depth::One, xml::calendar_discovery_body()))
}

pub fn get_address_books(ctx: &DavContext, home_path: &str) -> Result<HttpRequest, DavError> {
    let url = ctx.resolve(home_path, AbsoluteUrlPolicy::Reject, "addressBookHomePath")?;
    Ok(xml_request(
        HttpMethod::Propfind,
        url,
        Depth::One,
        xml::address_book_discovery_body(),
    ))
}

pub fn get_events(
    ctx: &DavContext,
    calendar_path: &str,
    filter: &EventFilter,
) -> Result<HttpRequest, DavError> {
    let url = ctx.resolve(calendar_path, AbsoluteUrlPolicy::Reject, "calendarPath")?;
    let range = filter.time_range()?;
    Ok(xml_request(
        HttpMethod::Report,
        url,
        Depth::One,
        xml::calendar_query_body(range.as_ref()),
    ))
}

pub fn get_contacts(
    ctx: &DavContext,
    address_book_path: &str,
    filter: &ContactFilter,
) -> Result<HttpRequest, DavError> {
    let url = ctx.resolve(address_book_path, AbsoluteUrlPolicy::Reject, "addressBookPath")?;
    Ok(xml_request(
        HttpMethod::Report,
        url,
        Depth::One,
        xml::address_book_query_body(filter),
    ))
}

pub fn get_properties(ctx: &DavContext, path: &str, depth: Depth) -> Result<HttpRequest, DavError> {
    let url = ctx.resolve(path, AbsoluteUrlPolicy::PassThrough, "path")?;
    Ok(xml_request(HttpMethod::Propfind, url, depth, xml::resource_propfind_body()))
}

/// URL of an event inside a calendar collection.
pub fn event_url(ctx: &DavContext, calendar_path: &str, event_id: &str) -> Result<String, DavError> {
    child_url(ctx, calendar_path, "calendarPath", event_id, "eventId", ".ics")
}

/// URL of a contact inside an address book collection.
pub fn contact_url(
    ctx: &DavContext,
    address_book_path: &str,
    contact_id: &str,
) -> Result<String, DavError> {
    child_url(ctx, address_book_path, "addressBookPath", contact_id, "contactId", ".vcf")
}

pub fn put_event(
    ctx: &DavContext,
    calendar_path: &str,
    event_id: &str,
    ical: &str,
    mode: &WriteMode,
) -> Result<HttpRequest, DavError> {
    let url = event_url(ctx, calendar_path, event_id)?;
    Ok(put_request(url, CALENDAR_CONTENT_TYPE, ical.as_bytes().to_vec(), mode))
}

pub fn put_contact(
    ctx: &DavContext,
    address_book_path: &str,
    contact_id: &str,
    vcard: &str,
    mode: &WriteMode,
) -> Result<HttpRequest, DavError> {
    let url = contact_url(ctx, address_book_path, contact_id)?;
    Ok(put_request(url, VCARD_CONTENT_TYPE, vcard.as_bytes().to_vec(), mode))
}

pub fn delete_event(
    ctx: &DavContext,
    calendar_path: &str,
    event_id: &str,
    etag: Option<&str>,
) -> Result<HttpRequest, DavError> {
    let url = event_url(ctx, calendar_path, event_id)?;
    Ok(delete_request(url, etag))
}

pub fn delete_contact(
    ctx: &DavContext,
    address_book_path: &str,
    contact_id: &str,
    etag: Option<&str>,
) -> Result<HttpRequest, DavError> {
    let url = contact_url(ctx, address_book_path, contact_id)?;
    Ok(delete_request(url, etag))
}

pub fn download_file(ctx: &DavContext, path: &str) -> Result<HttpRequest, DavError> {
    let url = ctx.resolve(path, AbsoluteUrlPolicy::PassThrough, "path")?;
    Ok(HttpRequest::new(HttpMethod::Get, url))
}

pub fn upload_file(
    ctx: &DavContext,
    path: &str,
    content: Vec<u8>,
    content_type: &str,
    mode: &WriteMode,
) -> Result<HttpRequest, DavError> {
    let url = ctx.resolve(path, AbsoluteUrlPolicy::PassThrough, "path")?;
    Ok(put_request(url, content_type, content, mode))
}

pub fn create_directory(ctx: &DavContext, path: &str) -> Result<HttpRequest, DavError> {
    let url = ctx.resolve(path, AbsoluteUrlPolicy::PassThrough, "path")?;
    Ok(HttpRequest::new(HttpMethod::Mkcol, url))
}

pub fn delete_file(ctx: &DavContext, path: &str) -> Result<HttpRequest, DavError> {
    let url = ctx.resolve(path, AbsoluteUrlPolicy::PassThrough, "path")?;
    Ok(HttpRequest::new(HttpMethod::Delete, url))
}

/// MOVE or COPY with a same-origin `Destination`.
pub fn transfer(
    ctx: &DavContext,
    method: HttpMethod,
    source_path: &str,
    destination_path: &str,
    overwrite: bool,
) -> Result<HttpRequest, DavError> {
    if !matches!(method, HttpMethod::Move | HttpMethod::Copy) {
        return Err(DavError::UnsupportedOperation(format!(
            "{} is not a transfer method",
            method.as_str()
        )));
    }
    let destination = destination_url(ctx, destination_path)?;
    let url = ctx.resolve(source_path, AbsoluteUrlPolicy::PassThrough, "path")?;
    Ok(HttpRequest::new(method, url)
        .with_header("Destination", destination)
        .with_header("Overwrite", if overwrite { "T" } else { "F" }))
}

/// Absolute destination URL. Absolute input must share the base origin.
pub fn destination_url(ctx: &DavContext, destination: &str) -> Result<String, DavError> {
    if path::is_absolute_url(destination) {
        if !ctx.same_origin(destination) {
            return Err(DavError::CrossOrigin {
                destination: destination.to_string(),
                expected: ctx.origin(),
            });
        }
        return Ok(destination.to_string());
    }
    Ok(format!("{}{}", ctx.base_root(), path::normalize_path(destination)))
}

fn child_url(
    ctx: &DavContext,
    parent: &str,
    parent_field: &str,
    id: &str,
    id_field: &str,
    extension: &str,
) -> Result<String, DavError> {
    if id.trim().is_empty() {
        return Err(DavError::invalid_parameter(id_field, "must not be empty"));
    }
    if path::is_absolute_url(parent) {
        return Err(DavError::InvalidPath {
            field: parent_field.to_string(),
            path: parent.to_string(),
        });
    }
    if path::is_absolute_url(id) {
        return Err(DavError::InvalidPath {
            field: id_field.to_string(),
            path: id.to_string(),
        });
    }
    let joined = path::join_child(parent, id, extension);
    ctx.resolve(&joined, AbsoluteUrlPolicy::Reject, parent_field)
}

fn xml_request(method: HttpMethod, url: String, depth: Depth, body: String) -> HttpRequest {
    HttpRequest::new(method, url)
        .with_header("Content-Type", XML_CONTENT_TYPE)
        .with_header("Depth", depth.as_str())
        .with_body(body)
}

fn put_request(url: String, content_type: &str, body: Vec<u8>, mode: &WriteMode) -> HttpRequest {
    let request = HttpRequest::new(HttpMethod::Put, url)
        .with_header("Content-Type", content_type)
        .with_body(body);
    match mode {
        WriteMode::Create => request,
        WriteMode::Update { etag: Some(etag) } => request.with_header("If-Match", etag.clone()),
        WriteMode::Update { etag: None } => request.with_header("If-Match", "*"),
    }
}

fn delete_request(url: String, etag: Option<&str>) -> HttpRequest {
    let request = HttpRequest::new(HttpMethod::Delete, url);
    match etag {
        Some(etag) => request.with_header("If-Match", etag),
        None => request,
    }
}
