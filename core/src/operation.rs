//! Operation catalogue and dispatcher.
//!
//! # Design
//! Each resource family (files, calendars, address books) has its own
//! operation enum, deserialized from the host's JSON parameters with
//! `resource` and `operation` as tags. `dispatch` runs one operation for one
//! work item: compose the request, send it through the injected transport,
//! check the status, then extract or format the result. Every fault except
//! an unsupported operation leaves here already translated into a
//! user-facing message; deciding whether to continue is the batch runner's
//! job.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::binary::{self, BinaryData, BinaryRef};
use crate::compose::{self, Depth, EventFilter, WriteMode};
use crate::context::DavContext;
use crate::error::DavError;
use crate::extract::{self, ExtractKind, ParsedResource};
use crate::http::{check_status, HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use crate::path;
use crate::translate;
use crate::xml::ContactFilter;

/// One input record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    #[serde(default)]
    pub json: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<BTreeMap<String, BinaryRef>>,
}

/// A work item together with the raw parameters of the operation to run on it.
///
/// Parameters stay as JSON until dispatch so that a malformed parameter set
/// fails only its own item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub operation: Value,
    #[serde(default)]
    pub item: WorkItem,
}

impl Task {
    pub fn new(operation: &Operation, item: WorkItem) -> Self {
        Self {
            operation: serde_json::to_value(operation).unwrap_or(Value::Null),
            item,
        }
    }
}

fn default_binary_property() -> String {
    "data".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "camelCase")]
pub enum FileOperation {
    #[serde(rename_all = "camelCase")]
    Download {
        path: String,
        #[serde(default = "default_binary_property")]
        binary_property_name: String,
    },
    #[serde(rename_all = "camelCase")]
    Upload {
        path: String,
        #[serde(default)]
        binary_data: bool,
        #[serde(default = "default_binary_property")]
        binary_property_name: String,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        content_type: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    GetProperties {
        path: String,
        #[serde(default)]
        depth: Depth,
    },
    CreateDirectory { path: String },
    Delete { path: String },
    #[serde(rename_all = "camelCase")]
    Move {
        path: String,
        destination_path: String,
        #[serde(default)]
        overwrite: bool,
    },
    #[serde(rename_all = "camelCase")]
    Copy {
        path: String,
        destination_path: String,
        #[serde(default)]
        overwrite: bool,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventQuery {
    #[default]
    All,
    Range,
    Date,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "camelCase")]
pub enum CalendarOperation {
    #[serde(rename_all = "camelCase")]
    GetCalendars {
        #[serde(default)]
        calendar_home_path: String,
    },
    #[serde(rename_all = "camelCase")]
    GetEvents {
        calendar_path: String,
        #[serde(default)]
        filter: EventQuery,
        #[serde(default)]
        start: Option<String>,
        #[serde(default)]
        end: Option<String>,
        #[serde(default)]
        date: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    CreateEvent {
        calendar_path: String,
        #[serde(default)]
        event_id: Option<String>,
        ical_data: String,
    },
    #[serde(rename_all = "camelCase")]
    UpdateEvent {
        calendar_path: String,
        event_id: String,
        ical_data: String,
        #[serde(default)]
        etag: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    DeleteEvent {
        calendar_path: String,
        event_id: String,
        #[serde(default)]
        etag: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContactSearch {
    #[default]
    All,
    Name,
    Email,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "camelCase")]
pub enum AddressBookOperation {
    #[serde(rename_all = "camelCase")]
    GetAddressBooks {
        #[serde(default)]
        address_book_home_path: String,
    },
    #[serde(rename_all = "camelCase")]
    GetContacts {
        address_book_path: String,
        #[serde(default)]
        search_by: ContactSearch,
        #[serde(default)]
        search_term: String,
    },
    #[serde(rename_all = "camelCase")]
    CreateContact {
        address_book_path: String,
        #[serde(default)]
        contact_id: Option<String>,
        vcard_data: String,
    },
    #[serde(rename_all = "camelCase")]
    UpdateContact {
        address_book_path: String,
        contact_id: String,
        vcard_data: String,
        #[serde(default)]
        etag: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    DeleteContact {
        address_book_path: String,
        contact_id: String,
        #[serde(default)]
        etag: Option<String>,
    },
}

/// Every operation the host can select.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "resource", rename_all = "camelCase")]
pub enum Operation {
    File(FileOperation),
    Calendar(CalendarOperation),
    AddressBook(AddressBookOperation),
}

const SUPPORTED: &[(&str, &[&str])] = &[
    (
        "file",
        &["download", "upload", "getProperties", "createDirectory", "delete", "move", "copy"],
    ),
    (
        "calendar",
        &["getCalendars", "getEvents", "createEvent", "updateEvent", "deleteEvent"],
    ),
    (
        "addressBook",
        &["getAddressBooks", "getContacts", "createContact", "updateContact", "deleteContact"],
    ),
];

impl Operation {
    /// Parse host parameters. Unknown resource/operation pairs are
    /// `UnsupportedOperation`; bad parameters are `InvalidParameter`.
    pub fn parse(value: &Value) -> Result<Self, DavError> {
        let resource = value.get("resource").and_then(Value::as_str).unwrap_or_default();
        let operation = value.get("operation").and_then(Value::as_str).unwrap_or_default();
        let known = SUPPORTED
            .iter()
            .any(|(r, ops)| *r == resource && ops.contains(&operation));
        if !known {
            return Err(DavError::UnsupportedOperation(format!("{resource}:{operation}")));
        }
        serde_json::from_value(value.clone())
            .map_err(|e| DavError::invalid_parameter("operation", e.to_string()))
    }

    /// Human-readable operation and resource labels for error messages.
    pub fn labels(&self) -> (&'static str, &'static str) {
        match self {
            Operation::File(op) => (
                match op {
                    FileOperation::Download { .. } => "Download",
                    FileOperation::Upload { .. } => "Upload",
                    FileOperation::GetProperties { .. } => "Get Properties",
                    FileOperation::CreateDirectory { .. } => "Create Directory",
                    FileOperation::Delete { .. } => "Delete",
                    FileOperation::Move { .. } => "Move",
                    FileOperation::Copy { .. } => "Copy",
                },
                "file",
            ),
            Operation::Calendar(op) => (
                match op {
                    CalendarOperation::GetCalendars { .. } => "Get Calendars",
                    CalendarOperation::GetEvents { .. } => "Get Events",
                    CalendarOperation::CreateEvent { .. } => "Create Event",
                    CalendarOperation::UpdateEvent { .. } => "Update Event",
                    CalendarOperation::DeleteEvent { .. } => "Delete Event",
                },
                "calendar",
            ),
            Operation::AddressBook(op) => (
                match op {
                    AddressBookOperation::GetAddressBooks { .. } => "Get Address Books",
                    AddressBookOperation::GetContacts { .. } => "Get Contacts",
                    AddressBookOperation::CreateContact { .. } => "Create Contact",
                    AddressBookOperation::UpdateContact { .. } => "Update Contact",
                    AddressBookOperation::DeleteContact { .. } => "Delete Contact",
                },
                "address book",
            ),
        }
    }

    /// The path the operation targets, before any validation.
    fn target_path(&self) -> &str {
        match self {
            Operation::File(op) => match op {
                FileOperation::Download { path, .. }
                | FileOperation::Upload { path, .. }
                | FileOperation::GetProperties { path, .. }
                | FileOperation::CreateDirectory { path }
                | FileOperation::Delete { path }
                | FileOperation::Move { path, .. }
                | FileOperation::Copy { path, .. } => path,
            },
            Operation::Calendar(op) => match op {
                CalendarOperation::GetCalendars { calendar_home_path } => calendar_home_path,
                CalendarOperation::GetEvents { calendar_path, .. }
                | CalendarOperation::CreateEvent { calendar_path, .. }
                | CalendarOperation::UpdateEvent { calendar_path, .. }
                | CalendarOperation::DeleteEvent { calendar_path, .. } => calendar_path,
            },
            Operation::AddressBook(op) => match op {
                AddressBookOperation::GetAddressBooks {
                    address_book_home_path,
                } => address_book_home_path,
                AddressBookOperation::GetContacts {
                    address_book_path, ..
                }
                | AddressBookOperation::CreateContact {
                    address_book_path, ..
                }
                | AddressBookOperation::UpdateContact {
                    address_book_path, ..
                }
                | AddressBookOperation::DeleteContact {
                    address_book_path, ..
                } => address_book_path,
            },
        }
    }
}

/// A composed request plus output fields already known before sending it.
#[derive(Debug, Clone, PartialEq)]
pub struct Prepared {
    pub request: HttpRequest,
    pub fields: Map<String, Value>,
}

impl Prepared {
    fn new(request: HttpRequest) -> Self {
        Self {
            request,
            fields: Map::new(),
        }
    }

    fn with_field(mut self, name: &str, value: Value) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }
}

/// What a successful operation adds to its work item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub fields: Map<String, Value>,
    pub binary: Vec<(String, BinaryRef)>,
}

impl Outcome {
    fn fields(value: Value) -> Self {
        match value {
            Value::Object(fields) => Self {
                fields,
                binary: Vec::new(),
            },
            _ => Self::default(),
        }
    }
}

/// Run `operation` for the item at `index`.
pub fn dispatch(
    ctx: &DavContext,
    transport: &dyn HttpTransport,
    binary: &dyn BinaryData,
    index: usize,
    item: &WorkItem,
    operation: &Operation,
) -> Result<Outcome, DavError> {
    let (operation_label, resource_label) = operation.labels();
    let mut attempted_url = best_effort_url(ctx, operation.target_path());

    let result = prepare(ctx, binary, index, item, operation).and_then(|prepared| {
        attempted_url.clone_from(&prepared.request.url);
        let response = execute(transport, &prepared.request)?;
        interpret(operation, binary, prepared, response)
    });

    result.map_err(|e| {
        if e.is_fatal() {
            e
        } else {
            translate::translated(e, &attempted_url, operation_label, resource_label)
        }
    })
}

/// Parse raw task parameters and dispatch them.
///
/// Parameter faults get the same context suffix as request failures, built
/// from the raw `resource`/`operation` names and whatever path is present.
pub fn dispatch_raw(
    ctx: &DavContext,
    transport: &dyn HttpTransport,
    binary: &dyn BinaryData,
    index: usize,
    item: &WorkItem,
    raw: &Value,
) -> Result<Outcome, DavError> {
    match Operation::parse(raw) {
        Ok(operation) => dispatch(ctx, transport, binary, index, item, &operation),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            let field = |name: &str| raw.get(name).and_then(Value::as_str).unwrap_or_default();
            let operation_label = words(field("operation"), true);
            let resource_label = words(field("resource"), false);
            let target = RAW_PATH_FIELDS
                .iter()
                .map(|name| field(name))
                .find(|p| !p.is_empty())
                .unwrap_or("/");
            let url = best_effort_url(ctx, target);
            Err(translate::translated(e, &url, &operation_label, &resource_label))
        }
    }
}

const RAW_PATH_FIELDS: &[&str] = &[
    "path",
    "calendarPath",
    "addressBookPath",
    "calendarHomePath",
    "addressBookHomePath",
];

/// `deleteContact` -> `Delete Contact` (titled) or `delete contact`.
fn words(camel: &str, titled: bool) -> String {
    let mut out = String::with_capacity(camel.len() + 4);
    for (i, c) in camel.chars().enumerate() {
        if c.is_ascii_uppercase() && i > 0 {
            out.push(' ');
        }
        if i == 0 && titled {
            out.push(c.to_ascii_uppercase());
        } else if c.is_ascii_uppercase() && !titled {
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Compose the request for `operation` without sending it.
pub fn prepare(
    ctx: &DavContext,
    binary: &dyn BinaryData,
    index: usize,
    item: &WorkItem,
    operation: &Operation,
) -> Result<Prepared, DavError> {
    match operation {
        Operation::File(op) => prepare_file(ctx, binary, index, item, op),
        Operation::Calendar(op) => prepare_calendar(ctx, op),
        Operation::AddressBook(op) => prepare_address_book(ctx, op),
    }
}

fn prepare_file(
    ctx: &DavContext,
    binary: &dyn BinaryData,
    index: usize,
    item: &WorkItem,
    op: &FileOperation,
) -> Result<Prepared, DavError> {
    let request = match op {
        FileOperation::Download { path, .. } => compose::download_file(ctx, path)?,
        FileOperation::Upload {
            path,
            binary_data,
            binary_property_name,
            content,
            content_type,
        } => {
            let (body, detected_type) = if *binary_data {
                let bytes = binary.read_input(index, item, binary_property_name)?;
                let mime = item
                    .binary
                    .as_ref()
                    .and_then(|b| b.get(binary_property_name))
                    .map(|b| b.mime_type.clone())
                    .filter(|m| !m.is_empty());
                (bytes, mime)
            } else {
                let text = content
                    .as_ref()
                    .ok_or_else(|| DavError::invalid_parameter("content", "no text content to upload"))?;
                (text.as_bytes().to_vec(), Some("text/plain".to_string()))
            };
            let mime_type = content_type
                .clone()
                .filter(|m| !m.is_empty())
                .or(detected_type)
                .unwrap_or_else(|| binary::guess_mime_type(path));
            compose::upload_file(ctx, path, body, &mime_type, &WriteMode::Create)?
        }
        FileOperation::GetProperties { path, depth } => compose::get_properties(ctx, path, *depth)?,
        FileOperation::CreateDirectory { path } => compose::create_directory(ctx, path)?,
        FileOperation::Delete { path } => compose::delete_file(ctx, path)?,
        FileOperation::Move {
            path,
            destination_path,
            overwrite,
        } => compose::transfer(ctx, HttpMethod::Move, path, destination_path, *overwrite)?,
        FileOperation::Copy {
            path,
            destination_path,
            overwrite,
        } => compose::transfer(ctx, HttpMethod::Copy, path, destination_path, *overwrite)?,
    };
    Ok(Prepared::new(request))
}

fn prepare_calendar(ctx: &DavContext, op: &CalendarOperation) -> Result<Prepared, DavError> {
    match op {
        CalendarOperation::GetCalendars { calendar_home_path } => {
            Ok(Prepared::new(compose::get_calendars(ctx, calendar_home_path)?))
        }
        CalendarOperation::GetEvents {
            calendar_path,
            filter,
            start,
            end,
            date,
        } => {
            let filter = event_filter(*filter, start, end, date)?;
            Ok(Prepared::new(compose::get_events(ctx, calendar_path, &filter)?))
        }
        CalendarOperation::CreateEvent {
            calendar_path,
            event_id,
            ical_data,
        } => {
            let event_id = id_or_generated(event_id);
            let request =
                compose::put_event(ctx, calendar_path, &event_id, ical_data, &WriteMode::Create)?;
            Ok(Prepared::new(request).with_field("eventId", Value::String(event_id)))
        }
        CalendarOperation::UpdateEvent {
            calendar_path,
            event_id,
            ical_data,
            etag,
        } => {
            let mode = WriteMode::Update { etag: etag.clone() };
            Ok(Prepared::new(compose::put_event(ctx, calendar_path, event_id, ical_data, &mode)?))
        }
        CalendarOperation::DeleteEvent {
            calendar_path,
            event_id,
            etag,
        } => Ok(Prepared::new(compose::delete_event(
            ctx,
            calendar_path,
            event_id,
            etag.as_deref(),
        )?)),
    }
}

fn prepare_address_book(ctx: &DavContext, op: &AddressBookOperation) -> Result<Prepared, DavError> {
    match op {
        AddressBookOperation::GetAddressBooks {
            address_book_home_path,
        } => Ok(Prepared::new(compose::get_address_books(ctx, address_book_home_path)?)),
        AddressBookOperation::GetContacts {
            address_book_path,
            search_by,
            search_term,
        } => {
            let filter = match search_by {
                ContactSearch::All => ContactFilter::All,
                ContactSearch::Name => ContactFilter::Name(search_term.clone()),
                ContactSearch::Email => ContactFilter::Email(search_term.clone()),
            };
            Ok(Prepared::new(compose::get_contacts(ctx, address_book_path, &filter)?))
        }
        AddressBookOperation::CreateContact {
            address_book_path,
            contact_id,
            vcard_data,
        } => {
            let contact_id = id_or_generated(contact_id);
            let request = compose::put_contact(
                ctx,
                address_book_path,
                &contact_id,
                vcard_data,
                &WriteMode::Create,
            )?;
            Ok(Prepared::new(request).with_field("contactId", Value::String(contact_id)))
        }
        AddressBookOperation::UpdateContact {
            address_book_path,
            contact_id,
            vcard_data,
            etag,
        } => {
            let mode = WriteMode::Update { etag: etag.clone() };
            Ok(Prepared::new(compose::put_contact(
                ctx,
                address_book_path,
                contact_id,
                vcard_data,
                &mode,
            )?))
        }
        AddressBookOperation::DeleteContact {
            address_book_path,
            contact_id,
            etag,
        } => Ok(Prepared::new(compose::delete_contact(
            ctx,
            address_book_path,
            contact_id,
            etag.as_deref(),
        )?)),
    }
}

/// Turn a successful response into the item's new fields.
fn interpret(
    operation: &Operation,
    binary: &dyn BinaryData,
    prepared: Prepared,
    response: HttpResponse,
) -> Result<Outcome, DavError> {
    let Prepared { request, fields } = prepared;
    let mut outcome = match operation {
        Operation::File(FileOperation::Download {
            path,
            binary_property_name,
        }) => downloaded(binary, path, binary_property_name, response)?,
        Operation::File(FileOperation::GetProperties { .. }) => {
            listed("resources", &response, ExtractKind::Resource)?
        }
        Operation::Calendar(CalendarOperation::GetCalendars { .. }) => {
            listed("calendars", &response, ExtractKind::Calendar)?
        }
        Operation::Calendar(CalendarOperation::GetEvents { .. }) => {
            listed("events", &response, ExtractKind::Event)?
        }
        Operation::AddressBook(AddressBookOperation::GetAddressBooks { .. }) => {
            listed("addressBooks", &response, ExtractKind::AddressBook)?
        }
        Operation::AddressBook(AddressBookOperation::GetContacts { .. }) => {
            listed("contacts", &response, ExtractKind::Contact)?
        }
        Operation::File(FileOperation::CreateDirectory { .. }) => {
            Outcome::fields(json!({ "success": true, "url": request.url }))
        }
        Operation::File(FileOperation::Move { .. } | FileOperation::Copy { .. }) => {
            Outcome::fields(json!({
                "success": true,
                "source": request.url,
                "destination": request.header("Destination"),
            }))
        }
        Operation::File(FileOperation::Delete { .. })
        | Operation::Calendar(CalendarOperation::DeleteEvent { .. })
        | Operation::AddressBook(AddressBookOperation::DeleteContact { .. }) => {
            Outcome::fields(json!({ "success": true, "deleted": request.url }))
        }
        Operation::File(FileOperation::Upload { .. })
        | Operation::Calendar(
            CalendarOperation::CreateEvent { .. } | CalendarOperation::UpdateEvent { .. },
        )
        | Operation::AddressBook(
            AddressBookOperation::CreateContact { .. } | AddressBookOperation::UpdateContact { .. },
        ) => Outcome::fields(json!({
            "success": true,
            "url": request.url,
            "etag": response.header("ETag"),
        })),
    };
    outcome.fields.extend(fields);
    Ok(outcome)
}

fn downloaded(
    binary: &dyn BinaryData,
    path: &str,
    property: &str,
    response: HttpResponse,
) -> Result<Outcome, DavError> {
    if response.status == 207 {
        return Err(DavError::UnexpectedContentType {
            expected: "file content".to_string(),
            actual: "a multi-status listing (the path is a collection)".to_string(),
        });
    }
    let file_name = path::file_name(path);
    let mime_type = response
        .header("Content-Type")
        .map(|ct| binary::essence(ct).to_string())
        .filter(|ct| !ct.is_empty())
        .unwrap_or_else(|| binary::guess_mime_type(file_name.as_deref().unwrap_or_default()));
    let size = response.body.len();
    let attachment = binary.wrap_output(response.body, file_name.clone(), &mime_type)?;
    let mut outcome = Outcome::fields(json!({
        "fileName": file_name,
        "mimeType": mime_type,
        "size": size,
    }));
    outcome.binary.push((property.to_string(), attachment));
    Ok(outcome)
}

fn id_or_generated(id: &Option<String>) -> String {
    id.clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn event_filter(
    filter: EventQuery,
    start: &Option<String>,
    end: &Option<String>,
    date: &Option<String>,
) -> Result<EventFilter, DavError> {
    let required = |name: &str, value: &Option<String>| {
        value
            .clone()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| DavError::invalid_parameter(name, "is required for this filter"))
    };
    Ok(match filter {
        EventQuery::All => EventFilter::All,
        EventQuery::Range => EventFilter::Range {
            start: required("start", start)?,
            end: required("end", end)?,
        },
        EventQuery::Date => EventFilter::Date {
            date: required("date", date)?,
        },
    })
}

/// Send `request` and fail on a non-success status.
fn execute(transport: &dyn HttpTransport, request: &HttpRequest) -> Result<HttpResponse, DavError> {
    debug!(method = request.method.as_str(), url = %request.url, "sending request");
    let response = transport.send(request)?;
    debug!(status = response.status, bytes = response.body.len(), "received response");
    check_status(&response)?;
    Ok(response)
}

/// Extract a multi-status listing into `field`, refusing non-XML payloads.
fn listed(field: &str, response: &HttpResponse, kind: ExtractKind) -> Result<Outcome, DavError> {
    if let Some(content_type) = response.header("Content-Type") {
        let essence = binary::essence(content_type);
        if !essence.is_empty() && !essence.to_ascii_lowercase().contains("xml") {
            return Err(DavError::UnexpectedContentType {
                expected: "application/xml".to_string(),
                actual: essence.to_string(),
            });
        }
    }
    let records: Vec<ParsedResource> = extract::extract(&response.text(), kind);
    let mut fields = Map::new();
    fields.insert(field.to_string(), json!(records));
    Ok(Outcome {
        fields,
        binary: Vec::new(),
    })
}

fn best_effort_url(ctx: &DavContext, raw: &str) -> String {
    if path::is_absolute_url(raw) {
        raw.to_string()
    } else {
        format!("{}{}", ctx.base_root(), path::normalize_path(raw))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::binary::InlineBinary;
    use crate::config::Credential;
    use crate::error::{TransportError, TransportErrorKind};

    const BASE: &str = "https://dav.example.com";

    /// Replays canned responses and records every request.
    struct Scripted {
        responses: RefCell<Vec<Result<HttpResponse, TransportError>>>,
        seen: RefCell<Vec<HttpRequest>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<HttpResponse, TransportError>>) -> Self {
            Self {
                responses: RefCell::new(responses),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl HttpTransport for Scripted {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.seen.borrow_mut().push(request.clone());
            self.responses.borrow_mut().remove(0)
        }
    }

    fn ctx() -> DavContext {
        DavContext::new(Credential::new(BASE, "alice", "secret")).unwrap()
    }

    fn op(value: Value) -> Operation {
        Operation::parse(&value).unwrap()
    }

    #[test]
    fn parse_accepts_nested_tags() {
        let parsed = op(json!({
            "resource": "calendar",
            "operation": "createEvent",
            "calendarPath": "/cal/",
            "eventId": "evt-1",
            "icalData": "BEGIN:VCALENDAR",
        }));
        assert_eq!(
            parsed,
            Operation::Calendar(CalendarOperation::CreateEvent {
                calendar_path: "/cal/".to_string(),
                event_id: Some("evt-1".to_string()),
                ical_data: "BEGIN:VCALENDAR".to_string(),
            })
        );

        let parsed = op(json!({"resource": "file", "operation": "getProperties", "path": "/", "depth": "infinity"}));
        assert_eq!(
            parsed,
            Operation::File(FileOperation::GetProperties {
                path: "/".to_string(),
                depth: Depth::Infinity
            })
        );
    }

    #[test]
    fn parse_distinguishes_unsupported_from_invalid() {
        let err = Operation::parse(&json!({"resource": "calendar", "operation": "share"})).unwrap_err();
        assert!(matches!(err, DavError::UnsupportedOperation(ref name) if name == "calendar:share"));

        let err = Operation::parse(&json!({"resource": "file", "operation": "delete"})).unwrap_err();
        assert!(matches!(err, DavError::InvalidParameter { .. }));
    }

    #[test]
    fn task_round_trips_operation() {
        let operation = Operation::File(FileOperation::Delete { path: "/x".to_string() });
        let task = Task::new(&operation, WorkItem::default());
        assert_eq!(task.operation["resource"], "file");
        assert_eq!(task.operation["operation"], "delete");
        assert_eq!(Operation::parse(&task.operation).unwrap(), operation);
    }

    #[test]
    fn create_event_reports_url_and_etag() {
        let transport = Scripted::new(vec![Ok(HttpResponse::new(201, "").with_header("ETag", "\"v1\""))]);
        let operation = op(json!({
            "resource": "calendar",
            "operation": "createEvent",
            "calendarPath": "/cal/",
            "eventId": "evt-1",
            "icalData": "BEGIN:VCALENDAR",
        }));
        let outcome = dispatch(&ctx(), &transport, &InlineBinary, 0, &WorkItem::default(), &operation).unwrap();
        assert_eq!(outcome.fields["url"], format!("{BASE}/cal/evt-1.ics"));
        assert_eq!(outcome.fields["etag"], "\"v1\"");
        assert_eq!(outcome.fields["eventId"], "evt-1");

        let seen = transport.seen.borrow();
        assert_eq!(seen[0].method, HttpMethod::Put);
        assert_eq!(seen[0].header("Content-Type"), Some("text/calendar"));
    }

    #[test]
    fn create_event_without_id_generates_one() {
        let transport = Scripted::new(vec![Ok(HttpResponse::new(201, ""))]);
        let operation = op(json!({
            "resource": "calendar",
            "operation": "createEvent",
            "calendarPath": "/cal",
            "icalData": "x",
        }));
        let outcome = dispatch(&ctx(), &transport, &InlineBinary, 0, &WorkItem::default(), &operation).unwrap();
        let id = outcome.fields["eventId"].as_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
        assert_eq!(outcome.fields["url"], format!("{BASE}/cal/{id}.ics"));
    }

    #[test]
    fn get_events_extracts_records() {
        let body = r#"<D:multistatus xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
<D:response><D:href>/cal/a.ics</D:href><D:getetag>"1"</D:getetag><C:calendar-data>BEGIN:VCALENDAR</C:calendar-data></D:response>
</D:multistatus>"#;
        let transport = Scripted::new(vec![Ok(
            HttpResponse::new(207, body).with_header("Content-Type", "application/xml; charset=utf-8")
        )]);
        let operation = op(json!({
            "resource": "calendar",
            "operation": "getEvents",
            "calendarPath": "/cal/",
            "filter": "date",
            "date": "2024-05-01",
        }));
        let outcome = dispatch(&ctx(), &transport, &InlineBinary, 0, &WorkItem::default(), &operation).unwrap();
        let events = outcome.fields["events"].as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["href"], "/cal/a.ics");
        assert_eq!(events[0]["data"], "BEGIN:VCALENDAR");

        let seen = transport.seen.borrow();
        assert_eq!(seen[0].method, HttpMethod::Report);
        assert!(seen[0].body_text().unwrap().contains(r#"start="20240501T000000Z""#));
    }

    #[test]
    fn get_events_requires_filter_dates() {
        let transport = Scripted::new(vec![]);
        let operation = op(json!({
            "resource": "calendar",
            "operation": "getEvents",
            "calendarPath": "/cal/",
            "filter": "range",
            "start": "2024-05-01",
        }));
        let err = dispatch(&ctx(), &transport, &InlineBinary, 0, &WorkItem::default(), &operation).unwrap_err();
        assert!(matches!(err.root(), DavError::InvalidParameter { name, .. } if name == "end"));
        assert!(transport.seen.borrow().is_empty());
    }

    #[test]
    fn listing_rejects_non_xml() {
        let transport = Scripted::new(vec![Ok(
            HttpResponse::new(200, "<html/>").with_header("Content-Type", "text/html")
        )]);
        let operation = op(json!({"resource": "addressBook", "operation": "getAddressBooks"}));
        let err = dispatch(&ctx(), &transport, &InlineBinary, 0, &WorkItem::default(), &operation).unwrap_err();
        assert!(matches!(err.root(), DavError::UnexpectedContentType { .. }));
    }

    #[test]
    fn failures_are_translated_with_context() {
        let transport = Scripted::new(vec![Err(TransportError::new(
            TransportErrorKind::HostNotFound,
            "dns",
        ))]);
        let operation = op(json!({
            "resource": "addressBook",
            "operation": "deleteContact",
            "addressBookPath": "/books/",
            "contactId": "john",
        }));
        let err = dispatch(&ctx(), &transport, &InlineBinary, 0, &WorkItem::default(), &operation).unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("Host not found"), "{message}");
        assert!(message.contains("operation: Delete Contact"));
        assert!(message.contains("resource: address book"));
        assert!(message.contains(&format!("URL: {BASE}/books/john.vcf")));
    }

    #[test]
    fn cross_origin_move_fails_before_sending() {
        let transport = Scripted::new(vec![]);
        let operation = op(json!({
            "resource": "file",
            "operation": "move",
            "path": "/a.txt",
            "destinationPath": "https://evil.example/a.txt",
        }));
        let err = dispatch(&ctx(), &transport, &InlineBinary, 0, &WorkItem::default(), &operation).unwrap_err();
        assert!(matches!(err.root(), DavError::CrossOrigin { .. }));
        assert!(transport.seen.borrow().is_empty());
    }

    #[test]
    fn download_attaches_binary() {
        let transport = Scripted::new(vec![Ok(
            HttpResponse::new(200, b"%PDF".to_vec()).with_header("Content-Type", "application/pdf")
        )]);
        let operation = op(json!({
            "resource": "file",
            "operation": "download",
            "path": "/Files/report 1.pdf",
            "binaryPropertyName": "file",
        }));
        let outcome = dispatch(&ctx(), &transport, &InlineBinary, 0, &WorkItem::default(), &operation).unwrap();
        assert_eq!(outcome.fields["fileName"], "report 1.pdf");
        assert_eq!(outcome.fields["mimeType"], "application/pdf");
        assert_eq!(outcome.fields["size"], 4);
        assert_eq!(outcome.binary[0].0, "file");
        assert_eq!(outcome.binary[0].1.data, "JVBERg==");
        assert_eq!(transport.seen.borrow()[0].url, format!("{BASE}/Files/report%201.pdf"));
    }

    #[test]
    fn download_of_collection_is_rejected() {
        let transport = Scripted::new(vec![Ok(HttpResponse::new(207, "<D:multistatus/>"))]);
        let operation = op(json!({"resource": "file", "operation": "download", "path": "/Files/"}));
        let err = dispatch(&ctx(), &transport, &InlineBinary, 0, &WorkItem::default(), &operation).unwrap_err();
        assert!(matches!(err.root(), DavError::UnexpectedContentType { .. }));
    }

    #[test]
    fn upload_reads_binary_property() {
        let mut binary = BTreeMap::new();
        binary.insert(
            "data".to_string(),
            BinaryRef {
                data: "aGk=".to_string(),
                mime_type: "image/png".to_string(),
                ..BinaryRef::default()
            },
        );
        let item = WorkItem {
            json: Map::new(),
            binary: Some(binary),
        };
        let transport = Scripted::new(vec![Ok(HttpResponse::new(201, ""))]);
        let operation = op(json!({
            "resource": "file",
            "operation": "upload",
            "path": "/img.png",
            "binaryData": true,
        }));
        dispatch(&ctx(), &transport, &InlineBinary, 0, &item, &operation).unwrap();
        let seen = transport.seen.borrow();
        assert_eq!(seen[0].body.as_deref(), Some(&b"hi"[..]));
        assert_eq!(seen[0].header("Content-Type"), Some("image/png"));
    }

    #[test]
    fn upload_without_binary_is_missing_input() {
        let transport = Scripted::new(vec![]);
        let operation = op(json!({
            "resource": "file",
            "operation": "upload",
            "path": "/img.png",
            "binaryData": true,
        }));
        let err = dispatch(&ctx(), &transport, &InlineBinary, 0, &WorkItem::default(), &operation).unwrap_err();
        assert!(matches!(err.root(), DavError::MissingBinaryInput { .. }));
    }

    #[test]
    fn http_errors_carry_status() {
        let transport = Scripted::new(vec![Ok(HttpResponse::new(412, ""))]);
        let operation = op(json!({
            "resource": "calendar",
            "operation": "updateEvent",
            "calendarPath": "/cal/",
            "eventId": "evt-1",
            "icalData": "x",
            "etag": "\"old\"",
        }));
        let err = dispatch(&ctx(), &transport, &InlineBinary, 0, &WorkItem::default(), &operation).unwrap_err();
        assert!(err.to_string().starts_with("HTTP 412 Precondition Failed"));
        assert_eq!(transport.seen.borrow()[0].header("If-Match"), Some("\"old\""));
    }

    #[test]
    fn prepare_composes_without_sending() {
        let operation = op(json!({
            "resource": "addressBook",
            "operation": "getContacts",
            "addressBookPath": "/books/work/",
            "searchBy": "email",
            "searchTerm": "a&b@example.com",
        }));
        let prepared = prepare(&ctx(), &InlineBinary, 0, &WorkItem::default(), &operation).unwrap();
        assert_eq!(prepared.request.method, HttpMethod::Report);
        assert_eq!(prepared.request.url, format!("{BASE}/books/work/"));
        let body = prepared.request.body_text().unwrap();
        assert!(body.contains(r#"<C:prop-filter name="EMAIL">"#), "{body}");
        assert!(body.contains("a&amp;b@example.com"));
        assert!(prepared.fields.is_empty());
    }
    #[test]
    fn parameter_faults_carry_context() {
        let transport = Scripted::new(vec![]);
        let raw = json!({"resource": "addressBook", "operation": "deleteContact", "addressBookPath": "/books/work/"});
        let err = dispatch_raw(&ctx(), &transport, &InlineBinary, 0, &WorkItem::default(), &raw).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("missing field `contactId`"), "{message}");
        assert!(
            message.ends_with(&format!(
                "(operation: Delete Contact, resource: address book, URL: {BASE}/books/work/)"
            )),
            "{message}"
        );
        assert!(matches!(err.root(), DavError::InvalidParameter { .. }));
        assert!(transport.seen.borrow().is_empty());
    }

    #[test]
    fn raw_unsupported_operation_stays_untranslated() {
        let transport = Scripted::new(vec![]);
        let raw = json!({"resource": "file", "operation": "lock", "path": "/a"});
        let err = dispatch_raw(&ctx(), &transport, &InlineBinary, 0, &WorkItem::default(), &raw).unwrap_err();
        assert!(matches!(err, DavError::UnsupportedOperation(_)));
    }

    #[test]
    fn camel_case_labels() {
        assert_eq!(words("getProperties", true), "Get Properties");
        assert_eq!(words("addressBook", false), "address book");
        assert_eq!(words("", true), "");
    }
}
