//! Minimal in-memory WebDAV/CalDAV/CardDAV server for tests.
//!
//! Every request goes through one fallback handler that dispatches on the
//! method, since the DAV extension methods have no axum routing helpers.
//! Multi-status bodies use the literal `D:` and `C:` prefixes.

pub mod store;

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE, ETAG, WWW_AUTHENTICATE},
        HeaderMap, Method, StatusCode, Uri,
    },
    response::{IntoResponse, Response},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};

pub use store::{CollectionKind, Node, Store, StoreError};

const CALDAV_NS: &str = "urn:ietf:params:xml:ns:caldav";
const CARDDAV_NS: &str = "urn:ietf:params:xml:ns:carddav";
const LAST_MODIFIED: &str = "Mon, 01 Jan 2024 00:00:00 GMT";

const HREF_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub type Db = Arc<RwLock<Store>>;

#[derive(Clone)]
struct AppState {
    db: Db,
    authorization: Option<Arc<str>>,
}

/// Server with the fixture tree and no authentication.
pub fn app() -> Router {
    router(Store::with_fixtures(), None)
}

/// Server that requires Basic-Auth with the given credential.
pub fn app_with_credentials(username: &str, password: &str) -> Router {
    let token = STANDARD.encode(format!("{username}:{password}"));
    router(Store::with_fixtures(), Some(format!("Basic {token}")))
}

fn router(store: Store, authorization: Option<String>) -> Router {
    let state = AppState {
        db: Arc::new(RwLock::new(store)),
        authorization: authorization.map(Arc::from),
    };
    Router::new().fallback(handle).with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

pub async fn run_with_credentials(
    listener: TcpListener,
    username: &str,
    password: &str,
) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_credentials(username, password)).await
}

async fn handle(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    debug!(method = %method, path = uri.path(), "mock DAV request");

    if let Some(expected) = &state.authorization {
        let given = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        if given != Some(expected.as_ref()) {
            return (
                StatusCode::UNAUTHORIZED,
                [(WWW_AUTHENTICATE, "Basic realm=\"mock-dav\"")],
            )
                .into_response();
        }
    }

    let key = store::normalize_key(uri.path());
    let response = match method.as_str() {
        "PROPFIND" => propfind(&state, &key, &headers).await,
        "REPORT" => report(&state, &key, &body).await,
        "GET" => get(&state, &key).await,
        "PUT" => put(&state, &key, &headers, body).await,
        "DELETE" => delete(&state, &key, &headers).await,
        "MKCOL" => mkcol(&state, &key, &body).await,
        "MOVE" => transfer(&state, &key, &headers, false).await,
        "COPY" => transfer(&state, &key, &headers, true).await,
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    };
    info!(method = %method, path = %key, status = response.status().as_u16(), "mock DAV response");
    response
}

async fn propfind(state: &AppState, key: &str, headers: &HeaderMap) -> Response {
    let depth = headers
        .get("Depth")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("1")
        .to_ascii_lowercase();
    let db = state.db.read().await;
    let Some(node) = db.get(key) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut body = prop_response(key, node);
    match depth.as_str() {
        "0" => {}
        "infinity" => {
            for (child, node) in db.descendants(key) {
                body.push_str(&prop_response(child, node));
            }
        }
        _ => {
            for (child, node) in db.children(key) {
                body.push_str(&prop_response(child, node));
            }
        }
    }
    multistatus(CALDAV_NS, &body)
}

async fn report(state: &AppState, key: &str, body: &Bytes) -> Response {
    let query = ReportQuery::parse(&String::from_utf8_lossy(body));
    let db = state.db.read().await;
    let kind = match db.get(key) {
        Some(Node::Collection { kind, .. }) => *kind,
        Some(Node::File { .. }) => return StatusCode::FORBIDDEN.into_response(),
        None => return StatusCode::NOT_FOUND.into_response(),
    };

    let mut out = String::new();
    match kind {
        CollectionKind::Calendar => {
            let range = query.time_range;
            for (child, node) in db.children(key) {
                let Node::File { content, etag, .. } = node else {
                    continue;
                };
                let text = String::from_utf8_lossy(content);
                if !text.contains("BEGIN:VEVENT") {
                    continue;
                }
                if let Some((start, end)) = &range {
                    match event_start(&text) {
                        Some(dt) if dt.as_str() >= start.as_str() && dt.as_str() <= end.as_str() => {}
                        _ => continue,
                    }
                }
                out.push_str(&data_response(child, etag, "C:calendar-data", &text));
            }
            multistatus(CALDAV_NS, &out)
        }
        CollectionKind::AddressBook => {
            let filter = query.prop_filter.zip(query.text_match);
            for (child, node) in db.children(key) {
                let Node::File { content, etag, .. } = node else {
                    continue;
                };
                let text = String::from_utf8_lossy(content);
                if !text.contains("BEGIN:VCARD") {
                    continue;
                }
                if let Some((property, term)) = &filter {
                    if !vcard_matches(&text, property, term) {
                        continue;
                    }
                }
                out.push_str(&data_response(child, etag, "C:address-data", &text));
            }
            multistatus(CARDDAV_NS, &out)
        }
        CollectionKind::Plain => StatusCode::FORBIDDEN.into_response(),
    }
}

async fn get(state: &AppState, key: &str) -> Response {
    let db = state.db.read().await;
    match db.get(key) {
        Some(Node::File {
            content,
            content_type,
            etag,
        }) => (
            StatusCode::OK,
            [(CONTENT_TYPE, content_type.clone()), (ETAG, etag.clone())],
            content.clone(),
        )
            .into_response(),
        Some(node) => {
            // Collections answer with a listing, as several servers do.
            let mut body = prop_response(key, node);
            for (child, node) in db.children(key) {
                body.push_str(&prop_response(child, node));
            }
            multistatus(CALDAV_NS, &body)
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn put(state: &AppState, key: &str, headers: &HeaderMap, body: Bytes) -> Response {
    let mut db = state.db.write().await;
    if !if_match_holds(headers, db.get(key)) {
        return StatusCode::PRECONDITION_FAILED.into_response();
    }
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");
    match db.put_file(key, body.to_vec(), content_type) {
        Ok((created, etag)) => {
            let status = if created {
                StatusCode::CREATED
            } else {
                StatusCode::NO_CONTENT
            };
            (status, [(ETAG, etag)]).into_response()
        }
        Err(err) => store_status(err).into_response(),
    }
}

async fn delete(state: &AppState, key: &str, headers: &HeaderMap) -> Response {
    let mut db = state.db.write().await;
    if db.get(key).is_none() {
        return StatusCode::NOT_FOUND.into_response();
    }
    if !if_match_holds(headers, db.get(key)) {
        return StatusCode::PRECONDITION_FAILED.into_response();
    }
    match db.remove(key) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(StoreError::Conflict) => StatusCode::FORBIDDEN.into_response(),
        Err(err) => store_status(err).into_response(),
    }
}

async fn mkcol(state: &AppState, key: &str, body: &Bytes) -> Response {
    if !body.is_empty() {
        return StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response();
    }
    let mut db = state.db.write().await;
    match db.make_collection(key, Node::plain_collection()) {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(err) => store_status(err).into_response(),
    }
}

async fn transfer(state: &AppState, key: &str, headers: &HeaderMap, keep_source: bool) -> Response {
    let Some(destination) = headers.get("Destination").and_then(|v| v.to_str().ok()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let target = store::normalize_key(&destination_path(destination));
    let overwrite = headers
        .get("Overwrite")
        .and_then(|v| v.to_str().ok())
        .map(|v| !v.eq_ignore_ascii_case("F"))
        .unwrap_or(true);

    let mut db = state.db.write().await;
    match db.transfer(key, &target, overwrite, keep_source) {
        Ok(true) => StatusCode::CREATED.into_response(),
        Ok(false) => StatusCode::NO_CONTENT.into_response(),
        Err(StoreError::Conflict) if key == target => StatusCode::FORBIDDEN.into_response(),
        Err(err) => store_status(err).into_response(),
    }
}

fn store_status(err: StoreError) -> StatusCode {
    match err {
        StoreError::NotFound => StatusCode::NOT_FOUND,
        StoreError::Conflict => StatusCode::CONFLICT,
        StoreError::AlreadyExists => StatusCode::METHOD_NOT_ALLOWED,
        StoreError::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
    }
}

fn if_match_holds(headers: &HeaderMap, node: Option<&Node>) -> bool {
    let Some(expected) = headers.get("If-Match").and_then(|v| v.to_str().ok()) else {
        return true;
    };
    match (expected.trim(), node) {
        ("*", Some(_)) => true,
        (etag, Some(node)) => node.etag() == Some(etag),
        (_, None) => false,
    }
}

/// Path part of a `Destination` header, which may be an absolute URL.
fn destination_path(destination: &str) -> String {
    match url::Url::parse(destination) {
        Ok(url) => url.path().to_string(),
        Err(_) => destination.to_string(),
    }
}

fn href(key: &str, collection: bool) -> String {
    let mut out: String = key
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| format!("/{}", utf8_percent_encode(s, HREF_SEGMENT)))
        .collect();
    if out.is_empty() || collection {
        out.push('/');
    }
    out
}

fn multistatus(namespace: &str, responses: &str) -> Response {
    let body = format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <D:multistatus xmlns:D=\"DAV:\" xmlns:C=\"{namespace}\">{responses}\n</D:multistatus>\n"
    );
    (
        StatusCode::MULTI_STATUS,
        [(CONTENT_TYPE, "application/xml; charset=utf-8")],
        body,
    )
        .into_response()
}

fn prop_response(key: &str, node: &Node) -> String {
    let props = match node {
        Node::Collection {
            kind,
            display_name,
            description,
        } => {
            let mut props = String::from("<D:resourcetype><D:collection/>");
            match kind {
                CollectionKind::Calendar => props.push_str("<C:calendar/>"),
                CollectionKind::AddressBook => props.push_str("<C:addressbook/>"),
                CollectionKind::Plain => {}
            }
            props.push_str("</D:resourcetype>");
            if let Some(name) = display_name {
                props.push_str(&format!("<D:displayname>{}</D:displayname>", escape(name.as_str())));
            }
            match (kind, description) {
                (CollectionKind::Calendar, Some(text)) => props.push_str(&format!(
                    "<C:calendar-description>{}</C:calendar-description>",
                    escape(text.as_str())
                )),
                (CollectionKind::AddressBook, Some(text)) => props.push_str(&format!(
                    "<C:addressbook-description>{}</C:addressbook-description>",
                    escape(text.as_str())
                )),
                _ => {}
            }
            if *kind == CollectionKind::Calendar {
                props.push_str(
                    "<C:supported-calendar-component-set><C:comp name=\"VEVENT\"/>\
                     <C:comp name=\"VTODO\"/></C:supported-calendar-component-set>",
                );
            }
            props
        }
        Node::File {
            content,
            content_type,
            etag,
        } => format!(
            "<D:resourcetype/><D:getcontenttype>{}</D:getcontenttype>\
             <D:getcontentlength>{}</D:getcontentlength>\
             <D:getetag>{}</D:getetag><D:getlastmodified>{LAST_MODIFIED}</D:getlastmodified>",
            escape(content_type.as_str()),
            content.len(),
            escape(etag.as_str()),
        ),
    };
    format!(
        "\n<D:response><D:href>{}</D:href><D:propstat><D:prop>{props}</D:prop>\
         <D:status>HTTP/1.1 200 OK</D:status></D:propstat></D:response>",
        href(key, node.is_collection())
    )
}

fn data_response(key: &str, etag: &str, element: &str, data: &str) -> String {
    format!(
        "\n<D:response><D:href>{}</D:href><D:propstat><D:prop>\
         <D:getetag>{}</D:getetag><{element}>{}</{element}></D:prop>\
         <D:status>HTTP/1.1 200 OK</D:status></D:propstat></D:response>",
        href(key, false),
        escape(etag),
        escape(data),
    )
}

/// The filter parts of a calendar-query or addressbook-query body.
#[derive(Debug, Default, PartialEq, Eq)]
struct ReportQuery {
    time_range: Option<(String, String)>,
    prop_filter: Option<String>,
    text_match: Option<String>,
}

fn attribute(element: &BytesStart, name: &str) -> Option<String> {
    element
        .try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

impl ReportQuery {
    fn parse(xml: &str) -> Self {
        let mut reader = Reader::from_str(xml);
        let mut query = ReportQuery::default();
        let mut in_text_match = false;
        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    in_text_match = e.name().as_ref() == b"C:text-match";
                    query.read_element(&e);
                }
                Ok(Event::Empty(e)) => query.read_element(&e),
                Ok(Event::Text(t)) if in_text_match => {
                    if let Ok(text) = t.unescape() {
                        query.text_match = Some(text.trim().to_string());
                    }
                }
                Ok(Event::CData(t)) if in_text_match => {
                    query.text_match = Some(String::from_utf8_lossy(&t).trim().to_string());
                }
                Ok(Event::End(_)) => in_text_match = false,
                Ok(Event::Eof) => break,
                Err(e) => {
                    debug!(error = %e, "malformed REPORT body");
                    break;
                }
                _ => {}
            }
        }
        query
    }

    fn read_element(&mut self, element: &BytesStart) {
        match element.name().as_ref() {
            b"C:time-range" => {
                self.time_range = attribute(element, "start").zip(attribute(element, "end"));
            }
            b"C:prop-filter" => self.prop_filter = attribute(element, "name"),
            _ => {}
        }
    }
}

/// DTSTART of the first event as a comparable `YYYYMMDDTHHMMSSZ` string.
fn event_start(ics: &str) -> Option<String> {
    let line = ics.lines().find(|l| l.starts_with("DTSTART"))?;
    let value = line.rsplit(':').next()?.trim();
    let value = match value.len() {
        8 => format!("{value}T000000Z"),
        15 => format!("{value}Z"),
        _ => value.to_string(),
    };
    Some(value)
}

fn vcard_matches(vcard: &str, property: &str, term: &str) -> bool {
    let term = term.to_lowercase();
    vcard.lines().any(|line| {
        let upper = line.to_ascii_uppercase();
        let named = upper.starts_with(&format!("{property}:")) || upper.starts_with(&format!("{property};"));
        named
            && line
                .split_once(':')
                .is_some_and(|(_, value)| value.to_lowercase().contains(&term))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn href_encodes_segments() {
        assert_eq!(href("/", true), "/");
        assert_eq!(href("/My Cal", true), "/My%20Cal/");
        assert_eq!(href("/files/a&b.txt", false), "/files/a%26b.txt");
    }

    #[test]
    fn destination_accepts_url_or_path() {
        assert_eq!(destination_path("http://127.0.0.1:3000/files/b.txt"), "/files/b.txt");
        assert_eq!(destination_path("http://127.0.0.1:3000"), "/");
        assert_eq!(destination_path("http://user@host:81/a%20b?x=1"), "/a%20b");
        assert_eq!(destination_path("/files/b.txt"), "/files/b.txt");
    }

    #[test]
    fn report_query_reads_time_range() {
        let query = ReportQuery::parse(
            r#"<C:calendar-query xmlns:C="urn:ietf:params:xml:ns:caldav"><C:filter>
            <C:time-range start="20240101T000000Z" end="20240131T235959Z"/></C:filter></C:calendar-query>"#,
        );
        assert_eq!(
            query.time_range,
            Some(("20240101T000000Z".to_string(), "20240131T235959Z".to_string()))
        );
        assert_eq!(query.prop_filter, None);
    }

    #[test]
    fn report_query_unescapes_text_match() {
        for (body, expected) in [
            ("a&amp;b", "a&b"),
            ("Smith &#38; Co", "Smith & Co"),
            ("&lt;x&gt;", "<x>"),
        ] {
            let xml = format!(
                r#"<C:filter><C:prop-filter name="FN"><C:text-match collation="i;unicode-casemap" match-type="contains">{body}</C:text-match></C:prop-filter></C:filter>"#
            );
            let query = ReportQuery::parse(&xml);
            assert_eq!(query.prop_filter.as_deref(), Some("FN"));
            assert_eq!(query.text_match.as_deref(), Some(expected), "{body}");
        }
    }

    #[test]
    fn report_query_without_filter() {
        let query = ReportQuery::parse(r#"<C:addressbook-query><C:filter/></C:addressbook-query>"#);
        assert_eq!(query, ReportQuery::default());
    }

    #[test]
    fn event_start_normalizes_forms() {
        assert_eq!(event_start("DTSTART:20240105T100000Z").as_deref(), Some("20240105T100000Z"));
        assert_eq!(event_start("DTSTART;VALUE=DATE:20240105").as_deref(), Some("20240105T000000Z"));
        assert_eq!(event_start("DTSTART;TZID=Europe/Paris:20240105T100000").as_deref(), Some("20240105T100000Z"));
    }

    #[test]
    fn vcard_property_match() {
        let card = "BEGIN:VCARD\nFN:John Doe\nEMAIL;TYPE=work:john@example.com\nEND:VCARD";
        assert!(vcard_matches(card, "FN", "john"));
        assert!(vcard_matches(card, "EMAIL", "EXAMPLE.com"));
        assert!(!vcard_matches(card, "FN", "example"));
    }

    #[test]
    fn if_match_semantics() {
        let node = Node::File {
            content: Vec::new(),
            content_type: "text/plain".to_string(),
            etag: "\"1\"".to_string(),
        };
        let mut headers = HeaderMap::new();
        assert!(if_match_holds(&headers, None));
        headers.insert("If-Match", "*".parse().unwrap());
        assert!(if_match_holds(&headers, Some(&node)));
        assert!(!if_match_holds(&headers, None));
        headers.insert("If-Match", "\"2\"".parse().unwrap());
        assert!(!if_match_holds(&headers, Some(&node)));
    }
}
