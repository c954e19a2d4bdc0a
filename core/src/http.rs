//! HTTP transport types and the injected send capability.
//!
//! # Design
//! Requests and responses are plain data. The composer builds `HttpRequest`
//! values and the extractor reads `HttpResponse` values; the only code that
//! touches the network is an `HttpTransport` implementation supplied by the
//! caller (or the bundled `UreqTransport`). Transports hand back non-2xx
//! responses as data so status interpretation stays in the core.
//!
//! Bodies are raw bytes because file uploads and downloads carry arbitrary
//! binary content.

use crate::error::{DavError, TransportError};

/// HTTP method for a request, including the WebDAV extension methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Put,
    Delete,
    Propfind,
    Report,
    Mkcol,
    Move,
    Copy,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Propfind => "PROPFIND",
            HttpMethod::Report => "REPORT",
            HttpMethod::Mkcol => "MKCOL",
            HttpMethod::Move => "MOVE",
            HttpMethod::Copy => "COPY",
        }
    }
}

/// An HTTP request described as plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// The body as UTF-8 text, if present and valid.
    pub fn body_text(&self) -> Option<&str> {
        self.body.as_deref().and_then(|b| std::str::from_utf8(b).ok())
    }
}

/// An HTTP response described as plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            reason: None,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Reason phrase sent by the server, or the canonical one for the status.
    pub fn status_text(&self) -> Option<String> {
        match &self.reason {
            Some(reason) if !reason.is_empty() => Some(reason.clone()),
            _ => ureq::http::StatusCode::from_u16(self.status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .map(str::to_string),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The HTTP capability the core consumes.
///
/// Implementations execute the request and return whatever the server sent,
/// including error statuses. Only failures below HTTP are `Err`.
pub trait HttpTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

impl<T: HttpTransport + ?Sized> HttpTransport for &T {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).send(request)
    }
}

/// Map non-success status codes to `DavError::HttpStatus`.
pub fn check_status(response: &HttpResponse) -> Result<(), DavError> {
    if response.is_success() {
        return Ok(());
    }
    Err(DavError::HttpStatus {
        status: response.status,
        status_text: response.status_text(),
        body: response.text(),
    })
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
