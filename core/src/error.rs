//! Error types for the DAV bridge.
//!
//! # Design
//! `DavError` follows the fault taxonomy the batch loop reasons about:
//! credential faults abort a run, path and origin faults are per-item input
//! problems, `Transport` and `HttpStatus` describe what happened on the wire.
//! Faults leaving the dispatcher are wrapped in `Translated`, which keeps
//! the original error as its `source()` while presenting the user-facing
//! message produced by the error translator.

use std::fmt;

use thiserror::Error;

/// Network-layer failure category reported by an `HttpTransport`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    HostNotFound,
    ConnectionRefused,
    TimedOut,
    InvalidUrl,
    Other,
}

impl TransportErrorKind {
    /// Map a Node-style / libc-style error code (`ENOTFOUND`, `ECONNREFUSED`,
    /// ...) to a kind. Unknown codes map to `Other`.
    pub fn from_code(code: &str) -> Self {
        match code.to_ascii_uppercase().as_str() {
            "ENOTFOUND" | "EAI_AGAIN" | "EAI_NONAME" => TransportErrorKind::HostNotFound,
            "ECONNREFUSED" => TransportErrorKind::ConnectionRefused,
            "ETIMEDOUT" | "ESOCKETTIMEDOUT" | "ECONNABORTED" => TransportErrorKind::TimedOut,
            "ERR_INVALID_URL" | "EINVALIDURL" => TransportErrorKind::InvalidUrl,
            _ => TransportErrorKind::Other,
        }
    }

    /// Canonical error code for the kind, if it has one.
    pub fn code(self) -> Option<&'static str> {
        match self {
            TransportErrorKind::HostNotFound => Some("ENOTFOUND"),
            TransportErrorKind::ConnectionRefused => Some("ECONNREFUSED"),
            TransportErrorKind::TimedOut => Some("ETIMEDOUT"),
            TransportErrorKind::InvalidUrl => Some("ERR_INVALID_URL"),
            TransportErrorKind::Other => None,
        }
    }
}

/// A failure below HTTP: DNS, TCP, TLS, timeouts, malformed URLs.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub code: Option<String>,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.code().map(str::to_string),
            message: message.into(),
        }
    }

    /// Build an error from a host-reported code, keeping the code verbatim.
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::from_code(code),
            code: Some(code.to_string()),
            message: message.into(),
        }
    }
}

/// A failed item, as reported when a batch run stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendlyError {
    pub message: String,
    pub item_index: usize,
    /// Status of the underlying HTTP failure, if that is what stopped the run.
    pub http_status: Option<u16>,
}

impl fmt::Display for FriendlyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [item {}]", self.message, self.item_index)
    }
}

impl std::error::Error for FriendlyError {}

/// Errors produced anywhere in the DAV pipeline.
#[derive(Debug, Error)]
pub enum DavError {
    /// Base URL missing or not `http(s)://`. Aborts the whole run.
    #[error("invalid credentials: {0}")]
    InvalidCredential(String),

    /// An absolute URL was supplied for a field that only accepts paths.
    #[error("invalid path for '{field}': absolute URLs are not allowed here ({path})")]
    InvalidPath { field: String, path: String },

    /// A MOVE/COPY destination points at a different origin than the base URL.
    #[error("destination '{destination}' is not on the configured server ({expected})")]
    CrossOrigin { destination: String, expected: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with a non-success status.
    #[error("HTTP {status}{}", .status_text.as_deref().map(|t| format!(" {t}")).unwrap_or_default())]
    HttpStatus {
        status: u16,
        status_text: Option<String>,
        body: String,
    },

    #[error("the operation '{0}' is not supported")]
    UnsupportedOperation(String),

    #[error("no binary data found in property '{property}'")]
    MissingBinaryInput { property: String },

    #[error("unexpected content type: expected {expected}, got {actual}")]
    UnexpectedContentType { expected: String, actual: String },

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// A fault already rendered into a user-facing message.
    #[error("{message}")]
    Translated {
        message: String,
        #[source]
        source: Box<DavError>,
    },

    /// The batch stopped at a failing item.
    #[error(transparent)]
    Item(#[from] FriendlyError),
}

impl DavError {
    pub fn invalid_parameter(name: &str, reason: impl Into<String>) -> Self {
        DavError::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// The innermost error, skipping any `Translated` wrappers.
    pub fn root(&self) -> &DavError {
        match self {
            DavError::Translated { source, .. } => source.root(),
            other => other,
        }
    }

    /// HTTP status behind this error, looking through translation and item wrappers.
    pub fn http_status(&self) -> Option<u16> {
        match self.root() {
            DavError::HttpStatus { status, .. } => Some(*status),
            DavError::Item(item) => item.http_status,
            _ => None,
        }
    }

    /// Whether this fault must stop the run regardless of continue-on-fail.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.root(),
            DavError::UnsupportedOperation(_) | DavError::InvalidCredential(_)
        )
    }
}
