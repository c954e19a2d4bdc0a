//! Turn low-level failures into messages a workflow author can act on.
//!
//! Rules are checked in priority order and the first match wins. Every
//! message ends with the operation, the resource kind, and the URL that
//! was attempted.

use std::error::Error as StdError;

use crate::error::{DavError, TransportError, TransportErrorKind};

/// Render `error` as a user-facing message.
pub fn translate(
    error: &DavError,
    attempted_url: &str,
    operation_label: &str,
    resource_label: &str,
) -> String {
    let base = describe(error);
    format!("{base} (operation: {operation_label}, resource: {resource_label}, URL: {attempted_url})")
}

/// Wrap `error` in `DavError::Translated`, keeping it as the source.
pub fn translated(
    error: DavError,
    attempted_url: &str,
    operation_label: &str,
    resource_label: &str,
) -> DavError {
    let message = translate(&error, attempted_url, operation_label, resource_label);
    DavError::Translated {
        message,
        source: Box::new(error),
    }
}

fn describe(error: &DavError) -> String {
    let original = error.to_string();

    if original.to_lowercase().contains("invalid url")
        || transport_kind(error) == Some(TransportErrorKind::InvalidUrl)
    {
        return "Invalid URL. Make sure the base URL includes the protocol (http:// or https://) \
                and the path is a valid server path"
            .to_string();
    }

    match transport_kind(error) {
        Some(TransportErrorKind::HostNotFound) => {
            return "Host not found. Check that the server hostname in your credentials is correct"
                .to_string();
        }
        Some(TransportErrorKind::ConnectionRefused) => {
            return "Connection refused. The server is unreachable or the port is blocked"
                .to_string();
        }
        Some(TransportErrorKind::TimedOut) => {
            return "Connection timed out. The server or the network is too slow to respond"
                .to_string();
        }
        _ => {}
    }

    if let Some((status, status_text)) = http_status(error) {
        return match status_text {
            Some(text) if !text.is_empty() => format!("HTTP {status} {text}"),
            _ => format!("HTTP {status}"),
        };
    }

    original
}

/// Walk `error` and its source chain.
fn chain(error: &DavError) -> impl Iterator<Item = &(dyn StdError + 'static)> {
    let first: &(dyn StdError + 'static) = error;
    std::iter::successors(Some(first), |&e| e.source())
}

/// `Translated` stores its source boxed, so both shapes show up in the chain.
fn as_dav<'a>(e: &'a (dyn StdError + 'static)) -> Option<&'a DavError> {
    e.downcast_ref::<DavError>()
        .or_else(|| e.downcast_ref::<Box<DavError>>().map(|b| b.as_ref()))
}

fn transport_kind(error: &DavError) -> Option<TransportErrorKind> {
    chain(error).find_map(|e| {
        if let Some(t) = e.downcast_ref::<TransportError>() {
            return Some(t.kind);
        }
        match as_dav(e) {
            Some(DavError::Transport(t)) => Some(t.kind),
            _ => None,
        }
    })
}

fn http_status(error: &DavError) -> Option<(u16, Option<String>)> {
    chain(error).find_map(|e| match as_dav(e) {
        Some(DavError::HttpStatus {
            status,
            status_text,
            ..
        }) => Some((*status, status_text.clone())),
        _ => None,
    })
}
