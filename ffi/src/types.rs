//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! Each type mirrors a core type with C-compatible fields: `*mut c_char`
//! for text, pointer plus length for bodies (they may be binary), and enums
//! with explicit discriminants. Conversions live here so `lib.rs` stays
//! focused on the `extern "C"` surface.

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;

use davbridge_core::error::{DavError, TransportError, TransportErrorKind};
use davbridge_core::http::{HttpMethod, HttpRequest, HttpResponse};
use davbridge_core::DavContext;

/// Opaque handle to a validated `DavContext`.
pub struct FfiDavContext {
    pub(crate) inner: DavContext,
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiHttpMethod {
    Get = 0,
    Put = 1,
    Delete = 2,
    Propfind = 3,
    Report = 4,
    Mkcol = 5,
    Move = 6,
    Copy = 7,
}

impl From<HttpMethod> for FfiHttpMethod {
    fn from(m: HttpMethod) -> Self {
        match m {
            HttpMethod::Get => FfiHttpMethod::Get,
            HttpMethod::Put => FfiHttpMethod::Put,
            HttpMethod::Delete => FfiHttpMethod::Delete,
            HttpMethod::Propfind => FfiHttpMethod::Propfind,
            HttpMethod::Report => FfiHttpMethod::Report,
            HttpMethod::Mkcol => FfiHttpMethod::Mkcol,
            HttpMethod::Move => FfiHttpMethod::Move,
            HttpMethod::Copy => FfiHttpMethod::Copy,
        }
    }
}

/// A single HTTP header as a key-value pair of C strings.
#[repr(C)]
pub struct FfiHeader {
    pub key: *mut c_char,
    pub value: *mut c_char,
}

/// An HTTP request described as C-compatible plain data.
///
/// `method_name` is the wire name (`"PROPFIND"`, ...) for hosts that pass
/// methods as strings. `body` is null when the request has no body.
#[repr(C)]
pub struct FfiHttpRequest {
    pub method: FfiHttpMethod,
    pub method_name: *mut c_char,
    pub url: *mut c_char,
    pub headers: *mut FfiHeader,
    pub headers_len: u32,
    pub body: *mut u8,
    pub body_len: usize,
}

/// Text this library produces itself (messages, JSON, encoded paths).
/// Interior NULs are dropped.
pub(crate) fn c_string(s: impl Into<Vec<u8>>) -> *mut c_char {
    let mut bytes: Vec<u8> = s.into();
    bytes.retain(|b| *b != 0);
    CString::new(bytes).unwrap_or_default().into_raw()
}

/// The first request field a C string cannot carry, if any.
fn nul_field(req: &HttpRequest) -> Option<String> {
    if req.url.contains('\0') {
        return Some("URL".to_string());
    }
    req.headers
        .iter()
        .find(|(k, v)| k.contains('\0') || v.contains('\0'))
        .map(|(k, _)| format!("header '{}'", k.replace('\0', "")))
}

impl FfiHttpRequest {
    /// Convert a core `HttpRequest` into a heap-allocated `FfiHttpRequest`.
    ///
    /// Fails when the URL or a header contains a NUL byte.
    pub(crate) fn from_core(req: &HttpRequest) -> Result<*mut Self, TransportError> {
        if let Some(field) = nul_field(req) {
            return Err(TransportError::new(
                TransportErrorKind::Other,
                format!("request {field} contains a NUL byte"),
            ));
        }
        let headers_len = req.headers.len() as u32;
        let headers = if req.headers.is_empty() {
            std::ptr::null_mut()
        } else {
            let ffi_headers: Vec<FfiHeader> = req
                .headers
                .iter()
                .map(|(k, v)| FfiHeader {
                    key: c_string(k.as_str()),
                    value: c_string(v.as_str()),
                })
                .collect();
            Box::into_raw(ffi_headers.into_boxed_slice()) as *mut FfiHeader
        };

        let (body, body_len) = match &req.body {
            Some(b) => {
                let len = b.len();
                let boxed = b.clone().into_boxed_slice();
                (Box::into_raw(boxed) as *mut u8, len)
            }
            None => (std::ptr::null_mut(), 0),
        };

        Ok(Box::into_raw(Box::new(FfiHttpRequest {
            method: req.method.into(),
            method_name: c_string(req.method.as_str()),
            url: c_string(req.url.as_str()),
            headers,
            headers_len,
            body,
            body_len,
        })))
    }

    /// Release a request produced by `from_core`.
    ///
    /// # Safety
    /// `req` must come from `from_core` and not have been freed.
    pub(crate) unsafe fn free(req: *mut Self) {
        let req = unsafe { Box::from_raw(req) };
        for s in [req.method_name, req.url] {
            if !s.is_null() {
                drop(unsafe { CString::from_raw(s) });
            }
        }
        if !req.body.is_null() {
            let slice = std::ptr::slice_from_raw_parts_mut(req.body, req.body_len);
            drop(unsafe { Box::from_raw(slice) });
        }
        if !req.headers.is_null() && req.headers_len > 0 {
            let slice = std::ptr::slice_from_raw_parts_mut(req.headers, req.headers_len as usize);
            let headers = unsafe { Box::from_raw(slice) };
            for h in headers.iter() {
                if !h.key.is_null() {
                    drop(unsafe { CString::from_raw(h.key) });
                }
                if !h.value.is_null() {
                    drop(unsafe { CString::from_raw(h.value) });
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Response input (filled by the host, not freed by us)
// ---------------------------------------------------------------------------

/// An HTTP response or transport failure reported by the host callback.
///
/// The host fills this inside its `FfiSendFn`. Pointers must stay valid
/// until the callback is invoked again or `davbridge_run_batch` returns;
/// the FFI layer copies what it needs and never frees them.
#[repr(C)]
pub struct FfiHttpResponse {
    pub status: u16,
    pub reason: *const c_char,
    pub headers: *const FfiHeader,
    pub headers_len: u32,
    pub body: *const u8,
    pub body_len: usize,
    /// Transport error code such as `ENOTFOUND`, when the callback fails.
    pub error_code: *const c_char,
    pub error_message: *const c_char,
}

impl Default for FfiHttpResponse {
    fn default() -> Self {
        Self {
            status: 0,
            reason: std::ptr::null(),
            headers: std::ptr::null(),
            headers_len: 0,
            body: std::ptr::null(),
            body_len: 0,
            error_code: std::ptr::null(),
            error_message: std::ptr::null(),
        }
    }
}

/// Host transport: execute `request`, fill `response`, return 0. A non-zero
/// return is a transport failure described by `error_code`/`error_message`.
pub type FfiSendFn = unsafe extern "C" fn(
    user_data: *mut c_void,
    request: *const FfiHttpRequest,
    response: *mut FfiHttpResponse,
) -> i32;

/// Read a possibly-null C string.
///
/// # Safety
/// `s` must be null or a valid NUL-terminated string.
pub(crate) unsafe fn read_str(s: *const c_char) -> Option<String> {
    if s.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(s) }.to_string_lossy().into_owned())
    }
}

impl FfiHttpResponse {
    /// Copy the host's answer into core types.
    ///
    /// # Safety
    /// All non-null pointers must be valid for their stated lengths.
    pub(crate) unsafe fn to_core(&self, rc: i32) -> Result<HttpResponse, TransportError> {
        if rc != 0 {
            let code = unsafe { read_str(self.error_code) }.unwrap_or_default();
            let message = unsafe { read_str(self.error_message) }
                .unwrap_or_else(|| format!("host transport failed with code {rc}"));
            return Err(TransportError::from_code(&code, message));
        }

        let body = if self.body.is_null() || self.body_len == 0 {
            Vec::new()
        } else {
            unsafe { std::slice::from_raw_parts(self.body, self.body_len) }.to_vec()
        };
        let headers = if self.headers.is_null() || self.headers_len == 0 {
            Vec::new()
        } else {
            unsafe { std::slice::from_raw_parts(self.headers, self.headers_len as usize) }
                .iter()
                .filter_map(|h| {
                    let key = unsafe { read_str(h.key) }?;
                    let value = unsafe { read_str(h.value) }?;
                    Some((key, value))
                })
                .collect()
        };

        Ok(HttpResponse {
            status: self.status,
            reason: unsafe { read_str(self.reason) },
            headers,
            body,
        })
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Error codes returned in `FfiDavResult`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiErrorCode {
    Ok = 0,
    InvalidCredential = 1,
    InvalidPath = 2,
    CrossOrigin = 3,
    Transport = 4,
    Http = 5,
    UnsupportedOperation = 6,
    MissingBinaryInput = 7,
    UnexpectedContentType = 8,
    InvalidParameter = 9,
    ItemFailed = 10,
    Deserialization = 11,
    Panic = 12,
    NullArg = 13,
}

impl FfiErrorCode {
    pub(crate) fn of(err: &DavError) -> Self {
        match err.root() {
            DavError::InvalidCredential(_) => FfiErrorCode::InvalidCredential,
            DavError::InvalidPath { .. } => FfiErrorCode::InvalidPath,
            DavError::CrossOrigin { .. } => FfiErrorCode::CrossOrigin,
            DavError::Transport(_) => FfiErrorCode::Transport,
            DavError::HttpStatus { .. } => FfiErrorCode::Http,
            DavError::UnsupportedOperation(_) => FfiErrorCode::UnsupportedOperation,
            DavError::MissingBinaryInput { .. } => FfiErrorCode::MissingBinaryInput,
            DavError::UnexpectedContentType { .. } => FfiErrorCode::UnexpectedContentType,
            DavError::InvalidParameter { .. } => FfiErrorCode::InvalidParameter,
            DavError::Item(_) | DavError::Translated { .. } => FfiErrorCode::ItemFailed,
        }
    }
}

/// Result envelope for parse and batch calls.
///
/// On success `error_code` is `Ok`, `error_message` is null and `json` holds
/// the payload. On failure `json` is null and `http_status` is set when an
/// HTTP status caused the failure, including a failed batch item.
#[repr(C)]
pub struct FfiDavResult {
    pub error_code: FfiErrorCode,
    pub error_message: *mut c_char,
    pub http_status: u16,
    pub json: *mut c_char,
}

impl FfiDavResult {
    pub(crate) fn ok_json(json: String) -> *mut Self {
        Box::into_raw(Box::new(FfiDavResult {
            error_code: FfiErrorCode::Ok,
            error_message: std::ptr::null_mut(),
            http_status: 0,
            json: c_string(json),
        }))
    }

    pub(crate) fn from_error(err: &DavError) -> *mut Self {
        let http_status = err.http_status().unwrap_or(0);
        Self::failure(FfiErrorCode::of(err), http_status, &err.to_string())
    }

    pub(crate) fn failure(error_code: FfiErrorCode, http_status: u16, message: &str) -> *mut Self {
        Box::into_raw(Box::new(FfiDavResult {
            error_code,
            error_message: c_string(message),
            http_status,
            json: std::ptr::null_mut(),
        }))
    }

    pub(crate) fn null_arg(name: &str) -> *mut Self {
        Self::failure(FfiErrorCode::NullArg, 0, &format!("null argument: {name}"))
    }

    pub(crate) fn panic(msg: &str) -> *mut Self {
        Self::failure(FfiErrorCode::Panic, 0, msg)
    }
}
