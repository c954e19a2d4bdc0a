//! C-ABI wrapper around `davbridge-core`.
//!
//! # Overview
//! Lets any language with a C FFI compose DAV requests, parse multi-status
//! bodies and run whole batches while keeping its own HTTP stack. Batches
//! call back into the host through an `FfiSendFn` for every request.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - Inputs and outputs that are structured (credentials, operations,
//!   tasks, output items) travel as JSON strings.
//! - The C caller owns all returned pointers and must call the matching
//!   `davbridge_free_*` function to release them.

pub mod types;

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};

use davbridge_core::error::TransportError;
use davbridge_core::http::{HttpRequest, HttpResponse, HttpTransport};
use davbridge_core::{
    extract, operation, path, BatchRunner, Credential, DavContext, ExtractKind, InlineBinary,
    Operation, RunOptions, Task, WorkItem,
};
use tracing_subscriber::EnvFilter;

use types::*;

/// Read a required C string argument as UTF-8.
fn arg_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Install a `tracing` subscriber writing to stderr, filtered by
/// `DAVBRIDGE_LOG` (default `warn`). Later calls are no-ops.
#[unsafe(no_mangle)]
pub extern "C" fn davbridge_init_logging() {
    let _ = catch_unwind(|| {
        let filter = EnvFilter::try_from_env("DAVBRIDGE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

// ---------------------------------------------------------------------------
// Context lifecycle
// ---------------------------------------------------------------------------

/// Validate a credential JSON object (`baseUrl`, `username`, `password`)
/// and return a context handle.
///
/// Returns null if the argument is null, not a credential, or has an
/// unusable base URL. Free with `davbridge_context_free`.
#[unsafe(no_mangle)]
pub extern "C" fn davbridge_context_new(credential_json: *const c_char) -> *mut FfiDavContext {
    catch_unwind(|| {
        let Some(raw) = arg_str(credential_json) else {
            return std::ptr::null_mut();
        };
        let credential: Credential = match serde_json::from_str(raw) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "credential JSON rejected");
                return std::ptr::null_mut();
            }
        };
        match DavContext::new(credential) {
            Ok(inner) => Box::into_raw(Box::new(FfiDavContext { inner })),
            Err(e) => {
                tracing::warn!(error = %e, "invalid DAV context");
                std::ptr::null_mut()
            }
        }
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Free a context created by `davbridge_context_new`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn davbridge_context_free(ctx: *mut FfiDavContext) {
    if !ctx.is_null() {
        let _ = catch_unwind(|| {
            drop(unsafe { Box::from_raw(ctx) });
        });
    }
}

// ---------------------------------------------------------------------------
// Request composition
// ---------------------------------------------------------------------------

/// Normalize a resource path the same way request composition does.
///
/// Returns null for a null argument. Free with `davbridge_free_string`.
#[unsafe(no_mangle)]
pub extern "C" fn davbridge_normalize_path(path: *const c_char) -> *mut c_char {
    catch_unwind(|| match arg_str(path) {
        Some(p) => c_string(path::normalize_path(p)),
        None => std::ptr::null_mut(),
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Compose the HTTP request for one operation without sending it.
///
/// `operation_json` uses the same shape as a batch task's `operation`.
/// Returns null on a null argument, any validation error, or a URL or header
/// containing a NUL byte. Operations that read binary input from a work item
/// are not composable here.
/// Free with `davbridge_free_request`.
#[unsafe(no_mangle)]
pub extern "C" fn davbridge_build_request(
    ctx: *const FfiDavContext,
    operation_json: *const c_char,
) -> *mut FfiHttpRequest {
    catch_unwind(|| {
        if ctx.is_null() {
            return std::ptr::null_mut();
        }
        let Some(raw) = arg_str(operation_json) else {
            return std::ptr::null_mut();
        };
        let ctx = unsafe { &(*ctx).inner };

        let composed = serde_json::from_str::<serde_json::Value>(raw)
            .map_err(|e| e.to_string())
            .and_then(|value| Operation::parse(&value).map_err(|e| e.to_string()))
            .and_then(|op| {
                operation::prepare(ctx, &InlineBinary, 0, &WorkItem::default(), &op)
                    .map_err(|e| e.to_string())
            });
        let built = composed
            .and_then(|prepared| FfiHttpRequest::from_core(&prepared.request).map_err(|e| e.to_string()));
        match built {
            Ok(req) => req,
            Err(error) => {
                tracing::debug!(%error, "request not composed");
                std::ptr::null_mut()
            }
        }
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Free a request returned by `davbridge_build_request`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn davbridge_free_request(req: *mut FfiHttpRequest) {
    if !req.is_null() {
        let _ = catch_unwind(|| unsafe { FfiHttpRequest::free(req) });
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Extract records from a multi-status body.
///
/// `kind` is one of `calendar`, `addressBook`, `event`, `contact` or
/// `resource`. On success `json` is an array of records.
#[unsafe(no_mangle)]
pub extern "C" fn davbridge_parse_multistatus(
    body: *const c_char,
    kind: *const c_char,
) -> *mut FfiDavResult {
    catch_unwind(|| {
        let Some(body) = arg_str(body) else {
            return FfiDavResult::null_arg("body");
        };
        let Some(kind) = arg_str(kind) else {
            return FfiDavResult::null_arg("kind");
        };
        let kind: ExtractKind = match serde_json::from_value(serde_json::Value::String(kind.to_string())) {
            Ok(k) => k,
            Err(_) => {
                return FfiDavResult::failure(
                    FfiErrorCode::InvalidParameter,
                    0,
                    &format!("unknown resource kind '{kind}'"),
                )
            }
        };
        let records = extract::extract(body, kind);
        match serde_json::to_string(&records) {
            Ok(json) => FfiDavResult::ok_json(json),
            Err(e) => FfiDavResult::failure(FfiErrorCode::Deserialization, 0, &e.to_string()),
        }
    })
    .unwrap_or_else(|_| FfiDavResult::panic("panic in davbridge_parse_multistatus"))
}

// ---------------------------------------------------------------------------
// Batch execution
// ---------------------------------------------------------------------------

/// Sends requests by calling back into the host.
struct CallbackTransport {
    send: FfiSendFn,
    user_data: *mut c_void,
}

impl HttpTransport for CallbackTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let ffi_req = FfiHttpRequest::from_core(request)?;
        let mut response = FfiHttpResponse::default();
        let rc = unsafe { (self.send)(self.user_data, ffi_req, &mut response) };
        let result = unsafe { response.to_core(rc) };
        unsafe { FfiHttpRequest::free(ffi_req) };
        result
    }
}

/// Run a batch of tasks, sending each request through `send`.
///
/// `tasks_json` is an array of `{ "operation": {...}, "item": {...} }`.
/// On success `json` is the array of output items, one per task in order.
/// When `continue_on_fail` is false the first failing item aborts the run
/// and its message is returned with `ItemFailed`.
#[unsafe(no_mangle)]
pub extern "C" fn davbridge_run_batch(
    credential_json: *const c_char,
    tasks_json: *const c_char,
    continue_on_fail: bool,
    send: Option<FfiSendFn>,
    user_data: *mut c_void,
) -> *mut FfiDavResult {
    catch_unwind(AssertUnwindSafe(|| {
        let Some(credential) = arg_str(credential_json) else {
            return FfiDavResult::null_arg("credential_json");
        };
        let Some(tasks) = arg_str(tasks_json) else {
            return FfiDavResult::null_arg("tasks_json");
        };
        let Some(send) = send else {
            return FfiDavResult::null_arg("send");
        };

        let credential: Credential = match serde_json::from_str(credential) {
            Ok(c) => c,
            Err(e) => {
                return FfiDavResult::failure(FfiErrorCode::Deserialization, 0, &format!("credential: {e}"))
            }
        };
        let tasks: Vec<Task> = match serde_json::from_str(tasks) {
            Ok(t) => t,
            Err(e) => return FfiDavResult::failure(FfiErrorCode::Deserialization, 0, &format!("tasks: {e}")),
        };

        let transport = CallbackTransport { send, user_data };
        let runner = BatchRunner::new(RunOptions { continue_on_fail });
        match runner.run(&credential, tasks, &transport, &InlineBinary) {
            Ok(items) => match serde_json::to_string(&items) {
                Ok(json) => FfiDavResult::ok_json(json),
                Err(e) => FfiDavResult::failure(FfiErrorCode::Deserialization, 0, &e.to_string()),
            },
            Err(e) => FfiDavResult::from_error(&e),
        }
    }))
    .unwrap_or_else(|_| FfiDavResult::panic("panic in davbridge_run_batch"))
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Free a result envelope and the strings it owns. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn davbridge_free_result(result: *mut FfiDavResult) {
    if result.is_null() {
        return;
    }
    let _ = catch_unwind(|| {
        let result = unsafe { Box::from_raw(result) };
        if !result.error_message.is_null() {
            drop(unsafe { CString::from_raw(result.error_message) });
        }
        if !result.json.is_null() {
            drop(unsafe { CString::from_raw(result.json) });
        }
    });
}

/// Free a string returned by this library. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn davbridge_free_string(s: *mut c_char) {
    if !s.is_null() {
        let _ = catch_unwind(|| {
            drop(unsafe { CString::from_raw(s) });
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    const CREDENTIAL: &str = r#"{"baseUrl":"https://dav.example.com/remote.php/dav","username":"alice","password":"secret"}"#;

    fn cstr(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    fn read(ptr: *const c_char) -> String {
        unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string()
    }

    fn result_json(result: *mut FfiDavResult) -> serde_json::Value {
        assert!(!result.is_null());
        let r = unsafe { &*result };
        assert_eq!(r.error_code, FfiErrorCode::Ok, "{}", read(r.error_message));
        let value = serde_json::from_str(&read(r.json)).unwrap();
        davbridge_free_result(result);
        value
    }

    // --- context ---

    #[test]
    fn context_round_trip() {
        let ctx = davbridge_context_new(cstr(CREDENTIAL).as_ptr());
        assert!(!ctx.is_null());
        davbridge_context_free(ctx);
    }

    #[test]
    fn context_rejects_bad_input() {
        assert!(davbridge_context_new(std::ptr::null()).is_null());
        assert!(davbridge_context_new(cstr("not json").as_ptr()).is_null());
        let ftp = cstr(r#"{"baseUrl":"ftp://dav.example.com","username":"a","password":"b"}"#);
        assert!(davbridge_context_new(ftp.as_ptr()).is_null());
        davbridge_context_free(std::ptr::null_mut());
    }

    // --- composition ---

    #[test]
    fn normalize_path_matches_core() {
        let s = davbridge_normalize_path(cstr("calendars/alice/my cal/").as_ptr());
        assert_eq!(read(s), "/calendars/alice/my%20cal/");
        davbridge_free_string(s);
        assert!(davbridge_normalize_path(std::ptr::null()).is_null());
    }

    #[test]
    fn build_create_event_request() {
        let ctx = davbridge_context_new(cstr(CREDENTIAL).as_ptr());
        let op = cstr(
            r#"{"resource":"calendar","operation":"createEvent","calendarPath":"/calendars/alice/work/","eventId":"e1","icalData":"BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n"}"#,
        );
        let req = davbridge_build_request(ctx, op.as_ptr());
        assert!(!req.is_null());

        let r = unsafe { &*req };
        assert_eq!(r.method, FfiHttpMethod::Put);
        assert_eq!(read(r.method_name), "PUT");
        assert_eq!(
            read(r.url),
            "https://dav.example.com/remote.php/dav/calendars/alice/work/e1.ics"
        );

        let headers = unsafe { std::slice::from_raw_parts(r.headers, r.headers_len as usize) };
        let pairs: Vec<(String, String)> = headers.iter().map(|h| (read(h.key), read(h.value))).collect();
        assert_eq!(pairs, vec![("Content-Type".to_string(), "text/calendar".to_string())]);

        let body = unsafe { std::slice::from_raw_parts(r.body, r.body_len) };
        assert!(body.starts_with(b"BEGIN:VCALENDAR"));

        davbridge_free_request(req);
        davbridge_context_free(ctx);
    }

    #[test]
    fn build_request_rejects_unknown_operation() {
        let ctx = davbridge_context_new(cstr(CREDENTIAL).as_ptr());
        let op = cstr(r#"{"resource":"calendar","operation":"lock"}"#);
        assert!(davbridge_build_request(ctx, op.as_ptr()).is_null());
        assert!(davbridge_build_request(std::ptr::null(), op.as_ptr()).is_null());
        davbridge_context_free(ctx);
    }

    // --- parsing ---

    #[test]
    fn parse_multistatus_returns_records() {
        let body = cstr(
            r#"<D:multistatus xmlns:D="DAV:"><D:response><D:href>/files/a.txt</D:href><D:propstat><D:prop><D:getetag>"1"</D:getetag><D:getcontentlength>3</D:getcontentlength></D:prop></D:propstat></D:response></D:multistatus>"#,
        );
        let value = result_json(davbridge_parse_multistatus(body.as_ptr(), cstr("resource").as_ptr()));
        assert_eq!(value[0]["href"], "/files/a.txt");
        assert_eq!(value[0]["etag"], "\"1\"");
        assert_eq!(value[0]["contentLength"], 3);
    }

    #[test]
    fn parse_multistatus_rejects_unknown_kind() {
        let result = davbridge_parse_multistatus(cstr("<x/>").as_ptr(), cstr("journal").as_ptr());
        assert_eq!(unsafe { (*result).error_code }, FfiErrorCode::InvalidParameter);
        davbridge_free_result(result);

        let result = davbridge_parse_multistatus(std::ptr::null(), cstr("event").as_ptr());
        assert_eq!(unsafe { (*result).error_code }, FfiErrorCode::NullArg);
        davbridge_free_result(result);
    }

    // --- batch via callback ---

    /// What a scripted host records and answers.
    struct Host {
        seen: RefCell<Vec<(String, String)>>,
        status: u16,
        headers: Vec<FfiHeader>,
        body: &'static [u8],
        fail_with: Option<(CString, CString)>,
    }

    unsafe extern "C" fn scripted_send(
        user_data: *mut c_void,
        request: *const FfiHttpRequest,
        response: *mut FfiHttpResponse,
    ) -> i32 {
        let host = unsafe { &*(user_data as *const Host) };
        let req = unsafe { &*request };
        host.seen.borrow_mut().push((read(req.method_name), read(req.url)));

        let resp = unsafe { &mut *response };
        if let Some((code, message)) = &host.fail_with {
            resp.error_code = code.as_ptr();
            resp.error_message = message.as_ptr();
            return 1;
        }
        resp.status = host.status;
        resp.headers = host.headers.as_ptr();
        resp.headers_len = host.headers.len() as u32;
        resp.body = host.body.as_ptr();
        resp.body_len = host.body.len();
        0
    }

    fn host(status: u16, body: &'static [u8]) -> Host {
        Host {
            seen: RefCell::new(Vec::new()),
            status,
            headers: Vec::new(),
            body,
            fail_with: None,
        }
    }

    fn run(host: &Host, tasks: &str, continue_on_fail: bool) -> *mut FfiDavResult {
        davbridge_run_batch(
            cstr(CREDENTIAL).as_ptr(),
            cstr(tasks).as_ptr(),
            continue_on_fail,
            Some(scripted_send),
            host as *const Host as *mut c_void,
        )
    }

    #[test]
    fn run_batch_uses_host_transport() {
        let key = cstr("ETag");
        let value = cstr("\"v2\"");
        let mut h = host(201, b"");
        h.headers.push(FfiHeader {
            key: key.as_ptr() as *mut c_char,
            value: value.as_ptr() as *mut c_char,
        });

        let tasks = r#"[{"operation":{"resource":"addressBook","operation":"createContact","addressBookPath":"/addressbooks/alice/contacts/","contactId":"c1","vcardData":"BEGIN:VCARD\r\nEND:VCARD\r\n"},"item":{"json":{"row":1}}}]"#;
        let value = result_json(run(&h, tasks, false));

        assert_eq!(value[0]["json"]["row"], 1);
        assert_eq!(value[0]["json"]["success"], true);
        assert_eq!(value[0]["json"]["etag"], "\"v2\"");
        assert_eq!(value[0]["pairedItem"], 0);
        assert_eq!(
            h.seen.borrow().as_slice(),
            &[(
                "PUT".to_string(),
                "https://dav.example.com/remote.php/dav/addressbooks/alice/contacts/c1.vcf".to_string()
            )]
        );
    }

    #[test]
    fn host_transport_failure_is_translated() {
        let mut h = host(0, b"");
        h.fail_with = Some((cstr("ENOTFOUND"), cstr("getaddrinfo failed")));

        let tasks = r#"[{"operation":{"resource":"file","operation":"delete","path":"/files/a.txt"},"item":{"json":{}}}]"#;
        let result = run(&h, tasks, false);
        let r = unsafe { &*result };
        assert_eq!(r.error_code, FfiErrorCode::ItemFailed);
        assert!(r.json.is_null());
        let message = read(r.error_message);
        assert!(message.starts_with("Host not found"), "{message}");
        assert!(message.ends_with("[item 0]"), "{message}");
        davbridge_free_result(result);
    }

    #[test]
    fn run_batch_continue_on_fail_records_errors() {
        let h = host(404, b"missing");
        let tasks = r#"[
            {"operation":{"resource":"file","operation":"delete","path":"/files/a.txt"},"item":{"json":{"n":0}}},
            {"operation":{"resource":"file","operation":"delete","path":"/files/b.txt"},"item":{"json":{"n":1}}}
        ]"#;
        let value = result_json(run(&h, tasks, true));
        let items = value.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1]["json"]["n"], 1);
        assert!(items[1]["json"]["error"].as_str().unwrap().starts_with("HTTP 404"));
        assert_eq!(h.seen.borrow().len(), 2);
    }

    #[test]
    fn run_batch_reports_invalid_credential() {
        let h = host(200, b"");
        let result = davbridge_run_batch(
            cstr(r#"{"baseUrl":"","username":"a","password":"b"}"#).as_ptr(),
            cstr("[]").as_ptr(),
            true,
            Some(scripted_send),
            &h as *const Host as *mut c_void,
        );
        assert_eq!(unsafe { (*result).error_code }, FfiErrorCode::InvalidCredential);
        davbridge_free_result(result);
        assert!(h.seen.borrow().is_empty());
    }

    #[test]
    fn run_batch_null_args() {
        let result = davbridge_run_batch(
            cstr(CREDENTIAL).as_ptr(),
            cstr("[]").as_ptr(),
            false,
            None,
            std::ptr::null_mut(),
        );
        assert_eq!(unsafe { (*result).error_code }, FfiErrorCode::NullArg);
        davbridge_free_result(result);
    }

    #[test]
    fn free_functions_accept_null() {
        davbridge_free_result(std::ptr::null_mut());
        davbridge_free_string(std::ptr::null_mut());
        davbridge_free_request(std::ptr::null_mut());
    }
    #[test]
    fn stopped_batch_reports_http_status() {
        let h = host(404, b"");
        let tasks = r#"[{"operation":{"resource":"file","operation":"delete","path":"/files/a.txt"},"item":{"json":{}}}]"#;
        let result = run(&h, tasks, false);
        let r = unsafe { &*result };
        assert_eq!(r.error_code, FfiErrorCode::ItemFailed);
        assert_eq!(r.http_status, 404);
        davbridge_free_result(result);
    }

    #[test]
    fn nul_in_header_fails_the_item() {
        let op = r#"{"resource":"calendar","operation":"deleteEvent","calendarPath":"/cal/","eventId":"e1","etag":"a\u0000b"}"#;

        let ctx = davbridge_context_new(cstr(CREDENTIAL).as_ptr());
        assert!(davbridge_build_request(ctx, cstr(op).as_ptr()).is_null());
        davbridge_context_free(ctx);

        let h = host(204, b"");
        let tasks = format!(r#"[{{"operation":{op},"item":{{"json":{{}}}}}}]"#);
        let value = result_json(run(&h, &tasks, true));
        let message = value[0]["json"]["error"].as_str().unwrap();
        assert!(message.contains("header 'If-Match' contains a NUL byte"), "{message}");
        assert!(h.seen.borrow().is_empty());
    }

    // --- batch via callback over real HTTP ---

    mod over_http {
        use super::*;
        use std::net::SocketAddr;

        use davbridge_core::http::HttpMethod;
        use davbridge_core::{TransportConfig, UreqTransport};

        fn start_server() -> SocketAddr {
            let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = std_listener.local_addr().unwrap();
            std_listener.set_nonblocking(true).unwrap();

            std::thread::spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                rt.block_on(async {
                    let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
                    mock_server::run_with_credentials(listener, "alice", "s3cret").await
                })
                .unwrap();
            });

            addr
        }

        /// Response storage that outlives each callback, as the ABI requires.
        #[derive(Default)]
        struct Held {
            strings: Vec<CString>,
            headers: Vec<FfiHeader>,
            body: Vec<u8>,
        }

        struct UreqHost {
            transport: UreqTransport,
            held: RefCell<Held>,
        }

        fn core_method(m: FfiHttpMethod) -> HttpMethod {
            match m {
                FfiHttpMethod::Get => HttpMethod::Get,
                FfiHttpMethod::Put => HttpMethod::Put,
                FfiHttpMethod::Delete => HttpMethod::Delete,
                FfiHttpMethod::Propfind => HttpMethod::Propfind,
                FfiHttpMethod::Report => HttpMethod::Report,
                FfiHttpMethod::Mkcol => HttpMethod::Mkcol,
                FfiHttpMethod::Move => HttpMethod::Move,
                FfiHttpMethod::Copy => HttpMethod::Copy,
            }
        }

        unsafe extern "C" fn ureq_send(
            user_data: *mut c_void,
            request: *const FfiHttpRequest,
            response: *mut FfiHttpResponse,
        ) -> i32 {
            let host = unsafe { &*(user_data as *const UreqHost) };
            let req = unsafe { &*request };

            let mut core_req = HttpRequest::new(core_method(req.method), read(req.url));
            if req.headers_len > 0 {
                for h in unsafe { std::slice::from_raw_parts(req.headers, req.headers_len as usize) } {
                    core_req = core_req.with_header(&read(h.key), read(h.value));
                }
            }
            if !req.body.is_null() {
                core_req = core_req.with_body(unsafe { std::slice::from_raw_parts(req.body, req.body_len) }.to_vec());
            }

            let mut held = host.held.borrow_mut();
            *held = Held::default();
            let resp = unsafe { &mut *response };

            match host.transport.send(&core_req) {
                Ok(r) => {
                    for (k, v) in &r.headers {
                        let key = CString::new(k.as_str()).unwrap();
                        let value = CString::new(v.as_str()).unwrap();
                        held.headers.push(FfiHeader {
                            key: key.as_ptr() as *mut c_char,
                            value: value.as_ptr() as *mut c_char,
                        });
                        held.strings.push(key);
                        held.strings.push(value);
                    }
                    held.body = r.body;
                    resp.status = r.status;
                    resp.headers = held.headers.as_ptr();
                    resp.headers_len = held.headers.len() as u32;
                    resp.body = held.body.as_ptr();
                    resp.body_len = held.body.len();
                    0
                }
                Err(e) => {
                    let code = CString::new(e.code.unwrap_or_default()).unwrap();
                    let message = CString::new(e.message).unwrap();
                    resp.error_code = code.as_ptr();
                    resp.error_message = message.as_ptr();
                    held.strings.push(code);
                    held.strings.push(message);
                    1
                }
            }
        }

        fn run_http(addr: SocketAddr, password: &str, tasks: serde_json::Value) -> *mut FfiDavResult {
            let credential = Credential::new(&format!("http://{addr}/"), "alice", password);
            let host = UreqHost {
                transport: UreqTransport::authenticated(&credential, &TransportConfig::default()),
                held: RefCell::new(Held::default()),
            };
            let credential_json = cstr(&serde_json::to_string(&credential).unwrap());
            let tasks_json = cstr(&tasks.to_string());
            davbridge_run_batch(
                credential_json.as_ptr(),
                tasks_json.as_ptr(),
                false,
                Some(ureq_send),
                &host as *const UreqHost as *mut c_void,
            )
        }

        #[test]
        fn upload_then_list() {
            let addr = start_server();
            let tasks = serde_json::json!([
                {
                    "operation": {"resource": "file", "operation": "upload", "path": "/files/hello.txt", "content": "hi"},
                    "item": {"json": {}}
                },
                {
                    "operation": {"resource": "file", "operation": "getProperties", "path": "/files/", "depth": "1"},
                    "item": {"json": {}}
                }
            ]);

            let items = result_json(run_http(addr, "s3cret", tasks));
            assert_eq!(items[0]["json"]["success"], true);
            assert!(items[0]["json"]["etag"].as_str().is_some());
            let resources = items[1]["json"]["resources"].as_array().unwrap();
            assert!(resources.iter().any(|r| r["href"] == "/files/hello.txt"));
        }

        #[test]
        fn unauthorized_status_reaches_envelope() {
            let addr = start_server();
            let tasks = serde_json::json!([
                {"operation": {"resource": "file", "operation": "getProperties", "path": "/"}, "item": {"json": {}}}
            ]);

            let result = run_http(addr, "wrong", tasks);
            let r = unsafe { &*result };
            assert_eq!(r.error_code, FfiErrorCode::ItemFailed);
            assert_eq!(r.http_status, 401);
            let message = read(r.error_message);
            assert!(message.starts_with("HTTP 401"), "{message}");
            davbridge_free_result(result);
        }
    }
}
