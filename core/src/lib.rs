//! WebDAV, CalDAV and CardDAV request/response core for workflow hosts.
//!
//! # Overview
//! Builds DAV requests (path normalization, URL composition, XML bodies) and
//! scrapes multi-status responses into structured records. The HTTP round
//! trip is delegated to an `HttpTransport` supplied by the caller; the bundled
//! `UreqTransport` covers hosts without their own HTTP stack.
//!
//! # Design
//! - `DavContext` is the immutable per-run state: the validated base URL and
//!   the credential. It is built once before any item is processed.
//! - Each operation is split into `operation::prepare` (request only) and
//!   the response interpretation inside `operation::dispatch`, so the I/O
//!   boundary stays explicit.
//! - `BatchRunner` applies the per-item failure policy and keeps outputs
//!   paired with their inputs.
//! - Multi-status extraction is pattern based with literal `D:`/`C:`
//!   prefixes. It is not a general XML parser.

pub mod batch;
pub mod binary;
pub mod compose;
pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod http;
pub mod operation;
pub mod path;
pub mod translate;
pub mod transport;
pub mod xml;

pub use batch::{BatchRunner, OutputItem};
pub use binary::{BinaryData, BinaryRef, InlineBinary};
pub use config::{Credential, CredentialSource, RunOptions, TransportConfig};
pub use context::DavContext;
pub use error::{DavError, FriendlyError, TransportError, TransportErrorKind};
pub use extract::{ExtractKind, ParsedResource};
pub use http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
pub use operation::{Operation, Task, WorkItem};
pub use transport::UreqTransport;
