//! Blocking `HttpTransport` backed by ureq.
//!
//! # Design
//! The agent never turns HTTP status codes into errors; non-2xx responses
//! come back as data and the core interprets them. Basic-Auth is attached
//! only to requests for the credential's own origin.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;
use ureq::http::{Method, Request};
use url::Url;

use crate::config::{Credential, TransportConfig};
use crate::error::{TransportError, TransportErrorKind};
use crate::http::{HttpRequest, HttpResponse, HttpTransport};

const MAX_BODY_BYTES: u64 = 512 * 1024 * 1024;

pub struct UreqTransport {
    agent: ureq::Agent,
    origin: Option<url::Origin>,
    authorization: Option<String>,
}

impl std::fmt::Debug for UreqTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UreqTransport")
            .field("origin", &self.origin)
            .field("authenticated", &self.authorization.is_some())
            .finish()
    }
}

impl UreqTransport {
    /// Transport that sends no credentials.
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            agent: build_agent(config),
            origin: None,
            authorization: None,
        }
    }

    /// Transport that authenticates requests to `credential`'s origin.
    pub fn authenticated(credential: &Credential, config: &TransportConfig) -> Self {
        let origin = Url::parse(&credential.base_url).ok().map(|u| u.origin());
        let token = STANDARD.encode(format!("{}:{}", credential.username, credential.password));
        Self {
            agent: build_agent(config),
            origin,
            authorization: Some(format!("Basic {token}")),
        }
    }

    fn authorization_for(&self, url: &str) -> Option<&str> {
        let origin = self.origin.as_ref()?;
        let target = Url::parse(url).ok()?.origin();
        if &target == origin {
            self.authorization.as_deref()
        } else {
            None
        }
    }
}

fn build_agent(config: &TransportConfig) -> ureq::Agent {
    ureq::Agent::config_builder()
        .http_status_as_error(false)
        .allow_non_standard_methods(true)
        .timeout_global(config.timeout_secs.map(Duration::from_secs))
        .user_agent(config.user_agent.as_str())
        .build()
        .new_agent()
}

impl HttpTransport for UreqTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| TransportError::new(TransportErrorKind::Other, e.to_string()))?;
        let mut builder = Request::builder().method(method).uri(request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let authenticated = match self.authorization_for(&request.url) {
            Some(auth) => {
                builder = builder.header("Authorization", auth);
                true
            }
            None => false,
        };
        debug!(
            method = request.method.as_str(),
            url = %request.url,
            authenticated,
            "ureq request"
        );

        let result = match &request.body {
            Some(body) => {
                let http_request = builder.body(body.clone()).map_err(invalid_request)?;
                self.agent.run(http_request)
            }
            None => {
                let http_request = builder.body(()).map_err(invalid_request)?;
                self.agent.run(http_request)
            }
        };
        let mut response = result.map_err(map_ureq_error)?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .body_mut()
            .with_config()
            .limit(MAX_BODY_BYTES)
            .read_to_vec()
            .map_err(map_ureq_error)?;

        Ok(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().map(str::to_string),
            headers,
            body,
        })
    }
}

fn invalid_request(error: ureq::http::Error) -> TransportError {
    TransportError::new(TransportErrorKind::InvalidUrl, format!("Invalid URL: {error}"))
}

fn map_ureq_error(error: ureq::Error) -> TransportError {
    let message = error.to_string();
    let kind = match &error {
        ureq::Error::HostNotFound => TransportErrorKind::HostNotFound,
        ureq::Error::Timeout(_) => TransportErrorKind::TimedOut,
        ureq::Error::BadUri(_) => TransportErrorKind::InvalidUrl,
        ureq::Error::Io(io) => match io.kind() {
            std::io::ErrorKind::ConnectionRefused => TransportErrorKind::ConnectionRefused,
            std::io::ErrorKind::TimedOut => TransportErrorKind::TimedOut,
            _ => TransportErrorKind::Other,
        },
        _ => TransportErrorKind::Other,
    };
    TransportError::new(kind, message)
}
