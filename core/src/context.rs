//! The immutable per-run context: validated base URL and credential.
//!
//! # Design
//! Built once per batch run and passed by reference to every component.
//! Nothing in the crate keeps ambient connection state.

use url::Url;

use crate::config::Credential;
use crate::error::DavError;
use crate::path::{self, AbsoluteUrlPolicy};

#[derive(Debug, Clone)]
pub struct DavContext {
    base_root: String,
    origin: url::Origin,
    credential: Credential,
}

impl DavContext {
    /// Validate the credential's base URL and derive the base root.
    pub fn new(credential: Credential) -> Result<Self, DavError> {
        let base_url = credential.base_url.trim();
        if base_url.is_empty() {
            return Err(DavError::InvalidCredential(
                "the base URL is missing".to_string(),
            ));
        }
        if !path::is_absolute_url(base_url) {
            return Err(DavError::InvalidCredential(format!(
                "the base URL '{base_url}' must start with http:// or https://"
            )));
        }
        let parsed = Url::parse(base_url).map_err(|e| {
            DavError::InvalidCredential(format!("the base URL '{base_url}' is not valid: {e}"))
        })?;

        Ok(Self {
            base_root: base_url.trim_end_matches('/').to_string(),
            origin: parsed.origin(),
            credential,
        })
    }

    /// Configured base URL without trailing slashes.
    pub fn base_root(&self) -> &str {
        &self.base_root
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Absolute URL for a user-supplied path.
    ///
    /// Absolute URLs that survive the policy must still share the base
    /// origin, so an authenticating transport never sees a foreign host.
    pub fn resolve(
        &self,
        path: &str,
        policy: AbsoluteUrlPolicy,
        field: &str,
    ) -> Result<String, DavError> {
        let normalized = path::normalize(path, policy, field)?;
        if !path::is_absolute_url(&normalized) {
            return Ok(format!("{}{}", self.base_root, normalized));
        }
        if !self.same_origin(&normalized) {
            return Err(DavError::CrossOrigin {
                destination: normalized,
                expected: self.origin(),
            });
        }
        Ok(normalized)
    }

    /// Whether `url` shares scheme, host and port with the base URL.
    pub fn same_origin(&self, url: &str) -> bool {
        Url::parse(url)
            .map(|u| u.origin() == self.origin)
            .unwrap_or(false)
    }

    /// Origin of the base URL as `scheme://host[:port]`.
    pub fn origin(&self) -> String {
        self.origin.ascii_serialization()
    }
}
