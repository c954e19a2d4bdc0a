//! Credential and run configuration supplied by the host.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DavError;

/// Basic-auth credential for one DAV server.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credential {
    pub fn new(base_url: &str, username: &str, password: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    /// Read `DAV_BASE_URL`, `DAV_USERNAME` and `DAV_PASSWORD`.
    pub fn from_env() -> Result<Self, DavError> {
        let base_url = std::env::var("DAV_BASE_URL")
            .map_err(|_| DavError::InvalidCredential("DAV_BASE_URL is not set".to_string()))?;
        Ok(Self {
            base_url,
            username: std::env::var("DAV_USERNAME").unwrap_or_default(),
            password: std::env::var("DAV_PASSWORD").unwrap_or_default(),
        })
    }
}

/// Where a batch run gets its credential from. Read once per run.
pub trait CredentialSource {
    fn credential(&self) -> Result<Credential, DavError>;
}

impl CredentialSource for Credential {
    fn credential(&self) -> Result<Credential, DavError> {
        Ok(self.clone())
    }
}

/// Run-level switches.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    #[serde(default)]
    pub continue_on_fail: bool,
}

/// Settings for the bundled `UreqTransport`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            user_agent: default_user_agent(),
        }
    }
}

fn default_user_agent() -> String {
    format!("davbridge/{}", env!("CARGO_PKG_VERSION"))
}
