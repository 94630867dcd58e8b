//! Connection and transport configuration.
//!
//! [`ConnectionConfig`] names the remote origin, the stream resource and the
//! stream-opening strategy; [`ClientSettings`] bounds the transport. Both
//! deserialize from JSON so a run can be described in a file, and the binary
//! layers CLI flags on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Origin the probe talks to when none is configured.
pub const DEFAULT_ORIGIN: &str = "http://api.dev.test";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

/// How the event stream is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamMode {
    /// Open the stream directly against `<origin>/stream/<id>`, no custom headers.
    #[default]
    Direct,
    /// Fetch the stream URL with `Authorization: Bearer <token>` first, then
    /// open the stream against the resolved response URL.
    HeaderPriming,
}

/// Where to connect and how to open the stream. Fixed for the lifetime of a
/// [`StreamPageClient`](crate::page::StreamPageClient).
///
/// # Examples
///
/// ```
/// use streamprobe::config::{ConnectionConfig, StreamMode};
///
/// let config = ConnectionConfig::from_json_str(r#"{
///     "origin": "http://api.dev.test",
///     "resource_id": "63d61a5319a9f178d5652b4b",
///     "token": "abc",
///     "mode": "header-priming"
/// }"#).unwrap();
///
/// assert_eq!(config.mode, StreamMode::HeaderPriming);
/// assert_eq!(
///     config.stream_url().unwrap().as_str(),
///     "http://api.dev.test/stream/63d61a5319a9f178d5652b4b"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Remote API origin.
    pub origin: Url,
    /// Stream identifier appended as `/stream/<resource_id>`.
    pub resource_id: String,
    /// Bearer token used by [`StreamMode::HeaderPriming`].
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub mode: StreamMode,
    /// Also send the bearer token on the stream connection itself. Off by
    /// default: the priming request carries the token, the stream does not.
    #[serde(default)]
    pub forward_authorization: bool,
    /// Origin of the page the probe pretends to run in. When set, requests
    /// carry `Origin` and CORS rules are enforced.
    #[serde(default)]
    pub page_origin: Option<Url>,
}

impl ConnectionConfig {
    /// Direct-mode config for `origin` and `resource_id`.
    pub fn new(origin: Url, resource_id: impl Into<String>) -> Self {
        Self {
            origin,
            resource_id: resource_id.into(),
            token: None,
            mode: StreamMode::Direct,
            forward_authorization: false,
            page_origin: None,
        }
    }

    /// Switches to header-priming mode with `token`.
    #[must_use]
    pub fn with_header_priming(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self.mode = StreamMode::HeaderPriming;
        self
    }

    #[must_use]
    pub fn with_forward_authorization(mut self, forward: bool) -> Self {
        self.forward_authorization = forward;
        self
    }

    #[must_use]
    pub fn with_page_origin(mut self, page_origin: Url) -> Self {
        self.page_origin = Some(page_origin);
        self
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Checks the invariants the client relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.origin.scheme() != "http" {
            return Err(ConfigError::Invalid {
                field: "origin",
                reason: format!("scheme {:?} is not supported", self.origin.scheme()),
            });
        }
        if self.origin.cannot_be_a_base() || self.origin.host_str().is_none() {
            return Err(ConfigError::Invalid {
                field: "origin",
                reason: "must be an absolute http URL with a host".to_owned(),
            });
        }
        if self.resource_id.is_empty() || self.resource_id.contains('/') {
            return Err(ConfigError::Invalid {
                field: "resource_id",
                reason: "must be a non-empty single path segment".to_owned(),
            });
        }
        if self.mode == StreamMode::HeaderPriming && self.token.is_none() {
            return Err(ConfigError::Invalid {
                field: "token",
                reason: "header-priming mode needs a bearer token".to_owned(),
            });
        }
        if let Some(token) = &self.token {
            if token.chars().any(char::is_control) {
                return Err(ConfigError::Invalid {
                    field: "token",
                    reason: "must not contain control characters".to_owned(),
                });
            }
        }
        Ok(())
    }

    /// `<origin>/stream/<resource_id>`.
    pub fn stream_url(&self) -> Result<Url, ConfigError> {
        let mut url = self.origin.clone();
        url.set_query(None);
        url.set_fragment(None);
        url.path_segments_mut()
            .map_err(|()| ConfigError::Invalid {
                field: "origin",
                reason: "cannot be a base URL".to_owned(),
            })?
            .pop_if_empty()
            .push("stream")
            .push(&self.resource_id);
        Ok(url)
    }

    /// The ASCII serialization of the page origin, if one is configured.
    pub fn page_origin_header(&self) -> Option<String> {
        self.page_origin
            .as_ref()
            .map(|url| url.origin().ascii_serialization())
    }
}

/// Transport limits for [`HttpClient`](crate::client::HttpClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Time allowed for a response head to arrive, in milliseconds.
    pub response_timeout_ms: u64,
    /// Redirects followed per request before giving up.
    pub max_redirects: usize,
    /// Largest buffered (non-streaming) response body.
    pub max_body_bytes: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            response_timeout_ms: 30_000,
            max_redirects: 20,
            max_body_bytes: 8 * 1024 * 1024,
        }
    }
}

impl ClientSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}
