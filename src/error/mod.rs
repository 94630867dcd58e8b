//! Connection error taxonomy.
//!
//! Every fallible operation in the crate returns [`ConnectionError`]. The page
//! client decides per operation whether an error is surfaced or only logged.

use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::http::{ResponseError, StatusCode};
use crate::sse::SseError;

/// Errors produced while talking to the remote origin.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} timed out after {elapsed:?}")]
    Timeout {
        stage: &'static str,
        elapsed: Duration,
    },

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unsupported URL scheme {scheme:?}; only http is supported")]
    UnsupportedScheme { scheme: String },

    #[error(transparent)]
    Response(#[from] ResponseError),

    #[error(transparent)]
    Sse(#[from] SseError),

    #[error("malformed response: {reason}")]
    MalformedResponse { reason: &'static str },

    #[error("response body exceeds maximum allowed size of {max_bytes} bytes")]
    BodyTooLarge { max_bytes: usize },

    #[error("too many redirects (limit {limit})")]
    TooManyRedirects { limit: usize },

    #[error("redirect {status} from {url} has no Location header")]
    MissingLocation { status: StatusCode, url: Url },

    #[error("unexpected status {status} from {url}")]
    UnexpectedStatus { status: StatusCode, url: Url },

    #[error("{url} is not an event stream (Content-Type: {content_type:?})")]
    NotEventStream {
        url: Url,
        content_type: Option<String>,
    },

    #[error("CORS check failed for {url}: {reason}")]
    Cors { url: Url, reason: String },

    #[error("a stream subscription is already active")]
    AlreadySubscribed,

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

pub type Result<T, E = ConnectionError> = std::result::Result<T, E>;
