//! Async HTTP/1.1 client using Tokio.
//!
//! Opens one TCP connection per exchange, writes a [`Request`], parses the
//! [`ResponseHead`], and follows redirects the way `fetch` does. Bodies are
//! either buffered ([`HttpClient::fetch`]) or handed back for incremental
//! reading ([`HttpClient::open`]), which is what event streams need.

use std::borrow::Cow;

use bytes::{Buf, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

use crate::config::ClientSettings;
use crate::error::{ConnectionError, Result};
use crate::http::{Headers, Request, ResponseError, ResponseHead, StatusCode};
use crate::security::CorsCheck;

pub mod body;

pub use body::Body;

/// Largest response head we buffer before rejecting the response (64 KiB).
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// A response whose body has been read completely.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Final URL after redirects.
    pub url: Url,
    pub status: StatusCode,
    pub headers: Headers,
    pub body: Bytes,
    /// `true` if at least one redirect was followed.
    pub redirected: bool,
}

impl FetchResponse {
    /// The body decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// The body parsed as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// A response whose body is still on the wire.
#[derive(Debug)]
pub struct StreamingResponse {
    /// Final URL after redirects.
    pub url: Url,
    pub status: StatusCode,
    pub headers: Headers,
    pub redirected: bool,
    pub body: Body,
}

impl StreamingResponse {
    /// The lowercased MIME essence of `Content-Type`.
    pub fn content_type(&self) -> Option<String> {
        let value = self.headers.get("content-type")?;
        let essence = value.split(';').next().unwrap_or_default().trim();
        Some(essence.to_ascii_lowercase())
    }
}

/// The HTTP client.
///
/// # Examples
///
/// ```rust,no_run
/// use streamprobe::client::HttpClient;
/// use streamprobe::config::ClientSettings;
/// use streamprobe::http::Request;
/// use url::Url;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = HttpClient::new(ClientSettings::default());
///     let response = client
///         .fetch(Request::get(Url::parse("http://api.dev.test")?))
///         .await?;
///     println!("{} {}", response.status, response.text());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct HttpClient {
    settings: ClientSettings,
    cors: Option<CorsCheck>,
}

impl HttpClient {
    pub fn new(settings: ClientSettings) -> Self {
        Self {
            settings,
            cors: None,
        }
    }

    /// Enforces CORS rules for every request this client sends.
    #[must_use]
    pub fn with_cors(mut self, cors: CorsCheck) -> Self {
        self.cors = Some(cors);
        self
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn cors(&self) -> Option<&CorsCheck> {
        self.cors.as_ref()
    }

    /// Sends `request`, follows redirects, and buffers the final body.
    ///
    /// # Errors
    ///
    /// Any transport, parse, redirect, or CORS failure, and
    /// [`ConnectionError::BodyTooLarge`] past `max_body_bytes`.
    pub async fn fetch(&self, request: Request) -> Result<FetchResponse> {
        let response = self.open(request).await?;
        let body = response.body.collect(self.settings.max_body_bytes).await?;
        Ok(FetchResponse {
            url: response.url,
            status: response.status,
            headers: response.headers,
            body,
            redirected: response.redirected,
        })
    }

    /// Sends `request`, follows redirects, and returns as soon as the final
    /// response head has arrived.
    pub async fn open(&self, mut request: Request) -> Result<StreamingResponse> {
        let mut redirects = 0;

        loop {
            if let Some(cors) = &self.cors {
                self.preflight(cors, &mut request).await?;
            }

            let (head, body) = self.exchange(&request).await?;
            let url = request.url().clone();

            if let Some(cors) = &self.cors {
                cors.check_response(head.headers())
                    .map_err(|reason| ConnectionError::Cors {
                        url: url.clone(),
                        reason,
                    })?;
            }

            let status = head.status();
            if !status.is_followable_redirect() {
                return Ok(StreamingResponse {
                    url,
                    status,
                    headers: head.headers().clone(),
                    redirected: redirects > 0,
                    body,
                });
            }

            let location = head
                .location()
                .ok_or_else(|| ConnectionError::MissingLocation {
                    status,
                    url: url.clone(),
                })?;
            let next = url.join(location)?;

            redirects += 1;
            if redirects > self.settings.max_redirects {
                return Err(ConnectionError::TooManyRedirects {
                    limit: self.settings.max_redirects,
                });
            }

            if next.origin() != url.origin() && request.headers_mut().remove("authorization") {
                warn!(from = %url, to = %next, "dropping Authorization on cross-origin redirect");
            }

            debug!(%status, from = %url, to = %next, "following redirect");
            let rewrite = status.rewrites_method(request.method());
            request.redirect_to(next, rewrite);
        }
    }

    async fn preflight(
        &self,
        cors: &CorsCheck,
        request: &mut Request,
    ) -> Result<()> {
        cors.stamp(request);
        if !cors.needs_preflight(request) {
            return Ok(());
        }

        let preflight = cors.preflight_for(request);
        debug!(url = %request.url(), "sending CORS preflight");
        let (head, _body) = self.exchange(&preflight).await?;
        cors.check_preflight(request, head.status(), head.headers())
            .map_err(|reason| ConnectionError::Cors {
                url: request.url().clone(),
                reason,
            })
    }

    /// One request/response exchange on a fresh connection.
    async fn exchange(&self, request: &Request) -> Result<(ResponseHead, Body)> {
        let url = request.url();
        if url.scheme() != "http" {
            return Err(ConnectionError::UnsupportedScheme {
                scheme: url.scheme().to_owned(),
            });
        }
        let host = url.host_str().ok_or(url::ParseError::EmptyHost)?;
        let port = url.port_or_known_default().unwrap_or(80);
        let addr = format!("{host}:{port}");

        let connect_timeout = self.settings.connect_timeout();
        let mut stream = timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ConnectionError::Timeout {
                stage: "connect",
                elapsed: connect_timeout,
            })?
            .map_err(|source| ConnectionError::Connect {
                addr: addr.clone(),
                source,
            })?;
        stream.set_nodelay(true)?;

        debug!(method = %request.method(), url = %url, "sending request");
        stream.write_all(&request.to_bytes()).await?;
        stream.flush().await?;

        let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
        let response_timeout = self.settings.response_timeout();
        let head = timeout(response_timeout, read_head(&mut stream, &mut buf))
            .await
            .map_err(|_| ConnectionError::Timeout {
                stage: "response head",
                elapsed: response_timeout,
            })??;

        debug!(status = %head.status(), url = %url, "response head received");
        let kind = head.body_kind(request.method())?;
        Ok((head, Body::new(stream, buf, kind)))
    }
}

/// Reads until a final (non-`1xx`) response head is parsed; leftover bytes
/// stay in `buf`.
async fn read_head(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
) -> Result<ResponseHead> {
    loop {
        if !buf.is_empty() {
            match ResponseHead::parse(&buf[..]) {
                Ok((head, offset)) => {
                    buf.advance(offset);
                    if head.is_interim() {
                        debug!(status = %head.status(), "skipping interim response");
                        continue;
                    }
                    return Ok(head);
                }
                Err(ResponseError::Incomplete) => {}
                Err(e) => return Err(e.into()),
            }
        }

        if buf.len() > MAX_HEAD_SIZE {
            return Err(ConnectionError::MalformedResponse {
                reason: "response head too large",
            });
        }

        if stream.read_buf(buf).await? == 0 {
            return Err(ConnectionError::MalformedResponse {
                reason: "connection closed before a response head arrived",
            });
        }
    }
}
