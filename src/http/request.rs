//! Outbound HTTP/1.1 request builder.
//!
//! Provides a fluent builder API for constructing requests and serializing
//! them to a byte buffer for transmission over TCP.

use bytes::{BufMut, Bytes, BytesMut};
use url::{Position, Url};

use super::{Headers, Method};

/// An HTTP/1.1 request, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use streamprobe::http::{Method, Request};
/// use url::Url;
///
/// let url = Url::parse("http://api.dev.test/stream/42?x=1").unwrap();
/// let request = Request::new(Method::Get, url).bearer_auth("secret");
///
/// let bytes = request.to_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("GET /stream/42?x=1 HTTP/1.1\r\n"));
/// assert!(text.contains("Host: api.dev.test\r\n"));
/// assert!(text.contains("Authorization: Bearer secret\r\n"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: Headers,
    body: Bytes,
    keep_alive: bool,
}

impl Request {
    /// Creates a request with no headers and an empty body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Headers::new(),
            body: Bytes::new(),
            keep_alive: false,
        }
    }

    /// Shorthand for `Request::new(Method::Get, url)`.
    pub fn get(url: Url) -> Self {
        Self::new(Method::Get, url)
    }

    /// Appends a request header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets `Authorization: Bearer <token>`, replacing any previous value.
    #[must_use]
    pub fn bearer_auth(mut self, token: &str) -> Self {
        self.headers.set("Authorization", format!("Bearer {token}"));
        self
    }

    /// Sets the request body from raw bytes.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Controls whether `Connection: keep-alive` or `Connection: close` is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// Retargets the request at `url`, as done when following a redirect.
    pub(crate) fn redirect_to(&mut self, url: Url, rewrite_to_get: bool) {
        if rewrite_to_get {
            self.method = Method::Get;
            self.body = Bytes::new();
            self.headers.remove("content-type");
            self.headers.remove("content-length");
        }
        self.url = url;
    }

    /// The origin-form request target: path plus query, never the fragment.
    pub fn target(&self) -> &str {
        &self.url[Position::BeforePath..Position::AfterQuery]
    }

    /// The `Host` header value; the port is included only when it is not the
    /// scheme default.
    pub fn host_header(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        }
    }

    /// Serializes the request into a `BytesMut` buffer using HTTP/1.1 wire format.
    ///
    /// Automatically adds `Host` (unless set), `Content-Length` when a body is
    /// present, and `Connection`.
    pub fn to_bytes(&self) -> BytesMut {
        let estimated_size = 128 + self.headers.len() * 64 + self.body.len();
        let mut buf = BytesMut::with_capacity(estimated_size);

        buf.put(format!("{} {} HTTP/1.1\r\n", self.method, self.target()).as_bytes());

        if !self.headers.contains("host") {
            buf.put(format!("Host: {}\r\n", self.host_header()).as_bytes());
        }

        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }

        if !self.body.is_empty() && !self.headers.contains("content-length") {
            buf.put(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }

        if !self.headers.contains("connection") {
            let connection = if self.keep_alive {
                "keep-alive"
            } else {
                "close"
            };
            buf.put(format!("Connection: {connection}\r\n").as_bytes());
        }

        buf.put(&b"\r\n"[..]);
        buf.put(self.body.as_ref());
        buf
    }
}
