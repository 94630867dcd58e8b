//! Browser-side CORS rules, applied to outbound requests.
//!
//! [`CorsCheck`] plays the part of the user agent: it stamps requests with
//! `Origin`, decides whether a preflight is needed, builds the `OPTIONS`
//! preflight, and validates the `Access-Control-*` headers the server sends
//! back. A failed check is reported as a plain reason string; the client
//! wraps it into [`ConnectionError::Cors`](crate::error::ConnectionError::Cors).

use crate::http::{Headers, Method, Request, StatusCode};

/// Request headers a page may set without triggering a preflight.
const SAFELISTED_HEADERS: &[&str] = &["accept", "accept-language", "content-language"];

/// `Content-Type` values that keep a request "simple".
const SAFELISTED_CONTENT_TYPES: &[&str] = &[
    "application/x-www-form-urlencoded",
    "multipart/form-data",
    "text/plain",
];

/// Headers the user agent controls; they never count as author headers.
const AGENT_HEADERS: &[&str] = &[
    "host",
    "connection",
    "content-length",
    "origin",
    "cache-control",
];

/// CORS enforcement for one page origin.
///
/// # Examples
///
/// ```
/// use streamprobe::http::Request;
/// use streamprobe::security::CorsCheck;
/// use url::Url;
///
/// let cors = CorsCheck::new("http://localhost:8000");
/// let url = Url::parse("http://api.dev.test/stream/1").unwrap();
///
/// assert!(!cors.needs_preflight(&Request::get(url.clone())));
/// assert!(cors.needs_preflight(&Request::get(url).bearer_auth("t")));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsCheck {
    page_origin: String,
}

impl CorsCheck {
    /// Creates a check for pages served from `page_origin`
    /// (e.g. `"http://localhost:8000"`).
    pub fn new(page_origin: impl Into<String>) -> Self {
        Self {
            page_origin: page_origin.into(),
        }
    }

    pub fn page_origin(&self) -> &str {
        &self.page_origin
    }

    /// Sets the `Origin` header on `request`.
    pub fn stamp(&self, request: &mut Request) {
        request.headers_mut().set("Origin", self.page_origin.as_str());
    }

    /// Lowercased, sorted names of the author headers that are not safelisted.
    pub fn unsafe_header_names(&self, request: &Request) -> Vec<String> {
        let mut names: Vec<String> = request
            .headers()
            .iter()
            .filter(|(name, value)| !is_safelisted(name, value))
            .map(|(name, _)| name.to_ascii_lowercase())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Returns `true` if a browser would send a preflight before `request`.
    pub fn needs_preflight(&self, request: &Request) -> bool {
        !request.method().is_cors_safelisted() || !self.unsafe_header_names(request).is_empty()
    }

    /// Builds the `OPTIONS` preflight for `request`.
    pub fn preflight_for(&self, request: &Request) -> Request {
        let mut preflight = Request::new(Method::Options, request.url().clone())
            .header("Origin", self.page_origin.as_str())
            .header("Access-Control-Request-Method", request.method().as_str());
        let names = self.unsafe_header_names(request);
        if !names.is_empty() {
            preflight = preflight.header("Access-Control-Request-Headers", names.join(","));
        }
        preflight
    }

    /// Validates a preflight answer for `request`.
    pub fn check_preflight(
        &self,
        request: &Request,
        status: StatusCode,
        headers: &Headers,
    ) -> Result<(), String> {
        if !status.is_success() {
            return Err(format!("preflight answered {status}"));
        }
        self.check_allow_origin(headers)?;

        let method = request.method();
        if !method.is_cors_safelisted() {
            let allowed = headers
                .get_list("access-control-allow-methods")
                .any(|m| m == "*" || m.eq_ignore_ascii_case(method.as_str()));
            if !allowed {
                return Err(format!("method {method} not allowed by preflight"));
            }
        }

        let wildcard = headers
            .get_list("access-control-allow-headers")
            .any(|h| h == "*");
        for name in self.unsafe_header_names(request) {
            let listed = headers
                .get_list("access-control-allow-headers")
                .any(|h| h.eq_ignore_ascii_case(&name));
            // `*` never covers Authorization; it must be listed by name.
            if !(listed || (wildcard && name != "authorization")) {
                return Err(format!("header {name:?} not allowed by preflight"));
            }
        }
        Ok(())
    }

    /// Validates that an actual response may be read by the page.
    pub fn check_response(&self, headers: &Headers) -> Result<(), String> {
        self.check_allow_origin(headers)
    }

    fn check_allow_origin(&self, headers: &Headers) -> Result<(), String> {
        let mut values = headers.get_all("access-control-allow-origin");
        match (values.next(), values.next()) {
            (None, _) => Err("missing Access-Control-Allow-Origin".to_owned()),
            (Some(_), Some(_)) => Err("multiple Access-Control-Allow-Origin values".to_owned()),
            (Some(value), None) if value == "*" || value == self.page_origin => Ok(()),
            (Some(value), None) => Err(format!(
                "Access-Control-Allow-Origin {value:?} does not match {:?}",
                self.page_origin
            )),
        }
    }
}

fn is_safelisted(name: &str, value: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    if AGENT_HEADERS.contains(&lower.as_str()) || SAFELISTED_HEADERS.contains(&lower.as_str()) {
        return true;
    }
    if lower == "content-type" {
        let essence = value.split(';').next().unwrap_or_default().trim();
        return SAFELISTED_CONTENT_TYPES
            .iter()
            .any(|ct| ct.eq_ignore_ascii_case(essence));
    }
    false
}
