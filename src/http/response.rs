//! HTTP/1.1 response head parsing using the [`httparse`] crate, plus body
//! framing (`Content-Length`, `chunked`, close-delimited).

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

use super::{Headers, Method, StatusCode};

/// Errors that can occur while parsing an HTTP/1.1 response.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response head is incomplete; more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid Content-Length: {value:?}")]
    InvalidContentLength { value: String },

    #[error("invalid chunked encoding: {reason}")]
    InvalidChunk { reason: &'static str },
}

/// How the body following a response head is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// No body at all (HEAD, 1xx, 204, 304).
    Empty,
    /// Exactly this many bytes.
    Length(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// Everything until the server closes the connection.
    CloseDelimited,
}

/// A parsed HTTP/1.1 status line and header block.
///
/// # Examples
///
/// ```
/// use streamprobe::http::{BodyKind, Method, ResponseHead};
///
/// let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\n\r\ndata: hi\n\n";
/// let (head, offset) = ResponseHead::parse(raw).unwrap();
///
/// assert!(head.status().is_success());
/// assert_eq!(head.content_type().as_deref(), Some("text/event-stream"));
/// assert_eq!(head.body_kind(&Method::Get).unwrap(), BodyKind::CloseDelimited);
/// assert_eq!(&raw[offset..], b"data: hi\n\n");
/// ```
#[derive(Debug, Clone)]
pub struct ResponseHead {
    status: StatusCode,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    reason: String,
    headers: Headers,
}

impl ResponseHead {
    /// Maximum number of headers we accept per response.
    const MAX_HEADERS: usize = 64;

    /// Parse a response head from a byte slice.
    ///
    /// Returns the parsed head and the byte offset at which the body begins.
    ///
    /// # Errors
    ///
    /// - [`ResponseError::Incomplete`]: the `\r\n\r\n` terminator has not arrived yet.
    /// - [`ResponseError::Parse`]: the data is malformed.
    /// - [`ResponseError::MissingField`]: version or status code is absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), ResponseError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw = httparse::Response::new(&mut headers);

        let body_offset = match raw.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(ResponseError::Incomplete),
        };

        let version = raw
            .version
            .ok_or(ResponseError::MissingField { field: "version" })?;
        let code = raw
            .code
            .ok_or(ResponseError::MissingField { field: "status" })?;

        Ok((
            Self {
                status: StatusCode::from_u16(code),
                version,
                reason: raw.reason.unwrap_or_default().to_owned(),
                headers: Headers::from_raw(raw.headers),
            },
            body_offset,
        ))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns `true` for interim `1xx` heads that precede the final response.
    /// `101 Switching Protocols` is final.
    pub fn is_interim(&self) -> bool {
        (100..200).contains(&self.status.as_u16()) && self.status.as_u16() != 101
    }

    /// The `Location` header, if any.
    pub fn location(&self) -> Option<&str> {
        self.headers.get("location")
    }

    /// The lowercased MIME essence of `Content-Type` (parameters stripped).
    pub fn content_type(&self) -> Option<String> {
        let value = self.headers.get("content-type")?;
        let essence = value.split(';').next().unwrap_or_default().trim();
        Some(essence.to_ascii_lowercase())
    }

    /// Determines how the body is framed, given the method of the request
    /// this head answers.
    pub fn body_kind(&self, method: &Method) -> Result<BodyKind, ResponseError> {
        let code = self.status.as_u16();
        if *method == Method::Head || (100..200).contains(&code) || code == 204 || code == 304 {
            return Ok(BodyKind::Empty);
        }

        let chunked = self
            .headers
            .get_list("transfer-encoding")
            .last()
            .is_some_and(|coding| coding.eq_ignore_ascii_case("chunked"));
        if chunked {
            return Ok(BodyKind::Chunked);
        }

        match self.headers.get("content-length") {
            Some(value) => value
                .trim()
                .parse::<u64>()
                .map(BodyKind::Length)
                .map_err(|_| ResponseError::InvalidContentLength {
                    value: value.to_owned(),
                }),
            None => Ok(BodyKind::CloseDelimited),
        }
    }
}

/// Longest chunk-size or trailer line we buffer before giving up.
const MAX_CHUNK_LINE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(u64),
    DataEnd,
    Trailers,
    Done,
}

/// Incremental decoder for `Transfer-Encoding: chunked` bodies.
///
/// Feed it the connection's read buffer; each call to [`decode`](Self::decode)
/// consumes framing bytes and returns the next run of payload bytes, or
/// `None` when more input is needed.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use streamprobe::http::ChunkedDecoder;
///
/// let mut buf = BytesMut::from(&b"5\r\nhello\r\n0\r\n\r\n"[..]);
/// let mut decoder = ChunkedDecoder::new();
///
/// assert_eq!(decoder.decode(&mut buf).unwrap().as_deref(), Some(&b"hello"[..]));
/// assert_eq!(decoder.decode(&mut buf).unwrap(), None);
/// assert!(decoder.is_done());
/// ```
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: ChunkState,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self {
            state: ChunkState::Size,
        }
    }

    /// Returns `true` once the terminating zero-size chunk and trailers are consumed.
    pub fn is_done(&self) -> bool {
        self.state == ChunkState::Done
    }

    /// Consumes as much of `buf` as possible and returns the next payload slice.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, ResponseError> {
        loop {
            match self.state {
                ChunkState::Size => {
                    let Some(line) = take_line(buf)? else {
                        return Ok(None);
                    };
                    let size_field = line[..].split(|&b| b == b';').next().unwrap_or_default();
                    let size_str = std::str::from_utf8(size_field)
                        .map_err(|_| ResponseError::InvalidChunk {
                            reason: "chunk size is not ASCII",
                        })?
                        .trim();
                    let size = u64::from_str_radix(size_str, 16).map_err(|_| {
                        ResponseError::InvalidChunk {
                            reason: "chunk size is not hexadecimal",
                        }
                    })?;
                    self.state = if size == 0 {
                        ChunkState::Trailers
                    } else {
                        ChunkState::Data(size)
                    };
                }
                ChunkState::Data(remaining) => {
                    if buf.is_empty() {
                        return Ok(None);
                    }
                    let n = remaining.min(buf.len() as u64) as usize;
                    let data = buf.split_to(n).freeze();
                    let left = remaining - n as u64;
                    self.state = if left == 0 {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data(left)
                    };
                    return Ok(Some(data));
                }
                ChunkState::DataEnd => {
                    if buf.len() < 2 {
                        return Ok(None);
                    }
                    if &buf[..2] != b"\r\n" {
                        return Err(ResponseError::InvalidChunk {
                            reason: "chunk data not followed by CRLF",
                        });
                    }
                    buf.advance(2);
                    self.state = ChunkState::Size;
                }
                ChunkState::Trailers => {
                    let Some(line) = take_line(buf)? else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        self.state = ChunkState::Done;
                    }
                }
                ChunkState::Done => return Ok(None),
            }
        }
    }
}

/// Splits one CRLF-terminated line off the front of `buf`, without the CRLF.
fn take_line(buf: &mut BytesMut) -> Result<Option<BytesMut>, ResponseError> {
    match buf.windows(2).position(|w| w == b"\r\n") {
        Some(pos) => {
            let line = buf.split_to(pos);
            buf.advance(2);
            Ok(Some(line))
        }
        None if buf.len() > MAX_CHUNK_LINE => Err(ResponseError::InvalidChunk {
            reason: "chunk line too long",
        }),
        None => Ok(None),
    }
}
