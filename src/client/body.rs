//! Incremental response bodies.

use std::fmt;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ConnectionError, Result};
use crate::http::{BodyKind, ChunkedDecoder};

/// Initial read buffer capacity per body.
const INITIAL_BUF_SIZE: usize = 4096;

type Reader = Box<dyn AsyncRead + Send + Unpin>;

/// A response body read incrementally from its connection.
///
/// `buf` starts out holding whatever arrived together with the response head.
/// The connection is closed when the body is dropped.
pub struct Body {
    reader: Reader,
    buf: BytesMut,
    kind: BodyKind,
    remaining: u64,
    chunked: ChunkedDecoder,
    done: bool,
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body")
            .field("kind", &self.kind)
            .field("buffered", &self.buf.len())
            .field("done", &self.done)
            .finish()
    }
}

impl Body {
    /// Wraps `reader`, with `buffered` bytes already read past the head.
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        buffered: BytesMut,
        kind: BodyKind,
    ) -> Self {
        let remaining = match kind {
            BodyKind::Length(n) => n,
            _ => 0,
        };
        Self {
            reader: Box::new(reader),
            buf: buffered,
            kind,
            remaining,
            chunked: ChunkedDecoder::new(),
            done: kind == BodyKind::Empty,
        }
    }

    pub fn kind(&self) -> BodyKind {
        self.kind
    }

    /// Returns the next run of payload bytes, or `None` at the end of the body.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            if self.done {
                return Ok(None);
            }

            match self.kind {
                BodyKind::Empty => {
                    self.done = true;
                }
                BodyKind::Length(_) => {
                    if self.remaining == 0 {
                        self.done = true;
                        continue;
                    }
                    if !self.buf.is_empty() {
                        let n = self.remaining.min(self.buf.len() as u64) as usize;
                        self.remaining -= n as u64;
                        return Ok(Some(self.buf.split_to(n).freeze()));
                    }
                    if self.fill().await? == 0 {
                        return Err(ConnectionError::MalformedResponse {
                            reason: "connection closed before Content-Length was reached",
                        });
                    }
                }
                BodyKind::Chunked => {
                    if let Some(data) = self.chunked.decode(&mut self.buf)? {
                        return Ok(Some(data));
                    }
                    if self.chunked.is_done() {
                        self.done = true;
                        continue;
                    }
                    if self.fill().await? == 0 {
                        return Err(ConnectionError::MalformedResponse {
                            reason: "connection closed inside a chunked body",
                        });
                    }
                }
                BodyKind::CloseDelimited => {
                    if !self.buf.is_empty() {
                        return Ok(Some(self.buf.split().freeze()));
                    }
                    if self.fill().await? == 0 {
                        self.done = true;
                    }
                }
            }
        }
    }

    /// Reads the whole body, failing once it grows past `max_bytes`.
    pub async fn collect(mut self, max_bytes: usize) -> Result<Bytes> {
        if let BodyKind::Length(n) = self.kind {
            if n > max_bytes as u64 {
                return Err(ConnectionError::BodyTooLarge { max_bytes });
            }
        }

        let mut out = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            if out.len() + chunk.len() > max_bytes {
                return Err(ConnectionError::BodyTooLarge { max_bytes });
            }
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }

    async fn fill(&mut self) -> Result<usize> {
        if self.buf.capacity() - self.buf.len() < 512 {
            self.buf.reserve(INITIAL_BUF_SIZE);
        }
        Ok(self.reader.read_buf(&mut self.buf).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn body(rest: &[u8], kind: BodyKind) -> Body {
        Body::new(Cursor::new(rest.to_vec()), BytesMut::new(), kind)
    }

    #[tokio::test]
    async fn length_body_stops_at_content_length() {
        let b = Body::new(
            Cursor::new(b"lo world, and more".to_vec()),
            BytesMut::from(&b"hel"[..]),
            BodyKind::Length(11),
        );
        let all = b.collect(1024).await.unwrap();
        assert_eq!(&all[..], b"hello world");
    }

    #[tokio::test]
    async fn short_length_body_is_an_error() {
        let b = body(b"abc", BodyKind::Length(10));
        assert!(matches!(
            b.collect(1024).await,
            Err(ConnectionError::MalformedResponse { .. })
        ));
    }

    #[tokio::test]
    async fn chunked_body() {
        let b = body(b"3\r\nfoo\r\n3\r\nbar\r\n0\r\n\r\n", BodyKind::Chunked);
        assert_eq!(&b.collect(1024).await.unwrap()[..], b"foobar");
    }

    #[tokio::test]
    async fn close_delimited_reads_to_eof() {
        let b = body(b"data: x\n\n", BodyKind::CloseDelimited);
        assert_eq!(&b.collect(1024).await.unwrap()[..], b"data: x\n\n");
    }

    #[tokio::test]
    async fn empty_body_yields_nothing() {
        let mut b = body(b"ignored", BodyKind::Empty);
        assert!(b.chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn body_limit_is_enforced() {
        let b = body(&[b'x'; 64], BodyKind::CloseDelimited);
        assert!(matches!(
            b.collect(16).await,
            Err(ConnectionError::BodyTooLarge { max_bytes: 16 })
        ));

        let b = body(&[b'x'; 64], BodyKind::Length(64));
        assert!(matches!(
            b.collect(16).await,
            Err(ConnectionError::BodyTooLarge { .. })
        ));
    }
}
