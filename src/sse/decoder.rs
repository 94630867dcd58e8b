//! Incremental `text/event-stream` decoder.
//!
//! Bytes arrive in arbitrary pieces; the decoder buffers partial lines and
//! emits a [`MessageEvent`] each time a blank line closes an event with data.

use std::time::Duration;

use bytes::{Buf, BytesMut};
use thiserror::Error;

use super::MessageEvent;

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Longest line buffered while waiting for its terminator (64 KiB).
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Errors raised while decoding an event stream.
#[derive(Debug, Error)]
pub enum SseError {
    #[error("event-stream line exceeds {limit} bytes without a terminator")]
    LineTooLong { limit: usize },
}

/// Event-stream interpreter state.
///
/// # Examples
///
/// ```
/// use streamprobe::sse::SseDecoder;
///
/// let mut decoder = SseDecoder::new();
/// assert!(decoder.feed(b"data: hel").unwrap().is_empty());
///
/// let events = decoder.feed(b"lo\n\n").unwrap();
/// assert_eq!(events.len(), 1);
/// assert_eq!(events[0].event_type, "message");
/// assert_eq!(events[0].data, "hello");
/// ```
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: BytesMut,
    data: String,
    event_type: String,
    last_event_id: String,
    retry: Option<Duration>,
    bom_checked: bool,
    /// The previous line ended in `\r`; a `\n` at the front of the next
    /// input belongs to that terminator.
    skip_lf: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last event ID seen, carried across events.
    pub fn last_event_id(&self) -> &str {
        &self.last_event_id
    }

    /// The most recent valid `retry:` hint.
    pub fn retry(&self) -> Option<Duration> {
        self.retry
    }

    /// Decodes `chunk` and returns every event it completes, in order.
    ///
    /// # Errors
    ///
    /// [`SseError::LineTooLong`] once an unterminated line grows past
    /// [`MAX_LINE_LEN`].
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<MessageEvent>, SseError> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();

        if !self.bom_checked {
            if self.buf.len() < BOM.len() && BOM.starts_with(&self.buf) {
                return Ok(events);
            }
            if self.buf.starts_with(BOM) {
                self.buf.advance(BOM.len());
            }
            self.bom_checked = true;
        }

        loop {
            if self.skip_lf && !self.buf.is_empty() {
                if self.buf[0] == b'\n' {
                    self.buf.advance(1);
                }
                self.skip_lf = false;
            }

            let Some(pos) = self.buf.iter().position(|&b| b == b'\n' || b == b'\r') else {
                break;
            };
            let line = self.buf.split_to(pos);
            let terminator = self.buf[0];
            self.buf.advance(1);
            if terminator == b'\r' {
                self.skip_lf = true;
            }

            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        if self.buf.len() > MAX_LINE_LEN {
            return Err(SseError::LineTooLong {
                limit: MAX_LINE_LEN,
            });
        }
        Ok(events)
    }

    /// Ends the stream. A trailing event without its blank line is discarded.
    pub fn finish(&mut self) {
        self.buf.clear();
        self.data.clear();
        self.event_type.clear();
        self.skip_lf = false;
    }

    fn process_line(&mut self, line: &str) -> Option<MessageEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => {
                self.event_type.clear();
                self.event_type.push_str(value);
            }
            "data" => {
                self.data.push_str(value);
                self.data.push('\n');
            }
            "id" => {
                if !value.contains('\0') {
                    self.last_event_id.clear();
                    self.last_event_id.push_str(value);
                }
            }
            "retry" => {
                if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                    if let Ok(ms) = value.parse::<u64>() {
                        self.retry = Some(Duration::from_millis(ms));
                    }
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<MessageEvent> {
        if self.data.is_empty() {
            self.event_type.clear();
            return None;
        }
        if self.data.ends_with('\n') {
            self.data.pop();
        }

        let event_type = if self.event_type.is_empty() {
            "message".to_owned()
        } else {
            std::mem::take(&mut self.event_type)
        };
        Some(MessageEvent {
            event_type,
            data: std::mem::take(&mut self.data),
            last_event_id: self.last_event_id.clone(),
        })
    }
}
