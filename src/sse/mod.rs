//! Server-Sent Events: decoding and subscription.
//!
//! - [`SseDecoder`] turns `text/event-stream` bytes into [`MessageEvent`]s.
//! - [`EventSource`] opens a stream over [`HttpClient`](crate::client::HttpClient)
//!   and hands out the `message` events as [`StreamMessage`]s.

use serde::Serialize;

pub mod decoder;
pub mod source;

pub use decoder::{SseDecoder, SseError};
pub use source::EventSource;

/// The `Content-Type` an event stream must be served with.
pub const EVENT_STREAM_MIME: &str = "text/event-stream";

/// A decoded event of any type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageEvent {
    /// `message` unless the event set an `event:` field.
    pub event_type: String,
    pub data: String,
    pub last_event_id: String,
}

impl MessageEvent {
    pub fn is_message(&self) -> bool {
        self.event_type == "message"
    }

    /// The payload of a `message` event; other types yield `None`.
    pub fn into_message(self) -> Option<StreamMessage> {
        self.is_message().then_some(StreamMessage { data: self.data })
    }
}

/// The opaque text payload of one `message` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamMessage {
    pub data: String,
}

impl StreamMessage {
    pub fn new(data: impl Into<String>) -> Self {
        Self { data: data.into() }
    }
}
