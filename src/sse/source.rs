//! A single event-stream subscription.

use std::collections::VecDeque;
use std::time::Duration;

use futures::Stream;
use tracing::{debug, info, trace};
use url::Url;

use super::{EVENT_STREAM_MIME, MessageEvent, SseDecoder, StreamMessage};
use crate::client::{Body, HttpClient};
use crate::error::{ConnectionError, Result};
use crate::http::{Headers, Request, StatusCode};

/// An open event stream.
///
/// The sequence of messages is lazy, unbounded and non-restartable: pulling
/// with [`next_message`](Self::next_message) reads from the connection on
/// demand, and [`subscribe`](Self::subscribe) / [`into_stream`](Self::into_stream)
/// consume the source. There is no reconnection; when the server closes the
/// connection the sequence ends.
///
/// # Examples
///
/// ```rust,no_run
/// use streamprobe::client::HttpClient;
/// use streamprobe::http::Headers;
/// use streamprobe::sse::EventSource;
/// use url::Url;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = HttpClient::default();
///     let url = Url::parse("http://api.dev.test/stream/63d61a5319a9f178d5652b4b")?;
///     let source = EventSource::connect(&client, url, Headers::new()).await?;
///     let count = source.subscribe(|m| println!("message: {}", m.data)).await?;
///     println!("{count} messages");
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct EventSource {
    url: Url,
    body: Body,
    decoder: SseDecoder,
    pending: VecDeque<MessageEvent>,
    closed: bool,
}

impl EventSource {
    /// Opens an event stream at `url`.
    ///
    /// The request carries `Accept: text/event-stream`, `Cache-Control: no-cache`
    /// and exactly the `extra` headers given; nothing else is added.
    ///
    /// # Errors
    ///
    /// Transport failures, [`ConnectionError::UnexpectedStatus`] for anything
    /// but `200`, and [`ConnectionError::NotEventStream`] for a wrong
    /// `Content-Type`.
    pub async fn connect(
        client: &HttpClient,
        url: Url,
        extra: Headers,
    ) -> Result<Self> {
        let mut request = Request::get(url)
            .header("Accept", EVENT_STREAM_MIME)
            .header("Cache-Control", "no-cache");
        for (name, value) in extra.iter() {
            request.headers_mut().set(name, value);
        }

        let response = client.open(request).await?;
        if response.status != StatusCode::OK {
            return Err(ConnectionError::UnexpectedStatus {
                status: response.status,
                url: response.url,
            });
        }
        let content_type = response.content_type();
        if content_type.as_deref() != Some(EVENT_STREAM_MIME) {
            return Err(ConnectionError::NotEventStream {
                url: response.url,
                content_type,
            });
        }

        info!(url = %response.url, redirected = response.redirected, "event stream open");
        Ok(Self::from_body(response.url, response.body))
    }

    /// Wraps an already-open event-stream body.
    pub fn from_body(url: Url, body: Body) -> Self {
        Self {
            url,
            body,
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            closed: false,
        }
    }

    /// The URL the stream is connected to, after redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn last_event_id(&self) -> &str {
        self.decoder.last_event_id()
    }

    /// The server's reconnection hint. Recorded only; nothing reconnects.
    pub fn retry(&self) -> Option<Duration> {
        self.decoder.retry()
    }

    /// The next event of any type, or `None` once the server has closed the
    /// stream. A transport error ends the stream after it is returned.
    pub async fn next_event(&mut self) -> Option<Result<MessageEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.closed {
                return None;
            }

            match self.body.chunk().await {
                Ok(Some(bytes)) => {
                    trace!(len = bytes.len(), "event stream chunk");
                    match self.decoder.feed(&bytes) {
                        Ok(events) => self.pending.extend(events),
                        Err(e) => {
                            self.closed = true;
                            return Some(Err(e.into()));
                        }
                    }
                }
                Ok(None) => {
                    debug!(url = %self.url, "event stream closed by server");
                    self.decoder.finish();
                    self.closed = true;
                }
                Err(e) => {
                    self.closed = true;
                    return Some(Err(e));
                }
            }
        }
    }

    /// The next `message` event; events of other types are skipped.
    pub async fn next_message(&mut self) -> Option<Result<StreamMessage>> {
        loop {
            match self.next_event().await? {
                Ok(event) => match event.into_message() {
                    Some(message) => return Some(Ok(message)),
                    None => trace!("skipping non-message event"),
                },
                Err(e) => return Some(Err(e)),
            }
        }
    }

    /// Delivers every message to `handler`, in receipt order, until the
    /// stream ends. Returns how many messages were delivered.
    pub async fn subscribe<F>(mut self, mut handler: F) -> Result<usize>
    where
        F: FnMut(StreamMessage),
    {
        let mut delivered = 0;
        while let Some(message) = self.next_message().await {
            handler(message?);
            delivered += 1;
        }
        Ok(delivered)
    }

    /// The messages as a [`Stream`].
    pub fn into_stream(
        self,
    ) -> impl Stream<Item = Result<StreamMessage>> + Send {
        futures::stream::unfold(self, |mut source| async move {
            source.next_message().await.map(|item| (item, source))
        })
    }
}
