//! The page side: where received messages are rendered.
//!
//! A page owns one ordered list container. Every `message` event becomes one
//! [`RenderedListItem`] appended to it; items are never removed.

use serde::Serialize;

use crate::sse::StreamMessage;

pub mod client;

pub use client::{ClientState, StreamPageClient};

/// One rendered list entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedListItem {
    pub text: String,
}

impl RenderedListItem {
    /// Renders `message` as `message: <data>`, with the data verbatim.
    ///
    /// ```
    /// use streamprobe::page::RenderedListItem;
    /// use streamprobe::sse::StreamMessage;
    ///
    /// let item = RenderedListItem::from_message(&StreamMessage::new("hello"));
    /// assert_eq!(item.text, "message: hello");
    /// ```
    pub fn from_message(message: &StreamMessage) -> Self {
        Self {
            text: format!("message: {}", message.data),
        }
    }
}

/// An ordered, append-only list that rendered items are attached to.
pub trait ListContainer {
    fn append(&mut self, item: RenderedListItem);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C: ListContainer + ?Sized> ListContainer for &mut C {
    fn append(&mut self, item: RenderedListItem) {
        (**self).append(item);
    }

    fn len(&self) -> usize {
        (**self).len()
    }
}

/// In-memory [`ListContainer`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessageList {
    items: Vec<RenderedListItem>,
}

impl MessageList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[RenderedListItem] {
        &self.items
    }

    /// The rendered texts, in append order.
    pub fn texts(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.text.as_str()).collect()
    }
}

impl ListContainer for MessageList {
    fn append(&mut self, item: RenderedListItem) {
        self.items.push(item);
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}
