//! # streamprobe
//!
//! A cross-origin request and Server-Sent Events probe, built on a
//! from-scratch async HTTP/1.1 client.
//!
//! It does what a test page does on load: send one cross-origin `GET` to an
//! API origin, open one event stream for a resource, and render each
//! received message as `message: <data>` in an ordered list.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use streamprobe::config::ConnectionConfig;
//! use streamprobe::page::{MessageList, StreamPageClient};
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::new(Url::parse("http://api.dev.test")?, "abc")
//!         .with_header_priming("token");
//!     let mut page = StreamPageClient::new(config, MessageList::new())?;
//!     let rendered = page.run().await?;
//!     println!("{rendered} messages rendered");
//!     Ok(())
//! }
//! ```

// ── Wire layer ────────────────────────────────────────────────────────────────
pub mod client;
pub mod http;
pub mod security;
pub mod sse;

// ── Page layer ────────────────────────────────────────────────────────────────
pub mod config;
pub mod error;
pub mod page;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use client::HttpClient;
pub use config::{ClientSettings, ConnectionConfig, StreamMode};
pub use error::ConnectionError;
pub use page::{ListContainer, MessageList, RenderedListItem, StreamPageClient};
pub use sse::{EventSource, StreamMessage};
