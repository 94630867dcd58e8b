//! The stream page client.
//!
//! Mirrors what the probe page does on load: one fire-and-forget
//! cross-origin request, one event-stream subscription, one list item per
//! message.

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::{ListContainer, RenderedListItem};
use crate::client::{FetchResponse, HttpClient};
use crate::config::{ClientSettings, ConfigError, ConnectionConfig, StreamMode};
use crate::error::{ConnectionError, Result};
use crate::http::{Headers, Request};
use crate::security::CorsCheck;
use crate::sse::{EventSource, StreamMessage};

/// Lifecycle of a [`StreamPageClient`]. There is no way back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting,
    Streaming,
}

/// Connects a page to the remote origin and renders its messages.
///
/// The client owns its configuration, HTTP client and list container; it
/// holds at most one stream subscription over its lifetime.
///
/// # Examples
///
/// ```rust,no_run
/// use streamprobe::config::ConnectionConfig;
/// use streamprobe::page::{MessageList, StreamPageClient};
/// use url::Url;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ConnectionConfig::new(
///         Url::parse("http://api.dev.test")?,
///         "63d61a5319a9f178d5652b4b",
///     );
///     let mut page = StreamPageClient::new(config, MessageList::new())?;
///     page.run().await?;
///     for text in page.container().texts() {
///         println!("{text}");
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct StreamPageClient<C> {
    config: ConnectionConfig,
    http: HttpClient,
    container: C,
    state: ClientState,
}

impl<C: ListContainer> StreamPageClient<C> {
    /// Builds a client with default transport settings.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Config`] if `config` does not validate.
    pub fn new(config: ConnectionConfig, container: C) -> Result<Self> {
        Self::with_settings(config, ClientSettings::default(), container)
    }

    /// Builds a client with explicit transport settings. CORS enforcement is
    /// switched on when the config names a page origin.
    pub fn with_settings(
        config: ConnectionConfig,
        settings: ClientSettings,
        container: C,
    ) -> Result<Self> {
        config.validate()?;
        let mut http = HttpClient::new(settings);
        if let Some(origin) = config.page_origin_header() {
            http = http.with_cors(CorsCheck::new(origin));
        }
        Ok(Self {
            config,
            http,
            container,
            state: ClientState::Idle,
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn container(&self) -> &C {
        &self.container
    }

    pub fn into_container(self) -> C {
        self.container
    }

    /// The startup request, with its outcome returned.
    pub async fn probe(&self) -> Result<FetchResponse> {
        self.http.fetch(startup(&self.config.origin)).await
    }

    /// Logs a startup marker and sends one `GET` to the origin. The response
    /// body is logged; failures are logged at debug level and otherwise
    /// dropped.
    pub async fn initialize(&self) {
        startup_request(self.http.clone(), self.config.origin.clone()).await;
    }

    /// Starts [`initialize`](Self::initialize) on its own task and returns
    /// at once. Nothing waits for the task; its outcome is only logged.
    pub fn spawn_initialize(&self) -> JoinHandle<()> {
        tokio::spawn(startup_request(
            self.http.clone(),
            self.config.origin.clone(),
        ))
    }

    /// Opens the page's single event stream using the configured
    /// [`StreamMode`].
    ///
    /// # Errors
    ///
    /// [`ConnectionError::AlreadySubscribed`] on any call after the first,
    /// including after a failed first attempt; otherwise whatever opening
    /// the stream fails with.
    pub async fn open_stream(&mut self) -> Result<EventSource> {
        if self.state != ClientState::Idle {
            return Err(ConnectionError::AlreadySubscribed);
        }
        self.state = ClientState::Connecting;

        let source = match self.config.mode {
            StreamMode::Direct => self.open_direct().await?,
            StreamMode::HeaderPriming => self.open_primed().await?,
        };

        self.state = ClientState::Streaming;
        Ok(source)
    }

    async fn open_direct(&self) -> Result<EventSource> {
        let url = self.config.stream_url()?;
        debug!(%url, "opening event stream");
        EventSource::connect(&self.http, url, Headers::new()).await
    }

    async fn open_primed(&self) -> Result<EventSource> {
        let url = self.config.stream_url()?;
        let token = self
            .config
            .token
            .as_deref()
            .ok_or_else(|| ConfigError::Invalid {
                field: "token",
                reason: "header-priming mode needs a bearer token".to_owned(),
            })?;

        // Completes once the head arrives; the body is dropped unread.
        let primed = self
            .http
            .open(Request::get(url.clone()).bearer_auth(token))
            .await?;
        let resolved = primed.url.clone();
        info!(requested = %url, %resolved, status = %primed.status, "priming request completed");
        drop(primed);

        let mut headers = Headers::new();
        if self.config.forward_authorization {
            headers.insert("Authorization", format!("Bearer {token}"));
        } else {
            warn!(
                url = %resolved,
                "event stream opened without Authorization; only the priming request carried the token"
            );
        }
        EventSource::connect(&self.http, resolved, headers).await
    }

    /// Logs `message` and appends its rendered item.
    pub fn on_message(&mut self, message: &StreamMessage) {
        info!(data = %message.data, "message received");
        self.container.append(RenderedListItem::from_message(message));
    }

    /// Runs the whole page: the startup request is fired off in the
    /// background, the stream opens without waiting for it, then every
    /// message is rendered in receipt order until the server closes the
    /// stream.
    ///
    /// Returns the number of messages rendered.
    pub async fn run(&mut self) -> Result<usize> {
        self.spawn_initialize();
        let source = self.open_stream().await?;
        let rendered = source.subscribe(|message| self.on_message(&message)).await?;
        info!(rendered, "event stream ended");
        Ok(rendered)
    }
}

fn startup(origin: &Url) -> Request {
    Request::get(origin.clone()).header("Accept", "*/*")
}

async fn startup_request(http: HttpClient, origin: Url) {
    info!(%origin, "streamprobe page starting");
    match http.fetch(startup(&origin)).await {
        Ok(response) => {
            info!(status = %response.status, body = %response.text(), "origin responded");
        }
        Err(e) => {
            debug!(%origin, error = %e, "startup request failed");
        }
    }
}
